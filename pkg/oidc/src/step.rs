use std::collections::HashMap;

use async_trait::async_trait;
use http::Response;

use crate::claims::{ClaimSet, IdTokenClaims, RawClaims};
use crate::discovery::ProviderContext;
use crate::error::Rejection;
use crate::policy::ClaimsPolicy;
use crate::provider::TokenResponse;

/// Ordered query parameters of the authorization request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizeParams(Vec<(String, String)>);

impl AuthorizeParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `name`, replacing an earlier value of the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(param) => param.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Appends `name` when `value` is set and not blank.
    pub fn push_opt(&mut self, name: &str, value: Option<&str>) {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.push(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// A request below the relying party prefix that is neither the login nor
/// the callback route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OtherRequest {
    pub path: String,
    /// Query and form parameters.
    pub params: HashMap<String, String>,
    /// Raw ID Token of the visitor's session, if the host kept one.
    pub id_token_hint: Option<String>,
}

impl OtherRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Whether the path is `route` or lies below it. `route` must end on a
    /// segment boundary, `/logoutx` is not below `/logout`.
    pub fn is_under(&self, route: &str) -> bool {
        let route = route.trim_end_matches('/');
        match self.path.strip_prefix(route) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// A layer of the login flow.
///
/// Steps are composed in order when the relying party is built. Each hook
/// runs for every step before the flow moves on; the first error rejects the
/// login.
#[async_trait]
pub trait FlowStep: Send + Sync {
    /// Adds parameters to the authorization request.
    fn authorize_params(&self, _params: &mut AuthorizeParams) {}

    /// Runs after the code exchange, before the ID Token is decoded.
    fn before_verify(&self, _tokens: &TokenResponse) -> Result<(), Rejection> {
        Ok(())
    }

    /// Runs once the ID Token is decoded and verified.
    fn after_token_decode(&self, _id_token: &ClaimSet<IdTokenClaims>) -> Result<(), Rejection> {
        Ok(())
    }

    /// Runs on the user-info claims before the identity is built.
    fn after_userinfo(&self, _userinfo: &RawClaims) -> Result<(), Rejection> {
        Ok(())
    }

    /// Answers a request the flow itself does not serve. `None` passes the
    /// request on to the next step, and finally to the host.
    async fn handle_other_request(
        &self,
        _request: &OtherRequest,
        _provider: &ProviderContext<'_>,
    ) -> Result<Option<Response<String>>, Rejection> {
        Ok(None)
    }
}

/// Requests claims from the provider and enforces the essential ones.
#[derive(Debug, Clone)]
pub struct ClaimsStep {
    policy: ClaimsPolicy,
}

impl ClaimsStep {
    pub fn new(policy: ClaimsPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl FlowStep for ClaimsStep {
    fn authorize_params(&self, params: &mut AuthorizeParams) {
        if let Some(claims) = self.policy.authorization_param() {
            params.push("claims", claims);
        }
    }

    fn after_token_decode(&self, id_token: &ClaimSet<IdTokenClaims>) -> Result<(), Rejection> {
        Ok(self.policy.verify_id_token_claims(id_token)?)
    }

    fn after_userinfo(&self, userinfo: &RawClaims) -> Result<(), Rejection> {
        Ok(self.policy.verify_userinfo_claims(userinfo)?)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::{Value, json};

    use super::*;
    use crate::claims::tests::fixture_id_token_claims;
    use crate::policy::ClaimsConfig;

    fn step(claims: Value) -> ClaimsStep {
        let policy = ClaimsPolicy::from_config(&ClaimsConfig::Text(claims.to_string())).unwrap();
        ClaimsStep::new(policy)
    }

    fn raw(value: Value) -> RawClaims {
        let Value::Object(raw) = value else {
            unreachable!()
        };
        raw
    }

    #[rstest]
    #[case::exact("/auth/openid_connect/logout", true)]
    #[case::trailing_slash("/auth/openid_connect/logout/", true)]
    #[case::below("/auth/openid_connect/logout/done", true)]
    #[case::same_prefix("/auth/openid_connect/logoutx", false)]
    #[case::other("/auth/openid_connect/profile", false)]
    fn test_is_under(#[case] path: &str, #[case] expected: bool) {
        let request = OtherRequest {
            path: path.to_string(),
            ..Default::default()
        };

        assert_eq!(request.is_under("/auth/openid_connect/logout"), expected);
    }

    #[test]
    fn test_authorize_params_replace() {
        // given
        let mut params = AuthorizeParams::new();

        // when
        params.push("prompt", "login");
        params.push("scope", "openid");
        params.push("prompt", "none");
        params.push_opt("login_hint", Some("  "));

        // then
        assert_eq!(
            params.iter().collect::<Vec<_>>(),
            vec![("prompt", "none"), ("scope", "openid")]
        );
    }

    #[test]
    fn test_claims_param() {
        // given
        let step = step(json!({ "id_token": { "acr": { "essential": true } } }));
        let mut params = AuthorizeParams::new();

        // when
        step.authorize_params(&mut params);

        // then
        let sent: Value = serde_json::from_str(params.get("claims").unwrap()).unwrap();
        assert_eq!(sent, json!({ "id_token": { "acr": { "essential": true } } }));
    }

    #[test]
    fn test_no_claims_param_without_claims() {
        let step = ClaimsStep::new(ClaimsPolicy::default());
        let mut params = AuthorizeParams::new();

        step.authorize_params(&mut params);

        assert_eq!(params.get("claims"), None);
    }

    #[test]
    fn test_essential_id_token_claim_rejects() {
        // given
        let step = step(json!({ "id_token": { "acr": { "essential": true, "values": ["phr"] } } }));
        let id_token = ClaimSet::from_raw(fixture_id_token_claims()).unwrap();

        // when
        let got = step.after_token_decode(&id_token);

        // then
        assert_eq!(got.unwrap_err().kind(), "essential_claim_not_satisfied");
    }

    #[test]
    fn test_essential_userinfo_claim() {
        // given
        let step = step(json!({ "userinfo": { "email": { "essential": true } } }));

        // then
        assert!(step.after_userinfo(&raw(json!({ "email": "a@b.c" }))).is_ok());
    }
}
