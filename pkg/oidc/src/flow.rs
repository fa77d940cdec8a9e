//! The authorization code flow.
//!
//! A login moves through `Idle → Redirecting → AwaitingCallback` and ends
//! either authenticated or rejected:
//!
//! - [`RelyingParty::begin_login`] issues `state` and `nonce`, stores them in
//!   the visitor's session and builds the authorization redirect.
//! - [`RelyingParty::complete_login`] consumes both exactly once and resolves
//!   the callback: provider error, state mismatch, missing code, then code
//!   exchange and token verification.

use std::marker::PhantomData;
use std::sync::Arc;

use base64::Engine as _;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use http::Response;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::backchannel::{BackchannelDispatcher, BackchannelStep, LogoutHandler};
use crate::claims::{IdTokenClaims, RawClaims};
use crate::clock::{Now, SystemNow};
use crate::config::OidcConfig;
use crate::discovery::ProviderContext;
use crate::end_session::EndSessionStep;
use crate::error::{ConfigError, Rejection, VerificationError};
use crate::id_token::{ExpectedIdToken, IdTokenVerifier};
use crate::policy::ClaimsPolicy;
use crate::provider::{ProviderClient, TokenRequest};
use crate::random::{RandomSource, SecureRandom};
use crate::session::{CODE_VERIFIER_KEY, NONCE_KEY, SID_KEY, STATE_KEY, SessionStore};
use crate::step::{AuthorizeParams, ClaimsStep, FlowStep, OtherRequest};
use crate::userinfo::{AuthenticatedIdentity, Credentials};

/// Request phase parameters that override the configured values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoginParams {
    pub login_hint: Option<String>,
    pub ui_locales: Option<String>,
    pub claims_locales: Option<String>,
    pub prompt: Option<String>,
    /// Where the host sends the visitor after the login. Carried through the
    /// provider as a parameter of the redirect uri.
    pub redirect_uri: Option<String>,
}

/// Parameters the provider redirects back with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_reason: Option<String>,
    pub error_description: Option<String>,
    pub error_uri: Option<String>,
    pub redirect_uri: Option<String>,
}

/// Where to send the visitor to log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRedirect {
    pub url: String,
}

/// An OpenID Connect relying party.
///
/// Random values and the clock are type parameters, the visitor session is
/// passed into each call. Behavior beyond the core flow is layered on with
/// [`FlowStep`]s, run in the order they were added.
pub struct RelyingParty<P: ProviderClient, R: RandomSource = SecureRandom, N: Now = SystemNow> {
    config: Arc<OidcConfig>,
    provider: Arc<P>,
    steps: Vec<Arc<dyn FlowStep>>,
    backchannel: Option<Arc<BackchannelDispatcher<N>>>,
    verifier: IdTokenVerifier,
    _marker: PhantomData<(R, N)>,
}

impl<P, R, N> RelyingParty<P, R, N>
where
    P: ProviderClient,
    R: RandomSource,
    N: Now,
{
    /// Builds the relying party with the claims and end-session steps.
    ///
    /// # Errors
    /// - the configuration does not validate
    /// - the claims request cannot be parsed
    pub fn new(config: OidcConfig, provider: P) -> Result<Self, ConfigError> {
        config.validate()?;
        let claims = ClaimsPolicy::from_config(&config.claims)?;
        let end_session =
            EndSessionStep::new(config.logout_path(), config.post_logout_redirect_uri.clone());

        Ok(Self {
            config: Arc::new(config),
            provider: Arc::new(provider),
            steps: vec![Arc::new(ClaimsStep::new(claims)), Arc::new(end_session)],
            backchannel: None,
            verifier: IdTokenVerifier,
            _marker: PhantomData,
        })
    }

    /// Appends a step after the ones already configured.
    pub fn with_step(mut self, step: impl FlowStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Serves backchannel logout on [`OidcConfig::backchannel_logout_path`],
    /// handing verified logout tokens to `handler`.
    pub fn with_backchannel_logout(mut self, handler: Arc<dyn LogoutHandler>) -> Self {
        let provider: Arc<dyn ProviderClient> = self.provider.clone();
        let dispatcher = Arc::new(BackchannelDispatcher::new(
            Arc::clone(&self.config),
            provider,
            handler,
        ));
        let step = BackchannelStep::new(
            self.config.backchannel_logout_path(),
            Arc::clone(&dispatcher),
        );
        self.steps.push(Arc::new(step));
        self.backchannel = Some(dispatcher);
        self
    }

    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    pub fn backchannel(&self) -> Option<&BackchannelDispatcher<N>> {
        self.backchannel.as_deref()
    }

    fn provider_context(&self) -> ProviderContext<'_> {
        ProviderContext::new(&self.config, self.provider.as_ref())
    }

    /// The redirect uri sent to the provider, carrying the host's own
    /// redirect target when one was requested.
    fn redirect_uri(&self, requested: Option<&str>) -> String {
        let configured = &self.config.client.redirect_uri;
        match non_blank(requested) {
            Some(target) => {
                let escaped: String = byte_serialize(target.as_bytes()).collect();
                format!("{configured}?redirect_uri={escaped}")
            }
            None => configured.clone(),
        }
    }

    /// Starts a login: stores fresh `state` and `nonce` in `session` and
    /// returns the authorization redirect.
    ///
    /// # Errors
    /// - provider resolution fails
    /// - the authorization endpoint is not a valid URL
    #[instrument(skip_all, err)]
    pub async fn begin_login(
        &self,
        session: &dyn SessionStore,
        params: &LoginParams,
    ) -> Result<AuthorizationRedirect, Rejection> {
        let config = &self.config;
        let resolved = self.provider_context().resolve().await?;

        let state = R::state();
        session.set(STATE_KEY, state.clone()).await;

        let mut query = AuthorizeParams::new();
        query.push("client_id", &config.client.identifier);
        query.push("response_type", &config.response_type);
        query.push("redirect_uri", self.redirect_uri(params.redirect_uri.as_deref()));
        query.push("scope", config.scope.join(" "));
        query.push("state", state);
        query.push_opt("response_mode", config.response_mode.as_deref());

        let overridable = [
            ("login_hint", &params.login_hint, &config.login_hint),
            ("ui_locales", &params.ui_locales, &config.ui_locales),
            ("claims_locales", &params.claims_locales, &config.claims_locales),
            ("prompt", &params.prompt, &config.prompt),
        ];
        for (name, requested, configured) in overridable {
            query.push_opt(name, non_blank(requested.as_deref()).or(configured.as_deref()));
        }

        if config.send_nonce {
            let nonce = R::nonce();
            session.set(NONCE_KEY, nonce.clone()).await;
            query.push("nonce", nonce);
        }
        query.push_opt("hd", config.hd.as_deref());
        query.push_opt("acr_values", config.acr_values.as_deref());
        query.push_opt("display", config.display.as_deref());
        if let Some(max_age) = config.max_age {
            query.push("max_age", max_age.to_string());
        }

        if config.pkce {
            let verifier = R::code_verifier();
            query.push("code_challenge", code_challenge(&verifier));
            query.push("code_challenge_method", "S256");
            session.set(CODE_VERIFIER_KEY, verifier).await;
        }

        for step in &self.steps {
            step.authorize_params(&mut query);
        }

        let url = Url::parse_with_params(&resolved.endpoints.authorization, query.iter())?;
        debug!(endpoint = %resolved.endpoints.authorization, "redirecting to provider");
        Ok(AuthorizationRedirect { url: url.into() })
    }

    /// Resolves the provider's callback into an authenticated identity.
    ///
    /// The stored `state`, `nonce` and code verifier are consumed up front,
    /// whatever the outcome, so a replayed callback is always unauthorized.
    ///
    /// # Errors
    /// In order of precedence:
    /// - the provider returned an error
    /// - the state is empty or does not match the stored one
    /// - the code is missing
    /// - code exchange, decoding or verification fails
    #[instrument(skip_all, err)]
    pub async fn complete_login(
        &self,
        session: &dyn SessionStore,
        params: &CallbackParams,
    ) -> Result<AuthenticatedIdentity, Rejection> {
        let stored_state = session.take(STATE_KEY).await;
        let stored_nonce = session.take(NONCE_KEY).await;
        let code_verifier = session.take(CODE_VERIFIER_KEY).await;

        let error = non_blank(params.error.as_deref());
        let error_reason = non_blank(params.error_reason.as_deref());
        if error.is_some() || error_reason.is_some() {
            return Err(Rejection::ProviderError {
                error: error.or(error_reason).map(str::to_string),
                description: non_blank(params.error_description.as_deref())
                    .or(error_reason)
                    .map(str::to_string),
                uri: non_blank(params.error_uri.as_deref()).map(str::to_string),
            });
        }

        let state_matches = match (params.state.as_deref(), stored_state.as_deref()) {
            (Some(returned), Some(stored)) if !returned.is_empty() => {
                constant_time_equal(returned.as_bytes(), stored.as_bytes())
            }
            _ => false,
        };
        if !state_matches {
            warn!("state does not match the session");
            return Err(Rejection::Unauthorized);
        }

        let code = non_blank(params.code.as_deref()).ok_or(Rejection::MissingCode)?;

        let config = &self.config;
        let provider = self.provider_context();
        let resolved = provider.resolve().await?;

        let request = TokenRequest {
            token_endpoint: resolved.endpoints.token.clone(),
            code: code.to_string(),
            redirect_uri: self.redirect_uri(params.redirect_uri.as_deref()),
            client_id: config.client.identifier.clone(),
            client_secret: config.client.secret.clone(),
            auth_method: config.client.auth_method,
            scope: config
                .send_scope_to_token_endpoint
                .then(|| config.scope.join(" ")),
            code_verifier,
        };
        let tokens = self.provider.exchange_code(&request).await?;

        for step in &self.steps {
            step.before_verify(&tokens)?;
        }

        let raw_id_token = tokens.id_token.as_deref().ok_or(Rejection::MissingIdToken)?;
        let id_token = provider
            .decoder(&resolved)
            .await?
            .decode::<IdTokenClaims>(raw_id_token)?;

        if config.send_nonce && (stored_nonce.is_none() || id_token.nonce.is_none()) {
            return Err(VerificationError::InvalidNonce.into());
        }
        let expected = ExpectedIdToken {
            issuer: resolved.require_issuer()?.to_string(),
            audience: config.client.identifier.clone(),
            nonce: stored_nonce,
        };
        self.verifier.verify(&id_token, &expected, N::now())?;

        for step in &self.steps {
            step.after_token_decode(&id_token)?;
        }

        if let Some(sid) = &id_token.sid {
            session.set(SID_KEY, sid.clone()).await;
        }

        let userinfo: RawClaims = match &resolved.endpoints.userinfo {
            Some(endpoint) => {
                self.provider
                    .fetch_userinfo(endpoint, &tokens.access_token)
                    .await?
            }
            None => id_token.raw().clone(),
        };

        match userinfo.get("sub").and_then(Value::as_str) {
            Some(actual) if actual != id_token.sub => {
                warn!("user info subject differs from the id token");
                return Err(Rejection::SubjectMismatch {
                    expected: id_token.sub.clone(),
                    actual: actual.to_string(),
                });
            }
            _ => {}
        }

        for step in &self.steps {
            step.after_userinfo(&userinfo)?;
        }

        let credentials = Credentials {
            id_token: tokens.id_token.clone(),
            sid: id_token.sid.clone(),
            token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_in: tokens.expires_in,
            scope: tokens.scope.clone(),
        };
        let identity =
            AuthenticatedIdentity::from_userinfo(userinfo, &config.attribute_map, credentials)
                .ok_or(Rejection::MissingSubject)?;

        info!(uid = %identity.uid, "login completed");
        Ok(identity)
    }

    /// Offers `request` to each step in order. `None` means no step served
    /// it and the host should.
    ///
    /// # Errors
    /// - a step fails to serve the request
    pub async fn handle_other_request(
        &self,
        request: &OtherRequest,
    ) -> Result<Option<Response<String>>, Rejection> {
        let provider = self.provider_context();
        for step in &self.steps {
            if let Some(response) = step.handle_other_request(request, &provider).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// PKCE `S256` challenge of `verifier`.
fn code_challenge(verifier: &str) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Compares two byte slices for equality in constant time to prevent timing attacks.
fn constant_time_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut c = 0u8;
    for (&x, &y) in a.iter().zip(b.iter()) {
        c |= x ^ y;
    }
    c == 0
}
