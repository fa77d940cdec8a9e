//! Caller declared claim requests and essential claim enforcement.
//!
//! Requests are shaped like the `claims` authorization parameter:
//!
//! ```json
//! {
//!   "userinfo": { "email": { "essential": true }, "picture": null },
//!   "id_token": { "acr": { "essential": true, "values": ["phr", "phrh"] } }
//! }
//! ```
//!
//! Only essential entries are enforced. Everything else only shapes the
//! authorization request.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::claims::{ClaimSet, IdTokenClaims, RawClaims};
use crate::error::{ConfigError, VerificationError};

/// Where a requested claim is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimContext {
    IdToken,
    Userinfo,
}

/// Requirement for a single requested claim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimRequirement {
    #[serde(
        default,
        deserialize_with = "deserialize_essential",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub essential: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
}

/// `essential` is accepted as a boolean or as the string `"true"`.
fn deserialize_essential<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(essential) => essential,
        Value::String(essential) => essential == "true",
        _ => false,
    })
}

/// Claim name to requirement, per context. A `None` requirement requests
/// the claim without constraints.
pub type ClaimsRequest = BTreeMap<ClaimContext, BTreeMap<String, Option<ClaimRequirement>>>;

/// Configured claims request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ClaimsConfig {
    #[default]
    None,
    Structured(ClaimsRequest),
    /// The request as JSON text.
    Text(String),
}

/// Resolved claims request and its enforcement rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimsPolicy {
    request: ClaimsRequest,
}

impl ClaimsPolicy {
    /// Resolves the configured request once.
    ///
    /// # Errors
    /// - textual claims that are not a valid claims request
    pub fn from_config(config: &ClaimsConfig) -> Result<Self, ConfigError> {
        let request = match config {
            ClaimsConfig::None => ClaimsRequest::new(),
            ClaimsConfig::Structured(request) => request.clone(),
            ClaimsConfig::Text(text) if text.trim().is_empty() => ClaimsRequest::new(),
            ClaimsConfig::Text(text) => {
                serde_json::from_str(text).map_err(ConfigError::InvalidClaims)?
            }
        };
        Ok(Self { request })
    }

    pub fn request(&self) -> &ClaimsRequest {
        &self.request
    }

    /// Whether any context requests at least one claim.
    pub fn has_claims(&self) -> bool {
        self.request.values().any(|claims| !claims.is_empty())
    }

    /// The `claims` authorization request parameter, if any claim is
    /// requested.
    pub fn authorization_param(&self) -> Option<String> {
        if !self.has_claims() {
            return None;
        }
        serde_json::to_string(&self.request).ok()
    }

    /// Requested claims of `context` that are marked essential.
    pub fn essential_claims(&self, context: ClaimContext) -> BTreeMap<&str, &ClaimRequirement> {
        self.request
            .get(&context)
            .into_iter()
            .flatten()
            .filter_map(|(claim, requirement)| {
                requirement
                    .as_ref()
                    .filter(|r| r.essential)
                    .map(|r| (claim.as_str(), r))
            })
            .collect()
    }

    /// Whether enforcement runs at all: at least one essential claim in any
    /// context.
    pub fn verify_claims(&self) -> bool {
        self.has_claims()
            && [ClaimContext::IdToken, ClaimContext::Userinfo]
                .into_iter()
                .any(|context| !self.essential_claims(context).is_empty())
    }

    /// Enforces the essential `id_token` claims against a verified ID Token.
    pub fn verify_id_token_claims(
        &self,
        id_token: &ClaimSet<IdTokenClaims>,
    ) -> Result<(), VerificationError> {
        self.verify_context(ClaimContext::IdToken, |claim| id_token.claim_value(claim))
    }

    /// Enforces the essential `userinfo` claims against a user-info response.
    pub fn verify_userinfo_claims(&self, userinfo: &RawClaims) -> Result<(), VerificationError> {
        self.verify_context(ClaimContext::Userinfo, |claim| userinfo.get(claim).cloned())
    }

    fn verify_context(
        &self,
        context: ClaimContext,
        lookup: impl Fn(&str) -> Option<Value>,
    ) -> Result<(), VerificationError> {
        if !self.verify_claims() {
            return Ok(());
        }

        for (claim, requirement) in self.essential_claims(context) {
            debug!(?context, claim, "checking essential claim");
            require_essential_claim(claim, requirement, lookup(claim).as_ref())?;
        }
        Ok(())
    }
}

/// Values expected by a requirement: the singular `value` when present,
/// otherwise the split `values`.
pub fn expected_values(requirement: &ClaimRequirement) -> Vec<String> {
    match requirement.value.as_ref().and_then(scalar) {
        Some(value) if !value.is_empty() => vec![value],
        _ => claim_values(requirement.values.as_ref()),
    }
}

/// Whether `actual` satisfies `requirement`. A requirement without expected
/// values only asks for presence and is always satisfied.
pub fn is_satisfied(requirement: &ClaimRequirement, actual: Option<&Value>) -> bool {
    let expected = expected_values(requirement);
    if expected.is_empty() {
        return true;
    }
    let actual = claim_values(actual);
    expected.iter().any(|value| actual.contains(value))
}

/// Fails with [`VerificationError::EssentialClaimNotSatisfied`] unless
/// `actual` satisfies `requirement`.
pub fn require_essential_claim(
    claim: &str,
    requirement: &ClaimRequirement,
    actual: Option<&Value>,
) -> Result<(), VerificationError> {
    if is_satisfied(requirement, actual) {
        return Ok(());
    }

    Err(VerificationError::EssentialClaimNotSatisfied {
        claim: claim.to_string(),
        expected: expected_values(requirement),
        actual: claim_values(actual),
    })
}

/// Flattens a claim into its values. Lists and scalars are both accepted and
/// every string is split on whitespace, so `"phr phrh"` and
/// `["phr", "phrh"]` are the same.
pub fn claim_values(input: Option<&Value>) -> Vec<String> {
    let items: Vec<&Value> = match input {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(value) => vec![value],
    };

    items
        .into_iter()
        .filter_map(scalar)
        .flat_map(|value| {
            value
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
