//! Typed, immutable views over decoded token claims.
//!
//! A [`ClaimSet`] keeps both the raw claim mapping, exactly as decoded, and a
//! typed projection of it. Neither is mutable after construction.

use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// Claim name to value mapping, as decoded from a token or user-info response.
pub type RawClaims = Map<String, Value>;

/// A claim that may be transmitted either as a single string or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    /// Membership test, not equality.
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::One(one) => one == value,
            Self::Many(many) => many.iter().any(|v| v == value),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::One(one) => Value::from(one.as_str()),
            Self::Many(many) => Value::from(many.clone()),
        }
    }
}

/// The `aud` claim.
pub type Audience = OneOrMany;

/// Schema of a token type: which claims must be present after decode.
pub trait TokenClaims: DeserializeOwned + Send + Sync {
    /// Human readable token type, for diagnostics.
    const TOKEN_TYPE: &'static str;

    /// Claims that must be present and non-null.
    const REQUIRED: &'static [&'static str];
}

/// Standard ID Token claims.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    pub iat: i64,
    pub auth_time: Option<i64>,
    pub nonce: Option<String>,
    pub acr: Option<OneOrMany>,
    pub amr: Option<Vec<String>>,
    pub azp: Option<String>,
    /// Session identifier, correlated with backchannel logout.
    pub sid: Option<String>,
    pub at_hash: Option<String>,
    pub c_hash: Option<String>,
}

impl TokenClaims for IdTokenClaims {
    const TOKEN_TYPE: &'static str = "id token";
    const REQUIRED: &'static [&'static str] = &["iss", "aud", "exp", "iat", "sub"];
}

type ClaimAccessor = fn(&IdTokenClaims) -> Option<Value>;

/// Accessors for the known ID Token schema, keyed by claim name.
const ID_TOKEN_ACCESSORS: &[(&str, ClaimAccessor)] = &[
    ("iss", |c| Some(Value::from(c.iss.as_str()))),
    ("sub", |c| Some(Value::from(c.sub.as_str()))),
    ("aud", |c| Some(c.aud.to_value())),
    ("exp", |c| Some(Value::from(c.exp))),
    ("iat", |c| Some(Value::from(c.iat))),
    ("auth_time", |c| c.auth_time.map(Value::from)),
    ("nonce", |c| c.nonce.as_deref().map(Value::from)),
    ("acr", |c| c.acr.as_ref().map(OneOrMany::to_value)),
    ("amr", |c| c.amr.clone().map(Value::from)),
    ("azp", |c| c.azp.as_deref().map(Value::from)),
    ("sid", |c| c.sid.as_deref().map(Value::from)),
    ("at_hash", |c| c.at_hash.as_deref().map(Value::from)),
    ("c_hash", |c| c.c_hash.as_deref().map(Value::from)),
];

impl IdTokenClaims {
    /// Looks up a claim of the standard ID Token schema by name.
    pub fn schema_claim(&self, name: &str) -> Option<Value> {
        ID_TOKEN_ACCESSORS
            .iter()
            .find(|(claim, _)| *claim == name)
            .and_then(|(_, accessor)| accessor(self))
    }
}

/// Backchannel Logout Token claims.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogoutTokenClaims {
    pub iss: String,
    pub aud: Audience,
    pub iat: i64,
    pub jti: String,
    /// Kept untyped: its shape is checked by the logout token verifier.
    pub events: Value,
    pub sub: Option<String>,
    pub sid: Option<String>,
    pub auth_time: Option<i64>,
}

impl TokenClaims for LogoutTokenClaims {
    const TOKEN_TYPE: &'static str = "logout token";
    const REQUIRED: &'static [&'static str] = &["iss", "aud", "iat", "jti", "events"];
}

/// Immutable claim set produced by one decode call.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSet<C> {
    claims: C,
    raw: RawClaims,
}

impl<C: TokenClaims> ClaimSet<C> {
    /// Builds a claim set from decoded claims, enforcing the required claims
    /// of the token type.
    ///
    /// # Errors
    /// - a required claim is absent or null
    /// - a claim has the wrong type
    pub fn from_raw(raw: RawClaims) -> Result<Self, DecodeError> {
        if let Some(missing) = C::REQUIRED
            .iter()
            .find(|name| raw.get(**name).is_none_or(Value::is_null))
        {
            return Err(DecodeError::MissingRequiredClaim(missing));
        }

        let claims = serde_json::from_value(Value::Object(raw.clone()))?;
        Ok(Self { claims, raw })
    }
}

impl<C> ClaimSet<C> {
    /// The typed claims.
    pub fn claims(&self) -> &C {
        &self.claims
    }

    /// The claims exactly as decoded.
    pub fn raw(&self) -> &RawClaims {
        &self.raw
    }

    /// Whether the raw claims contain `name`, even with a null value.
    pub fn contains(&self, name: &str) -> bool {
        self.raw.contains_key(name)
    }
}

impl ClaimSet<IdTokenClaims> {
    /// Resolves a claim by name: the standard schema first, then any
    /// extension claim present in the raw token.
    pub fn claim_value(&self, name: &str) -> Option<Value> {
        self.claims
            .schema_claim(name)
            .or_else(|| self.raw.get(name).cloned())
    }
}

impl<C> Deref for ClaimSet<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.claims
    }
}
