use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::claims::{ClaimSet, LogoutTokenClaims};
use crate::error::VerificationError;

/// Event URI identifying a backchannel logout token.
pub const BACKCHANNEL_LOGOUT_EVENT: &str = "http://schemas.openid.net/event/backchannel-logout";

/// Values a logout token must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedLogoutToken {
    pub issuer: String,
    pub audience: String,
}

/// Checks the semantic claims of a decoded logout token.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogoutTokenVerifier {
    /// Clock skew tolerated on `iat`.
    pub leeway: Duration,
}

impl LogoutTokenVerifier {
    pub fn new(leeway: Duration) -> Self {
        Self { leeway }
    }

    /// Verifies `claims`, short circuiting on the first failure.
    ///
    /// Checks, in order: issuer, audience membership, `iat` in the past,
    /// `sub` or `sid` present, the backchannel logout event, no `nonce`.
    pub fn verify(
        &self,
        claims: &ClaimSet<LogoutTokenClaims>,
        expected: &ExpectedLogoutToken,
        now: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        if claims.iss != expected.issuer {
            return Err(VerificationError::InvalidIssuer {
                expected: expected.issuer.clone(),
                actual: claims.iss.clone(),
            });
        }

        if !claims.aud.contains(&expected.audience) {
            return Err(VerificationError::InvalidAudience {
                expected: expected.audience.clone(),
            });
        }

        let leeway = i64::try_from(self.leeway.as_secs()).unwrap_or(i64::MAX);
        if claims.iat >= now.timestamp().saturating_add(leeway) {
            return Err(VerificationError::InvalidIssuedAt {
                issued_at: claims.iat,
            });
        }

        if claims.sub.is_none() && claims.sid.is_none() {
            return Err(VerificationError::InvalidIdentifiers);
        }

        check_logout_event(&claims.events)?;

        if claims.contains("nonce") {
            return Err(VerificationError::NonceClaimPresent);
        }

        Ok(())
    }
}

fn check_logout_event(events: &Value) -> Result<(), VerificationError> {
    let Some(events) = events.as_object() else {
        return Err(VerificationError::InvalidBackchannelLogoutEvent(
            "events must be an object",
        ));
    };

    match events.get(BACKCHANNEL_LOGOUT_EVENT) {
        Some(Value::Object(event)) if event.is_empty() => Ok(()),
        Some(_) => Err(VerificationError::InvalidBackchannelLogoutEvent(
            "event value must be an empty object",
        )),
        None => Err(VerificationError::InvalidBackchannelLogoutEvent(
            "missing backchannel logout event",
        )),
    }
}
