use chrono::{DateTime, Utc};

use crate::claims::IdTokenClaims;
use crate::error::VerificationError;

/// Values an ID Token must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedIdToken {
    pub issuer: String,
    /// The client identifier.
    pub audience: String,
    /// The nonce issued with the authorization request, if nonces are sent.
    pub nonce: Option<String>,
}

/// Checks the semantic claims of a decoded ID Token.
///
/// The signature is not checked here, it was checked while decoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdTokenVerifier;

impl IdTokenVerifier {
    /// Verifies `claims`, short circuiting on the first failure.
    ///
    /// Checks, in order: issuer, audience membership, expiry, nonce. The
    /// nonce is only compared when both the token and `expected` carry one.
    pub fn verify(
        &self,
        claims: &IdTokenClaims,
        expected: &ExpectedIdToken,
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

        if now.timestamp() >= claims.exp {
            return Err(VerificationError::Expired {
                expired_at: claims.exp,
            });
        }

        let nonce_mismatch = matches!(
            (&claims.nonce, &expected.nonce),
            (Some(actual), Some(expected)) if actual != expected
        );
        if nonce_mismatch {
            return Err(VerificationError::InvalidNonce);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::{Value, json};

    use super::*;
    use crate::claims::ClaimSet;
    use crate::claims::tests::fixture_id_token_claims;
    use crate::clock::Now as _;
    use crate::clock::mock::{MOCK_NOW, MockNow};

    fn expected() -> ExpectedIdToken {
        ExpectedIdToken {
            issuer: "https://example.com".to_string(),
            audience: "client-id".to_string(),
            nonce: Some("mock-nonce".to_string()),
        }
    }

    fn claims_with(name: &str, value: Value) -> IdTokenClaims {
        let mut raw = fixture_id_token_claims();
        if value.is_null() {
            raw.remove(name);
        } else {
            raw.insert(name.to_string(), value);
        }
        ClaimSet::<IdTokenClaims>::from_raw(raw)
            .unwrap()
            .claims()
            .clone()
    }

    #[rstest]
    #[case::valid("sid", json!("session-id"), Ok(()))]
    #[case::audience_list("aud", json!(["other", "client-id"]), Ok(()))]
    #[case::no_nonce_in_token("nonce", Value::Null, Ok(()))]
    #[case::invalid_issuer("iss", json!("foobar"), Err(VerificationError::InvalidIssuer {
        expected: "https://example.com".to_string(),
        actual: "foobar".to_string(),
    }))]
    #[case::invalid_audience("aud", json!(["other"]), Err(VerificationError::InvalidAudience {
        expected: "client-id".to_string(),
    }))]
    #[case::expired("exp", json!(MOCK_NOW), Err(VerificationError::Expired {
        expired_at: MOCK_NOW,
    }))]
    #[case::invalid_nonce("nonce", json!("other"), Err(VerificationError::InvalidNonce))]
    fn test_verify(
        #[case] name: &str,
        #[case] value: Value,
        #[case] want: Result<(), VerificationError>,
    ) {
        // given
        let claims = claims_with(name, value);

        // when
        let got = IdTokenVerifier.verify(&claims, &expected(), MockNow::now());

        // then
        assert_eq!(got, want);
    }

    #[test]
    fn test_nonce_skipped_when_not_issued() {
        // given
        let claims = claims_with("nonce", json!("anything"));
        let expected = ExpectedIdToken {
            nonce: None,
            ..expected()
        };

        // when
        let got = IdTokenVerifier.verify(&claims, &expected, MockNow::now());

        // then
        assert_eq!(got, Ok(()));
    }

    #[test]
    fn test_issuer_checked_before_audience() {
        // given
        let mut raw = fixture_id_token_claims();
        raw.insert("iss".to_string(), json!("foobar"));
        raw.insert("aud".to_string(), json!("other"));
        let claims = ClaimSet::<IdTokenClaims>::from_raw(raw).unwrap();

        // when
        let got = IdTokenVerifier.verify(&claims, &expected(), MockNow::now());

        // then
        assert_eq!(got.unwrap_err().kind(), "invalid_issuer");
    }
}
