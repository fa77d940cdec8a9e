use std::collections::HashSet;

use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use tracing::debug;

use crate::claims::{ClaimSet, RawClaims, TokenClaims};
use crate::error::DecodeError;
use crate::key::{KeyHandle, is_hmac};

/// Turns raw signed tokens into claim sets.
///
/// Only the signature is checked here. Issuer, audience and time based
/// claims are left to the token type's verifier.
#[derive(Debug, Clone)]
pub struct TokenDecoder {
    key: KeyHandle,
    algorithm: Option<Algorithm>,
}

impl TokenDecoder {
    /// Creates a decoder. With `algorithm` set, tokens signed with any other
    /// algorithm are rejected.
    pub fn new(key: KeyHandle, algorithm: Option<Algorithm>) -> Self {
        Self { key, algorithm }
    }

    /// Decoder that does not check signatures.
    pub fn insecure() -> Self {
        Self::new(KeyHandle::SkipVerification, None)
    }

    /// Decodes `token` into a claim set of type `C`.
    ///
    /// # Errors
    /// - the token is not a syntactically valid signed token
    /// - the signature does not verify against the key
    /// - no key of a JWK set matches the token
    /// - a claim required by `C` is missing
    pub fn decode<C: TokenClaims>(&self, token: &str) -> Result<ClaimSet<C>, DecodeError> {
        let header = decode_header(token).map_err(DecodeError::Malformed)?;

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let key = match &self.key {
            KeyHandle::SkipVerification => {
                validation.insecure_disable_signature_validation();
                DecodingKey::from_secret(&[])
            }
            key => {
                if self.algorithm.is_some_and(|expected| expected != header.alg) {
                    return Err(DecodeError::UnexpectedAlgorithm(header.alg));
                }
                self.decoding_key(key, &header)?
            }
        };

        let data = decode::<RawClaims>(token, &key, &validation)
            .map_err(|err| map_jwt_error(err, header.alg))?;
        debug!(token_type = C::TOKEN_TYPE, alg = ?header.alg, "decoded token");

        ClaimSet::from_raw(data.claims)
    }

    fn decoding_key(&self, key: &KeyHandle, header: &Header) -> Result<DecodingKey, DecodeError> {
        match key {
            KeyHandle::Secret(secret) => {
                if !is_hmac(header.alg) {
                    return Err(DecodeError::UnexpectedAlgorithm(header.alg));
                }
                Ok(DecodingKey::from_secret(secret))
            }
            KeyHandle::Public(key) => Ok(key.as_ref().clone()),
            KeyHandle::JwkSet(set) => {
                let jwk = match header.kid.as_deref() {
                    Some(kid) => set.find(kid),
                    None if set.keys.len() == 1 => set.keys.first(),
                    None => None,
                }
                .ok_or_else(|| DecodeError::UnknownKey(header.kid.clone()))?;

                DecodingKey::from_jwk(jwk).map_err(DecodeError::Key)
            }
            KeyHandle::SkipVerification => Ok(DecodingKey::from_secret(&[])),
        }
    }
}

fn map_jwt_error(err: JwtError, alg: Algorithm) -> DecodeError {
    match err.kind() {
        ErrorKind::InvalidSignature => DecodeError::InvalidSignature,
        ErrorKind::InvalidAlgorithm => DecodeError::UnexpectedAlgorithm(alg),
        ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::InvalidKeyFormat => DecodeError::Key(err),
        _ => DecodeError::Malformed(err),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use jsonwebtoken::jwk::JwkSet;
    use jsonwebtoken::{EncodingKey, encode};
    use serde_json::{Value, json};

    use super::*;
    use crate::claims::tests::fixture_id_token_claims;
    use crate::claims::{IdTokenClaims, LogoutTokenClaims};
    use crate::key::tests::{OCT_JWK_SET, TEST_CERT, TEST_PRIVATE_KEY};
    use crate::key::{KeyMaterial, resolve_key};

    pub(crate) const TEST_SECRET: &str = "super-secret-key-for-tests!";

    /// Signs `claims` with HS256 and [`TEST_SECRET`].
    pub(crate) fn sign(claims: &Value) -> String {
        sign_with_kid(claims, None)
    }

    pub(crate) fn sign_with_kid(claims: &Value, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_string);
        encode(
            &header,
            claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn secret_decoder() -> TokenDecoder {
        TokenDecoder::new(
            KeyHandle::Secret(TEST_SECRET.as_bytes().to_vec()),
            Some(Algorithm::HS256),
        )
    }

    #[test]
    fn test_decode_with_secret() {
        // given
        let token = sign(&Value::Object(fixture_id_token_claims()));

        // when
        let claims = secret_decoder().decode::<IdTokenClaims>(&token).unwrap();

        // then
        assert_eq!(claims.sub, "subject");
        assert_eq!(claims.raw().len(), 7);
    }

    #[test]
    fn test_decode_invalid_signature() {
        // given
        let token = sign(&Value::Object(fixture_id_token_claims()));
        let decoder = TokenDecoder::new(KeyHandle::Secret(b"wrong".to_vec()), None);

        // when
        let got = decoder.decode::<IdTokenClaims>(&token);

        // then
        assert!(matches!(got, Err(DecodeError::InvalidSignature)));
    }

    #[test]
    fn test_decode_malformed() {
        let got = secret_decoder().decode::<IdTokenClaims>("not.a.token");

        assert!(matches!(got, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_decode_unexpected_algorithm() {
        // given
        let token = sign(&Value::Object(fixture_id_token_claims()));
        let decoder = TokenDecoder::new(
            KeyHandle::Secret(TEST_SECRET.as_bytes().to_vec()),
            Some(Algorithm::HS512),
        );

        // when
        let got = decoder.decode::<IdTokenClaims>(&token);

        // then
        assert!(matches!(
            got,
            Err(DecodeError::UnexpectedAlgorithm(Algorithm::HS256))
        ));
    }

    #[test]
    fn test_decode_missing_required_claim() {
        // given
        let token = sign(&json!({ "iss": "https://example.com" }));

        // when
        let got = secret_decoder().decode::<LogoutTokenClaims>(&token);

        // then
        assert!(matches!(got, Err(DecodeError::MissingRequiredClaim("aud"))));
    }

    #[test]
    fn test_decode_skip_verification() {
        // given
        let token = sign(&Value::Object(fixture_id_token_claims()));

        // when
        let claims = TokenDecoder::insecure()
            .decode::<IdTokenClaims>(&token)
            .unwrap();

        // then
        assert_eq!(claims.iss, "https://example.com");
    }

    #[test]
    fn test_decode_selects_jwk_by_kid() {
        // given
        let set: JwkSet = serde_json::from_str(OCT_JWK_SET).unwrap();
        let decoder = TokenDecoder::new(KeyHandle::JwkSet(set), None);
        let token = sign_with_kid(&Value::Object(fixture_id_token_claims()), Some("k1"));

        // when
        let claims = decoder.decode::<IdTokenClaims>(&token).unwrap();

        // then
        assert_eq!(claims.sub, "subject");
    }

    #[test]
    fn test_decode_unknown_kid() {
        // given
        let set: JwkSet = serde_json::from_str(OCT_JWK_SET).unwrap();
        let decoder = TokenDecoder::new(KeyHandle::JwkSet(set), None);
        let token = sign(&Value::Object(fixture_id_token_claims()));

        // when
        let got = decoder.decode::<IdTokenClaims>(&token);

        // then
        assert!(matches!(got, Err(DecodeError::UnknownKey(None))));
    }

    #[test]
    fn test_decode_with_x509_certificate() {
        // given
        let key = resolve_key(
            Algorithm::RS256,
            KeyMaterial {
                x509: Some(TEST_CERT),
                ..Default::default()
            },
        )
        .unwrap();
        let token = encode(
            &Header::new(Algorithm::RS256),
            &Value::Object(fixture_id_token_claims()),
            &EncodingKey::from_rsa_pem(TEST_PRIVATE_KEY.as_bytes()).unwrap(),
        )
        .unwrap();

        // when
        let claims = TokenDecoder::new(key, Some(Algorithm::RS256))
            .decode::<IdTokenClaims>(&token)
            .unwrap();

        // then
        assert_eq!(claims.sub, "subject");
    }

    #[test]
    fn test_decode_rejects_hmac_token_for_public_key() {
        // given
        let key = resolve_key(
            Algorithm::RS256,
            KeyMaterial {
                x509: Some(TEST_CERT),
                ..Default::default()
            },
        )
        .unwrap();
        let token = sign(&Value::Object(fixture_id_token_claims()));

        // when
        let got = TokenDecoder::new(key, None).decode::<IdTokenClaims>(&token);

        // then
        assert!(matches!(got, Err(DecodeError::UnexpectedAlgorithm(_))));
    }
}
