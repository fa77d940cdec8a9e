use std::fmt;
use std::str::FromStr as _;

use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde_json::Value;
use x509_parser::pem::parse_x509_pem;

use crate::error::ConfigError;

/// Key used to check a token signature.
#[derive(Clone)]
pub enum KeyHandle {
    /// Shared secret for the HS* family.
    Secret(Vec<u8>),
    /// Provider key set; the key is picked by the token's `kid`.
    JwkSet(JwkSet),
    /// A single public key (from one JWK or an X.509 certificate).
    Public(Box<DecodingKey>),
    /// Accept any signature. Only for tokens whose trust was already
    /// established out of band.
    SkipVerification,
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret(_) => f.write_str("Secret(..)"),
            Self::JwkSet(set) => f.debug_tuple("JwkSet").field(&set.keys.len()).finish(),
            Self::Public(_) => f.write_str("Public(..)"),
            Self::SkipVerification => f.write_str("SkipVerification"),
        }
    }
}

/// Key material configured for the client.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyMaterial<'a> {
    pub client_secret: Option<&'a str>,
    /// A JWK or a JWK set, as JSON.
    pub jwk: Option<&'a str>,
    /// A PEM encoded X.509 certificate.
    pub x509: Option<&'a str>,
}

/// Parses a configured signing algorithm name such as `RS256`.
pub fn parse_algorithm(name: &str) -> Result<Algorithm, ConfigError> {
    Algorithm::from_str(name).map_err(|_| ConfigError::UnsupportedAlgorithm(name.to_string()))
}

pub(crate) fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Resolves the verification key for `alg` from the configured key material.
///
/// HS* uses the client secret. Every asymmetric family prefers a JWK (or JWK
/// set) and falls back to the public key of an X.509 certificate.
///
/// # Errors
/// - the material the algorithm family needs is not configured
/// - the JWK or certificate cannot be parsed
pub fn resolve_key(alg: Algorithm, material: KeyMaterial<'_>) -> Result<KeyHandle, ConfigError> {
    if is_hmac(alg) {
        return material
            .client_secret
            .map(|secret| KeyHandle::Secret(secret.as_bytes().to_vec()))
            .ok_or(ConfigError::MissingSigningKey(Some(alg)));
    }

    if let Some(jwk) = material.jwk {
        return parse_jwk(jwk);
    }

    if let Some(pem) = material.x509 {
        return parse_x509(alg, pem);
    }

    Err(ConfigError::MissingSigningKey(Some(alg)))
}

/// Parses either a JWK set (`{"keys": [...]}`) or a single JWK.
pub fn parse_jwk(json: &str) -> Result<KeyHandle, ConfigError> {
    let value: Value = serde_json::from_str(json).map_err(ConfigError::InvalidJwk)?;

    if value.get("keys").is_some() {
        let set: JwkSet = serde_json::from_value(value).map_err(ConfigError::InvalidJwk)?;
        return Ok(KeyHandle::JwkSet(set));
    }

    let jwk: Jwk = serde_json::from_value(value).map_err(ConfigError::InvalidJwk)?;
    let key = DecodingKey::from_jwk(&jwk).map_err(ConfigError::InvalidKey)?;
    Ok(KeyHandle::Public(Box::new(key)))
}

fn parse_x509(alg: Algorithm, pem: &str) -> Result<KeyHandle, ConfigError> {
    let (_, pem) = parse_x509_pem(pem.as_bytes())
        .map_err(|err| ConfigError::InvalidCertificate(err.to_string()))?;
    let cert = pem
        .parse_x509()
        .map_err(|err| ConfigError::InvalidCertificate(err.to_string()))?;
    let der = &cert.public_key().subject_public_key.data;

    let key = match alg {
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_der(der),
        Algorithm::EdDSA => DecodingKey::from_ed_der(der),
        _ => DecodingKey::from_rsa_der(der),
    };
    Ok(KeyHandle::Public(Box::new(key)))
}

#[cfg(test)]
pub(crate) mod tests {
    use rstest::rstest;

    use super::*;

    pub(crate) const TEST_CERT: &str = include_str!("../testdata/cert.pem");
    pub(crate) const TEST_PRIVATE_KEY: &str = include_str!("../testdata/key.pem");

    /// Base64url of `super-secret-key-for-tests!`.
    pub(crate) const OCT_JWK_SET: &str = r#"{"keys": [
        {"kty": "oct", "kid": "k1", "alg": "HS256", "k": "c3VwZXItc2VjcmV0LWtleS1mb3ItdGVzdHMh"},
        {"kty": "oct", "kid": "k2", "alg": "HS256", "k": "b3RoZXI"}
    ]}"#;

    #[rstest]
    #[case::hs256(Algorithm::HS256)]
    #[case::hs512(Algorithm::HS512)]
    fn test_hmac_uses_client_secret(#[case] alg: Algorithm) {
        // given
        let material = KeyMaterial {
            client_secret: Some("secret"),
            ..Default::default()
        };

        // when
        let key = resolve_key(alg, material).unwrap();

        // then
        assert!(matches!(key, KeyHandle::Secret(s) if s == b"secret"));
    }

    #[rstest]
    #[case::hmac(Algorithm::HS256)]
    #[case::rsa(Algorithm::RS256)]
    #[case::ec(Algorithm::ES256)]
    fn test_missing_signing_key(#[case] alg: Algorithm) {
        let got = resolve_key(alg, KeyMaterial::default());

        assert!(matches!(got, Err(ConfigError::MissingSigningKey(Some(a))) if a == alg));
    }

    #[test]
    fn test_jwk_set() {
        // given
        let material = KeyMaterial {
            jwk: Some(OCT_JWK_SET),
            ..Default::default()
        };

        // when
        let key = resolve_key(Algorithm::RS256, material).unwrap();

        // then
        assert!(matches!(key, KeyHandle::JwkSet(set) if set.keys.len() == 2));
    }

    #[test]
    fn test_single_jwk() {
        let material = KeyMaterial {
            jwk: Some(r#"{"kty": "oct", "k": "c3VwZXItc2VjcmV0LWtleS1mb3ItdGVzdHMh"}"#),
            ..Default::default()
        };

        let key = resolve_key(Algorithm::RS256, material).unwrap();

        assert!(matches!(key, KeyHandle::Public(_)));
    }

    #[test]
    fn test_invalid_jwk() {
        let material = KeyMaterial {
            jwk: Some("{not json"),
            ..Default::default()
        };

        let got = resolve_key(Algorithm::RS256, material);

        assert!(matches!(got, Err(ConfigError::InvalidJwk(_))));
    }

    #[test]
    fn test_x509_certificate() {
        let material = KeyMaterial {
            x509: Some(TEST_CERT),
            ..Default::default()
        };

        let key = resolve_key(Algorithm::RS256, material).unwrap();

        assert!(matches!(key, KeyHandle::Public(_)));
    }

    #[test]
    fn test_invalid_x509_certificate() {
        let material = KeyMaterial {
            x509: Some("-----BEGIN CERTIFICATE-----\ntest\n-----END CERTIFICATE-----"),
            ..Default::default()
        };

        let got = resolve_key(Algorithm::RS256, material);

        assert!(matches!(got, Err(ConfigError::InvalidCertificate(_))));
    }

    #[rstest]
    #[case::known("RS256", Ok(Algorithm::RS256))]
    #[case::hmac("HS512", Ok(Algorithm::HS512))]
    #[case::unknown("none", Err(()))]
    fn test_parse_algorithm(#[case] name: &str, #[case] want: Result<Algorithm, ()>) {
        let got = parse_algorithm(name).map_err(|_| ());

        assert_eq!(got, want);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = KeyHandle::Secret(b"secret".to_vec());

        assert_eq!(format!("{key:?}"), "Secret(..)");
    }
}
