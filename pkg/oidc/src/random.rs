use base64::Engine as _;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use rand::Rng as _;

/// A source of cryptographically secure random values.
///
/// The flow draws `state`, `nonce` and the PKCE verifier from here. Hosts
/// that need a custom `state` format implement this trait and override
/// [`RandomSource::state`].
///
/// # Example
/// ```
/// use oidc::RandomSource;
///
/// struct FixedState;
///
/// impl RandomSource for FixedState {
///     fn bytes(num_bytes: usize) -> Vec<u8> {
///         vec![0; num_bytes]
///     }
///
///     fn state() -> String {
///         "42".to_string()
///     }
/// }
///
/// assert_eq!(FixedState::state(), "42");
/// assert_eq!(FixedState::nonce(), "00000000000000000000000000000000");
/// ```
pub trait RandomSource: Send + Sync + 'static {
    /// Returns `num_bytes` random bytes.
    fn bytes(num_bytes: usize) -> Vec<u8>;

    /// Returns a random hex string of `num_bytes` bytes.
    fn hex(num_bytes: usize) -> String {
        hex::encode(Self::bytes(num_bytes))
    }

    /// Returns a random base64-url string (no padding) of `num_bytes` bytes.
    fn base64_url(num_bytes: usize) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(Self::bytes(num_bytes))
    }

    /// Generates the `state` (CSRF binding for the redirect).
    fn state() -> String {
        Self::hex(16)
    }

    /// Generates the `nonce` (replay binding for the ID Token).
    fn nonce() -> String {
        Self::hex(16)
    }

    /// Generates a PKCE `code_verifier`.
    fn code_verifier() -> String {
        Self::base64_url(32)
    }
}

/// Default generator backed by the thread local CSPRNG.
#[derive(Debug, Clone, Default)]
pub struct SecureRandom;

impl RandomSource for SecureRandom {
    fn bytes(num_bytes: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; num_bytes];
        rand::rng().fill(bytes.as_mut_slice());
        bytes
    }
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;

    /// Mock random generator for testing.
    #[derive(Debug, Default, Clone)]
    pub struct MockRandom;

    impl RandomSource for MockRandom {
        fn bytes(num_bytes: usize) -> Vec<u8> {
            vec![7; num_bytes]
        }

        fn state() -> String {
            "mock-state".to_string()
        }

        fn nonce() -> String {
            "mock-nonce".to_string()
        }

        fn code_verifier() -> String {
            "mock-code-verifier".to_string()
        }
    }
}
