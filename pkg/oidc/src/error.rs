use http::StatusCode;
use jsonwebtoken::Algorithm;

/// Caller or configuration errors. Fatal, surfaced at startup or at the
/// first request that needs the missing piece.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("missing client identifier")]
    MissingClientId,

    #[error("missing redirect uri")]
    MissingRedirectUri,

    #[error("missing issuer")]
    MissingIssuer,

    #[error("missing host for relative endpoint {0}")]
    MissingHost(String),

    #[error("missing signing key for {0:?}")]
    MissingSigningKey(Option<Algorithm>),

    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid jwk: {0}")]
    InvalidJwk(#[source] serde_json::Error),

    #[error("invalid x509 certificate: {0}")]
    InvalidCertificate(String),

    #[error("invalid signing key: {0}")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),

    #[error("invalid claims request: {0}")]
    InvalidClaims(#[source] serde_json::Error),

    #[error("parse URL: {0}")]
    ParseURL(#[from] url::ParseError),

    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid value for environment variable {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Errors produced while turning a raw signed token into a claim set.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("malformed token: {0}")]
    Malformed(#[source] jsonwebtoken::errors::Error),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token algorithm {0:?} is not accepted")]
    UnexpectedAlgorithm(Algorithm),

    #[error("no signing key matches kid {0:?}")]
    UnknownKey(Option<String>),

    #[error("unusable signing key: {0}")]
    Key(#[source] jsonwebtoken::errors::Error),

    #[error("missing required claim: {0}")]
    MissingRequiredClaim(&'static str),

    #[error("invalid claims: {0}")]
    InvalidClaims(#[from] serde_json::Error),
}

/// Token validation errors. Each kind is terminal for the verification call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum VerificationError {
    #[error("issuer does not match: expected {expected}, got {actual}")]
    InvalidIssuer { expected: String, actual: String },

    #[error("audience does not contain {expected}")]
    InvalidAudience { expected: String },

    #[error("token expired at {expired_at}")]
    Expired { expired_at: i64 },

    #[error("nonce does not match")]
    InvalidNonce,

    #[error("issued at {issued_at} is not in the past")]
    InvalidIssuedAt { issued_at: i64 },

    #[error("logout token must contain sid, sub or both")]
    InvalidIdentifiers,

    #[error("invalid backchannel logout event: {0}")]
    InvalidBackchannelLogoutEvent(&'static str),

    #[error("logout token must not contain a nonce claim")]
    NonceClaimPresent,

    #[error("logout token {0} was recently used")]
    TokenRecentlyUsed(String),

    #[error(
        "expected one of {} values [{}] in [{}]",
        upper(.claim),
        quoted(.expected),
        quoted(.actual)
    )]
    EssentialClaimNotSatisfied {
        claim: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
}

impl VerificationError {
    /// Stable, machine readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIssuer { .. } => "invalid_issuer",
            Self::InvalidAudience { .. } => "invalid_audience",
            Self::Expired { .. } => "expired",
            Self::InvalidNonce => "invalid_nonce",
            Self::InvalidIssuedAt { .. } => "invalid_issued_at",
            Self::InvalidIdentifiers => "invalid_identifiers",
            Self::InvalidBackchannelLogoutEvent(_) => "invalid_backchannel_logout_event",
            Self::NonceClaimPresent => "nonce_claim_present",
            Self::TokenRecentlyUsed(_) => "token_recently_used",
            Self::EssentialClaimNotSatisfied { .. } => "essential_claim_not_satisfied",
        }
    }
}

fn upper(claim: &str) -> String {
    claim.to_uppercase()
}

fn quoted(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{v}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors talking to the identity provider.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("failed to connect: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("failed to send request: {0}")]
    Request(#[source] reqwest::Error),

    #[error("failed to build http client")]
    BuildHttpClient(#[source] reqwest::Error),

    #[error("failed to build request body")]
    BuildRequestBody(#[from] serde_urlencoded::ser::Error),

    #[error("unexpected HTTP status code: {0}")]
    UnexpectedStatusCode(StatusCode),

    #[error("parse URL: {0}")]
    ParseURL(#[from] url::ParseError),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err)
        } else if err.is_connect() {
            Self::Connect(err)
        } else {
            Self::Request(err)
        }
    }
}

/// Why a login flow did not end authenticated.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Rejection {
    /// The provider redirected back with an error parameter.
    #[error("{}", provider_error_message(.error, .description, .uri))]
    ProviderError {
        error: Option<String>,
        description: Option<String>,
        uri: Option<String>,
    },

    /// The returned state is empty or does not match the stored one.
    #[error("401 Unauthorized")]
    Unauthorized,

    #[error("missing authorization code")]
    MissingCode,

    #[error("missing id token")]
    MissingIdToken,

    #[error("missing subject")]
    MissingSubject,

    /// The user-info `sub` is not the subject of the verified ID Token.
    #[error("user info subject does not match: expected {expected}, got {actual}")]
    SubjectMismatch { expected: String, actual: String },

    #[error("timeout: {0}")]
    Timeout(#[source] TransportError),

    #[error("failed to connect: {0}")]
    FailedToConnect(#[source] TransportError),

    #[error("provider request failed: {0}")]
    Transport(#[source] TransportError),

    #[error("invalid token: {0}")]
    InvalidToken(#[from] DecodeError),

    #[error("invalid credentials: {0}")]
    Verification(#[from] VerificationError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build authorization url: {0}")]
    AuthorizationUrl(#[from] url::ParseError),

    #[error("failed to build response: {0}")]
    Response(#[from] http::Error),
}

impl Rejection {
    /// Stable, machine readable name of the rejection kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProviderError { .. } => "provider_error",
            Self::Unauthorized => "unauthorized",
            Self::MissingCode => "missing_code",
            Self::MissingIdToken => "missing_id_token",
            Self::MissingSubject => "missing_subject",
            Self::SubjectMismatch { .. } => "subject_mismatch",
            Self::Timeout(_) => "timeout",
            Self::FailedToConnect(_) => "failed_to_connect",
            Self::Transport(_) => "transport_error",
            Self::InvalidToken(_) => "invalid_token",
            Self::Verification(err) => err.kind(),
            Self::Config(_) => "configuration_error",
            Self::AuthorizationUrl(_) => "authorization_url",
            Self::Response(_) => "response",
        }
    }
}

impl From<TransportError> for Rejection {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => Self::Timeout(err),
            TransportError::Connect(_) => Self::FailedToConnect(err),
            _ => Self::Transport(err),
        }
    }
}

fn provider_error_message(
    error: &Option<String>,
    description: &Option<String>,
    uri: &Option<String>,
) -> String {
    [error, description, uri]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Errors raised while handling a backchannel logout push.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BackchannelError {
    #[error("missing logout token")]
    MissingLogoutToken,

    #[error("invalid logout token: {0}")]
    InvalidToken(#[from] DecodeError),

    #[error("invalid logout token: {0}")]
    Verification(#[from] VerificationError),

    #[error("{0}")]
    Provider(#[from] Rejection),
}
