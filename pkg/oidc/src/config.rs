use std::time::Duration;

use jsonwebtoken::Algorithm;

use crate::error::ConfigError;
use crate::key::{KeyMaterial, parse_algorithm, resolve_key};
use crate::policy::ClaimsConfig;
use crate::provider::ClientAuthMethod;
use crate::userinfo::AttributeMap;

/// Default prefix of the relying party routes.
pub const DEFAULT_REQUEST_PATH: &str = "/auth/openid_connect";

/// Client registration and provider endpoints.
///
/// Endpoints may be relative paths, resolved against `scheme://host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub identifier: String,
    pub secret: Option<String>,
    pub redirect_uri: String,
    pub scheme: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
    pub end_session_endpoint: Option<String>,
    pub auth_method: ClientAuthMethod,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            secret: None,
            redirect_uri: String::new(),
            scheme: "https".to_string(),
            host: None,
            port: Some(443),
            authorization_endpoint: "/authorize".to_string(),
            token_endpoint: "/token".to_string(),
            userinfo_endpoint: "/userinfo".to_string(),
            jwks_uri: "/jwk".to_string(),
            end_session_endpoint: None,
            auth_method: ClientAuthMethod::Basic,
        }
    }
}

/// Relying party configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OidcConfig {
    pub client: ClientOptions,
    /// Expected issuer. With discovery on it defaults to the issuer the
    /// provider reports.
    pub issuer: Option<String>,
    pub discovery: bool,
    pub client_signing_alg: Option<Algorithm>,
    /// A JWK or JWK set, as JSON.
    pub client_jwk_signing_key: Option<String>,
    /// A PEM encoded X.509 certificate.
    pub client_x509_signing_key: Option<String>,
    pub scope: Vec<String>,
    pub response_type: String,
    pub response_mode: Option<String>,
    pub display: Option<String>,
    pub prompt: Option<String>,
    pub hd: Option<String>,
    pub max_age: Option<u64>,
    pub ui_locales: Option<String>,
    pub claims_locales: Option<String>,
    pub login_hint: Option<String>,
    pub acr_values: Option<String>,
    /// Whether ID and logout token signatures are checked. Unset means on
    /// with discovery or a configured signing algorithm, off otherwise.
    pub verify_id_token: Option<bool>,
    pub send_nonce: bool,
    pub send_scope_to_token_endpoint: bool,
    pub pkce: bool,
    pub claims: ClaimsConfig,
    pub attribute_map: AttributeMap,
    pub post_logout_redirect_uri: Option<String>,
    pub logout_token_leeway: Duration,
    /// Remember logout token `jti` values for this long and reject repeats.
    pub replay_window: Option<Duration>,
    pub request_path: String,
    pub http_timeout: Option<Duration>,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            client: ClientOptions::default(),
            issuer: None,
            discovery: false,
            client_signing_alg: None,
            client_jwk_signing_key: None,
            client_x509_signing_key: None,
            scope: vec!["openid".to_string()],
            response_type: "code".to_string(),
            response_mode: None,
            display: None,
            prompt: None,
            hd: None,
            max_age: None,
            ui_locales: None,
            claims_locales: None,
            login_hint: None,
            acr_values: None,
            verify_id_token: None,
            send_nonce: true,
            send_scope_to_token_endpoint: true,
            pkce: false,
            claims: ClaimsConfig::None,
            attribute_map: AttributeMap::new(),
            post_logout_redirect_uri: None,
            logout_token_leeway: Duration::ZERO,
            replay_window: None,
            request_path: DEFAULT_REQUEST_PATH.to_string(),
            http_timeout: None,
        }
    }
}

impl OidcConfig {
    /// Loads the configuration from `OIDC_*` environment variables.
    ///
    /// # Errors
    /// - a required variable is missing
    /// - a variable cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration from `lookup`, keyed like the environment.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `OIDC_CLIENT_ID` (required) | `client.identifier` |
    /// | `OIDC_CLIENT_SECRET` | `client.secret` |
    /// | `OIDC_REDIRECT_URI` (required) | `client.redirect_uri` |
    /// | `OIDC_CLIENT_AUTH_METHOD` | `client.auth_method` (`basic`, `post`) |
    /// | `OIDC_SCHEME`, `OIDC_HOST`, `OIDC_PORT` | provider base |
    /// | `OIDC_AUTHORIZATION_ENDPOINT`, `OIDC_TOKEN_ENDPOINT`, `OIDC_USERINFO_ENDPOINT`, `OIDC_JWKS_URI`, `OIDC_END_SESSION_ENDPOINT` | endpoints |
    /// | `OIDC_ISSUER` | `issuer` |
    /// | `OIDC_DISCOVERY` | `discovery` |
    /// | `OIDC_SIGNING_ALG` | `client_signing_alg` |
    /// | `OIDC_JWK_SIGNING_KEY`, `OIDC_X509_SIGNING_KEY` | key material |
    /// | `OIDC_SCOPE` | `scope`, space separated |
    /// | `OIDC_PROMPT`, `OIDC_LOGIN_HINT`, `OIDC_ACR_VALUES`, `OIDC_UI_LOCALES`, `OIDC_CLAIMS_LOCALES` | request extras |
    /// | `OIDC_VERIFY_ID_TOKEN`, `OIDC_SEND_NONCE`, `OIDC_PKCE` | flags |
    /// | `OIDC_CLAIMS` | `claims`, as JSON text |
    /// | `OIDC_POST_LOGOUT_REDIRECT_URI` | `post_logout_redirect_uri` |
    /// | `OIDC_LOGOUT_TOKEN_LEEWAY_SECS`, `OIDC_REPLAY_WINDOW_SECS`, `OIDC_HTTP_TIMEOUT_SECS` | durations |
    /// | `OIDC_REQUEST_PATH` | `request_path` |
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let client = ClientOptions {
            identifier: get("OIDC_CLIENT_ID").ok_or(ConfigError::MissingEnv("OIDC_CLIENT_ID"))?,
            secret: get("OIDC_CLIENT_SECRET"),
            redirect_uri: get("OIDC_REDIRECT_URI")
                .ok_or(ConfigError::MissingEnv("OIDC_REDIRECT_URI"))?,
            scheme: get("OIDC_SCHEME").unwrap_or(defaults.client.scheme),
            host: get("OIDC_HOST"),
            port: parse_env(&get, "OIDC_PORT")?.or(defaults.client.port),
            authorization_endpoint: get("OIDC_AUTHORIZATION_ENDPOINT")
                .unwrap_or(defaults.client.authorization_endpoint),
            token_endpoint: get("OIDC_TOKEN_ENDPOINT").unwrap_or(defaults.client.token_endpoint),
            userinfo_endpoint: get("OIDC_USERINFO_ENDPOINT")
                .unwrap_or(defaults.client.userinfo_endpoint),
            jwks_uri: get("OIDC_JWKS_URI").unwrap_or(defaults.client.jwks_uri),
            end_session_endpoint: get("OIDC_END_SESSION_ENDPOINT"),
            auth_method: match get("OIDC_CLIENT_AUTH_METHOD").as_deref() {
                None | Some("basic") => ClientAuthMethod::Basic,
                Some("post") => ClientAuthMethod::Post,
                Some(other) => {
                    return Err(ConfigError::InvalidEnv {
                        key: "OIDC_CLIENT_AUTH_METHOD",
                        value: other.to_string(),
                    });
                }
            },
        };

        let client_signing_alg = get("OIDC_SIGNING_ALG")
            .map(|alg| parse_algorithm(&alg))
            .transpose()?;
        let scope = get("OIDC_SCOPE")
            .map(|scope| scope.split_whitespace().map(str::to_string).collect())
            .unwrap_or(defaults.scope);
        let secs = |key: &'static str| -> Result<Option<Duration>, ConfigError> {
            Ok(parse_env::<u64>(&get, key)?.map(Duration::from_secs))
        };

        Ok(Self {
            client,
            issuer: get("OIDC_ISSUER"),
            discovery: parse_env(&get, "OIDC_DISCOVERY")?.unwrap_or(defaults.discovery),
            client_signing_alg,
            client_jwk_signing_key: get("OIDC_JWK_SIGNING_KEY"),
            client_x509_signing_key: get("OIDC_X509_SIGNING_KEY"),
            scope,
            prompt: get("OIDC_PROMPT"),
            login_hint: get("OIDC_LOGIN_HINT"),
            acr_values: get("OIDC_ACR_VALUES"),
            ui_locales: get("OIDC_UI_LOCALES"),
            claims_locales: get("OIDC_CLAIMS_LOCALES"),
            verify_id_token: parse_env(&get, "OIDC_VERIFY_ID_TOKEN")?,
            send_nonce: parse_env(&get, "OIDC_SEND_NONCE")?.unwrap_or(defaults.send_nonce),
            pkce: parse_env(&get, "OIDC_PKCE")?.unwrap_or(defaults.pkce),
            claims: get("OIDC_CLAIMS").map_or(ClaimsConfig::None, ClaimsConfig::Text),
            post_logout_redirect_uri: get("OIDC_POST_LOGOUT_REDIRECT_URI"),
            logout_token_leeway: secs("OIDC_LOGOUT_TOKEN_LEEWAY_SECS")?
                .unwrap_or(defaults.logout_token_leeway),
            replay_window: secs("OIDC_REPLAY_WINDOW_SECS")?,
            http_timeout: secs("OIDC_HTTP_TIMEOUT_SECS")?,
            request_path: get("OIDC_REQUEST_PATH").unwrap_or(defaults.request_path),
            ..Self::default()
        })
    }

    /// Reports configuration errors that would otherwise only surface on the
    /// first login.
    ///
    /// # Errors
    /// - missing client identifier or redirect uri
    /// - signature verification requested without any key source
    /// - key material that cannot be parsed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.identifier.is_empty() {
            return Err(ConfigError::MissingClientId);
        }
        if self.client.redirect_uri.is_empty() {
            return Err(ConfigError::MissingRedirectUri);
        }
        if self.discovery {
            return Ok(());
        }

        match self.client_signing_alg {
            Some(alg) if self.verify_signature() => {
                resolve_key(alg, self.key_material())?;
            }
            None if self.verify_id_token == Some(true) => {
                return Err(ConfigError::MissingSigningKey(None));
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether token signatures are checked.
    pub fn verify_signature(&self) -> bool {
        self.verify_id_token
            .unwrap_or(self.discovery || self.client_signing_alg.is_some())
    }

    pub fn key_material(&self) -> KeyMaterial<'_> {
        KeyMaterial {
            client_secret: self.client.secret.as_deref(),
            jwk: self.client_jwk_signing_key.as_deref(),
            x509: self.client_x509_signing_key.as_deref(),
        }
    }

    /// Path of the logout route.
    pub fn logout_path(&self) -> String {
        format!("{}/logout", self.request_path.trim_end_matches('/'))
    }

    /// Path of the backchannel logout route.
    pub fn backchannel_logout_path(&self) -> String {
        format!(
            "{}/backchannel-logout",
            self.request_path.trim_end_matches('/')
        )
    }
}

fn parse_env<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    get(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidEnv { key, value })
        })
        .transpose()
}
