use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::config::{ClientOptions, OidcConfig};
use crate::error::{ConfigError, Rejection};
use crate::key::{KeyHandle, resolve_key};
use crate::provider::ProviderClient;
use crate::token::TokenDecoder;

/// Provider metadata from the discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// Absolute provider endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorization: String,
    pub token: String,
    pub userinfo: Option<String>,
    pub jwks_uri: String,
    pub end_session: Option<String>,
}

impl From<ProviderMetadata> for Endpoints {
    fn from(metadata: ProviderMetadata) -> Self {
        Self {
            authorization: metadata.authorization_endpoint,
            token: metadata.token_endpoint,
            userinfo: metadata.userinfo_endpoint,
            jwks_uri: metadata.jwks_uri,
            end_session: metadata.end_session_endpoint,
        }
    }
}

impl Endpoints {
    /// Resolves the configured endpoints, relative ones against the
    /// provider base `scheme://host:port`.
    ///
    /// # Errors
    /// - a relative endpoint without a configured host
    /// - an endpoint that is not a valid URL
    pub fn from_client_options(client: &ClientOptions) -> Result<Self, ConfigError> {
        Ok(Self {
            authorization: absolute(client, &client.authorization_endpoint)?,
            token: absolute(client, &client.token_endpoint)?,
            userinfo: Some(absolute(client, &client.userinfo_endpoint)?),
            jwks_uri: absolute(client, &client.jwks_uri)?,
            end_session: client.end_session_endpoint.clone(),
        })
    }
}

/// `scheme://host[:port]` of the provider, if a host is configured.
pub fn provider_base(client: &ClientOptions) -> Option<String> {
    let host = client.host.as_deref()?;
    Some(match client.port {
        Some(port) => format!("{}://{host}:{port}", client.scheme),
        None => format!("{}://{host}", client.scheme),
    })
}

fn absolute(client: &ClientOptions, endpoint: &str) -> Result<String, ConfigError> {
    if Url::parse(endpoint).is_ok() {
        return Ok(endpoint.to_string());
    }

    let base = provider_base(client).ok_or_else(|| ConfigError::MissingHost(endpoint.to_string()))?;
    let url = Url::parse(&base)?.join(endpoint)?;
    Ok(url.into())
}

/// Provider settings in effect for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProvider {
    pub issuer: Option<String>,
    pub endpoints: Endpoints,
    pub discovered: bool,
    /// Whether token signatures are checked.
    pub verify_signature: bool,
}

impl ResolvedProvider {
    /// The expected issuer, required for any token verification.
    pub fn require_issuer(&self) -> Result<&str, ConfigError> {
        self.issuer.as_deref().ok_or(ConfigError::MissingIssuer)
    }
}

/// Resolves provider settings and verification keys from configuration,
/// through discovery when enabled.
pub struct ProviderContext<'a> {
    config: &'a OidcConfig,
    client: &'a dyn ProviderClient,
}

impl<'a> ProviderContext<'a> {
    pub fn new(config: &'a OidcConfig, client: &'a dyn ProviderClient) -> Self {
        Self { config, client }
    }

    /// Resolves the endpoints and the expected issuer.
    ///
    /// With discovery enabled the metadata is fetched on every call. A
    /// missing issuer is then discovered from the provider base.
    ///
    /// # Errors
    /// - discovery fails
    /// - endpoints cannot be resolved
    #[instrument(skip_all, err)]
    pub async fn resolve(&self) -> Result<ResolvedProvider, Rejection> {
        let config = self.config;
        if !config.discovery {
            return Ok(ResolvedProvider {
                issuer: config.issuer.clone(),
                endpoints: Endpoints::from_client_options(&config.client)?,
                discovered: false,
                verify_signature: config.verify_signature(),
            });
        }

        let issuer = match &config.issuer {
            Some(issuer) => issuer.clone(),
            None => {
                let base = provider_base(&config.client).ok_or(ConfigError::MissingIssuer)?;
                self.client.discover(&base).await?.issuer
            }
        };

        let metadata = self.client.discover(&issuer).await?;
        debug!(issuer = %issuer, "resolved provider through discovery");

        Ok(ResolvedProvider {
            issuer: Some(issuer),
            endpoints: metadata.into(),
            discovered: true,
            verify_signature: config.verify_id_token.unwrap_or(true),
        })
    }

    /// Key used to check token signatures.
    ///
    /// # Errors
    /// - fetching the provider key set fails
    /// - no key material is configured for the signing algorithm
    pub async fn signing_key(&self, resolved: &ResolvedProvider) -> Result<KeyHandle, Rejection> {
        if !resolved.verify_signature {
            return Ok(KeyHandle::SkipVerification);
        }

        if resolved.discovered {
            let jwks = self.client.fetch_jwks(&resolved.endpoints.jwks_uri).await?;
            debug!(keys = jwks.keys.len(), "fetched provider keys");
            return Ok(KeyHandle::JwkSet(jwks));
        }

        let alg = self
            .config
            .client_signing_alg
            .ok_or(ConfigError::MissingSigningKey(None))?;
        Ok(resolve_key(alg, self.config.key_material())?)
    }

    /// Decoder for ID and logout tokens of this provider.
    pub async fn decoder(&self, resolved: &ResolvedProvider) -> Result<TokenDecoder, Rejection> {
        let key = self.signing_key(resolved).await?;
        Ok(TokenDecoder::new(key, self.config.client_signing_alg))
    }
}
