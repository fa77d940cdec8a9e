use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::header::CACHE_CONTROL;
use http::{HeaderValue, Response, StatusCode};
use tracing::{info, instrument, warn};

use crate::claims::{ClaimSet, LogoutTokenClaims};
use crate::clock::{Now, SystemNow};
use crate::config::OidcConfig;
use crate::discovery::ProviderContext;
use crate::error::{BackchannelError, Rejection};
use crate::logout_token::{ExpectedLogoutToken, LogoutTokenVerifier};
use crate::provider::ProviderClient;
use crate::replay::ReplayGuard;
use crate::step::{FlowStep, OtherRequest};

/// Form parameter carrying the logout token.
pub const LOGOUT_TOKEN_PARAM: &str = "logout_token";

/// Application callback for verified logout tokens.
#[cfg_attr(test, mock::collaborator)]
#[async_trait]
pub trait LogoutHandler: Send + Sync + 'static {
    /// Ends the sessions identified by the token's `sid` or `sub`.
    async fn on_logout(&self, claims: &ClaimSet<LogoutTokenClaims>);
}

/// Receives logout tokens pushed by the provider, server to server.
///
/// Works without any visitor session. The handler only ever sees tokens
/// that passed decoding and verification.
pub struct BackchannelDispatcher<N: Now = SystemNow> {
    config: Arc<OidcConfig>,
    provider: Arc<dyn ProviderClient>,
    handler: Arc<dyn LogoutHandler>,
    verifier: LogoutTokenVerifier,
    replay: Option<ReplayGuard>,
    _now: PhantomData<N>,
}

impl<N: Now> BackchannelDispatcher<N> {
    pub fn new(
        config: Arc<OidcConfig>,
        provider: Arc<dyn ProviderClient>,
        handler: Arc<dyn LogoutHandler>,
    ) -> Self {
        let verifier = LogoutTokenVerifier::new(config.logout_token_leeway);
        let replay = config.replay_window.map(ReplayGuard::new);
        Self {
            config,
            provider,
            handler,
            verifier,
            replay,
            _now: PhantomData,
        }
    }

    /// Decodes and verifies `raw`, then hands the claims to the handler.
    ///
    /// # Errors
    /// - `raw` is missing or blank
    /// - provider resolution or key retrieval fails
    /// - the token does not decode or does not verify
    /// - the token's `jti` was already accepted within the replay window
    pub async fn dispatch(
        &self,
        raw: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ClaimSet<LogoutTokenClaims>, BackchannelError> {
        let raw = raw
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .ok_or(BackchannelError::MissingLogoutToken)?;

        let provider = ProviderContext::new(&self.config, self.provider.as_ref());
        let resolved = provider.resolve().await?;
        let decoder = provider.decoder(&resolved).await?;
        let claims = decoder.decode::<LogoutTokenClaims>(raw)?;

        let expected = ExpectedLogoutToken {
            issuer: resolved
                .require_issuer()
                .map_err(Rejection::from)?
                .to_string(),
            audience: self.config.client.identifier.clone(),
        };
        self.verifier.verify(&claims, &expected, now)?;

        if let Some(replay) = &self.replay {
            replay.check_and_record(&claims.jti).await?;
        }

        self.handler.on_logout(&claims).await;
        info!(sid = ?claims.sid, sub = ?claims.sub, "backchannel logout");
        Ok(claims)
    }

    /// Acknowledges a logout push evaluated at `now`: `200` with an empty
    /// body, or `400` with the error message. Never cached.
    pub async fn handle_at(&self, raw: Option<&str>, now: DateTime<Utc>) -> Response<String> {
        let (status, body) = match self.dispatch(raw, now).await {
            Ok(_) => (StatusCode::OK, String::new()),
            Err(err) => {
                warn!(error = %err, "rejected logout token");
                (StatusCode::BAD_REQUEST, err.to_string())
            }
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }

    /// Acknowledges a logout push.
    #[instrument(skip_all)]
    pub async fn handle(&self, raw: Option<&str>) -> Response<String> {
        self.handle_at(raw, N::now()).await
    }
}

/// Serves the backchannel logout route of the flow.
pub struct BackchannelStep<N: Now = SystemNow> {
    path: String,
    dispatcher: Arc<BackchannelDispatcher<N>>,
}

impl<N: Now> BackchannelStep<N> {
    pub fn new(path: impl Into<String>, dispatcher: Arc<BackchannelDispatcher<N>>) -> Self {
        Self {
            path: path.into(),
            dispatcher,
        }
    }
}

#[async_trait]
impl<N: Now> FlowStep for BackchannelStep<N> {
    async fn handle_other_request(
        &self,
        request: &OtherRequest,
        _provider: &ProviderContext<'_>,
    ) -> Result<Option<Response<String>>, Rejection> {
        if !request.is_under(&self.path) {
            return Ok(None);
        }
        let response = self
            .dispatcher
            .handle(request.param(LOGOUT_TOKEN_PARAM))
            .await;
        Ok(Some(response))
    }
}
