use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Form;
use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::Response;
use axum_macros::debug_handler;
use oidc::claims::{ClaimSet, LogoutTokenClaims};
use oidc::{
    AuthenticatedIdentity, CallbackParams, LoginParams, LogoutHandler, MemorySessionStore,
    OtherRequest, Rejection, SessionStore,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::AppState;
use crate::cookie::{SetCookieExt, VisitorCookie};
use crate::error::OidcError;

/// Session key of the raw ID Token, sent as `id_token_hint` on logout.
pub const ID_TOKEN_KEY: &str = "gateway.id_token";

/// Redirects the visitor to the provider's login page.
#[debug_handler]
#[instrument(skip_all, err)]
pub async fn start_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<LoginParams>,
) -> Result<Response, OidcError> {
    let visitor_id = VisitorCookie::read(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());
    let session = state.sessions.session(&visitor_id);

    let redirect = state.party.begin_login(&session, &params).await?;

    let response = Response::builder()
        .status(StatusCode::TEMPORARY_REDIRECT)
        .header(LOCATION, &redirect.url)
        .set_cookie(&VisitorCookie::issue(visitor_id, state.secure_cookies))
        .body(Body::empty())?;

    Ok(response)
}

/// Handles the provider's redirect back and returns the visitor's identity.
#[debug_handler]
#[instrument(skip_all, err)]
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Json<AuthenticatedIdentity>, OidcError> {
    let Some(visitor_id) = VisitorCookie::read(&headers) else {
        warn!("callback without visitor cookie");
        return Err(Rejection::Unauthorized.into());
    };
    let session = state.sessions.session(&visitor_id);

    let identity = state.party.complete_login(&session, &params).await?;
    if let Some(id_token) = &identity.credentials.id_token {
        session.set(ID_TOKEN_KEY, id_token.clone()).await;
    }

    Ok(Json(identity))
}

/// Serves the remaining relying party routes, logout and backchannel
/// logout among them.
///
/// Logging out always ends the local visitor session. Without a provider
/// end-session endpoint it answers `204`.
#[debug_handler]
#[instrument(skip_all, fields(path = %uri.path()), err)]
pub async fn other_request(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Result<Response, OidcError> {
    let visitor_id = VisitorCookie::read(&headers);
    let id_token_hint = match &visitor_id {
        Some(visitor_id) => state.sessions.session(visitor_id).get(ID_TOKEN_KEY).await,
        None => None,
    };

    let request = OtherRequest {
        path: uri.path().to_string(),
        params,
        id_token_hint,
    };
    let served = state.party.handle_other_request(&request).await?;

    if !request.is_under(&state.party.config().logout_path()) {
        return served.map(|r| r.map(Body::from)).ok_or(OidcError::NotFound);
    }

    if let Some(visitor_id) = &visitor_id {
        state.sessions.clear(visitor_id).await;
        info!("visitor logged out");
    }
    let response = match served {
        Some(response) => response.map(Body::from),
        None => Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())?,
    };
    Ok(response.set_cookie(&VisitorCookie::expired()))
}

/// Ends every visitor session bound to a logged out provider session.
#[derive(Debug, Clone)]
pub struct RevokeSessions {
    sessions: MemorySessionStore,
}

impl RevokeSessions {
    pub fn new(sessions: MemorySessionStore) -> Arc<Self> {
        Arc::new(Self { sessions })
    }
}

#[async_trait]
impl LogoutHandler for RevokeSessions {
    async fn on_logout(&self, claims: &ClaimSet<LogoutTokenClaims>) {
        let Some(sid) = &claims.sid else {
            warn!(sub = ?claims.sub, "logout token without sid, nothing to revoke");
            return;
        };
        let revoked = self.sessions.revoke_sid(sid).await;
        info!(sid, revoked, "revoked visitor sessions");
    }
}
