//! HTTP host for the OpenID Connect relying party.
//!
//! Routes below the configured request path (default `/auth/openid_connect`):
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | GET | `{prefix}` | [`handler::start_login`] |
//! | GET | `{prefix}/callback` | [`handler::callback`] |
//! | GET, POST | `{prefix}/*` | [`handler::other_request`], logout and backchannel logout |
pub mod cookie;
pub mod error;
pub mod handler;
pub mod telemetry;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use oidc::{MemorySessionStore, ProviderClient, RelyingParty};
use tower_http::trace::TraceLayer;

use crate::handler::{callback, other_request, start_login};
use crate::telemetry::new_request_span;

/// The relying party served by the gateway.
pub type Party = RelyingParty<Arc<dyn ProviderClient>>;

#[derive(Clone)]
pub struct AppState {
    pub party: Arc<Party>,
    pub sessions: MemorySessionStore,
    /// Whether cookies are marked `Secure`, on for an https redirect uri.
    pub secure_cookies: bool,
}

impl AppState {
    pub fn new(party: Party, sessions: MemorySessionStore) -> Self {
        let secure_cookies = party.config().client.redirect_uri.starts_with("https://");
        Self {
            party: Arc::new(party),
            sessions,
            secure_cookies,
        }
    }
}

/// Builds the gateway router.
pub fn router(state: AppState) -> Router {
    let prefix = state
        .party
        .config()
        .request_path
        .trim_end_matches('/')
        .to_string();
    let login = if prefix.is_empty() { "/" } else { &prefix };

    Router::new()
        .route(login, get(start_login))
        .route(&format!("{prefix}/callback"), get(callback))
        .route(
            &format!("{prefix}/{{*rest}}"),
            get(other_request).post(other_request),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(new_request_span))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::header::{LOCATION, SET_COOKIE};
    use axum::http::{Request, StatusCode};
    use oidc::{ClientOptions, HttpProvider, OidcConfig};
    use rstest::rstest;
    use tower::ServiceExt;

    use super::*;

    fn app(request_path: &str) -> Router {
        let config = OidcConfig {
            client: ClientOptions {
                identifier: "client-id".to_string(),
                redirect_uri: "https://app.example.com/callback".to_string(),
                host: Some("idp.example.com".to_string()),
                ..Default::default()
            },
            request_path: request_path.to_string(),
            ..Default::default()
        };
        let provider: Arc<dyn ProviderClient> = Arc::new(HttpProvider::new(None).unwrap());
        let party = Party::new(config, provider).unwrap();
        router(AppState::new(party, MemorySessionStore::new()))
    }

    async fn get(app: Router, uri: &str) -> axum::response::Response {
        app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_route_follows_request_path() {
        // when
        let resp = get(app("/auth/oidc/"), "/auth/oidc").await;

        // then
        assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = resp.headers().get(LOCATION).unwrap().to_str().unwrap();
        assert!(location.starts_with("https://idp.example.com/authorize?"));
        let cookie = resp.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("; Secure"));
    }

    #[tokio::test]
    async fn test_logout_without_end_session_endpoint() {
        // when
        let resp = get(app("/auth/openid_connect"), "/auth/openid_connect/logout").await;

        // then
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let cookie = resp.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("oidc_visitor=;"));
    }

    #[rstest]
    #[case::unknown("/auth/openid_connect/nope")]
    #[case::logout_prefix("/auth/openid_connect/logoutx")]
    #[tokio::test]
    async fn test_unknown_route(#[case] uri: &str) {
        // when
        let resp = get(app("/auth/openid_connect"), uri).await;

        // then
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(resp.headers().get(SET_COOKIE).is_none());
    }
}
