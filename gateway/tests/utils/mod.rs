use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gateway::handler::RevokeSessions;
use gateway::{AppState, Party, router};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use oidc::{ClientOptions, HttpProvider, MemorySessionStore, OidcConfig, ProviderClient};
use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use reqwest::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub(crate) const CLIENT_ID: &str = "gateway-client";
pub(crate) const CLIENT_SECRET: &str = "gateway-secret-for-integration-tests";
pub(crate) const PROVIDER_SID: &str = "provider-session";
pub(crate) const POST_LOGOUT_REDIRECT_URI: &str = "http://localhost:3000/";

/// A running gateway in front of a mocked identity provider.
pub(crate) struct TestApp {
    pub(crate) uri: String,
    pub(crate) idp: MockServer,
    pub(crate) sessions: MemorySessionStore,
}

/// A visitor that has started a login.
#[derive(Debug)]
pub(crate) struct PendingLogin {
    pub(crate) cookie: String,
    pub(crate) visitor_id: String,
    pub(crate) query: HashMap<String, String>,
}

pub(crate) async fn spawn_app() -> TestApp {
    let idp = MockServer::start().await;
    let config = OidcConfig {
        client: ClientOptions {
            identifier: CLIENT_ID.to_string(),
            secret: Some(CLIENT_SECRET.to_string()),
            redirect_uri: "http://localhost:3000/auth/openid_connect/callback".to_string(),
            authorization_endpoint: format!("{}/authorize", idp.uri()),
            token_endpoint: format!("{}/token", idp.uri()),
            userinfo_endpoint: format!("{}/userinfo", idp.uri()),
            jwks_uri: format!("{}/jwks", idp.uri()),
            end_session_endpoint: Some(format!("{}/logout", idp.uri())),
            ..Default::default()
        },
        issuer: Some(idp.uri()),
        client_signing_alg: Some(Algorithm::HS256),
        post_logout_redirect_uri: Some(POST_LOGOUT_REDIRECT_URI.to_string()),
        ..Default::default()
    };

    let provider: Arc<dyn ProviderClient> =
        Arc::new(HttpProvider::new(Some(Duration::from_secs(5))).unwrap());
    let sessions = MemorySessionStore::new();
    let party = Party::new(config, provider)
        .unwrap()
        .with_backchannel_logout(RevokeSessions::new(sessions.clone()));
    let app = router(AppState::new(party, sessions.clone()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        uri: format!("http://{addr}"),
        idp,
        sessions,
    }
}

pub(crate) fn client() -> Client {
    Client::builder().redirect(Policy::none()).build().unwrap()
}

/// Signs `claims` the way the mocked provider does.
pub(crate) fn sign(claims: &Value) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(CLIENT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub(crate) fn logout_token(issuer: &str) -> String {
    sign(&json!({
        "iss": issuer,
        "aud": CLIENT_ID,
        "iat": Utc::now().timestamp() - 10,
        "jti": uuid::Uuid::new_v4().to_string(),
        "sid": PROVIDER_SID,
        "events": { "http://schemas.openid.net/event/backchannel-logout": {} },
    }))
}

impl TestApp {
    pub(crate) async fn begin_login(&self) -> PendingLogin {
        let resp = client()
            .get(format!("{}/auth/openid_connect", self.uri))
            .send()
            .await
            .expect("failed to send request");
        assert_eq!(resp.status(), 307);

        let location = resp.headers().get(LOCATION).unwrap().to_str().unwrap();
        let query = Url::parse(location)
            .unwrap()
            .query_pairs()
            .into_owned()
            .collect();
        let cookie = resp
            .headers()
            .get(SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();
        let visitor_id = cookie.trim_start_matches("oidc_visitor=").to_string();

        PendingLogin {
            cookie,
            visitor_id,
            query,
        }
    }

    /// Scripts the provider's token and user-info endpoints for `login`.
    pub(crate) async fn mount_provider(&self, login: &PendingLogin) {
        let now = Utc::now().timestamp();
        let id_token = sign(&json!({
            "iss": self.idp.uri(),
            "sub": "subject",
            "aud": CLIENT_ID,
            "exp": now + 3600,
            "iat": now,
            "nonce": login.query["nonce"],
            "sid": PROVIDER_SID,
        }));

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-token",
                "token_type": "Bearer",
                "id_token": id_token,
                "expires_in": 3600,
            })))
            .mount(&self.idp)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "subject",
                "name": "Jane Doe",
                "email": "jane@example.com",
                "email_verified": "true",
            })))
            .mount(&self.idp)
            .await;
    }

    pub(crate) async fn callback(&self, cookie: Option<&str>, query: &str) -> Response {
        let mut request =
            client().get(format!("{}/auth/openid_connect/callback?{query}", self.uri));
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        request.send().await.expect("failed to send request")
    }

    /// Runs a complete login and returns the visitor's cookie.
    pub(crate) async fn login(&self) -> PendingLogin {
        let login = self.begin_login().await;
        self.mount_provider(&login).await;
        let state = &login.query["state"];
        let resp = self
            .callback(Some(&login.cookie), &format!("code=code&state={state}"))
            .await;
        assert_eq!(resp.status(), 200);
        login
    }
}
