use async_trait::async_trait;
use http::header::LOCATION;
use http::{Response, StatusCode};
use tracing::{debug, info};
use url::Url;

use crate::discovery::ProviderContext;
use crate::error::Rejection;
use crate::step::{FlowStep, OtherRequest};

/// Sends visitors on the logout route to the provider's end-session
/// endpoint.
#[derive(Debug, Clone)]
pub struct EndSessionStep {
    logout_path: String,
    post_logout_redirect_uri: Option<String>,
}

impl EndSessionStep {
    pub fn new(logout_path: impl Into<String>, post_logout_redirect_uri: Option<String>) -> Self {
        Self {
            logout_path: logout_path.into(),
            post_logout_redirect_uri,
        }
    }

    /// The provider logout URL for a session, `None` when `end_session`
    /// is not an absolute URL.
    pub fn end_session_url(&self, end_session: &str, id_token_hint: Option<&str>) -> Option<Url> {
        let mut url = Url::parse(end_session).ok()?;
        if let Some(redirect) = &self.post_logout_redirect_uri {
            let mut query = url.query_pairs_mut();
            if let Some(hint) = id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
            query.append_pair("post_logout_redirect_uri", redirect);
        }
        Some(url)
    }
}

#[async_trait]
impl FlowStep for EndSessionStep {
    async fn handle_other_request(
        &self,
        request: &OtherRequest,
        provider: &ProviderContext<'_>,
    ) -> Result<Option<Response<String>>, Rejection> {
        if !request.is_under(&self.logout_path) {
            return Ok(None);
        }

        let resolved = provider.resolve().await?;
        let Some(end_session) = resolved.endpoints.end_session.as_deref() else {
            debug!("no end session endpoint, passing logout on");
            return Ok(None);
        };
        let Some(url) = self.end_session_url(end_session, request.id_token_hint.as_deref()) else {
            debug!(end_session, "end session endpoint is not a url, passing logout on");
            return Ok(None);
        };

        info!("redirecting to provider logout");
        let response = Response::builder()
            .status(StatusCode::FOUND)
            .header(LOCATION, url.as_str())
            .body(String::new())?;
        Ok(Some(response))
    }
}
