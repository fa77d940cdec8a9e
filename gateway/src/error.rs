use axum::response::{IntoResponse, Response};
use axum::{Json, http::StatusCode};
use oidc::Rejection;
use serde_json::json;
use thiserror::Error;

/// Error for the relying party endpoints.
#[derive(Debug, Error)]
pub enum OidcError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("not found")]
    NotFound,
    #[error("building response")]
    BuildingResponse(#[from] http::Error),
}

impl OidcError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Rejected(rejection) => rejection.kind(),
            Self::NotFound => "not_found",
            Self::BuildingResponse(_) => "internal",
        }
    }
}

/// Maps a rejected login to the status returned to the browser.
///
/// A state mismatch is a plain 401, no provider trust judgement was made.
pub(crate) fn rejection_status(rejection: &Rejection) -> StatusCode {
    match rejection {
        Rejection::Unauthorized => StatusCode::UNAUTHORIZED,
        Rejection::InvalidToken(_)
        | Rejection::Verification(_)
        | Rejection::SubjectMismatch { .. } => StatusCode::FORBIDDEN,
        Rejection::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Rejection::FailedToConnect(_) | Rejection::Transport(_) => StatusCode::BAD_GATEWAY,
        Rejection::Config(_) | Rejection::AuthorizationUrl(_) | Rejection::Response(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for OidcError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Rejected(rejection) => rejection_status(rejection),
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BuildingResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string(), "kind": self.kind() }));
        (status, body).into_response()
    }
}
