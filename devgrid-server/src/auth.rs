//! Authentication extraction.
//!
//! The core consumes an already-authenticated [`Principal`]; this
//! module is where a deployment plugs its scheme in. The default
//! extractor maps plain headers to a principal and is meant for
//! development only.

use async_trait::async_trait;
use axum::{
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use devgrid::Principal;

/// Extracts the caller identity from request parts.
#[async_trait]
pub trait AuthExtractor: Send + Sync + 'static {
    async fn extract(&self, parts: &mut Parts) -> Result<Principal, AuthError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing authentication credentials")]
    MissingCredentials,

    #[error("invalid authentication token")]
    InvalidToken,

    #[error("authentication failed: {0}")]
    Failed(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": StatusCode::UNAUTHORIZED.as_u16(),
        });
        (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
    }
}

/// Development extractor: `X-App-Name` / `X-User-Id` headers, with
/// defaults for anonymous callers.
#[derive(Debug, Clone, Default)]
pub struct HeaderAuth;

#[async_trait]
impl AuthExtractor for HeaderAuth {
    async fn extract(&self, parts: &mut Parts) -> Result<Principal, AuthError> {
        let app_name = parts
            .headers
            .get("X-App-Name")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("default");
        let user_id = parts
            .headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("anonymous");
        Ok(Principal::external(app_name, user_id))
    }
}
