use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors the server binary itself can raise, plus the pipeline's
/// [`apigate_gateway::GatewayError`] wrapped so a single `?` chain covers
/// config loading, backend construction, and request handling.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration file failed to parse or named an unknown backend.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. reading the config file, binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A storage backend failed to connect or migrate at startup.
    #[error("backend error: {0}")]
    Backend(#[from] apigate_core::StoreError),

    /// A pipeline error surfaced through the proxy handler.
    #[error("gateway error: {0}")]
    Gateway(#[from] apigate_gateway::GatewayError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            Self::Gateway(e) => {
                let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let retry_after = match &e {
                    apigate_gateway::GatewayError::RateLimited { retry_after } => Some(*retry_after),
                    _ => None,
                };
                let body = serde_json::json!({ "error": e.to_string() });
                let mut response = (status, axum::Json(body)).into_response();
                if let Some(retry) = retry_after {
                    response.headers_mut().insert(axum::http::header::RETRY_AFTER, retry.into());
                }
                response
            }
            other => {
                let body = serde_json::json!({ "error": other.to_string() });
                (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
            }
        }
    }
}
