use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("Unauthorized")]
    Auth,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Too many concurrent connections")]
    Overloaded,

    #[error("Local server timeout")]
    UpstreamTimeout,

    #[error("Failed to connect to local server")]
    UpstreamUnreachable,

    #[error("Invalid signal: {0}")]
    Validation(String),

    #[error("Failed to send signal: {0}")]
    DispatchFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HookError>;

impl HookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HookError::Auth => StatusCode::UNAUTHORIZED,
            HookError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            HookError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            HookError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            HookError::UpstreamUnreachable => StatusCode::BAD_GATEWAY,
            HookError::Validation(_) => StatusCode::BAD_REQUEST,
            HookError::DispatchFailure(_)
            | HookError::Internal(_)
            | HookError::Config(_)
            | HookError::Json(_)
            | HookError::Toml(_)
            | HookError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to an untrusted caller.
    pub fn public_message(&self) -> String {
        match self {
            HookError::Internal(_)
            | HookError::Config(_)
            | HookError::Json(_)
            | HookError::Toml(_)
            | HookError::Io(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for HookError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({
            "status": "error",
            "message": self.public_message(),
        }));
        (status, body).into_response()
    }
}
