//! API error types and JSON error response formatting.
//!
//! Internal errors are mapped to HTTP status codes by kind, looking through
//! `IndexingFailed` to the underlying cause.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use agentdex_core::error::{AgentdexError, EmbeddingError, IndexError};

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request").
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 - invalid query, card, or parameters.
    BadRequest(String),
    /// 413 - input exceeds the embedding model's limit.
    PayloadTooLarge(String),
    /// 429 - upstream provider is rate limiting us.
    TooManyRequests(String),
    /// 500 - unexpected server error.
    Internal(String),
    /// 502 - upstream rejected our credentials.
    BadGateway(String),
    /// 503 - a dependency is unavailable, not ready, or the call was cancelled.
    ServiceUnavailable(String),
    /// 504 - the call exceeded its deadline.
    GatewayTimeout(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::TooManyRequests(_) => "rate_limited",
            ApiError::Internal(_) => "internal_error",
            ApiError::BadGateway(_) => "upstream_auth_failed",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::GatewayTimeout(_) => "timed_out",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.code().to_string();
        let message = match self {
            ApiError::BadRequest(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::TooManyRequests(msg)
            | ApiError::Internal(msg)
            | ApiError::BadGateway(msg)
            | ApiError::ServiceUnavailable(msg)
            | ApiError::GatewayTimeout(msg) => msg,
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

impl From<AgentdexError> for ApiError {
    fn from(err: AgentdexError) -> Self {
        let message = err.to_string();
        match err.root_cause() {
            AgentdexError::InvalidQuery(_)
            | AgentdexError::InvalidAgentCard(_)
            | AgentdexError::Embedding(EmbeddingError::EmptyInput) => ApiError::BadRequest(message),
            AgentdexError::Embedding(EmbeddingError::InputTooLarge { .. }) => {
                ApiError::PayloadTooLarge(message)
            }
            AgentdexError::Embedding(EmbeddingError::RateLimited { .. }) => {
                ApiError::TooManyRequests(message)
            }
            AgentdexError::Embedding(EmbeddingError::AuthenticationFailed(_))
            | AgentdexError::Index(IndexError::AuthenticationFailed(_)) => {
                ApiError::BadGateway(message)
            }
            AgentdexError::Embedding(EmbeddingError::ProviderUnavailable(_))
            | AgentdexError::Index(IndexError::Unavailable(_))
            | AgentdexError::Index(IndexError::ProvisioningTimeout { .. })
            | AgentdexError::Index(IndexError::NotProvisioned)
            | AgentdexError::Cancelled => ApiError::ServiceUnavailable(message),
            AgentdexError::TimedOut(_) => ApiError::GatewayTimeout(message),
            _ => {
                tracing::error!(error = %message, "Unhandled internal error");
                ApiError::Internal(message)
            }
        }
    }
}
