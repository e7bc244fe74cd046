//! Terminal error handler: classifies any error that escapes the
//! middleware pipeline into an OpenAI-shaped `{error: {message, type, code}}`
//! envelope with the matching HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use gateway_core::error::{ClientError, ProviderError};
use gateway_core::fallback::FallbackError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Fallback(#[from] FallbackErrorWrapper),

    #[error("authentication error: {message}")]
    Auth { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("rate limit exceeded")]
    RateLimit {
        retry_after_secs: u64,
        limit: u64,
        remaining: u64,
    },

    #[error("no provider available")]
    NoProviderAvailable,

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("gateway is shutting down")]
    Draining,

    #[error("internal server error: {message}")]
    Internal { message: String },
}

/// Wraps [`FallbackError`] since it lives in `gateway-core` and can't
/// implement `std::error::Error` there without pulling `thiserror` into a
/// crate that otherwise keeps its error surface hand-rolled for this one
/// conversion.
#[derive(Debug, Error)]
#[error("{0:?}")]
pub struct FallbackErrorWrapper(pub FallbackError);

impl From<FallbackError> for GatewayError {
    fn from(err: FallbackError) -> Self {
        GatewayError::Fallback(FallbackErrorWrapper(err))
    }
}

impl GatewayError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            GatewayError::Client(ClientError::DeadlineExceeded) => {
                (StatusCode::GATEWAY_TIMEOUT, "timeout_error")
            }
            GatewayError::Client(ClientError::AllProvidersFailed) => {
                (StatusCode::SERVICE_UNAVAILABLE, "server_error")
            }
            GatewayError::Client(ClientError::NoProviderAvailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, "server_error")
            }
            GatewayError::Client(ClientError::InvalidRequest { .. }) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error")
            }
            GatewayError::Client(_) => (StatusCode::INTERNAL_SERVER_ERROR, "api_error"),
            GatewayError::Provider(e) => {
                let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let error_type = match e {
                    ProviderError::InvalidApiKey => "authentication_error",
                    ProviderError::ModelNotFound { .. } => "invalid_request_error",
                    ProviderError::RateLimit | ProviderError::QuotaExceeded => "rate_limit_error",
                    _ => "api_error",
                };
                (status, error_type)
            }
            GatewayError::Fallback(FallbackErrorWrapper(FallbackError::DeadlineExceeded { .. })) => {
                (StatusCode::GATEWAY_TIMEOUT, "timeout_error")
            }
            GatewayError::Fallback(FallbackErrorWrapper(FallbackError::AllProvidersFailed { .. })) => {
                (StatusCode::SERVICE_UNAVAILABLE, "server_error")
            }
            GatewayError::Auth { .. } => (StatusCode::UNAUTHORIZED, "authentication_error"),
            GatewayError::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            GatewayError::RateLimit { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_error"),
            GatewayError::NoProviderAvailable => (StatusCode::SERVICE_UNAVAILABLE, "server_error"),
            GatewayError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "invalid_request_error"),
            GatewayError::Draining => (StatusCode::SERVICE_UNAVAILABLE, "server_error"),
            GatewayError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "api_error"),
        }
    }

    /// The message that actually reaches the caller. Deliberately generic
    /// and independent of `Display` -- `Display` (and `{:?}`) carry upstream
    /// status/message text and belong in the log sink, not the response body.
    fn client_message(error_type: &str) -> &'static str {
        match error_type {
            "timeout_error" => "The request timed out.",
            "invalid_request_error" => "The request was invalid.",
            "authentication_error" => "Authentication failed.",
            "rate_limit_error" => "Rate limit exceeded. Please retry later.",
            "server_error" => "The gateway is temporarily unable to process this request.",
            "api_error" => "The upstream provider returned an error.",
            _ => "An internal error occurred.",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        let message = Self::client_message(error_type);

        if status.is_server_error() {
            tracing::error!(error = ?self, status = status.as_u16(), "request failed");
        } else {
            tracing::warn!(error = ?self, status = status.as_u16(), "request failed");
        }

        let body = Json(json!({
            "error": { "message": message, "type": error_type, "code": status.as_u16() }
        }));
        let mut response = (status, body).into_response();

        if let GatewayError::RateLimit {
            retry_after_secs,
            limit,
            remaining,
        } = &self
        {
            let headers = response.headers_mut();
            headers.insert("Retry-After", retry_after_secs.to_string().parse().unwrap());
            headers.insert("X-RateLimit-Limit", limit.to_string().parse().unwrap());
            headers.insert("X-RateLimit-Remaining", remaining.to_string().parse().unwrap());
        }

        response
    }
}
