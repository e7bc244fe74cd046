//! Error types for the gateway core: provider-level failures and the
//! higher-level client/routing failures built on top of them.

use thiserror::Error;

/// Errors raised by a provider's wire adapter (an external collaborator behind
/// the [`crate::providers::Provider`] trait). Status codes map to
/// [`crate::retry::is_retryable`] for fallback/retry classification.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("upstream API error: {status} {message}")]
    Api { status: u16, message: String },

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("request timed out")]
    Timeout,

    #[error("invalid response format: {0}")]
    InvalidResponse(String),

    #[error("network error: {message}")]
    Network { message: String },
}

impl ProviderError {
    /// The HTTP-equivalent status this error would map to, for retry classification
    /// and for the terminal OpenAI-shaped error envelope (see `gateway-server::gateway_error`).
    pub fn status_code(&self) -> u16 {
        match self {
            ProviderError::Api { status, .. } => *status,
            ProviderError::InvalidApiKey => 401,
            ProviderError::ModelNotFound { .. } => 404,
            ProviderError::RateLimit => 429,
            ProviderError::QuotaExceeded => 429,
            ProviderError::ServiceUnavailable => 503,
            ProviderError::Timeout => 504,
            ProviderError::InvalidResponse(_) => 502,
            ProviderError::Network { .. } => 502,
        }
    }
}

/// Errors surfaced by the routing/resiliency subsystem above individual providers.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("routing error: {message}")]
    Routing { message: String },

    #[error("cache error: {message}")]
    Cache { message: String },

    #[error("no provider available")]
    NoProviderAvailable,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("all providers failed")]
    AllProvidersFailed,

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;
