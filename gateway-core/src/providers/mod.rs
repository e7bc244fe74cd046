//! Provider trait boundary.
//!
//! Concrete per-vendor wire adapters (OpenAI, Anthropic, Google HTTP
//! clients) are an external collaborator, not implemented in this crate --
//! the gateway depends only on this trait. The test double below exists so
//! the fallback handler, registry, and server middleware can be exercised
//! without a live upstream.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::{ChatRequest, ChatResponse};

pub mod duration_serde;

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout: std::time::Duration,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: None,
            timeout: std::time::Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The single seam between the gateway's resiliency layer and an upstream
/// vendor. Every method is request-scoped and cancellation-safe: callers
/// are expected to wrap invocations in `tokio::select!` against a
/// cancellation token rather than this trait taking one directly, since the
/// fallback handler already owns that responsibility.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;

    async fn health_check(&self) -> Result<(), ProviderError>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// An in-process provider double whose behavior is scripted per call:
    /// a queue of results, consumed in order, repeating the last entry once
    /// exhausted.
    pub struct ScriptedProvider {
        name: String,
        script: Mutex<Vec<Result<ChatResponse, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        pub fn new(name: impl Into<String>, script: Vec<Result<ChatResponse, ProviderError>>) -> Self {
            Self {
                name: name.into(),
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn chat_completion(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script
                    .first()
                    .cloned()
                    .unwrap_or(Err(ProviderError::ServiceUnavailable))
            }
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }
}
