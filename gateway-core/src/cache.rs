//! Semantic response cache: canonicalizes a chat request into text, embeds
//! it, and looks up near-duplicate prior requests by vector similarity
//! rather than exact-hash matching.
//!
//! Key construction stays separate from storage, but the key is no longer a
//! hash of the literal request -- it's a tag-scoped KNN query against a
//! vector store, since two differently-worded prompts with the same meaning
//! should still hit.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::models::{ChatRequest, ChatResponse, EmbeddingVector, Message};

const MAX_CANONICAL_CHARS: usize = 32_000;
const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(10);
const EMBEDDING_RETRY_BUDGET: u32 = 2;
const KNN_K: usize = 5;

/// Builds the canonical text a request is embedded from: `role: content`
/// per message, newline-joined, capped to bound embedding cost.
pub fn canonicalize(messages: &[Message]) -> String {
    let mut text = messages
        .iter()
        .map(|m| format!("{:?}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");
    text.truncate(MAX_CANONICAL_CHARS);
    text
}

/// A model-name tag used to scope cache lookups to the requesting model.
/// Only `[a-zA-Z0-9_.:-]` survives; anything else is rejected rather than
/// escaped, since a silently-mangled tag is how cross-model cache
/// poisoning creeps in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTag(String);

impl ModelTag {
    pub fn new(model: &str) -> Result<Self, CacheError> {
        let valid = !model.is_empty()
            && model
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'));
        if !valid {
            return Err(CacheError::InvalidTag(model.to_string()));
        }
        Ok(Self(model.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("invalid model tag: {0}")]
    InvalidTag(String),
    #[error("embedding provider error: {0}")]
    Embedding(String),
    #[error("vector store error: {0}")]
    Store(String),
}

/// External collaborator boundary: a concrete embedding HTTP client is not
/// implemented here, only this trait and an in-process test double.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, CacheError>;
}

/// Wraps an [`EmbeddingProvider`] with the timeout + small retry budget the
/// cache lookup path requires; a persistent failure here is a cache miss,
/// never a request failure.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> Option<EmbeddingVector> {
    for attempt in 0..=EMBEDDING_RETRY_BUDGET {
        let call = tokio::time::timeout(DEFAULT_EMBEDDING_TIMEOUT, provider.embed(text));
        match call.await {
            Ok(Ok(vector)) => return Some(vector),
            Ok(Err(_)) | Err(_) => {
                if attempt < EMBEDDING_RETRY_BUDGET {
                    let backoff = crate::retry::calculate_backoff(
                        attempt,
                        Duration::from_millis(100),
                        Duration::from_secs(2),
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    None
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    pub response: ChatResponse,
    pub embedding: Vec<f32>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub entry: CachedEntry,
    pub cosine_distance: f32,
}

/// External collaborator boundary: the qdrant collection/connection
/// bootstrap lives outside this crate. This trait is the narrow contract a
/// `qdrant-client`-backed store must satisfy.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        tag: &str,
        vector: EmbeddingVector,
        entry: CachedEntry,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn search_by_tag(
        &self,
        tag: &str,
        vector: &EmbeddingVector,
        k: usize,
    ) -> Result<Vec<VectorMatch>, CacheError>;
}

#[async_trait]
impl EmbeddingProvider for std::sync::Arc<dyn EmbeddingProvider> {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, CacheError> {
        (**self).embed(text).await
    }
}

#[async_trait]
impl VectorStore for std::sync::Arc<dyn VectorStore> {
    async fn upsert(
        &self,
        tag: &str,
        vector: EmbeddingVector,
        entry: CachedEntry,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        (**self).upsert(tag, vector, entry, ttl).await
    }

    async fn search_by_tag(
        &self,
        tag: &str,
        vector: &EmbeddingVector,
        k: usize,
    ) -> Result<Vec<VectorMatch>, CacheError> {
        (**self).search_by_tag(tag, vector, k).await
    }
}

#[derive(Debug, Clone)]
pub struct SemanticCacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub cosine_distance_threshold: f32,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
            cosine_distance_threshold: 0.05,
        }
    }
}

/// A cache hit, with the similarity the survivor matched at so the caller
/// can surface it (`X-Cache-Score`) without re-deriving it from the raw
/// distance.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub response: ChatResponse,
    pub cosine_distance: f32,
}

pub struct SemanticCache<E: EmbeddingProvider, V: VectorStore> {
    config: SemanticCacheConfig,
    embedder: E,
    store: V,
}

/// Why a lookup did not short-circuit the request; distinguishes a real
/// cache miss from a path that was never consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBypassReason {
    Disabled,
    SkipHeader,
    Streaming,
    LookupError,
}

impl<E: EmbeddingProvider, V: VectorStore> SemanticCache<E, V> {
    pub fn new(config: SemanticCacheConfig, embedder: E, store: V) -> Self {
        Self { config, embedder, store }
    }

    fn bypass_reason(&self, request: &ChatRequest, skip_header: bool) -> Option<CacheBypassReason> {
        if !self.config.enabled {
            return Some(CacheBypassReason::Disabled);
        }
        if skip_header {
            return Some(CacheBypassReason::SkipHeader);
        }
        if request.stream.unwrap_or(false) {
            return Some(CacheBypassReason::Streaming);
        }
        None
    }

    /// Returns `Ok(None)` for a genuine miss or an explicit bypass, `Ok(Some(_))`
    /// for a hit. A lookup-layer error is logged by the caller and treated the
    /// same as a miss -- this function folds it into `Ok(None)` with a `true`
    /// `was_error` flag so the middleware can log a warning without failing the
    /// request.
    pub async fn lookup(
        &self,
        request: &ChatRequest,
        skip_header: bool,
    ) -> (Option<CacheHit>, Option<CacheBypassReason>) {
        if let Some(reason) = self.bypass_reason(request, skip_header) {
            return (None, Some(reason));
        }

        let tag = match ModelTag::new(&request.model) {
            Ok(tag) => tag,
            Err(_) => return (None, Some(CacheBypassReason::LookupError)),
        };

        let canonical = canonicalize(&request.messages);
        let Some(vector) = embed_with_retry(&self.embedder, &canonical).await else {
            return (None, Some(CacheBypassReason::LookupError));
        };

        let matches = match self.store.search_by_tag(tag.as_str(), &vector, KNN_K).await {
            Ok(matches) => matches,
            Err(_) => return (None, Some(CacheBypassReason::LookupError)),
        };

        let survivor = matches.into_iter().find(|candidate| {
            candidate.cosine_distance <= self.config.cosine_distance_threshold
                && candidate.entry.temperature == request.temperature
                && candidate.entry.max_tokens == request.max_tokens
        });

        match survivor {
            Some(candidate) => (
                Some(CacheHit {
                    response: candidate.entry.response,
                    cosine_distance: candidate.cosine_distance,
                }),
                None,
            ),
            None => (None, None),
        }
    }

    /// Stores a successful, non-streaming response. Never called for
    /// streaming responses or non-200 outcomes -- enforced by the caller,
    /// not re-checked here, since the caller already has that context.
    pub async fn store(&self, request: &ChatRequest, response: &ChatResponse) -> Result<(), CacheError> {
        if !self.config.enabled {
            return Ok(());
        }
        let tag = ModelTag::new(&request.model)?;
        let canonical = canonicalize(&request.messages);
        let Some(vector) = embed_with_retry(&self.embedder, &canonical).await else {
            return Ok(());
        };

        let entry = CachedEntry {
            response: response.clone(),
            embedding: vector.0.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let jittered_ttl = jitter_ttl(self.config.ttl);
        self.store.upsert(tag.as_str(), vector, entry, jittered_ttl).await
    }
}

/// Adds +/-10% uniform jitter to a TTL so cache entries written in a burst
/// don't all expire in the same instant.
fn jitter_ttl(ttl: Duration) -> Duration {
    let frac = rand::thread_rng().gen_range(-0.1..=0.1);
    let millis = (ttl.as_millis() as f64) * (1.0 + frac);
    Duration::from_millis(millis.max(0.0) as u64)
}
