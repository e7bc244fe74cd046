//! Per-request state threaded through the middleware pipeline via axum
//! `Extension`. Downstream middleware reads from here rather than
//! re-parsing the body or re-running route selection.

use std::collections::HashMap;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use gateway_core::routing::{RankedProvider, RoutingRequest};

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub start_time: Instant,
    pub metadata: HashMap<String, String>,
    /// Set by the smart-router middleware (step 9) once provider selection
    /// completes; absent before that point in the pipeline.
    pub selected_provider: Option<RankedProvider>,
    /// The exact request the smart router ranked against, `x-routing-*`
    /// hints included. The chat handler re-ranks for the fallback walk and
    /// must use this rather than rebuilding a hint-less request, or a
    /// client's routing hints would apply to step 9's pick but not to the
    /// handler's own fallback ordering.
    pub routing_request: Option<RoutingRequest>,
    /// Set by the deadline middleware (step 8); `None` until then.
    pub deadline: Option<CancellationToken>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            start_time: Instant::now(),
            metadata: HashMap::new(),
            selected_provider: None,
            routing_request: None,
            deadline: None,
        }
    }

    pub fn with_request_id(request_id: String) -> Self {
        Self {
            request_id,
            ..Self::new()
        }
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn with_metadata(mut self, key: String, value: String) -> Self {
        self.metadata.insert(key, value);
        self
    }

    pub fn get_metadata(&self, key: &str) -> Option<&String> {
        self.metadata.get(key)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
