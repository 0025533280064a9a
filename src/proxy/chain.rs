//! Ordered middleware chain
//!
//! The stage list is fixed when the chain is built and every stage is tied to
//! a [`MiddlewareKind`] (except rule matching, which always runs). A stage
//! runs only when the matched rule enables its kind, and it receives that
//! rule's spec. The first stage to return [`Flow::Halt`] ends the chain and
//! its response goes back to the caller.

use crate::domain::{MiddlewareKind, MiddlewareSpec};
use crate::proxy::enrichment::Enrichment;
use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use http::Request;
use std::sync::Arc;
use tracing::debug;

/// What the chain should do after a stage
#[derive(Debug)]
pub enum Flow {
    Continue,
    Halt(Response),
}

#[async_trait]
pub trait Middleware: Send + Sync {
    /// Kind the matched rule must enable; `None` runs on every request
    fn kind(&self) -> Option<MiddlewareKind>;

    async fn handle(
        &self,
        request: &mut Request<Body>,
        enrichment: &mut Enrichment,
        spec: Option<&MiddlewareSpec>,
    ) -> Flow;
}

#[derive(Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|stage| stage.kind()))
            .finish()
    }
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: Arc<dyn Middleware>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn run(&self, request: &mut Request<Body>, enrichment: &mut Enrichment) -> Flow {
        for stage in &self.stages {
            let flow = match stage.kind() {
                None => stage.handle(request, enrichment, None).await,
                Some(kind) => {
                    let Some(rule) = enrichment.rule().cloned() else {
                        continue;
                    };
                    let Some(spec) = rule.middleware(kind) else {
                        continue;
                    };
                    debug!(middleware = %kind, rule = %rule.label(), "Running middleware");
                    stage.handle(request, enrichment, Some(spec)).await
                }
            };

            if let Flow::Halt(response) = flow {
                return Flow::Halt(response);
            }
        }
        Flow::Continue
    }
}
