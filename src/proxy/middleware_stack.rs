//! Middleware stack builder for the proxy router

use crate::proxy::middleware::*;
use crate::proxy::types::RequestSizeLimit;
use axum::{middleware::from_fn, Router};
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Connection-level settings applied around the proxy core
#[derive(Debug, Clone)]
pub struct ProxyMiddlewareStack {
    request_timeout: Duration,
    max_body: RequestSizeLimit,
}

impl ProxyMiddlewareStack {
    pub fn new(request_timeout: Duration, max_body: RequestSizeLimit) -> Self {
        Self {
            request_timeout,
            max_body,
        }
    }

    /// Apply the stack to a router.
    ///
    /// Outer to inner: request id, logging, error logging, timeout, body limit.
    pub fn apply_to_router<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router
            .layer(RequestBodyLimitLayer::new(self.max_body.bytes()))
            .layer(TimeoutLayer::new(self.request_timeout))
            .layer(from_fn(error_logging_middleware))
            .layer(from_fn(logging_middleware))
            .layer(from_fn(request_id_middleware))
    }
}
