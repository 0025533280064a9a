//! Rule matching and body buffering, the first stage of every chain

use crate::domain::MiddlewareSpec;
use crate::domain::MiddlewareKind;
use crate::proxy::chain::{Flow, Middleware};
use crate::proxy::enrichment::{Enrichment, RequestSnapshot};
use crate::proxy::error_response::ErrorResponseExt;
use crate::proxy::types::{ProxyError, RequestSizeLimit};
use crate::rules::{MatchError, RuleMatcher};
use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use http::Request;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use std::sync::Arc;
use tracing::{debug, info};

/// Read the whole body, refusing anything over `limit` bytes
pub async fn buffer_body(body: Body, limit: RequestSizeLimit) -> Result<Bytes, ProxyError> {
    Limited::new(body, limit.bytes())
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                ProxyError::RequestTooLarge {
                    limit: limit.bytes(),
                }
            } else {
                ProxyError::Internal(format!("Body collection error: {e}"))
            }
        })
}

pub struct RuleMatchMiddleware {
    matcher: Arc<dyn RuleMatcher>,
    max_body: RequestSizeLimit,
}

impl RuleMatchMiddleware {
    pub fn new(matcher: Arc<dyn RuleMatcher>, max_body: RequestSizeLimit) -> Self {
        Self { matcher, max_body }
    }

    fn halt(enrichment: &Enrichment, error: ProxyError) -> Flow {
        let request_id = enrichment.request_id().to_string();
        Flow::Halt(error.into_http_response(Some(&request_id)))
    }
}

#[async_trait]
impl Middleware for RuleMatchMiddleware {
    fn kind(&self) -> Option<MiddlewareKind> {
        None
    }

    async fn handle(
        &self,
        request: &mut Request<Body>,
        enrichment: &mut Enrichment,
        _spec: Option<&MiddlewareSpec>,
    ) -> Flow {
        let found = match self
            .matcher
            .match_request(request.method(), request.uri())
            .await
        {
            Ok(found) => found,
            Err(MatchError::Unknown) => {
                info!("No rule matches request");
                return Self::halt(
                    enrichment,
                    ProxyError::NoRuleMatched {
                        method: request.method().to_string(),
                        path: request.uri().path().to_string(),
                    },
                );
            }
        };
        debug!(
            rule = %found.rule.label(),
            backend = %found.rule.backend.target,
            "Matched rule"
        );

        let snapshot = RequestSnapshot {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
        };
        let stored = enrichment
            .set_rule(found.rule)
            .and_then(|()| enrichment.set_path_params(found.path_params))
            .and_then(|()| enrichment.set_original(snapshot));
        if let Err(error) = stored {
            return Self::halt(enrichment, ProxyError::Internal(error.to_string()));
        }

        let body = std::mem::take(request.body_mut());
        let bytes = match buffer_body(body, self.max_body).await {
            Ok(bytes) => bytes,
            Err(error) => return Self::halt(enrichment, error),
        };
        if let Err(error) = enrichment.set_body(bytes.clone()) {
            return Self::halt(enrichment, ProxyError::Internal(error.to_string()));
        }
        *request.body_mut() = Body::from(bytes);

        Flow::Continue
    }
}
