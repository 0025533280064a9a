//! Per-request enrichment threaded through the middleware chain and hooks
//!
//! Each field is written at most once. The stage that owns a field sets it,
//! and later stages read it. A second write is refused rather than silently
//! replacing what an earlier stage decided.

use crate::domain::{AttributeMap, PathParams, Rule};
use crate::proxy::types::{ProxyError, RequestId};
use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("enrichment field `{0}` is already set")]
pub struct AlreadySet(pub &'static str);

/// The request as the caller sent it, kept for hooks and query extraction
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

#[derive(Debug)]
pub struct Enrichment {
    request_id: RequestId,
    rule: Option<Arc<Rule>>,
    path_params: Option<PathParams>,
    body: Option<Bytes>,
    attributes: Option<AttributeMap>,
    original: Option<RequestSnapshot>,
    forwarded: Option<RequestSnapshot>,
    deferred_error: Option<ProxyError>,
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: &'static str) -> Result<(), AlreadySet> {
    if slot.is_some() {
        return Err(AlreadySet(field));
    }
    *slot = Some(value);
    Ok(())
}

impl Enrichment {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            rule: None,
            path_params: None,
            body: None,
            attributes: None,
            original: None,
            forwarded: None,
            deferred_error: None,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn rule(&self) -> Option<&Arc<Rule>> {
        self.rule.as_ref()
    }

    pub fn set_rule(&mut self, rule: Arc<Rule>) -> Result<(), AlreadySet> {
        set_once(&mut self.rule, rule, "rule")
    }

    /// Captured path parameters; empty when the matcher captured none
    pub fn path_params(&self) -> &PathParams {
        static EMPTY: PathParams = PathParams::new();
        self.path_params.as_ref().unwrap_or(&EMPTY)
    }

    pub fn set_path_params(&mut self, params: PathParams) -> Result<(), AlreadySet> {
        set_once(&mut self.path_params, params, "path_params")
    }

    /// The buffered request body; cloning `Bytes` shares the same buffer
    pub fn body(&self) -> Bytes {
        self.body.clone().unwrap_or_default()
    }

    pub fn set_body(&mut self, body: Bytes) -> Result<(), AlreadySet> {
        set_once(&mut self.body, body, "body")
    }

    pub fn attributes(&self) -> Option<&AttributeMap> {
        self.attributes.as_ref()
    }

    pub fn set_attributes(&mut self, attributes: AttributeMap) -> Result<(), AlreadySet> {
        set_once(&mut self.attributes, attributes, "attributes")
    }

    pub fn original(&self) -> Option<&RequestSnapshot> {
        self.original.as_ref()
    }

    pub fn set_original(&mut self, snapshot: RequestSnapshot) -> Result<(), AlreadySet> {
        set_once(&mut self.original, snapshot, "original")
    }

    /// The request as it was dispatched, after every rewrite
    pub fn forwarded(&self) -> Option<&RequestSnapshot> {
        self.forwarded.as_ref()
    }

    pub fn set_forwarded(&mut self, snapshot: RequestSnapshot) -> Result<(), AlreadySet> {
        set_once(&mut self.forwarded, snapshot, "forwarded")
    }

    pub fn deferred_error(&self) -> Option<&ProxyError> {
        self.deferred_error.as_ref()
    }

    /// Attach an error to be surfaced when the transport dispatches
    pub fn defer_error(&mut self, error: ProxyError) -> Result<(), AlreadySet> {
        set_once(&mut self.deferred_error, error, "deferred_error")
    }

    pub fn take_deferred_error(&mut self) -> Option<ProxyError> {
        self.deferred_error.take()
    }
}
