//! Attribute extraction middleware
//!
//! Builds the per-request [`AttributeMap`] from the rule's `attributes`
//! config:
//!
//! ```yaml
//! - name: attributes
//!   config:
//!     attributes:
//!       project:  { type: header, key: X-Project }
//!       resource: { type: json_payload, key: instance.name }
//!       team:     { type: grpc_payload, index: "2.1" }
//!       resource_type: { type: constant, value: instance }
//! ```
//!
//! The map always starts with the backend `namespace` and `prefix` and the
//! request identity under `user`. Extracted values come next, and captured
//! path parameters are applied last. Any value that cannot be produced denies
//! the request with 401.

use crate::domain::attributes::{keys, AttributeSource};
use crate::domain::{
    AttributeMap, AttributeSpec, AttributeType, AttributeValue, MiddlewareKind, MiddlewareSpec,
    Rule,
};
use crate::payload::{self, grpc, PayloadError};
use crate::proxy::chain::{Flow, Middleware};
use crate::proxy::enrichment::Enrichment;
use crate::proxy::error_response::ErrorResponseExt;
use crate::proxy::headers;
use crate::proxy::types::ProxyError;
use crate::services::ProjectService;
use async_trait::async_trait;
use axum::body::Body;
use http::{HeaderMap, Request};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Reasons an attribute could not be produced
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("attribute {name}: no key configured")]
    MissingKey { name: String },

    #[error("attribute {name}: {kind} {key:?} is empty or absent")]
    Empty {
        name: String,
        kind: &'static str,
        key: String,
    },

    #[error("attribute {name}: message is not gRPC")]
    NotGrpc { name: String },

    #[error("attribute {name}: {source}")]
    Payload {
        name: String,
        #[source]
        source: PayloadError,
    },

    #[error("attribute {name}: the response is not available here")]
    ResponseUnavailable { name: String },
}

/// One message an attribute can be read from
#[derive(Debug, Clone, Copy)]
pub struct MessageView<'a> {
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

/// Everything attribute extraction may look at
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    pub request: MessageView<'a>,
    /// Query string of the request as the caller sent it
    pub query: Option<&'a str>,
    pub response: Option<MessageView<'a>>,
}

/// First value of a query parameter, percent- and plus-decoded
pub fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    let decode = |raw: &str| {
        let spaced = raw.replace('+', " ");
        urlencoding::decode(&spaced)
            .map(|value| value.into_owned())
            .unwrap_or(spaced)
    };

    query?.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        (decode(name) == key).then(|| decode(value))
    })
}

fn require_key<'a>(name: &str, spec: &'a AttributeSpec) -> Result<&'a str, ExtractionError> {
    if spec.key.is_empty() {
        return Err(ExtractionError::MissingKey {
            name: name.to_string(),
        });
    }
    Ok(&spec.key)
}

fn present(value: AttributeValue) -> Option<AttributeValue> {
    (!value.is_blank()).then_some(value)
}

/// Produce one attribute value from its spec
pub fn extract_one(
    name: &str,
    spec: &AttributeSpec,
    input: &ExtractionInput<'_>,
) -> Result<AttributeValue, ExtractionError> {
    let message = match spec.source {
        AttributeSource::Request => input.request,
        AttributeSource::Response => input.response.ok_or_else(|| ExtractionError::ResponseUnavailable {
            name: name.to_string(),
        })?,
    };
    let empty = |kind: &'static str, key: &str| ExtractionError::Empty {
        name: name.to_string(),
        kind,
        key: key.to_string(),
    };
    let payload_error = |source| ExtractionError::Payload {
        name: name.to_string(),
        source,
    };

    match spec.kind {
        AttributeType::Header => {
            let key = require_key(name, spec)?;
            message
                .headers
                .get(key)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(AttributeValue::from)
                .ok_or_else(|| empty("header", key))
        }
        AttributeType::Query => {
            let key = require_key(name, spec)?;
            query_param(input.query, key)
                .filter(|value| !value.is_empty())
                .map(AttributeValue::from)
                .ok_or_else(|| empty("query parameter", key))
        }
        AttributeType::JsonPayload => {
            let key = require_key(name, spec)?;
            let value = payload::json::extract(message.body, key).map_err(payload_error)?;
            present(value).ok_or_else(|| empty("JSON field", key))
        }
        AttributeType::GrpcPayload => {
            if !grpc::is_grpc_content_type(headers::content_type(message.headers)) {
                return Err(ExtractionError::NotGrpc {
                    name: name.to_string(),
                });
            }
            let body = bytes::Bytes::copy_from_slice(message.body);
            let value = grpc::extract(&body, &spec.index).map_err(payload_error)?;
            present(value).ok_or_else(|| empty("gRPC field", &spec.index))
        }
        AttributeType::Constant => {
            if spec.value.is_empty() {
                return Err(empty("constant", ""));
            }
            Ok(AttributeValue::from(spec.value.as_str()))
        }
    }
}

/// Produce every configured attribute, stopping at the first failure
pub fn extract_all(
    specs: &BTreeMap<String, AttributeSpec>,
    input: &ExtractionInput<'_>,
) -> Result<AttributeMap, ExtractionError> {
    let mut map = AttributeMap::new();
    for (name, spec) in specs {
        let value = extract_one(name, spec, input)?;
        debug!(attribute = %name, value = %value, "Extracted attribute");
        map.insert(name.clone(), value);
    }
    Ok(map)
}

/// Attributes every rule contributes regardless of config
pub fn base_attributes(rule: &Rule, headers: &HeaderMap, identity_header: &str) -> AttributeMap {
    let mut map = AttributeMap::new();
    if !rule.backend.namespace.is_empty() {
        map.insert(keys::NAMESPACE, rule.backend.namespace.as_str());
    }
    if !rule.backend.prefix.is_empty() {
        map.insert(keys::PREFIX, rule.backend.prefix.as_str());
    }
    if let Some(user) = headers
        .get(identity_header)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
    {
        map.insert(keys::USER, user);
    }
    map
}

/// Build the full map: base keys, then `extracted`, then path parameters
pub fn compose(
    rule: &Rule,
    headers: &HeaderMap,
    identity_header: &str,
    extracted: AttributeMap,
    path_params: &BTreeMap<String, String>,
) -> AttributeMap {
    let mut map = base_attributes(rule, headers, identity_header);
    map.merge(extracted);
    for (name, value) in path_params {
        map.insert(name.clone(), value.as_str());
    }
    map
}

/// [`compose`], then resolve the organizations owning the `project` values
pub async fn compose_with_organizations(
    rule: &Rule,
    headers: &HeaderMap,
    identity_header: &str,
    extracted: AttributeMap,
    path_params: &BTreeMap<String, String>,
    projects: &dyn ProjectService,
) -> AttributeMap {
    let mut map = compose(rule, headers, identity_header, extracted, path_params);
    resolve_organizations(&mut map, projects).await;
    map
}

/// Resolve `project` values to their organizations and store them as `organization`.
///
/// A failed lookup leaves `organization` unset.
pub async fn resolve_organizations(map: &mut AttributeMap, projects: &dyn ProjectService) {
    let project_refs = map.values_of(keys::PROJECT);
    if project_refs.is_empty() {
        return;
    }
    map.remove(keys::ORGANIZATION);

    let mut organizations = Vec::with_capacity(project_refs.len());
    for project_ref in &project_refs {
        match projects.get(project_ref).await {
            Ok(project) => {
                if !organizations.contains(&project.organization.id) {
                    organizations.push(project.organization.id);
                }
            }
            Err(error) => {
                warn!(project = %project_ref, %error, "Could not resolve project organization");
                return;
            }
        }
    }

    match organizations.len() {
        0 => {}
        1 => map.insert(keys::ORGANIZATION, organizations.remove(0)),
        _ => map.insert(keys::ORGANIZATION, organizations),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AttributesConfig {
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSpec>,
}

/// The `attributes` middleware
pub struct AttributesMiddleware {
    identity_header: String,
    projects: Arc<dyn ProjectService>,
}

impl AttributesMiddleware {
    pub fn new(identity_header: impl Into<String>, projects: Arc<dyn ProjectService>) -> Self {
        Self {
            identity_header: identity_header.into(),
            projects,
        }
    }
}

fn deny(enrichment: &Enrichment, reason: String) -> Flow {
    warn!(%reason, "Denying request");
    let request_id = enrichment.request_id().to_string();
    Flow::Halt(ProxyError::unauthorized(reason).into_http_response(Some(&request_id)))
}

#[async_trait]
impl Middleware for AttributesMiddleware {
    fn kind(&self) -> Option<MiddlewareKind> {
        Some(MiddlewareKind::Attributes)
    }

    async fn handle(
        &self,
        request: &mut Request<Body>,
        enrichment: &mut Enrichment,
        spec: Option<&MiddlewareSpec>,
    ) -> Flow {
        let Some(rule) = enrichment.rule().cloned() else {
            return Flow::Continue;
        };
        let config: AttributesConfig = match spec.map(MiddlewareSpec::decode).transpose() {
            Ok(config) => config.unwrap_or_default(),
            Err(error) => return deny(enrichment, format!("invalid attributes config: {error}")),
        };

        let body = enrichment.body();
        let input = ExtractionInput {
            request: MessageView {
                headers: request.headers(),
                body: &body[..],
            },
            query: request.uri().query(),
            response: None,
        };
        let extracted = match extract_all(&config.attributes, &input) {
            Ok(extracted) => extracted,
            Err(error) => return deny(enrichment, error.to_string()),
        };

        let map = compose_with_organizations(
            &rule,
            request.headers(),
            &self.identity_header,
            extracted,
            enrichment.path_params(),
            self.projects.as_ref(),
        )
        .await;

        if let Err(error) = enrichment.set_attributes(map) {
            return deny(enrichment, error.to_string());
        }
        Flow::Continue
    }
}
