//! Post-response hook pipeline
//!
//! Hooks run after the backend answers, in the order the rule lists them.
//! Each returns [`HookFlow::Continue`] to pass the response on, or
//! [`HookFlow::Halt`] to skip the remaining hooks and return immediately.
//! A halt never rewrites what the backend said; its error is only logged.

use crate::domain::attributes::keys;
use crate::domain::resource::{namespace_id, synthesize_resources, ProjectScope};
use crate::domain::{AttributeMap, AttributeSource, AttributeSpec, HookKind, HookSpec, Resource};
use crate::proxy::attributes::{
    compose, extract_all, ExtractionError, ExtractionInput, MessageView,
};
use crate::proxy::enrichment::Enrichment;
use crate::proxy::rule_match::buffer_body;
use crate::proxy::types::{ProxyError, RequestSizeLimit};
use crate::services::{ProjectService, ResourceRegistry, ServiceError};
use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use http::HeaderMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum HookError {
    #[error(transparent)]
    Attribute(#[from] ExtractionError),

    #[error("namespace, resource type, projects and resource are required")]
    MissingAttributes,

    #[error("project lookup failed for {project}: {source}")]
    Lookup {
        project: String,
        #[source]
        source: ServiceError,
    },

    #[error("resource registration failed for {resource}: {source}")]
    Registration {
        resource: String,
        #[source]
        source: ServiceError,
    },

    #[error("could not buffer response body: {0}")]
    Body(#[from] ProxyError),
}

pub enum HookFlow {
    Continue(Response),
    Halt {
        response: Response,
        error: Option<HookError>,
    },
}

impl HookFlow {
    fn halt(response: Response, error: HookError) -> Self {
        Self::Halt {
            response,
            error: Some(error),
        }
    }
}

#[async_trait]
pub trait Hook: Send + Sync {
    fn kind(&self) -> HookKind;

    async fn serve_hook(
        &self,
        response: Response,
        dispatch_error: Option<&ProxyError>,
        enrichment: &Enrichment,
        spec: &HookSpec,
    ) -> HookFlow;
}

/// Registered hooks, run in each rule's configured order
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    fn find(&self, kind: HookKind) -> Option<&Arc<dyn Hook>> {
        self.hooks.iter().find(|hook| hook.kind() == kind)
    }

    pub async fn run(
        &self,
        mut response: Response,
        dispatch_error: Option<&ProxyError>,
        enrichment: &Enrichment,
    ) -> Response {
        let Some(rule) = enrichment.rule().cloned() else {
            return response;
        };

        for spec in &rule.hooks {
            let Some(hook) = self.find(spec.kind) else {
                debug!(hook = %spec.kind, "No hook registered for kind");
                continue;
            };
            match hook.serve_hook(response, dispatch_error, enrichment, spec).await {
                HookFlow::Continue(next) => response = next,
                HookFlow::Halt { response, error } => {
                    if let Some(error) = error {
                        warn!(
                            hook = %spec.kind,
                            %error,
                            "Hook chain stopped"
                        );
                    }
                    return response;
                }
            }
        }
        response
    }
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|hook| hook.kind()))
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthzHookConfig {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSpec>,
}

/// Registers the resources a successful request created
pub struct AuthzHook {
    identity_header: String,
    registry: Arc<dyn ResourceRegistry>,
    projects: Arc<dyn ProjectService>,
    max_body: RequestSizeLimit,
}

impl AuthzHook {
    pub fn new(
        identity_header: impl Into<String>,
        registry: Arc<dyn ResourceRegistry>,
        projects: Arc<dyn ProjectService>,
        max_body: RequestSizeLimit,
    ) -> Self {
        Self {
            identity_header: identity_header.into(),
            registry,
            projects,
            max_body,
        }
    }

    /// Resolve projects and build every resource to register
    async fn plan(&self, attributes: &AttributeMap) -> Result<Vec<Resource>, HookError> {
        let namespace = attributes.values_of(keys::NAMESPACE).into_iter().next();
        let resource_type = attributes.values_of(keys::RESOURCE_TYPE).into_iter().next();
        let project_refs = attributes.values_of(keys::PROJECT);
        let names = attributes.values_of(keys::RESOURCE);

        let (Some(namespace), Some(resource_type)) = (namespace, resource_type) else {
            return Err(HookError::MissingAttributes);
        };
        if project_refs.is_empty() || names.is_empty() {
            return Err(HookError::MissingAttributes);
        }

        let mut scopes = Vec::with_capacity(project_refs.len());
        for project_ref in project_refs {
            let project = self
                .projects
                .get(&project_ref)
                .await
                .map_err(|source| HookError::Lookup {
                    project: project_ref.clone(),
                    source,
                })?;
            scopes.push(ProjectScope {
                organization_id: project.organization.id,
                project_id: project.id,
            });
        }

        Ok(synthesize_resources(
            &scopes,
            &names,
            &attributes.values_of(keys::TEAM),
            &namespace_id(&namespace, Some(&resource_type)),
        ))
    }
}

#[async_trait]
impl Hook for AuthzHook {
    fn kind(&self) -> HookKind {
        HookKind::Authz
    }

    async fn serve_hook(
        &self,
        response: Response,
        dispatch_error: Option<&ProxyError>,
        enrichment: &Enrichment,
        spec: &HookSpec,
    ) -> HookFlow {
        if dispatch_error.is_some() || response.status().as_u16() >= 400 {
            return HookFlow::Halt {
                response,
                error: None,
            };
        }
        let Some(rule) = enrichment.rule() else {
            return HookFlow::Continue(response);
        };

        // An undecodable config disables this hook, it does not stop the chain.
        let config: AuthzHookConfig = match spec.decode() {
            Ok(config) => config,
            Err(error) => {
                warn!(hook = %spec.kind, %error, "Skipping hook with invalid config");
                return HookFlow::Continue(response);
            }
        };
        if rule.backend.namespace.is_empty() {
            return HookFlow::halt(response, HookError::MissingAttributes);
        }

        // Only buffer the response when an attribute reads from it.
        let needs_response = config
            .attributes
            .values()
            .any(|attribute| attribute.source == AttributeSource::Response);
        let (response, response_body) = if needs_response {
            let (parts, body) = response.into_parts();
            match buffer_body(body, self.max_body).await {
                Ok(bytes) => (
                    Response::from_parts(parts, Body::from(bytes.clone())),
                    Some(bytes),
                ),
                Err(error) => {
                    return HookFlow::halt(Response::from_parts(parts, Body::empty()), error.into())
                }
            }
        } else {
            (response, None)
        };

        let empty = HeaderMap::new();
        let request_headers = enrichment
            .forwarded()
            .or(enrichment.original())
            .map(|snapshot| &snapshot.headers)
            .unwrap_or(&empty);
        let request_body = enrichment.body();
        let input = ExtractionInput {
            request: MessageView {
                headers: request_headers,
                body: &request_body[..],
            },
            query: enrichment.original().and_then(|snapshot| snapshot.uri.query()),
            response: response_body.as_ref().map(|body| MessageView {
                headers: response.headers(),
                body: &body[..],
            }),
        };

        let extracted = match extract_all(&config.attributes, &input) {
            Ok(extracted) => extracted,
            Err(error) => return HookFlow::halt(response, error.into()),
        };
        // Start from what the request chain extracted; the hook's own values win.
        let mut attributes = enrichment.attributes().cloned().unwrap_or_else(|| {
            compose(
                rule,
                request_headers,
                &self.identity_header,
                AttributeMap::new(),
                enrichment.path_params(),
            )
        });
        attributes.merge(extracted);

        let resources = match self.plan(&attributes).await {
            Ok(resources) => resources,
            Err(error) => return HookFlow::halt(response, error),
        };

        for resource in resources {
            let name = resource.name.clone();
            match self.registry.create(resource).await {
                Ok(created) => info!(
                    resource = %created.name,
                    id = created.id.as_deref().unwrap_or_default(),
                    namespace = %created.namespace_id,
                    action = %config.action,
                    "Registered resource"
                ),
                Err(source) => {
                    return HookFlow::halt(
                        response,
                        HookError::Registration {
                            resource: name,
                            source,
                        },
                    )
                }
            }
        }

        HookFlow::Continue(response)
    }
}
