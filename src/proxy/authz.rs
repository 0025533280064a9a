//! Authorization gate middleware
//!
//! ```yaml
//! - name: authz
//!   config:
//!     actions: [view, edit]
//!     attributes:
//!       resource_type: { type: constant, value: instance }
//! ```
//!
//! One resource is built per `project` x `resource` x `team` combination and
//! every resource must pass at least one configured action. A rule whose
//! backend declares no namespace is exempt.
//!
//! Explicit permissions check a single attribute against a fixed namespace
//! instead, and any one passing permission admits the request:
//!
//! ```yaml
//!     permissions:
//!       - { name: view, namespace: compute/instance, attribute: resource }
//! ```

use crate::domain::attributes::keys;
use crate::domain::resource::{namespace_id, synthesize_resources, ProjectScope};
use crate::domain::{
    Action, AttributeMap, AttributeSpec, MiddlewareKind, MiddlewareSpec, Resource, Subject,
};
use crate::proxy::attributes::{
    compose_with_organizations, extract_all, resolve_organizations, ExtractionInput, MessageView,
};
use crate::proxy::chain::{Flow, Middleware};
use crate::proxy::enrichment::Enrichment;
use crate::proxy::error_response::ErrorResponseExt;
use crate::proxy::types::ProxyError;
use crate::services::{AuthzService, ProjectService};
use async_trait::async_trait;
use axum::body::Body;
use http::Request;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct AuthzConfig {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Permission {
    pub name: String,
    pub namespace: String,
    pub attribute: String,
}

/// Why the gate refused a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    NoResources,
    NoActions,
    NotPermitted { resource: String },
    ServiceFailed(String),
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoResources => f.write_str("no resource could be built from the attributes"),
            Self::NoActions => f.write_str("no actions configured"),
            Self::NotPermitted { resource } => write!(f, "no configured action permits {resource}"),
            Self::ServiceFailed(error) => write!(f, "authorization service failed: {error}"),
        }
    }
}

/// Resources the gate checks for an attribute map
pub fn resources_for(attributes: &AttributeMap, backend_namespace: &str) -> Vec<Resource> {
    let organization = attributes
        .values_of(keys::ORGANIZATION)
        .into_iter()
        .next()
        .unwrap_or_default();
    let scopes: Vec<ProjectScope> = attributes
        .values_of(keys::PROJECT)
        .into_iter()
        .map(|project_id| ProjectScope {
            organization_id: organization.clone(),
            project_id,
        })
        .collect();
    let resource_type = attributes.values_of(keys::RESOURCE_TYPE).into_iter().next();

    synthesize_resources(
        &scopes,
        &attributes.values_of(keys::RESOURCE),
        &attributes.values_of(keys::TEAM),
        &namespace_id(backend_namespace, resource_type.as_deref()),
    )
}

/// Every resource must pass at least one action; checks stop at the first failure
pub async fn check_all(
    service: &dyn AuthzService,
    subject: &Subject,
    resources: &[Resource],
    actions: &[Action],
) -> Result<(), Denial> {
    if resources.is_empty() {
        return Err(Denial::NoResources);
    }
    if actions.is_empty() {
        return Err(Denial::NoActions);
    }

    for resource in resources {
        let mut permitted = false;
        for action in actions {
            let allowed = service
                .check_authz(subject, resource, action)
                .await
                .map_err(|e| Denial::ServiceFailed(e.to_string()))?;
            debug!(resource = %resource.name, %action, allowed, "Permission checked");
            if allowed {
                permitted = true;
                break;
            }
        }
        if !permitted {
            return Err(Denial::NotPermitted {
                resource: resource.name.clone(),
            });
        }
    }
    Ok(())
}

/// Any one permission passing is enough
pub async fn check_permissions(
    service: &dyn AuthzService,
    subject: &Subject,
    attributes: &AttributeMap,
    permissions: &[Permission],
) -> Result<(), Denial> {
    let first = |key: &str| attributes.values_of(key).into_iter().next().unwrap_or_default();

    for permission in permissions {
        let Some(name) = attributes.values_of(&permission.attribute).into_iter().next() else {
            continue;
        };
        let resource = Resource {
            id: None,
            name,
            organization_id: first(keys::ORGANIZATION),
            project_id: first(keys::PROJECT),
            group_id: None,
            namespace_id: permission.namespace.clone(),
        };
        let allowed = service
            .check_authz(subject, &resource, &Action::new(permission.name.as_str()))
            .await
            .map_err(|e| Denial::ServiceFailed(e.to_string()))?;
        if allowed {
            return Ok(());
        }
    }
    Err(Denial::NotPermitted {
        resource: "any configured permission".to_string(),
    })
}

/// The `authz` middleware
pub struct AuthzMiddleware {
    identity_header: String,
    service: Arc<dyn AuthzService>,
    projects: Arc<dyn ProjectService>,
}

impl AuthzMiddleware {
    pub fn new(
        identity_header: impl Into<String>,
        service: Arc<dyn AuthzService>,
        projects: Arc<dyn ProjectService>,
    ) -> Self {
        Self {
            identity_header: identity_header.into(),
            service,
            projects,
        }
    }
}

fn deny(enrichment: &Enrichment, reason: String) -> Flow {
    info!(%reason, "Authorization denied");
    let request_id = enrichment.request_id().to_string();
    Flow::Halt(ProxyError::unauthorized(reason).into_http_response(Some(&request_id)))
}

#[async_trait]
impl Middleware for AuthzMiddleware {
    fn kind(&self) -> Option<MiddlewareKind> {
        Some(MiddlewareKind::Authz)
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
        let config: AuthzConfig = match spec.map(MiddlewareSpec::decode).transpose() {
            Ok(config) => config.unwrap_or_default(),
            Err(error) => return deny(enrichment, format!("invalid authz config: {error}")),
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
        let own = match extract_all(&config.attributes, &input) {
            Ok(own) => own,
            Err(error) => return deny(enrichment, error.to_string()),
        };

        let attributes = match enrichment.attributes().cloned() {
            Some(mut attributes) => {
                let adds_projects = own.contains_key(keys::PROJECT);
                attributes.merge(own);
                if adds_projects {
                    resolve_organizations(&mut attributes, self.projects.as_ref()).await;
                }
                attributes
            }
            None => {
                compose_with_organizations(
                    &rule,
                    request.headers(),
                    &self.identity_header,
                    own,
                    enrichment.path_params(),
                    self.projects.as_ref(),
                )
                .await
            }
        };

        let Some(namespace) = attributes.values_of(keys::NAMESPACE).into_iter().next() else {
            debug!(rule = %rule.label(), "No authorization namespace; rule is exempt");
            return Flow::Continue;
        };

        let subject = attributes
            .values_of(keys::USER)
            .into_iter()
            .next()
            .map(Subject::new)
            .unwrap_or_else(Subject::anonymous);

        let outcome = if config.permissions.is_empty() {
            let resources = resources_for(&attributes, &namespace);
            let actions: Vec<Action> =
                config.actions.iter().map(|a| Action::new(a.as_str())).collect();
            check_all(self.service.as_ref(), &subject, &resources, &actions).await
        } else {
            check_permissions(
                self.service.as_ref(),
                &subject,
                &attributes,
                &config.permissions,
            )
            .await
        };

        match outcome {
            Ok(()) => {
                info!(
                    user = %subject,
                    rule = %rule.label(),
                    "Authorization granted"
                );
                Flow::Continue
            }
            Err(denial @ Denial::ServiceFailed(_)) => {
                warn!(error = %denial, "Authorization check failed");
                deny(enrichment, denial.to_string())
            }
            Err(denial) => deny(enrichment, denial.to_string()),
        }
    }
}
