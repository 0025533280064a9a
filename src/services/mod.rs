//! External capabilities consulted by the proxy
//!
//! The proxy never owns authorization data. It asks three collaborators:
//!
//! - an [`AuthzService`] that answers permission checks,
//! - a [`ResourceRegistry`] that records newly created resources,
//! - a [`ProjectService`] that resolves a project id or name to its owning
//!   organization.
//!
//! [`remote::RemoteAuthority`] implements all three over JSON/HTTP;
//! [`memory::InMemoryAuthority`] keeps everything in process.

pub mod memory;
pub mod remote;

use crate::domain::{Action, Project, Resource, Subject};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("authority rejected the call with status {status}")]
    Status { status: u16 },

    #[error("authority unreachable: {0}")]
    Transport(String),

    #[error("malformed authority response: {0}")]
    Decode(String),

    #[error("invalid authority request: {0}")]
    Request(String),
}

#[async_trait]
pub trait AuthzService: Send + Sync {
    /// Whether `subject` may perform `action` on `resource`
    async fn check_authz(
        &self,
        subject: &Subject,
        resource: &Resource,
        action: &Action,
    ) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    async fn create(&self, resource: Resource) -> Result<Resource, ServiceError>;
}

#[async_trait]
pub trait ProjectService: Send + Sync {
    /// Look a project up by id or name
    async fn get(&self, id_or_name: &str) -> Result<Project, ServiceError>;
}

/// The collaborators handed to middleware and hooks
#[derive(Clone)]
pub struct Capabilities {
    pub authz: Arc<dyn AuthzService>,
    pub registry: Arc<dyn ResourceRegistry>,
    pub projects: Arc<dyn ProjectService>,
}

impl Capabilities {
    /// Use one value for all three capabilities
    pub fn from_authority<T>(authority: Arc<T>) -> Self
    where
        T: AuthzService + ResourceRegistry + ProjectService + 'static,
    {
        Self {
            authz: authority.clone(),
            registry: authority.clone(),
            projects: authority,
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
