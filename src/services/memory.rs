//! In-process authority

use crate::domain::{Action, Organization, Project, Resource, Subject};
use crate::services::{AuthzService, ProjectService, ResourceRegistry, ServiceError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// One grant: `subject` may perform `action` on resources named `resource`
/// in `namespace_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Grant {
    pub subject: String,
    pub namespace_id: String,
    pub resource: String,
    pub action: String,
}

/// Authority backed by in-memory tables
#[derive(Debug, Default)]
pub struct InMemoryAuthority {
    grants: RwLock<HashSet<Grant>>,
    projects: RwLock<HashMap<String, Project>>,
    created: RwLock<Vec<Resource>>,
    failing_creates: RwLock<bool>,
}

impl InMemoryAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(
        &self,
        subject: impl Into<String>,
        namespace_id: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) {
        self.grants.write().insert(Grant {
            subject: subject.into(),
            namespace_id: namespace_id.into(),
            resource: resource.into(),
            action: action.into(),
        });
    }

    /// Register a project under both its id and its name
    pub fn add_project(&self, id: &str, name: &str, organization_id: &str) {
        let project = Project {
            id: id.to_string(),
            name: name.to_string(),
            organization: Organization {
                id: organization_id.to_string(),
                name: String::new(),
            },
        };
        let mut projects = self.projects.write();
        projects.insert(name.to_string(), project.clone());
        projects.insert(id.to_string(), project);
    }

    /// Make every subsequent `create` call fail
    pub fn fail_creates(&self, fail: bool) {
        *self.failing_creates.write() = fail;
    }

    pub fn created(&self) -> Vec<Resource> {
        self.created.read().clone()
    }
}

#[async_trait]
impl AuthzService for InMemoryAuthority {
    async fn check_authz(
        &self,
        subject: &Subject,
        resource: &Resource,
        action: &Action,
    ) -> Result<bool, ServiceError> {
        let wanted = Grant {
            subject: subject.id().to_string(),
            namespace_id: resource.namespace_id.clone(),
            resource: resource.name.clone(),
            action: action.id().to_string(),
        };
        Ok(self.grants.read().contains(&wanted))
    }
}

#[async_trait]
impl ResourceRegistry for InMemoryAuthority {
    async fn create(&self, resource: Resource) -> Result<Resource, ServiceError> {
        if *self.failing_creates.read() {
            return Err(ServiceError::Status { status: 500 });
        }
        let mut created = self.created.write();
        let stored = Resource {
            id: Some(format!("res-{}", created.len() + 1)),
            ..resource
        };
        created.push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl ProjectService for InMemoryAuthority {
    async fn get(&self, id_or_name: &str) -> Result<Project, ServiceError> {
        self.projects
            .read()
            .get(id_or_name)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("project {id_or_name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(name: &str) -> Resource {
        Resource {
            id: None,
            name: name.into(),
            organization_id: "o1".into(),
            project_id: "p1".into(),
            group_id: None,
            namespace_id: "compute/instance".into(),
        }
    }

    #[tokio::test]
    async fn test_grants_are_exact() {
        let authority = InMemoryAuthority::new();
        authority.grant("alice", "compute/instance", "vm-1", "view");

        let alice = Subject::new("alice");
        assert!(authority
            .check_authz(&alice, &resource("vm-1"), &Action::new("view"))
            .await
            .unwrap());
        assert!(!authority
            .check_authz(&alice, &resource("vm-1"), &Action::new("delete"))
            .await
            .unwrap());
        assert!(!authority
            .check_authz(&Subject::new("bob"), &resource("vm-1"), &Action::new("view"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_projects_resolve_by_id_or_name() {
        let authority = InMemoryAuthority::new();
        authority.add_project("p-1", "web", "org-1");

        assert_eq!(authority.get("web").await.unwrap().id, "p-1");
        assert_eq!(authority.get("p-1").await.unwrap().organization.id, "org-1");
        assert!(matches!(
            authority.get("nope").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let authority = InMemoryAuthority::new();
        let created = authority.create(resource("vm-1")).await.unwrap();
        assert_eq!(created.id.as_deref(), Some("res-1"));
        assert_eq!(authority.created().len(), 1);

        authority.fail_creates(true);
        assert!(authority.create(resource("vm-2")).await.is_err());
        assert_eq!(authority.created().len(), 1);
    }
}
