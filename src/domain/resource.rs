//! Authorization-domain records exchanged with the external authority

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// A resource as understood by the authorization service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub organization_id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub namespace_id: String,
}

/// A permission name checked against a resource, e.g. `view`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// The principal on whose behalf a check is made
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn anonymous() -> Self {
        Self(String::new())
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub organization: Organization,
}

/// Namespace id for a backend namespace and an optional resource type
pub fn namespace_id(backend_namespace: &str, resource_type: Option<&str>) -> String {
    match resource_type.filter(|t| !t.is_empty()) {
        Some(resource_type) => format!("{backend_namespace}/{resource_type}"),
        None => backend_namespace.to_string(),
    }
}

/// One `(organization, project)` pair a resource is scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectScope {
    pub organization_id: String,
    pub project_id: String,
}

/// Build one resource per project × resource name × team combination.
///
/// With no teams, one resource per project × resource name is produced.
pub fn synthesize_resources(
    scopes: &[ProjectScope],
    names: &[String],
    teams: &[String],
    namespace_id: &str,
) -> Vec<Resource> {
    let team_choices: Vec<Option<&String>> = if teams.is_empty() {
        vec![None]
    } else {
        teams.iter().map(Some).collect()
    };

    let mut resources = Vec::with_capacity(scopes.len() * names.len() * team_choices.len());
    for scope in scopes {
        for name in names {
            for team in &team_choices {
                resources.push(Resource {
                    id: None,
                    name: name.clone(),
                    organization_id: scope.organization_id.clone(),
                    project_id: scope.project_id.clone(),
                    group_id: team.cloned(),
                    namespace_id: namespace_id.to_string(),
                });
            }
        }
    }
    resources
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(org: &str, project: &str) -> ProjectScope {
        ProjectScope {
            organization_id: org.to_string(),
            project_id: project.to_string(),
        }
    }

    #[test]
    fn test_namespace_id() {
        assert_eq!(namespace_id("compute", Some("instance")), "compute/instance");
        assert_eq!(namespace_id("compute", Some("")), "compute");
        assert_eq!(namespace_id("compute", None), "compute");
    }

    #[test]
    fn test_synthesize_cross_product() {
        let scopes = vec![scope("o1", "p1"), scope("o2", "p2")];
        let names = vec!["r1".to_string(), "r2".to_string()];
        let teams = vec!["t1".to_string(), "t2".to_string(), "t3".to_string()];

        let resources = synthesize_resources(&scopes, &names, &teams, "ns/type");
        assert_eq!(resources.len(), 12);
        assert!(resources.iter().all(|r| r.namespace_id == "ns/type"));
        assert!(resources
            .iter()
            .any(|r| r.project_id == "p2" && r.name == "r1" && r.group_id.as_deref() == Some("t3")));
    }

    #[test]
    fn test_synthesize_without_teams() {
        let resources =
            synthesize_resources(&[scope("o1", "p1")], &["r1".to_string()], &[], "ns");
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].group_id, None);
        assert_eq!(resources[0].organization_id, "o1");
    }

    #[test]
    fn test_resource_serialization_omits_empty_options() {
        let resource = Resource {
            id: None,
            name: "r".into(),
            organization_id: "o".into(),
            project_id: "p".into(),
            group_id: None,
            namespace_id: "ns".into(),
        };
        let json = serde_json::to_value(&resource).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("group_id").is_none());
        assert_eq!(json["namespace_id"], "ns");
    }
}
