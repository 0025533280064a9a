//! JSON-over-HTTP client for the external authority
//!
//! | capability          | call                        |
//! |---------------------|-----------------------------|
//! | permission check    | `POST /v1/check`            |
//! | resource creation   | `POST /v1/resources`        |
//! | project lookup      | `GET /v1/projects/{id}`     |

use crate::domain::{Action, Project, Resource, Subject};
use crate::services::{AuthzService, ProjectService, ResourceRegistry, ServiceError};
use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct CheckRequest<'a> {
    subject: &'a Subject,
    resource: &'a Resource,
    action: &'a Action,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    allowed: bool,
}

#[derive(Clone)]
pub struct RemoteAuthority {
    base_url: String,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl std::fmt::Debug for RemoteAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAuthority")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl RemoteAuthority {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(&url)
            .header(header::ACCEPT, "application/json");
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| ServiceError::Request(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        let status = response.status();
        debug!(%method, %url, status = status.as_u16(), "Authority call completed");

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?
            .to_bytes();

        match status {
            s if s.is_success() => {
                serde_json::from_slice(&body).map_err(|e| ServiceError::Decode(e.to_string()))
            }
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound(path.to_string())),
            s => Err(ServiceError::Status { status: s.as_u16() }),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, ServiceError> {
    serde_json::to_vec(value).map_err(|e| ServiceError::Request(e.to_string()))
}

#[async_trait]
impl AuthzService for RemoteAuthority {
    async fn check_authz(
        &self,
        subject: &Subject,
        resource: &Resource,
        action: &Action,
    ) -> Result<bool, ServiceError> {
        let body = to_json(&CheckRequest {
            subject,
            resource,
            action,
        })?;
        let response: CheckResponse = self.call(Method::POST, "/v1/check", Some(body)).await?;
        Ok(response.allowed)
    }
}

#[async_trait]
impl ResourceRegistry for RemoteAuthority {
    async fn create(&self, resource: Resource) -> Result<Resource, ServiceError> {
        let body = to_json(&resource)?;
        self.call(Method::POST, "/v1/resources", Some(body)).await
    }
}

#[async_trait]
impl ProjectService for RemoteAuthority {
    async fn get(&self, id_or_name: &str) -> Result<Project, ServiceError> {
        let path = format!("/v1/projects/{}", urlencoding::encode(id_or_name));
        self.call(Method::GET, &path, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn resource() -> Resource {
        Resource {
            id: None,
            name: "vm-1".into(),
            organization_id: "o1".into(),
            project_id: "p1".into(),
            group_id: Some("t1".into()),
            namespace_id: "compute/instance".into(),
        }
    }

    #[tokio::test]
    async fn test_check_authz_posts_subject_resource_and_action() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/check")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(json!({
                "subject": "alice",
                "action": "view",
                "resource": { "name": "vm-1", "namespace_id": "compute/instance" }
            })))
            .with_status(200)
            .with_body(json!({ "allowed": true }).to_string())
            .create_async()
            .await;

        let authority = RemoteAuthority::new(server.url());
        let allowed = authority
            .check_authz(&Subject::new("alice"), &resource(), &Action::new("view"))
            .await
            .unwrap();

        assert!(allowed);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_statuses_are_errors() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/check")
            .with_status(503)
            .create_async()
            .await;

        let authority = RemoteAuthority::new(format!("{}/", server.url()));
        let result = authority
            .check_authz(&Subject::new("alice"), &resource(), &Action::new("view"))
            .await;
        assert!(matches!(result, Err(ServiceError::Status { status: 503 })));
    }

    #[tokio::test]
    async fn test_create_returns_stored_resource() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/resources")
            .match_body(Matcher::PartialJson(json!({ "group_id": "t1" })))
            .with_status(201)
            .with_body(
                json!({
                    "id": "r-9",
                    "name": "vm-1",
                    "organization_id": "o1",
                    "project_id": "p1",
                    "group_id": "t1",
                    "namespace_id": "compute/instance"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let created = RemoteAuthority::new(server.url())
            .create(resource())
            .await
            .unwrap();
        assert_eq!(created.id.as_deref(), Some("r-9"));
    }

    #[tokio::test]
    async fn test_project_lookup() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/projects/web%20app")
            .with_status(200)
            .with_body(
                json!({ "id": "p-1", "name": "web app", "organization": { "id": "org-1" } })
                    .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/v1/projects/missing")
            .with_status(404)
            .create_async()
            .await;

        let authority = RemoteAuthority::new(server.url());
        let project = authority.get("web app").await.unwrap();
        assert_eq!(project.organization.id, "org-1");
        assert!(matches!(
            authority.get("missing").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_authority() {
        let authority = RemoteAuthority::new("http://127.0.0.1:1");
        let result = authority.get("p").await;
        assert!(matches!(result, Err(ServiceError::Transport(_))));
    }
}
