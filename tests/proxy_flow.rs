//! Proxy behaviour through the public API: scheduled rule reloads and
//! authorization against a remote authority

use axum::body::Body;
use http::{Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use warden::domain::MatchStrategy;
use warden::proxy::types::RequestSizeLimit;
use warden::proxy::{ProxyService, ProxySettings};
use warden::rules::{matcher, FsBlobSource, RuleStore};
use warden::services::memory::InMemoryAuthority;
use warden::services::remote::RemoteAuthority;
use warden::services::Capabilities;

fn settings() -> ProxySettings {
    ProxySettings {
        identity_header: http::HeaderName::from_static("x-user"),
        proxy_name: "warden".to_string(),
        max_body: RequestSizeLimit::try_new(1024 * 1024).unwrap(),
        request_timeout: Duration::from_secs(5),
    }
}

fn rule(path: &str, backend: &str) -> String {
    format!(
        "rules:\n  - backends:\n      - name: \"\"\n        target: {backend}\n        frontends:\n          - path: {path}\n            method: GET\n"
    )
}

async fn status_of(router: &axum::Router, uri: &str) -> StatusCode {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_scheduled_refresh_picks_up_new_rules() {
    let mut backend = mockito::Server::new_async().await;
    backend
        .mock("GET", mockito::Matcher::Any)
        .with_status(200)
        .expect_at_least(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.yaml"), rule("/first", &backend.url())).unwrap();

    let store = Arc::new(RuleStore::new(
        Arc::new(FsBlobSource::new(dir.path())),
        MatchStrategy::Route,
    ));
    store.init_cache(Duration::from_millis(50)).await.unwrap();

    let router = ProxyService::new(
        matcher::for_store(store.clone()),
        Capabilities::from_authority(Arc::new(InMemoryAuthority::new())),
        settings(),
    )
    .into_router();

    assert_eq!(status_of(&router, "/first").await, StatusCode::OK);
    assert_eq!(status_of(&router, "/second").await, StatusCode::BAD_REQUEST);

    std::fs::write(dir.path().join("b.yaml"), rule("/second", &backend.url())).unwrap();
    let mut reloaded = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if status_of(&router, "/second").await == StatusCode::OK {
            reloaded = true;
            break;
        }
    }
    assert!(reloaded, "new rule file was never picked up");

    // A broken file does not disturb the rules already serving.
    std::fs::write(dir.path().join("a.yaml"), "rules: [").unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(status_of(&router, "/second").await, StatusCode::OK);

    store.stop().await.unwrap();
}

#[tokio::test]
async fn test_remote_authority_decides() {
    let mut authority = mockito::Server::new_async().await;
    authority
        .mock("GET", "/v1/projects/web")
        .with_status(404)
        .create_async()
        .await;
    let check = authority
        .mock("POST", "/v1/check")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "subject": "alice",
            "action": "view",
            "resource": { "name": "vm-1", "namespace_id": "compute" }
        })))
        .with_status(200)
        .with_body(r#"{"allowed": true}"#)
        .create_async()
        .await;

    let mut backend = mockito::Server::new_async().await;
    let forwarded = backend
        .mock("GET", "/instances/vm-1")
        .with_status(200)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let rules = format!(
        r#"
rules:
  - backends:
      - name: compute
        target: {}
        frontends:
          - path: /instances/{{resource}}
            method: GET
            middlewares:
              - name: attributes
                config:
                  attributes:
                    project: {{ type: constant, value: web }}
              - name: authz
                config:
                  actions: [view]
"#,
        backend.url()
    );
    std::fs::write(dir.path().join("rules.yaml"), rules).unwrap();

    let store = Arc::new(RuleStore::new(
        Arc::new(FsBlobSource::new(dir.path())),
        MatchStrategy::Route,
    ));
    let router = ProxyService::new(
        matcher::for_store(store),
        Capabilities::from_authority(Arc::new(RemoteAuthority::new(authority.url()))),
        settings(),
    )
    .into_router();

    let response = router
        .oneshot(
            Request::builder()
                .uri("/instances/vm-1")
                .header("x-user", "alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    check.assert_async().await;
    forwarded.assert_async().await;
}
