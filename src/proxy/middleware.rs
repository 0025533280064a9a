//! Router-level middleware: request ids, the request span, and request logging

use crate::proxy::headers::X_REQUEST_ID;
use crate::proxy::types::RequestId;
use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

fn request_id_of(request: &Request) -> Option<RequestId> {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .and_then(RequestId::parse_v7)
}

/// Ensure every request carries a UUIDv7 `x-request-id`, echoed on the response.
///
/// The rest of the stack runs inside a `request` span carrying the id,
/// method and path, so every event logged further down is tagged with them.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request_id_of(&request).unwrap_or_else(RequestId::generate);
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let header_value = HeaderValue::from_str(&request_id.to_string()).ok();
    if let Some(value) = &header_value {
        request.headers_mut().insert(X_REQUEST_ID, value.clone());
    }

    let mut response = next.run(request).instrument(span).await;
    if let Some(value) = header_value {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

/// Log each request and its outcome with timing
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    info!("Incoming request");

    let response = next.run(request).await;

    info!(
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );
    response
}

/// Log every non-success response
pub async fn error_logging_middleware(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let status = response.status();
    if status.is_server_error() {
        error!(status = status.as_u16(), "Request failed");
    } else if status.is_client_error() {
        warn!(status = status.as_u16(), "Request rejected");
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::http::HeaderMap;
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::Router;
    use crate::proxy::test_utils::test_helpers::capture_logs;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app() -> Router {
        Router::new()
            .route(
                "/x",
                get(|headers: HeaderMap| async move {
                    let seen = headers
                        .get(X_REQUEST_ID)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("missing")
                        .to_string();
                    ([("x-seen-request-id", seen)], StatusCode::OK)
                }),
            )
            .layer(from_fn(request_id_middleware))
    }

    #[tokio::test]
    async fn test_request_id_generated_when_absent() {
        let service = app();

        let request = Request::builder().uri("/x").body(Body::empty()).unwrap();
        let response = service.oneshot(request).await.unwrap();

        let id = response.headers().get(X_REQUEST_ID).unwrap().to_str().unwrap();
        assert_eq!(Uuid::parse_str(id).unwrap().get_version_num(), 7);
        assert_eq!(response.headers().get("x-seen-request-id").unwrap(), id);
    }

    #[tokio::test]
    async fn test_request_id_propagated_when_valid() {
        let service = app();

        let existing = Uuid::now_v7().to_string();
        let request = Request::builder()
            .uri("/x")
            .header(X_REQUEST_ID, &existing)
            .body(Body::empty())
            .unwrap();
        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.headers().get(X_REQUEST_ID).unwrap(), existing.as_str());
    }

    #[tokio::test]
    async fn test_non_v7_request_id_replaced() {
        let service = app();

        let request = Request::builder()
            .uri("/x")
            .header(X_REQUEST_ID, Uuid::new_v4().to_string())
            .body(Body::empty())
            .unwrap();
        let response = service.oneshot(request).await.unwrap();

        let id = response.headers().get(X_REQUEST_ID).unwrap().to_str().unwrap();
        assert_eq!(Uuid::parse_str(id).unwrap().get_version_num(), 7);
    }

    #[tokio::test]
    async fn test_inner_events_carry_request_span_fields() {
        let (logs, _guard) = capture_logs();

        let service = Router::new()
            .route(
                "/inner",
                get(|| async {
                    tracing::info!("handler reached");
                    StatusCode::OK
                }),
            )
            .layer(from_fn(request_id_middleware));

        let existing = Uuid::now_v7().to_string();
        let request = Request::builder()
            .uri("/inner")
            .header(X_REQUEST_ID, &existing)
            .body(Body::empty())
            .unwrap();
        service.oneshot(request).await.unwrap();

        let line = logs.line_containing("handler reached");
        assert!(line.contains(&format!("request_id={existing}")), "{line}");
        assert!(line.contains("method=GET"), "{line}");
        assert!(line.contains("path=/inner"), "{line}");
    }
}
