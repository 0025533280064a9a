//! Backend dispatch
//!
//! Two pooled clients share the work. gRPC and HTTP/2 requests go over
//! HTTP/2 with prior knowledge (h2c); everything else goes over HTTP/1.1.
//! Response bodies are handed back as they arrive, frame by frame.

use crate::payload::grpc::is_grpc_content_type;
use crate::proxy::enrichment::Enrichment;
use crate::proxy::headers::content_type;
use crate::proxy::types::{ProxyError, ProxyResult};
use axum::body::Body;
use axum::response::Response;
use http::{Request, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Instant;
use tracing::{debug, warn};

type UpstreamClient = Client<HttpConnector, Body>;

#[derive(Clone)]
pub struct Transport {
    http1: UpstreamClient,
    h2c: UpstreamClient,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);

        let http1 = Client::builder(TokioExecutor::new())
            .http1_preserve_header_case(true)
            .build(connector.clone());
        let h2c = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build(connector);

        Self { http1, h2c }
    }

    /// Whether `request` must travel over h2c
    pub fn needs_h2c<B>(request: &Request<B>) -> bool {
        request.version() == Version::HTTP_2
            || is_grpc_content_type(content_type(request.headers()))
    }

    /// Send `request` to its backend.
    ///
    /// An error deferred by the director is returned here instead of
    /// dispatching.
    pub async fn round_trip(
        &self,
        mut request: Request<Body>,
        enrichment: &mut Enrichment,
    ) -> ProxyResult<Response> {
        if let Some(error) = enrichment.take_deferred_error() {
            return Err(error);
        }

        let client = if Self::needs_h2c(&request) {
            *request.version_mut() = Version::HTTP_2;
            &self.h2c
        } else {
            *request.version_mut() = Version::HTTP_11;
            &self.http1
        };

        let start = Instant::now();
        let upstream = request.uri().clone();
        let response = client.request(request).await.map_err(|error| {
            warn!(
                upstream = %upstream,
                %error,
                "Backend dispatch failed"
            );
            ProxyError::Upstream(error.to_string())
        })?;

        debug!(
            upstream = %upstream,
            status = response.status().as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Backend responded"
        );
        Ok(response.map(Body::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::types::RequestId;
    use http::StatusCode;
    use http_body_util::BodyExt;

    #[test]
    fn test_protocol_selection() {
        let grpc = Request::builder()
            .header("content-type", "application/grpc+proto")
            .body(())
            .unwrap();
        assert!(Transport::needs_h2c(&grpc));

        let h2 = Request::builder().version(Version::HTTP_2).body(()).unwrap();
        assert!(Transport::needs_h2c(&h2));

        let json = Request::builder()
            .header("content-type", "application/json")
            .body(())
            .unwrap();
        assert!(!Transport::needs_h2c(&json));
    }

    #[tokio::test]
    async fn test_round_trip_streams_backend_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ping")
            .with_status(202)
            .with_body("pong")
            .create_async()
            .await;

        let request = Request::builder()
            .uri(format!("{}/ping", server.url()))
            .body(Body::empty())
            .unwrap();
        let mut enrichment = Enrichment::new(RequestId::generate());
        let response = Transport::new()
            .round_trip(request, &mut enrichment)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"pong");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_deferred_error_prevents_dispatch() {
        let mut enrichment = Enrichment::new(RequestId::generate());
        enrichment
            .defer_error(ProxyError::InvalidBackendTarget {
                target: "bad host".into(),
                reason: "invalid uri".into(),
            })
            .unwrap();

        let request = Request::builder()
            .uri("http://127.0.0.1:9/ping")
            .body(Body::empty())
            .unwrap();
        let result = Transport::new().round_trip(request, &mut enrichment).await;
        assert!(matches!(result, Err(ProxyError::InvalidBackendTarget { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_upstream_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let request = Request::builder()
            .uri(format!("http://{address}/ping"))
            .body(Body::empty())
            .unwrap();
        let mut enrichment = Enrichment::new(RequestId::generate());
        let result = Transport::new().round_trip(request, &mut enrichment).await;
        assert!(matches!(result, Err(ProxyError::Upstream(_))));
    }
}
