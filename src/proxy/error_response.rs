//! Unified error response handling for the proxy service
//!
//! Every error leaves the proxy as a JSON body with a fixed message per
//! status code. Internal detail goes to the logs, never to the caller: a
//! misconfigured rule and a real denial look the same from outside.

use crate::proxy::headers::X_REQUEST_ID;
use crate::proxy::types::ProxyError;
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Standard error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Unique error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Request ID for correlation
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Convert to HTTP response with proper headers
    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        let request_id = self.request_id.clone();
        let mut response = (status, Json(self)).into_response();

        if let Some(id) = request_id {
            if let Ok(header_value) = HeaderValue::from_str(&id) {
                response.headers_mut().insert(X_REQUEST_ID, header_value);
            }
        }

        response
    }
}

/// Extension trait for consistent error formatting
pub trait ErrorResponseExt {
    /// Convert to standardized error response
    fn to_error_response(&self) -> ErrorResponse;

    /// Get the appropriate HTTP status code
    fn status_code(&self) -> StatusCode;

    /// Render as a response carrying `request_id`
    fn into_http_response(&self, request_id: Option<&str>) -> Response {
        let mut error = self.to_error_response();
        if let Some(id) = request_id {
            error = error.with_request_id(id);
        }
        error.into_response_with_status(self.status_code())
    }
}

impl ErrorResponseExt for ProxyError {
    fn to_error_response(&self) -> ErrorResponse {
        use ProxyError::*;

        let (code, message) = match self {
            NoRuleMatched { .. } | InvalidBackendTarget { .. } => ("BAD_REQUEST", "Invalid request"),
            Unauthorized(_) => ("UNAUTHORIZED", "Request not authorized"),
            RequestTooLarge { .. } => ("PAYLOAD_TOO_LARGE", "Request too large"),
            Upstream(_) | Http(_) => ("BAD_GATEWAY", "Upstream service error"),
            Internal(_) => ("INTERNAL_ERROR", "Internal server error"),
        };
        ErrorResponse::new(code, message)
    }

    fn status_code(&self) -> StatusCode {
        use ProxyError::*;

        match self {
            NoRuleMatched { .. } | InvalidBackendTarget { .. } => StatusCode::BAD_REQUEST,
            Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Upstream(_) | Http(_) => StatusCode::BAD_GATEWAY,
            Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use rstest::rstest;

    #[rstest]
    #[case(ProxyError::NoRuleMatched { method: "GET".into(), path: "/x".into() }, StatusCode::BAD_REQUEST, "BAD_REQUEST")]
    #[case(ProxyError::InvalidBackendTarget { target: "::".into(), reason: "bad".into() }, StatusCode::BAD_REQUEST, "BAD_REQUEST")]
    #[case(ProxyError::unauthorized("missing header X-Project"), StatusCode::UNAUTHORIZED, "UNAUTHORIZED")]
    #[case(ProxyError::RequestTooLarge { limit: 10 }, StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE")]
    #[case(ProxyError::Upstream("connection refused".into()), StatusCode::BAD_GATEWAY, "BAD_GATEWAY")]
    #[case(ProxyError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")]
    fn test_status_and_code_mapping(
        #[case] error: ProxyError,
        #[case] status: StatusCode,
        #[case] code: &str,
    ) {
        assert_eq!(error.status_code(), status);
        assert_eq!(error.to_error_response().code, code);
    }

    #[tokio::test]
    async fn test_internal_detail_is_not_echoed() {
        let error = ProxyError::unauthorized("authz config for rule GET /secret failed to decode");
        let response = error.into_http_response(Some("req-123"));

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(X_REQUEST_ID).unwrap(),
            "req-123"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("secret"));
        assert!(text.contains("UNAUTHORIZED"));
    }
}
