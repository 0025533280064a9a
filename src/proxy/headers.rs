//! HTTP header constants and utilities for the proxy service

use ::http::header;

/// Header name for request ID used for tracing and correlation
pub const X_REQUEST_ID: &str = "x-request-id";

/// Header the proxy stamps on every forwarded request
pub const X_PROXIED_BY: &str = "x-proxied-by";

/// Default header carrying the authenticated identity
pub const DEFAULT_IDENTITY_HEADER: &str = "x-user";

/// Scheme prefix of a basic `Authorization` header
pub const BASIC_PREFIX: &str = "Basic ";

/// Standard header re-exports for convenience
pub use header::{AUTHORIZATION, CONTENT_TYPE, HOST, USER_AGENT};

/// Connection-scoped headers that must not be forwarded
pub const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "transfer-encoding",
    "upgrade",
];

/// Well-known paths
pub mod paths {
    /// Liveness endpoint
    pub const PING: &str = "/ping";

    /// Body returned by the liveness endpoint
    pub const PING_BODY: &str = "pong";
}

/// Content type of a message, or the empty string
pub fn content_type(headers: &::http::HeaderMap) -> &str {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}
