//! Type definitions for the proxy module

use nutype::nutype;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ========== Size and Time Types ==========

/// Maximum size for buffered request bodies in bytes
#[nutype(
    derive(Clone, Copy, Debug, Display, PartialEq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |size: &usize| *size > 0),
)]
pub struct RequestSizeLimit(usize);

impl RequestSizeLimit {
    pub fn bytes(&self) -> usize {
        *self.as_ref()
    }
}

/// Interval between scheduled rule refreshes, in seconds
#[nutype(
    derive(Clone, Copy, Debug, Display, PartialEq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |secs: &u64| *secs > 0),
)]
pub struct RefreshInterval(u64);

impl RefreshInterval {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(*self.as_ref())
    }
}

// ========== Identifier Types ==========

/// Request correlation id; generated ids are v7 UUIDs
#[nutype(derive(Clone, Copy, Debug, Display, PartialEq, Eq, Deserialize, Serialize, From, AsRef))]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new RequestId with a v7 UUID
    pub fn generate() -> Self {
        Self::from(Uuid::now_v7())
    }

    /// Accept a caller-supplied id only if it is a v7 UUID
    pub fn parse_v7(value: &str) -> Option<Self> {
        Uuid::parse_str(value)
            .ok()
            .filter(|uuid| uuid.get_version_num() == 7)
            .map(Self::from)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Backend base URL
#[nutype(
    sanitize(trim),
    validate(predicate = |s: &str| s.starts_with("http://") || s.starts_with("https://")),
    derive(Clone, Debug, Display, PartialEq, Deserialize, Serialize, TryFrom, AsRef),
)]
pub struct TargetUrl(String);

// ========== Errors ==========

/// Errors surfaced to callers of the proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("no rule matches {method} {path}")]
    NoRuleMatched { method: String, path: String },

    #[error("invalid backend target {target:?}: {reason}")]
    InvalidBackendTarget { target: String, reason: String },

    #[error("request denied: {0}")]
    Unauthorized(String),

    #[error("request body exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized(reason.into())
    }
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_generation_is_v7() {
        let id = RequestId::generate();
        assert_eq!(id.as_ref().get_version_num(), 7);
        assert_eq!(RequestId::parse_v7(&id.to_string()), Some(id));
    }

    #[test]
    fn test_request_id_rejects_other_versions() {
        let v4 = Uuid::new_v4().to_string();
        assert_eq!(RequestId::parse_v7(&v4), None);
        assert_eq!(RequestId::parse_v7("not-a-uuid"), None);
    }

    #[test]
    fn test_target_url_validation() {
        assert!(TargetUrl::try_new(" http://svc:8080 ").is_ok());
        assert!(TargetUrl::try_new("ftp://svc").is_err());
    }

    #[test]
    fn test_limits_must_be_positive() {
        assert!(RequestSizeLimit::try_new(0).is_err());
        assert_eq!(RequestSizeLimit::try_new(1024).unwrap().bytes(), 1024);
        assert!(RefreshInterval::try_new(0).is_err());
        assert_eq!(
            RefreshInterval::try_new(30).unwrap().duration(),
            Duration::from_secs(30)
        );
    }
}
