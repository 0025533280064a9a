//! Path-prefix rewriting middleware

use crate::domain::{MiddlewareKind, MiddlewareSpec};
use crate::proxy::chain::{Flow, Middleware};
use crate::proxy::enrichment::Enrichment;
use async_trait::async_trait;
use axum::body::Body;
use http::uri::PathAndQuery;
use http::{Request, Uri};
use tracing::{debug, warn};

/// Strip `prefix` from `path` on a segment boundary; the result always starts with `/`
pub fn strip_prefix(path: &str, prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        return normalize(path);
    }

    match path.strip_prefix(trimmed) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => normalize(rest),
        _ => normalize(path),
    }
}

fn normalize(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Rebuild `uri` with a new path, keeping scheme, authority and query
pub fn with_path(uri: &Uri, path: &str) -> Result<Uri, http::Error> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query)?);
    Ok(Uri::from_parts(parts)?)
}

/// The `prefix` middleware
#[derive(Debug, Default)]
pub struct PrefixMiddleware;

#[async_trait]
impl Middleware for PrefixMiddleware {
    fn kind(&self) -> Option<MiddlewareKind> {
        Some(MiddlewareKind::Prefix)
    }

    async fn handle(
        &self,
        request: &mut Request<Body>,
        enrichment: &mut Enrichment,
        _spec: Option<&MiddlewareSpec>,
    ) -> Flow {
        let Some(rule) = enrichment.rule() else {
            return Flow::Continue;
        };
        if rule.backend.prefix.is_empty() {
            return Flow::Continue;
        }

        let stripped = strip_prefix(request.uri().path(), &rule.backend.prefix);
        match with_path(request.uri(), &stripped) {
            Ok(uri) => {
                debug!(from = %request.uri().path(), to = %stripped, "Stripped backend prefix");
                *request.uri_mut() = uri;
            }
            Err(error) => warn!(%error, "Could not rewrite request path; leaving it unchanged"),
        }
        Flow::Continue
    }
}
