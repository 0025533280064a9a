//! Outbound request rewriting
//!
//! The director points a request that made it through the middleware chain
//! at its rule's backend. It joins paths with exactly one slash and merges
//! query strings. Caller-supplied `User-Agent` and connection-scoped headers
//! are removed, and the proxy stamps its own name on the request.
//!
//! A backend target that does not parse is not an immediate failure: it is
//! deferred on the enrichment and surfaced by the transport at dispatch.

use crate::proxy::enrichment::Enrichment;
use crate::proxy::headers::{HOP_BY_HOP, HOST, USER_AGENT, X_PROXIED_BY};
use crate::proxy::types::{ProxyError, TargetUrl};
use http::header::{CONNECTION, TE};
use http::uri::{Authority, Scheme};
use http::{HeaderMap, HeaderValue, Request, Uri};
use tracing::{debug, warn};

/// Backend target split into the parts the director needs
#[derive(Debug, Clone)]
pub struct Target {
    pub scheme: Scheme,
    pub authority: Authority,
    pub path: String,
    pub query: Option<String>,
}

impl Target {
    /// Parse `target`, defaulting the scheme to `http`
    pub fn parse(target: &str) -> Result<Self, ProxyError> {
        let invalid = |reason: &str| ProxyError::InvalidBackendTarget {
            target: target.to_string(),
            reason: reason.to_string(),
        };

        let with_scheme = if target.contains("://") {
            target.to_string()
        } else {
            format!("http://{target}")
        };
        let url = TargetUrl::try_new(with_scheme).map_err(|error| invalid(&error.to_string()))?;
        let uri: Uri = url
            .as_ref()
            .parse()
            .map_err(|error: http::uri::InvalidUri| invalid(&error.to_string()))?;
        let parts = uri.into_parts();

        let authority = parts.authority.ok_or_else(|| invalid("missing host"))?;
        let (path, query) = match parts.path_and_query {
            Some(pq) => (pq.path().to_string(), pq.query().map(str::to_string)),
            None => (String::new(), None),
        };

        Ok(Self {
            scheme: parts.scheme.unwrap_or(Scheme::HTTP),
            authority,
            path,
            query,
        })
    }
}

/// Join two paths so exactly one slash sits at the join point
pub fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) if path.is_empty() => base.to_string(),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Target query first, then the request's
pub fn merge_queries(target: Option<&str>, request: Option<&str>) -> Option<String> {
    match (target.filter(|q| !q.is_empty()), request.filter(|q| !q.is_empty())) {
        (Some(target), Some(request)) => Some(format!("{target}&{request}")),
        (Some(query), None) | (None, Some(query)) => Some(query.to_string()),
        (None, None) => None,
    }
}

/// The URI a request for `uri` is sent to on `target`
pub fn rewrite_uri(target: &Target, uri: &Uri) -> Result<Uri, ProxyError> {
    let mut path = join_paths(&target.path, uri.path());
    if path.is_empty() {
        path.push('/');
    }
    let path_and_query = match merge_queries(target.query.as_deref(), uri.query()) {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };

    Ok(Uri::builder()
        .scheme(target.scheme.clone())
        .authority(target.authority.clone())
        .path_and_query(path_and_query)
        .build()?)
}

/// Remove connection-scoped headers, keeping `te: trailers`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in listed.iter().map(String::as_str).chain(HOP_BY_HOP) {
        headers.remove(name);
    }

    let keeps_trailers = headers
        .get_all(TE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.split(',').any(|part| part.trim().eq_ignore_ascii_case("trailers")));
    headers.remove(TE);
    if keeps_trailers {
        headers.insert(TE, HeaderValue::from_static("trailers"));
    }
}

/// Rewrites requests towards their rule's backend
#[derive(Debug, Clone)]
pub struct Director {
    proxy_name: HeaderValue,
}

impl Director {
    pub fn new(proxy_name: &str) -> Self {
        Self {
            proxy_name: HeaderValue::from_str(proxy_name)
                .unwrap_or_else(|_| HeaderValue::from_static("warden")),
        }
    }

    /// Point `request` at the matched backend.
    ///
    /// On a bad target the request is left untouched and the error is
    /// deferred on `enrichment`.
    pub fn direct<B>(&self, request: &mut Request<B>, enrichment: &mut Enrichment) {
        let Some(rule) = enrichment.rule().cloned() else {
            return;
        };

        let uri = Target::parse(&rule.backend.target)
            .and_then(|target| rewrite_uri(&target, request.uri()));
        let uri = match uri {
            Ok(uri) => uri,
            Err(error) => {
                warn!(
                    backend = %rule.backend.namespace,
                    %error,
                    "Backend target is unusable"
                );
                if let Err(already) = enrichment.defer_error(error) {
                    debug!(%already, "Keeping the first deferred error");
                }
                return;
            }
        };

        let headers = request.headers_mut();
        strip_hop_by_hop(headers);
        headers.remove(USER_AGENT);
        headers.insert(X_PROXIED_BY, self.proxy_name.clone());
        if let Some(authority) = uri.authority() {
            if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
                headers.insert(HOST, host);
            }
        }

        debug!(
            rule = %rule.label(),
            upstream = %uri,
            "Directed request"
        );
        *request.uri_mut() = uri;
    }
}
