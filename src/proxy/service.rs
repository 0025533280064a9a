//! Proxy service
//!
//! `ProxyService` owns one request pipeline:
//!
//! ```text
//! request -> middleware chain -> director -> transport -> hooks -> response
//! ```
//!
//! ```rust,ignore
//! let store = Arc::new(RuleStore::new(source, MatchStrategy::Route));
//! store.init_cache(Duration::from_secs(30))?;
//! let service = ProxyService::new(matcher::for_store(store), capabilities, settings);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, service.into_router()).await?;
//! ```
//!
//! `GET /ping` answers directly; every other path goes through the pipeline.

use crate::proxy::attributes::AttributesMiddleware;
use crate::proxy::authz::AuthzMiddleware;
use crate::proxy::basic_auth::BasicAuthMiddleware;
use crate::proxy::chain::{Flow, MiddlewareChain};
use crate::proxy::director::Director;
use crate::proxy::enrichment::{Enrichment, RequestSnapshot};
use crate::proxy::error_response::ErrorResponseExt;
use crate::proxy::headers::{paths, X_REQUEST_ID};
use crate::proxy::hooks::{AuthzHook, HookChain};
use crate::proxy::middleware_stack::ProxyMiddlewareStack;
use crate::proxy::prefix::PrefixMiddleware;
use crate::proxy::rule_match::RuleMatchMiddleware;
use crate::proxy::transport::Transport;
use crate::proxy::types::{RequestId, RequestSizeLimit};
use crate::rules::RuleMatcher;
use crate::services::Capabilities;
use axum::{
    body::Body,
    extract::{Request, State},
    response::Response,
    routing::get,
    Router,
};
use http::HeaderName;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Settings shared by every request of one proxy instance
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Header carrying the authenticated identity
    pub identity_header: HeaderName,
    /// Value stamped into `x-proxied-by`
    pub proxy_name: String,
    pub max_body: RequestSizeLimit,
    pub request_timeout: Duration,
}

pub struct ProxyService {
    chain: MiddlewareChain,
    hooks: HookChain,
    director: Director,
    transport: Transport,
    settings: ProxySettings,
}

impl ProxyService {
    /// Build the standard pipeline.
    ///
    /// Stage order: rule match, basic auth, attributes, authz, prefix.
    pub fn new(
        matcher: Arc<dyn RuleMatcher>,
        capabilities: Capabilities,
        settings: ProxySettings,
    ) -> Self {
        let identity = settings.identity_header.as_str();
        let chain = MiddlewareChain::new()
            .with_stage(Arc::new(RuleMatchMiddleware::new(matcher, settings.max_body)))
            .with_stage(Arc::new(BasicAuthMiddleware::new(
                settings.identity_header.clone(),
            )))
            .with_stage(Arc::new(AttributesMiddleware::new(
                identity,
                capabilities.projects.clone(),
            )))
            .with_stage(Arc::new(AuthzMiddleware::new(
                identity,
                capabilities.authz.clone(),
                capabilities.projects.clone(),
            )))
            .with_stage(Arc::new(PrefixMiddleware));

        let hooks = HookChain::new().with_hook(Arc::new(AuthzHook::new(
            identity,
            capabilities.registry,
            capabilities.projects,
            settings.max_body,
        )));

        Self {
            chain,
            hooks,
            director: Director::new(&settings.proxy_name),
            transport: Transport::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// Run one request through the whole pipeline
    pub async fn handle(&self, mut request: Request) -> Response {
        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .and_then(RequestId::parse_v7)
            .unwrap_or_else(RequestId::generate);
        let mut enrichment = Enrichment::new(request_id);

        if let Flow::Halt(response) = self.chain.run(&mut request, &mut enrichment).await {
            return response;
        }

        self.director.direct(&mut request, &mut enrichment);
        let snapshot = RequestSnapshot {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
        };
        if let Err(error) = enrichment.set_forwarded(snapshot) {
            debug!(%error, "Forwarded snapshot already recorded");
        }

        let (response, dispatch_error) =
            match self.transport.round_trip(request, &mut enrichment).await {
                Ok(response) => (response, None),
                Err(error) => {
                    let id = request_id.to_string();
                    (error.into_http_response(Some(&id)), Some(error))
                }
            };

        self.hooks
            .run(response, dispatch_error.as_ref(), &enrichment)
            .await
    }

    /// Router serving `GET /ping` and proxying everything else
    pub fn into_router(self) -> Router {
        let stack = ProxyMiddlewareStack::new(self.settings.request_timeout, self.settings.max_body);
        let router = Router::new()
            .route(paths::PING, get(ping_handler))
            .fallback(proxy_handler)
            .with_state(Arc::new(self));

        stack.apply_to_router(router)
    }
}

async fn proxy_handler(State(proxy): State<Arc<ProxyService>>, request: Request<Body>) -> Response {
    proxy.handle(request).await
}

async fn ping_handler() -> &'static str {
    paths::PING_BODY
}
