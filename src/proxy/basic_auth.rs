//! Basic-auth middleware
//!
//! ```yaml
//! - name: basic_auth
//!   config:
//!     users:
//!       - user: ci
//!         password: "$argon2id$v=19$m=19456,t=2,p=1$..."
//!         capabilities: ["deploy:web", "r#^read:.*"]
//!     scope:
//!       action: "deploy:{{ project }}"
//!       attributes:
//!         project: { type: json_payload, key: project }
//! ```
//!
//! Passwords are Argon2 PHC strings or `{SHA256}<hex digest>`. Capability `*`
//! grants every scope. A capability prefixed with `r#` is a regex.

use crate::domain::{AttributeMap, AttributeSpec, MiddlewareKind, MiddlewareSpec};
use crate::proxy::attributes::{extract_all, ExtractionInput, MessageView};
use crate::proxy::chain::{Flow, Middleware};
use crate::proxy::enrichment::Enrichment;
use crate::proxy::error_response::ErrorResponseExt;
use crate::proxy::headers::{AUTHORIZATION, BASIC_PREFIX};
use crate::proxy::types::ProxyError;
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use axum::body::Body;
use base64::Engine;
use http::{HeaderMap, HeaderValue, Request};
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const SUPERUSER: &str = "*";
const REGEX_PREFIX: &str = "r#";
const SHA256_PREFIX: &str = "{SHA256}";

#[derive(Debug, Default, Deserialize)]
pub struct BasicAuthConfig {
    #[serde(default)]
    pub users: Vec<Credentials>,
    #[serde(default)]
    pub scope: Scope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSpec>,
}

/// Decode `Authorization: Basic ...` into user and password
pub fn parse_basic(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix(BASIC_PREFIX)?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Check `password` against a stored hash
pub fn verify_password(stored: &str, password: &str) -> bool {
    if let Some(expected) = stored.strip_prefix(SHA256_PREFIX) {
        let digest = hex::encode(Sha256::digest(password.as_bytes()));
        return digest.eq_ignore_ascii_case(expected.trim());
    }

    match PasswordHash::new(stored) {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(error) => {
            warn!(%error, "Stored password is not a supported hash");
            false
        }
    }
}

/// Render the scope action template against extracted attributes
pub fn render_action(template: &str, attributes: &AttributeMap) -> Result<String, minijinja::Error> {
    let env = minijinja::Environment::new();
    let rendered = env.render_str(template, attributes)?;
    Ok(rendered.trim().to_string())
}

/// Whether one capability grants `action`
pub fn capability_matches(capability: &str, action: &str) -> bool {
    if let Some(pattern) = capability.strip_prefix(REGEX_PREFIX) {
        return match Regex::new(pattern) {
            Ok(regex) => regex.is_match(action),
            Err(error) => {
                warn!(%pattern, %error, "Capability regex does not compile");
                false
            }
        };
    }
    capability == action
}

pub struct BasicAuthMiddleware {
    identity_header: http::HeaderName,
}

impl BasicAuthMiddleware {
    pub fn new(identity_header: http::HeaderName) -> Self {
        Self { identity_header }
    }

    fn authorize(
        &self,
        config: &BasicAuthConfig,
        credentials: &Credentials,
        input: &ExtractionInput<'_>,
    ) -> Result<(), String> {
        if credentials.capabilities.is_empty() {
            return Err(format!("user {} has no capabilities", credentials.user));
        }
        if credentials.capabilities.iter().any(|c| c == SUPERUSER) {
            return Ok(());
        }

        let attributes =
            extract_all(&config.scope.attributes, input).map_err(|e| e.to_string())?;
        let action =
            render_action(&config.scope.action, &attributes).map_err(|e| e.to_string())?;
        debug!(user = %credentials.user, %action, "Checking basic-auth scope");

        if credentials
            .capabilities
            .iter()
            .any(|capability| capability_matches(capability, &action))
        {
            Ok(())
        } else {
            Err(format!("user {} lacks capability for {action}", credentials.user))
        }
    }
}

fn deny(enrichment: &Enrichment, reason: String) -> Flow {
    warn!(%reason, "Basic auth rejected request");
    let request_id = enrichment.request_id().to_string();
    Flow::Halt(ProxyError::unauthorized(reason).into_http_response(Some(&request_id)))
}

#[async_trait]
impl Middleware for BasicAuthMiddleware {
    fn kind(&self) -> Option<MiddlewareKind> {
        Some(MiddlewareKind::BasicAuth)
    }

    async fn handle(
        &self,
        request: &mut Request<Body>,
        enrichment: &mut Enrichment,
        spec: Option<&MiddlewareSpec>,
    ) -> Flow {
        let config: BasicAuthConfig = match spec.map(MiddlewareSpec::decode).transpose() {
            Ok(config) => config.unwrap_or_default(),
            Err(error) => return deny(enrichment, format!("invalid basic_auth config: {error}")),
        };

        let Some((user, password)) = parse_basic(request.headers()) else {
            return deny(enrichment, "missing or malformed basic credentials".to_string());
        };
        let Some(credentials) = config
            .users
            .iter()
            .find(|c| c.user == user && verify_password(&c.password, &password))
        else {
            return deny(enrichment, format!("invalid credentials for {user}"));
        };

        if !config.scope.action.is_empty() {
            let body = enrichment.body();
            let input = ExtractionInput {
                request: MessageView {
                    headers: request.headers(),
                    body: &body[..],
                },
                query: request.uri().query(),
                response: None,
            };
            if let Err(reason) = self.authorize(&config, credentials, &input) {
                return deny(enrichment, reason);
            }
        }

        match HeaderValue::from_str(&credentials.user) {
            Ok(value) => {
                request.headers_mut().insert(self.identity_header.clone(), value);
                Flow::Continue
            }
            Err(_) => deny(enrichment, "user name is not a valid header value".to_string()),
        }
    }
}
