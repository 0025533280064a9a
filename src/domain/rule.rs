//! Rule model and the YAML rule-file schema
//!
//! A rule file nests frontends under backends:
//!
//! ```yaml
//! rules:
//!   - backends:
//!       - name: compute
//!         target: http://compute:8080
//!         prefix: /compute
//!         methods: [GET]
//!         frontends:
//!           - path: /compute/instances/{id}
//!             method: GET
//!             middlewares:
//!               - name: attributes
//!                 config: { ... }
//!             hooks:
//!               - name: authz
//!                 config: { ... }
//! ```
//!
//! Loading flattens that tree into an ordered list of [`Rule`]s, compiling each
//! frontend pattern along the way. Compiled rules are immutable and shared by
//! reference between the store snapshot and in-flight requests.

use crate::rules::pattern::{CompiledPattern, PatternError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Path parameters captured by a templated frontend
pub type PathParams = BTreeMap<String, String>;

/// How frontend patterns are compiled and matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    #[default]
    Regex,
    Route,
}

/// Middleware kinds a rule may enable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MiddlewareKind {
    BasicAuth,
    Attributes,
    Authz,
    Prefix,
}

impl MiddlewareKind {
    pub const ALL: [MiddlewareKind; 4] = [
        MiddlewareKind::BasicAuth,
        MiddlewareKind::Attributes,
        MiddlewareKind::Authz,
        MiddlewareKind::Prefix,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BasicAuth => "basic_auth",
            Self::Attributes => "attributes",
            Self::Authz => "authz",
            Self::Prefix => "prefix",
        }
    }
}

impl fmt::Display for MiddlewareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook kinds a rule may enable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Authz,
}

impl HookKind {
    pub const ALL: [HookKind; 1] = [HookKind::Authz];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authz => "authz",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved middleware entry with its still-opaque configuration
#[derive(Debug, Clone)]
pub struct MiddlewareSpec {
    pub kind: MiddlewareKind,
    pub config: serde_yaml::Value,
}

impl MiddlewareSpec {
    /// Decode the configuration into the middleware's own type; unknown keys are ignored
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_yaml::Error> {
        decode_config(&self.config)
    }
}

/// A resolved hook entry with its still-opaque configuration
#[derive(Debug, Clone)]
pub struct HookSpec {
    pub kind: HookKind,
    pub config: serde_yaml::Value,
}

impl HookSpec {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_yaml::Error> {
        decode_config(&self.config)
    }
}

fn decode_config<T: DeserializeOwned>(config: &serde_yaml::Value) -> Result<T, serde_yaml::Error> {
    // An absent `config:` key decodes like an empty mapping.
    if config.is_null() {
        return serde_yaml::from_value(serde_yaml::Value::Mapping(Default::default()));
    }
    serde_yaml::from_value(config.clone())
}

#[derive(Debug, Clone)]
pub struct Frontend {
    pub url_pattern: String,
    pub method: String,
    pub pattern: CompiledPattern,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub target: String,
    /// Authorization domain the backend's resources belong to
    pub namespace: String,
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub frontend: Frontend,
    pub backend: Backend,
    pub middlewares: Vec<MiddlewareSpec>,
    pub hooks: Vec<HookSpec>,
}

impl Rule {
    pub fn middleware(&self, kind: MiddlewareKind) -> Option<&MiddlewareSpec> {
        self.middlewares.iter().find(|spec| spec.kind == kind)
    }

    pub fn hook(&self, kind: HookKind) -> Option<&HookSpec> {
        self.hooks.iter().find(|spec| spec.kind == kind)
    }

    /// Short label used in logs
    pub fn label(&self) -> String {
        format!("{} {}", self.frontend.method, self.frontend.url_pattern)
    }
}

/// The rules declared by one source file, in declaration order
#[derive(Debug, Clone)]
pub struct Ruleset {
    pub source: String,
    pub rules: Vec<Arc<Rule>>,
}

// ========== File schema ==========

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleFile {
    #[serde(default)]
    pub rules: Vec<RuleGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleGroup {
    #[serde(default)]
    pub backends: Vec<BackendEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendEntry {
    #[serde(default)]
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub frontends: Vec<FrontendEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrontendEntry {
    pub path: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub middlewares: Vec<NamedSpec>,
    #[serde(default)]
    pub hooks: Vec<NamedSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedSpec {
    pub name: String,
    #[serde(default)]
    pub config: serde_yaml::Value,
}

impl RuleFile {
    pub fn parse(content: &[u8]) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_slice(content)
    }

    /// Flatten the backend/frontend tree into compiled rules.
    ///
    /// Any pattern that fails to compile fails the whole file.
    pub fn into_rules(self, strategy: MatchStrategy) -> Result<Vec<Rule>, PatternError> {
        let mut rules = Vec::new();

        for backend_entry in self.rules.into_iter().flat_map(|group| group.backends) {
            let backend = Backend {
                target: backend_entry.target.clone(),
                namespace: backend_entry.name.clone(),
                prefix: backend_entry.prefix.clone(),
            };

            for frontend in backend_entry.frontends {
                let methods: Vec<String> = if frontend.method.is_empty() {
                    backend_entry.methods.clone()
                } else {
                    vec![frontend.method.clone()]
                };
                if methods.is_empty() {
                    warn!(
                        path = %frontend.path,
                        backend = %backend.namespace,
                        "Frontend declares no method and its backend lists none; skipping"
                    );
                    continue;
                }

                let pattern = CompiledPattern::compile(&frontend.path, strategy)?;
                let middlewares = resolve_middlewares(&frontend.middlewares);
                let hooks = resolve_hooks(&frontend.hooks);

                for method in methods {
                    rules.push(Rule {
                        frontend: Frontend {
                            url_pattern: frontend.path.clone(),
                            method: method.to_ascii_uppercase(),
                            pattern: pattern.clone(),
                        },
                        backend: backend.clone(),
                        middlewares: middlewares.clone(),
                        hooks: hooks.clone(),
                    });
                }
            }
        }

        Ok(rules)
    }
}

fn resolve_middlewares(specs: &[NamedSpec]) -> Vec<MiddlewareSpec> {
    specs
        .iter()
        .filter_map(|spec| match MiddlewareKind::from_name(&spec.name) {
            Some(kind) => Some(MiddlewareSpec {
                kind,
                config: spec.config.clone(),
            }),
            None => {
                warn!(middleware = %spec.name, "Unknown middleware in rule; ignoring");
                None
            }
        })
        .collect()
}

fn resolve_hooks(specs: &[NamedSpec]) -> Vec<HookSpec> {
    specs
        .iter()
        .filter_map(|spec| match HookKind::from_name(&spec.name) {
            Some(kind) => Some(HookSpec {
                kind,
                config: spec.config.clone(),
            }),
            None => {
                warn!(hook = %spec.name, "Unknown hook in rule; ignoring");
                None
            }
        })
        .collect()
}
