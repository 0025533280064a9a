//! Layered settings: defaults, optional `config/*` files, then `WARDEN__*`
//! environment variables.

use crate::domain::MatchStrategy;
use crate::proxy::headers::DEFAULT_IDENTITY_HEADER;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;

pub use config::ConfigError;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub proxy: ProxySettings,
    #[serde(default)]
    pub authority: AuthoritySettings,
    #[serde(default)]
    pub services: Vec<ServiceSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    /// `pretty` or `compact`
    pub format: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxySettings {
    pub max_body_bytes: usize,
    pub request_timeout_secs: u64,
    pub identity_header: String,
    pub proxy_name: String,
}

/// External authorization, registry and project service
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthoritySettings {
    /// In-process authority when unset
    #[serde(default)]
    pub base_url: Option<String>,
}

/// One proxied service instance
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceSettings {
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    pub rules_source_path: String,
    #[serde(default)]
    pub rules_source_secret: Option<String>,
    #[serde(default)]
    pub match_strategy: MatchStrategy,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_refresh_interval() -> u64 {
    30
}

impl ServiceSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        Self::from_config(
            Config::builder()
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name(&format!("config/{environment}")).required(false))
                .add_source(File::with_name("config/local").required(false))
                .add_source(Environment::with_prefix("WARDEN").separator("__")),
        )
    }

    /// Apply defaults beneath `builder` and deserialize
    pub fn from_config(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let mut settings: Settings = builder
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .set_default("proxy.max_body_bytes", 10 * 1024 * 1024)?
            .set_default("proxy.request_timeout_secs", 30)?
            .set_default("proxy.identity_header", DEFAULT_IDENTITY_HEADER)?
            .set_default("proxy.proxy_name", "warden")?
            .build()?
            .try_deserialize()?;

        if settings.services.is_empty() {
            settings.services.push(ServiceSettings {
                name: "default".to_string(),
                host: default_host(),
                port: 8080,
                rules_source_path: "file://./rules".to_string(),
                rules_source_secret: None,
                match_strategy: MatchStrategy::default(),
                refresh_interval_secs: default_refresh_interval(),
            });
        }
        Ok(settings)
    }
}
