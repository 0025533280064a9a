use crate::config::{ServiceSettings, Settings};
use crate::proxy::service::{ProxyService, ProxySettings};
use crate::proxy::types::{RefreshInterval, RequestSizeLimit};
use crate::rules::{blob, matcher, RuleStore};
use crate::services::memory::InMemoryAuthority;
use crate::services::remote::RemoteAuthority;
use crate::services::Capabilities;
use crate::{Error, Result};
use axum::Router;
use futures_util::future::join_all;
use http::HeaderName;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// One configured proxy instance, ready to serve
pub struct ServiceInstance {
    pub settings: ServiceSettings,
    pub store: Arc<RuleStore>,
    pub router: Router,
}

/// Main application struct that coordinates all proxy instances
pub struct Application {
    settings: Settings,
    capabilities: Capabilities,
}

impl Application {
    #[instrument]
    pub async fn new() -> Result<Self> {
        Self::from_settings(Settings::new()?)
    }

    pub fn from_settings(settings: Settings) -> Result<Self> {
        let capabilities = match &settings.authority.base_url {
            Some(base_url) => {
                info!(%base_url, "Using remote authority");
                Capabilities::from_authority(Arc::new(RemoteAuthority::new(base_url.clone())))
            }
            None => {
                warn!("No authority configured; using an empty in-process authority");
                Capabilities::from_authority(Arc::new(InMemoryAuthority::new()))
            }
        };
        Ok(Self::with_capabilities(settings, capabilities))
    }

    pub fn with_capabilities(settings: Settings, capabilities: Capabilities) -> Self {
        Self {
            settings,
            capabilities,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn proxy_settings(&self) -> Result<ProxySettings> {
        let proxy = &self.settings.proxy;
        Ok(ProxySettings {
            identity_header: HeaderName::try_from(proxy.identity_header.as_str())
                .map_err(|e| Error::invalid_setting("proxy.identity_header", e))?,
            proxy_name: proxy.proxy_name.clone(),
            max_body: RequestSizeLimit::try_new(proxy.max_body_bytes)
                .map_err(|e| Error::invalid_setting("proxy.max_body_bytes", e))?,
            request_timeout: Duration::from_secs(proxy.request_timeout_secs),
        })
    }

    /// Open the service's rule source, start its refresh loop and build its router
    pub async fn build_service(&self, service: &ServiceSettings) -> Result<ServiceInstance> {
        let proxy_settings = self.proxy_settings()?;
        let interval = RefreshInterval::try_new(service.refresh_interval_secs).map_err(|e| {
            Error::invalid_setting(format!("services.{}.refresh_interval_secs", service.name), e)
        })?;
        let source = blob::open(
            &service.rules_source_path,
            service.rules_source_secret.as_deref(),
        )?;

        let store = Arc::new(RuleStore::new(Arc::new(source), service.match_strategy));
        store.init_cache(interval.duration()).await?;

        let proxy = ProxyService::new(
            matcher::for_store(store.clone()),
            self.capabilities.clone(),
            proxy_settings,
        );

        Ok(ServiceInstance {
            settings: service.clone(),
            store,
            router: proxy.into_router(),
        })
    }

    /// Serve every configured service until Ctrl-C, then stop their rule stores
    #[instrument(skip(self))]
    pub async fn run(self) -> Result<()> {
        let mut instances = Vec::with_capacity(self.settings.services.len());
        for service in &self.settings.services {
            instances.push(self.build_service(service).await?);
        }

        let (shutdown, shutdown_signal) = watch::channel(false);
        let mut servers = Vec::with_capacity(instances.len());
        let mut stores = Vec::with_capacity(instances.len());

        for instance in instances {
            let address = instance.settings.address();
            let listener = tokio::net::TcpListener::bind(&address).await?;
            info!(service = %instance.settings.name, %address, "Proxy listening");

            let name = instance.settings.name.clone();
            let mut signal = shutdown_signal.clone();
            stores.push((name.clone(), instance.store));
            servers.push(tokio::spawn(async move {
                axum::serve(listener, instance.router)
                    .with_graceful_shutdown(async move {
                        let _ = signal.changed().await;
                    })
                    .await
                    .map_err(|e| Error::Service {
                        name,
                        reason: e.to_string(),
                    })
            }));
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Could not listen for Ctrl-C; shutting down");
        }
        info!("Shutdown requested");
        let _ = shutdown.send(true);

        for result in join_all(servers).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Proxy server failed"),
                Err(e) => error!(error = %e, "Proxy server task panicked"),
            }
        }

        for (name, store) in stores {
            if let Err(e) = store.stop().await {
                warn!(service = %name, error = %e, "Rule store did not stop cleanly");
            }
        }
        info!("Warden stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use config::{Config, File, FileFormat};
    use http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn settings_for(rules_dir: &std::path::Path) -> Settings {
        let yaml = format!(
            "services:\n  - name: test\n    port: 0\n    rules_source_path: \"{}\"\n",
            rules_dir.display()
        );
        Settings::from_config(Config::builder().add_source(File::from_str(&yaml, FileFormat::Yaml)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_service_serves_ping() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("rules.yaml"),
            "rules:\n  - backends:\n      - name: ns\n        target: http://127.0.0.1:9\n        frontends:\n          - path: /x\n            method: GET\n",
        )
        .unwrap();

        let app = Application::from_settings(settings_for(dir.path())).unwrap();
        let instance = app.build_service(&app.settings().services[0]).await.unwrap();
        assert!(instance.store.is_scheduled());
        assert_eq!(instance.store.snapshot().len(), 1);

        let response = instance
            .router
            .clone()
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"pong");

        instance.store.stop().await.unwrap();
        assert!(!instance.store.is_scheduled());
    }

    #[tokio::test]
    async fn test_invalid_identity_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_for(dir.path());
        settings.proxy.identity_header = "not a header".to_string();

        let app = Application::from_settings(settings).unwrap();
        let result = app.build_service(&app.settings().services[0]).await;
        assert!(matches!(result, Err(Error::InvalidSetting { .. })));
    }
}
