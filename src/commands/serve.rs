//! `serve`: provision the realm, then expose the ConfigMap REST API

use anyhow::{Context, Result};
use kube::config::KubeConfigOptions;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::api::{Authenticator, OidcValidator, router};
use crate::config::Settings;
use crate::k8s::configmaps::{
    ConfigMapService, ConfigMapStore, KubeConfigMapStore, MemoryConfigMapStore,
};
use crate::keycloak::RealmInitializer;
use crate::utils::CliError;

#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    /// Overrides `[server] bind_address`
    pub bind: Option<String>,
    pub skip_realm_init: bool,
    /// Serve an empty in-process store instead of a cluster
    pub in_memory: bool,
}

/// Build a client for `context`, or for whatever kubeconfig/in-cluster config is in effect
pub async fn kube_client(context: Option<&str>) -> Result<kube::Client> {
    let config = match context {
        Some(context) => {
            let options = KubeConfigOptions {
                context: Some(context.to_string()),
                ..Default::default()
            };
            kube::Config::from_kubeconfig(&options)
                .await
                .with_context(|| format!("Failed to load kubeconfig context '{}'", context))?
        }
        None => kube::Config::infer()
            .await
            .context("Failed to infer Kubernetes configuration")?,
    };
    kube::Client::try_from(config).context("Failed to build Kubernetes client")
}

async fn config_map_store(settings: &Settings, in_memory: bool) -> Result<Arc<dyn ConfigMapStore>> {
    if in_memory {
        crate::log_warn!("Serving an in-memory ConfigMap store; nothing is persisted");
        return Ok(Arc::new(MemoryConfigMapStore::new()));
    }

    let context = settings.kubernetes.context.as_deref();
    let client = kube_client(context).await?;
    let version = client
        .apiserver_version()
        .await
        .map_err(|e| {
            tracing::debug!(error = %e, "API server version probe failed");
            CliError::kubernetes_unreachable(context)
        })?;
    crate::log_info!(
        "Connected to Kubernetes {}.{} ({})",
        version.major,
        version.minor,
        version.git_version
    );

    Ok(Arc::new(KubeConfigMapStore::new(client)))
}

fn authenticator(settings: &Settings) -> Option<Arc<Authenticator>> {
    if !settings.auth.enabled {
        crate::log_warn!("Authentication is disabled; /configMap routes are open");
        return None;
    }

    let validator = OidcValidator::from_settings(&settings.keycloak, &settings.auth);
    crate::log_info!("Accepting tokens issued by {}", validator.issuer());
    Some(Arc::new(Authenticator::new(
        Arc::new(validator),
        settings.auth.allowed_roles.clone(),
    )))
}

pub async fn run(settings: Settings, options: ServeOptions) -> Result<()> {
    if options.skip_realm_init {
        tracing::debug!("realm initialization skipped");
    } else {
        let report = RealmInitializer::from_settings(&settings.keycloak).run().await;
        if !report.errors.is_empty() {
            crate::log_warn!(
                "Realm initialization finished with {} error(s); continuing",
                report.errors.len()
            );
        }
    }

    let store = config_map_store(&settings, options.in_memory).await?;
    let app = router(ConfigMapService::new(store), authenticator(&settings));

    let address = options
        .bind
        .unwrap_or_else(|| settings.server.bind_address.clone());
    let listener = TcpListener::bind(&address).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            anyhow::Error::new(CliError::address_in_use(&address))
        } else {
            anyhow::Error::new(e).context(format!("Failed to bind {}", address))
        }
    })?;

    crate::log_info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    crate::log_info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            crate::log_error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                crate::log_error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    crate::log_info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticator_follows_settings() {
        let mut settings = Settings::default();
        assert!(authenticator(&settings).is_some());

        settings.auth.enabled = false;
        assert!(authenticator(&settings).is_none());
    }

    #[tokio::test]
    async fn test_in_memory_store_needs_no_cluster() {
        let store = config_map_store(&Settings::default(), true).await.unwrap();
        assert!(store.list(None, None).await.unwrap().is_empty());
    }
}
