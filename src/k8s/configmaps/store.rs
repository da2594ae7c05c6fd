//! Storage seam over the Kubernetes ConfigMap API

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{0}")]
    Validation(String),

    #[error("ConfigMap {0} not found")]
    NotFound(String),

    #[error("ConfigMap {0} already exists or was modified concurrently")]
    Conflict(String),
}

impl StoreError {
    /// HTTP status reported by the Kubernetes API, if this error came from it
    pub fn api_status(&self) -> Option<u16> {
        match self {
            StoreError::Kube(kube::Error::Api(ae)) => Some(ae.code),
            _ => None,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal set of ConfigMap calls the service needs
#[async_trait]
pub trait ConfigMapStore: Send + Sync {
    /// List ConfigMaps. `None` namespace lists across all namespaces.
    async fn list(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> StoreResult<Vec<ConfigMap>>;

    /// Fetch one ConfigMap, `None` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<ConfigMap>>;

    async fn create(&self, namespace: &str, config_map: &ConfigMap) -> StoreResult<ConfigMap>;

    /// Replace an existing ConfigMap
    async fn replace(&self, namespace: &str, config_map: &ConfigMap) -> StoreResult<ConfigMap>;

    /// Delete a ConfigMap, `false` when it did not exist
    async fn delete(&self, namespace: &str, name: &str) -> StoreResult<bool>;
}

/// [`ConfigMapStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeConfigMapStore {
    client: Client,
}

impl KubeConfigMapStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn name_of(config_map: &ConfigMap) -> StoreResult<&str> {
    config_map
        .metadata
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| StoreError::Validation("ConfigMap metadata.name is required".to_string()))
}

#[async_trait]
impl ConfigMapStore for KubeConfigMapStore {
    async fn list(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> StoreResult<Vec<ConfigMap>> {
        let api: Api<ConfigMap> = match namespace {
            Some(ns) => self.namespaced(ns),
            None => Api::all(self.client.clone()),
        };

        let mut params = ListParams::default();
        if let Some(selector) = label_selector.filter(|s| !s.is_empty()) {
            params = params.labels(selector);
        }

        Ok(api.list(&params).await?.items)
    }

    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<ConfigMap>> {
        Ok(self.namespaced(namespace).get_opt(name).await?)
    }

    async fn create(&self, namespace: &str, config_map: &ConfigMap) -> StoreResult<ConfigMap> {
        Ok(self
            .namespaced(namespace)
            .create(&PostParams::default(), config_map)
            .await?)
    }

    async fn replace(&self, namespace: &str, config_map: &ConfigMap) -> StoreResult<ConfigMap> {
        let name = name_of(config_map)?;
        Ok(self
            .namespaced(namespace)
            .replace(name, &PostParams::default(), config_map)
            .await?)
    }

    async fn delete(&self, namespace: &str, name: &str) -> StoreResult<bool> {
        match self
            .namespaced(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
