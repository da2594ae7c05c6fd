//! In-process [`ConfigMapStore`] used by tests and `serve --in-memory`

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::selector::LabelSelector;
use super::store::{ConfigMapStore, StoreError, StoreResult};

/// ConfigMaps keyed by `(namespace, name)`, with API-server-like resourceVersion checks
#[derive(Default)]
pub struct MemoryConfigMapStore {
    items: RwLock<BTreeMap<(String, String), ConfigMap>>,
    revision: AtomicU64,
}

impl MemoryConfigMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn prepare(&self, namespace: &str, config_map: &ConfigMap) -> StoreResult<(String, ConfigMap)> {
        let name = config_map
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                StoreError::Validation("ConfigMap metadata.name is required".to_string())
            })?;

        let mut stored = config_map.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.next_revision());
        Ok((name, stored))
    }
}

#[async_trait]
impl ConfigMapStore for MemoryConfigMapStore {
    async fn list(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> StoreResult<Vec<ConfigMap>> {
        let selector = match label_selector {
            Some(s) => LabelSelector::parse(s)?,
            None => LabelSelector::default(),
        };

        let items = self.items.read().await;
        Ok(items
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|wanted| wanted == ns))
            .filter(|(_, cm)| selector.matches(cm))
            .map(|(_, cm)| cm.clone())
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<ConfigMap>> {
        let items = self.items.read().await;
        Ok(items
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(&self, namespace: &str, config_map: &ConfigMap) -> StoreResult<ConfigMap> {
        let (name, stored) = self.prepare(namespace, config_map)?;
        let key = (namespace.to_string(), name);

        let mut items = self.items.write().await;
        if items.contains_key(&key) {
            return Err(StoreError::Conflict(format!("{}/{}", key.0, key.1)));
        }
        items.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, namespace: &str, config_map: &ConfigMap) -> StoreResult<ConfigMap> {
        let (name, stored) = self.prepare(namespace, config_map)?;
        let key = (namespace.to_string(), name);

        let mut items = self.items.write().await;
        let Some(existing) = items.get(&key) else {
            return Err(StoreError::NotFound(format!("{}/{}", key.0, key.1)));
        };

        // a stale resourceVersion loses, an absent one is an unconditional update
        if let Some(expected) = &config_map.metadata.resource_version
            && existing.metadata.resource_version.as_ref() != Some(expected)
        {
            return Err(StoreError::Conflict(format!("{}/{}", key.0, key.1)));
        }

        items.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str) -> StoreResult<bool> {
        let mut items = self.items.write().await;
        Ok(items
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn cm(name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_sets_namespace_and_revision() {
        let store = MemoryConfigMapStore::new();
        let created = store.create("team-a", &cm("app", &[])).await.unwrap();

        assert_eq!(created.metadata.namespace.as_deref(), Some("team-a"));
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        assert!(store.get("team-a", "app").await.unwrap().is_some());
        assert!(store.get("team-b", "app").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let store = MemoryConfigMapStore::new();
        store.create("ns", &cm("app", &[])).await.unwrap();
        let result = store.create("ns", &cm("app", &[])).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let store = MemoryConfigMapStore::new();
        let result = store.create("ns", &ConfigMap::default()).await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_replace_checks_resource_version() {
        let store = MemoryConfigMapStore::new();
        let created = store.create("ns", &cm("app", &[])).await.unwrap();

        let mut stale = created.clone();
        stale.metadata.resource_version = Some("999".to_string());
        assert!(matches!(
            store.replace("ns", &stale).await,
            Err(StoreError::Conflict(_))
        ));

        let replaced = store.replace("ns", &created).await.unwrap();
        assert_ne!(replaced.metadata.resource_version, created.metadata.resource_version);

        let missing = store.replace("ns", &cm("other", &[])).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_filters_namespace_and_labels() {
        let store = MemoryConfigMapStore::new();
        store.create("a", &cm("one", &[("app", "shop")])).await.unwrap();
        store.create("a", &cm("two", &[("app", "blog")])).await.unwrap();
        store.create("b", &cm("three", &[("app", "shop")])).await.unwrap();

        assert_eq!(store.list(None, None).await.unwrap().len(), 3);
        assert_eq!(store.list(Some("a"), None).await.unwrap().len(), 2);
        assert_eq!(store.list(None, Some("app=shop")).await.unwrap().len(), 2);

        let only = store.list(Some("a"), Some("app=shop")).await.unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].metadata.name.as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = MemoryConfigMapStore::new();
        store.create("ns", &cm("app", &[])).await.unwrap();
        assert!(store.delete("ns", "app").await.unwrap());
        assert!(!store.delete("ns", "app").await.unwrap());
    }
}
