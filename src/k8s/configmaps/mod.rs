//! ConfigMap queries and mutations
//!
//! [`ConfigMapService`] is what the REST layer talks to. Label queries are
//! pushed down to the API server as label selectors. Annotation queries list
//! the namespace and filter locally, since Kubernetes has no annotation
//! selector.

pub mod memory;
pub mod selector;
pub mod store;

pub use memory::MemoryConfigMapStore;
pub use store::{ConfigMapStore, KubeConfigMapStore, StoreError, StoreResult};

use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use selector::{
    equality_selector, filter_by_annotation, filter_by_annotations, validate_label_key,
    validate_label_value, validate_name, validate_namespace,
};

#[derive(Clone)]
pub struct ConfigMapService {
    store: Arc<dyn ConfigMapStore>,
}

impl ConfigMapService {
    pub fn new(store: Arc<dyn ConfigMapStore>) -> Self {
        Self { store }
    }

    /// All ConfigMaps in all namespaces
    pub async fn config_maps(&self) -> StoreResult<Vec<ConfigMap>> {
        self.store.list(None, None).await
    }

    pub async fn config_maps_in_namespace(&self, namespace: &str) -> StoreResult<Vec<ConfigMap>> {
        validate_namespace(namespace)?;
        self.store.list(Some(namespace), None).await
    }

    /// ConfigMaps carrying the label `key`, whatever its value
    pub async fn find_by_label(&self, namespace: &str, key: &str) -> StoreResult<Vec<ConfigMap>> {
        validate_namespace(namespace)?;
        validate_label_key(key)?;
        self.store.list(Some(namespace), Some(key)).await
    }

    pub async fn find_by_label_value(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> StoreResult<Vec<ConfigMap>> {
        validate_namespace(namespace)?;
        let selector = equality_selector(&BTreeMap::from([(key.to_string(), value.to_string())]))?;
        self.store.list(Some(namespace), Some(&selector)).await
    }

    /// ConfigMaps matching every `key=value` pair; an empty map lists the namespace
    pub async fn find_by_labels(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> StoreResult<Vec<ConfigMap>> {
        validate_namespace(namespace)?;
        let selector = equality_selector(labels)?;
        let selector = (!selector.is_empty()).then_some(selector);
        self.store.list(Some(namespace), selector.as_deref()).await
    }

    pub async fn find_by_annotation(
        &self,
        namespace: &str,
        key: &str,
    ) -> StoreResult<Vec<ConfigMap>> {
        let all = self.config_maps_in_namespace(namespace).await?;
        Ok(filter_by_annotation(all, key, None))
    }

    pub async fn find_by_annotation_value(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> StoreResult<Vec<ConfigMap>> {
        let all = self.config_maps_in_namespace(namespace).await?;
        Ok(filter_by_annotation(all, key, Some(value)))
    }

    pub async fn find_by_annotations(
        &self,
        namespace: &str,
        annotations: &BTreeMap<String, String>,
    ) -> StoreResult<Vec<ConfigMap>> {
        let all = self.config_maps_in_namespace(namespace).await?;
        Ok(filter_by_annotations(all, annotations))
    }

    pub async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<ConfigMap>> {
        validate_namespace(namespace)?;
        validate_name(name)?;
        self.store.get(namespace, name).await
    }

    /// Create `config_map` in `namespace`, overriding whatever namespace the body names
    pub async fn create(&self, namespace: &str, config_map: ConfigMap) -> StoreResult<ConfigMap> {
        let config_map = prepare_body(namespace, config_map)?;
        let created = self.store.create(namespace, &config_map).await?;
        tracing::debug!(namespace, name = ?created.metadata.name, "created ConfigMap");
        Ok(created)
    }

    /// Replace `config_map` if it exists, create it otherwise
    pub async fn update(&self, namespace: &str, config_map: ConfigMap) -> StoreResult<ConfigMap> {
        let mut config_map = prepare_body(namespace, config_map)?;
        let name = body_name(&config_map)?.to_string();

        match self.store.get(namespace, &name).await? {
            Some(live) => {
                if config_map.metadata.resource_version.is_none() {
                    config_map.metadata.resource_version = live.metadata.resource_version;
                }
                let replaced = self.store.replace(namespace, &config_map).await?;
                tracing::debug!(namespace, name = %name, "replaced ConfigMap");
                Ok(replaced)
            }
            None => {
                config_map.metadata.resource_version = None;
                let created = self.store.create(namespace, &config_map).await?;
                tracing::debug!(namespace, name = %name, "created ConfigMap on update");
                Ok(created)
            }
        }
    }

    /// Delete the ConfigMap named by the body; `false` if it did not exist
    pub async fn delete(&self, namespace: &str, config_map: &ConfigMap) -> StoreResult<bool> {
        validate_namespace(namespace)?;
        let name = body_name(config_map)?;
        validate_name(name)?;
        self.store.delete(namespace, name).await
    }

    pub async fn delete_by_name(&self, namespace: &str, name: &str) -> StoreResult<bool> {
        if self.get(namespace, name).await?.is_none() {
            crate::log_error!(
                "Unable to delete ConfigMap '{}' in namespace '{}': not found",
                name,
                namespace
            );
            return Ok(false);
        }
        self.store.delete(namespace, name).await
    }

    /// Set annotation `key=value`; `false` when the ConfigMap does not exist
    pub async fn add_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> StoreResult<bool> {
        self.modify(namespace, name, |cm| {
            cm.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), value.to_string());
        })
        .await
    }

    /// Set label `key=value`; `false` when the ConfigMap does not exist
    pub async fn add_label(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> StoreResult<bool> {
        validate_label_key(key)?;
        validate_label_value(value)?;
        self.modify(namespace, name, |cm| {
            cm.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), value.to_string());
        })
        .await
    }

    async fn modify<F>(&self, namespace: &str, name: &str, change: F) -> StoreResult<bool>
    where
        F: FnOnce(&mut ConfigMap) + Send,
    {
        let Some(mut config_map) = self.get(namespace, name).await? else {
            crate::log_error!(
                "Unable to modify ConfigMap '{}' in namespace '{}': not found",
                name,
                namespace
            );
            return Ok(false);
        };
        change(&mut config_map);
        self.store.replace(namespace, &config_map).await?;
        Ok(true)
    }
}

fn body_name(config_map: &ConfigMap) -> StoreResult<&str> {
    config_map
        .metadata
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| StoreError::Validation("ConfigMap metadata.name is required".to_string()))
}

fn prepare_body(namespace: &str, mut config_map: ConfigMap) -> StoreResult<ConfigMap> {
    validate_namespace(namespace)?;
    validate_name(body_name(&config_map)?)?;
    config_map.metadata.namespace = Some(namespace.to_string());
    Ok(config_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn cm(name: &str, labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> ConfigMap {
        let to_map = |pairs: &[(&str, &str)]| {
            Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            )
            .filter(|m| !m.is_empty())
        };
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: to_map(labels),
                annotations: to_map(annotations),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("key".to_string(), "value".to_string())])),
            ..Default::default()
        }
    }

    fn names(config_maps: &[ConfigMap]) -> Vec<&str> {
        config_maps
            .iter()
            .filter_map(|cm| cm.metadata.name.as_deref())
            .collect()
    }

    async fn seeded() -> ConfigMapService {
        let service = ConfigMapService::new(Arc::new(MemoryConfigMapStore::new()));
        service
            .create("shop", cm("web", &[("app", "shop"), ("tier", "web")], &[("owner", "alice")]))
            .await
            .unwrap();
        service
            .create("shop", cm("db", &[("app", "shop"), ("tier", "db")], &[("owner", "bob")]))
            .await
            .unwrap();
        service
            .create("blog", cm("web", &[("app", "blog")], &[]))
            .await
            .unwrap();
        service
    }

    #[tokio::test]
    async fn test_listing() {
        let service = seeded().await;
        assert_eq!(service.config_maps().await.unwrap().len(), 3);
        assert_eq!(names(&service.config_maps_in_namespace("shop").await.unwrap()), ["db", "web"]);
        assert!(service.config_maps_in_namespace("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_label_queries() {
        let service = seeded().await;

        assert_eq!(service.find_by_label("shop", "tier").await.unwrap().len(), 2);
        assert!(service.find_by_label("blog", "tier").await.unwrap().is_empty());
        assert_eq!(
            names(&service.find_by_label_value("shop", "tier", "db").await.unwrap()),
            ["db"]
        );

        let wanted = BTreeMap::from([
            ("app".to_string(), "shop".to_string()),
            ("tier".to_string(), "web".to_string()),
        ]);
        assert_eq!(names(&service.find_by_labels("shop", &wanted).await.unwrap()), ["web"]);
        assert_eq!(
            service.find_by_labels("shop", &BTreeMap::new()).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_annotation_queries() {
        let service = seeded().await;

        assert_eq!(service.find_by_annotation("shop", "owner").await.unwrap().len(), 2);
        assert!(service.find_by_annotation("blog", "owner").await.unwrap().is_empty());
        assert_eq!(
            names(&service.find_by_annotation_value("shop", "owner", "alice").await.unwrap()),
            ["web"]
        );

        let wanted = BTreeMap::from([("owner".to_string(), "bob".to_string())]);
        assert_eq!(names(&service.find_by_annotations("shop", &wanted).await.unwrap()), ["db"]);
        assert_eq!(
            service.find_by_annotations("shop", &BTreeMap::new()).await.unwrap().len(),
            2
        );
        // blog/web has no annotations
        assert!(service.find_by_annotations("blog", &BTreeMap::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_forces_namespace() {
        let service = ConfigMapService::new(Arc::new(MemoryConfigMapStore::new()));
        let mut body = cm("settings", &[], &[]);
        body.metadata.namespace = Some("elsewhere".to_string());

        let created = service.create("team", body).await.unwrap();
        assert_eq!(created.metadata.namespace.as_deref(), Some("team"));
        assert!(service.get("team", "settings").await.unwrap().is_some());
        assert!(service.get("elsewhere", "settings").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let service = ConfigMapService::new(Arc::new(MemoryConfigMapStore::new()));

        let nameless = ConfigMap::default();
        assert!(matches!(
            service.create("team", nameless.clone()).await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            service.update("team", nameless.clone()).await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            service.delete("team", &nameless).await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            service.get("Bad_Namespace", "x").await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            service.create("team", cm("Upper", &[], &[])).await,
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_creates_then_replaces() {
        let service = ConfigMapService::new(Arc::new(MemoryConfigMapStore::new()));

        let created = service.update("team", cm("settings", &[], &[])).await.unwrap();
        let first_version = created.metadata.resource_version.clone();
        assert!(first_version.is_some());

        let mut body = cm("settings", &[], &[]);
        body.data = Some(BTreeMap::from([("key".to_string(), "changed".to_string())]));
        let replaced = service.update("team", body).await.unwrap();

        assert_ne!(replaced.metadata.resource_version, first_version);
        let live = service.get("team", "settings").await.unwrap().unwrap();
        assert_eq!(live.data.unwrap().get("key").map(String::as_str), Some("changed"));
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let service = ConfigMapService::new(Arc::new(MemoryConfigMapStore::new()));
        service.create("team", cm("settings", &[], &[])).await.unwrap();

        let mut body = cm("settings", &[], &[]);
        body.metadata.resource_version = Some("stale".to_string());
        assert!(matches!(
            service.update("team", body).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_and_delete_by_name() {
        let service = seeded().await;

        assert!(service.delete("shop", &cm("db", &[], &[])).await.unwrap());
        assert!(!service.delete("shop", &cm("db", &[], &[])).await.unwrap());

        assert!(service.delete_by_name("shop", "web").await.unwrap());
        assert!(!service.delete_by_name("shop", "web").await.unwrap());
        assert!(service.config_maps_in_namespace("shop").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_annotation_and_label() {
        let service = seeded().await;

        assert!(service.add_annotation("blog", "web", "reviewed", "yes").await.unwrap());
        assert!(service.add_label("blog", "web", "tier", "web").await.unwrap());

        let live = service.get("blog", "web").await.unwrap().unwrap();
        assert_eq!(
            live.metadata.annotations.unwrap().get("reviewed").map(String::as_str),
            Some("yes")
        );
        assert_eq!(
            live.metadata.labels.unwrap().get("tier").map(String::as_str),
            Some("web")
        );

        assert!(!service.add_annotation("blog", "missing", "k", "v").await.unwrap());
        assert!(!service.add_label("blog", "missing", "k", "v").await.unwrap());
        assert!(matches!(
            service.add_label("blog", "web", "bad key", "v").await,
            Err(StoreError::Validation(_))
        ));
    }
}
