//! Kubernetes access: ConfigMap operations, kind clusters and external processes

pub mod configmaps;
pub mod kind;
pub mod process;

pub use configmaps::{ConfigMapService, ConfigMapStore, KubeConfigMapStore, MemoryConfigMapStore};
