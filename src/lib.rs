//! kubernetes-api - administrative HTTP API for Kubernetes ConfigMaps
//!
//! The crate is split along the three things the service does:
//! serving the `/configMap` REST surface ([`api`], [`k8s::configmaps`]),
//! bootstrapping a Keycloak realm at startup ([`keycloak`]) and driving
//! `kind` clusters for integration testing ([`k8s::kind`]).

pub mod api;
pub mod commands;
pub mod config;
pub mod k8s;
pub mod keycloak;
pub mod utils;
