//! Command implementations for the kubernetes-api CLI

pub mod cluster;
pub mod realm;
pub mod serve;
