//! Keycloak admin access and startup realm provisioning

pub mod client;
pub mod error;
pub mod initializer;
pub mod representation;

pub use client::KeycloakAdminClient;
pub use error::{FailureKind, KeycloakError, KeycloakResult};
pub use initializer::{InitError, InitReport, RealmInitializer, RealmStatus};
pub use representation::{
    ImportPolicy, PartialImportRepresentation, RealmRepresentation, RoleRepresentation,
    RolesRepresentation, load_partial_import,
};
