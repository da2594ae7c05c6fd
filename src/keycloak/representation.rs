//! Subset of the Keycloak admin representations this service reads and writes
//!
//! Unknown realm attributes are kept in `extra` so a realm file round-trips
//! through these types without losing fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use super::error::{KeycloakError, KeycloakResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealmRepresentation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_providers: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<RolesRepresentation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_refresh_token: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_max_reuse: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_lifespan: Option<i32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RealmRepresentation {
    /// Realm created when none exists yet: enabled, no users or clients, `user` and `admin` roles
    pub fn default_realm(name: &str, access_token_lifespan: i32) -> Self {
        Self {
            realm: Some(name.to_string()),
            enabled: Some(true),
            users: Some(Vec::new()),
            clients: Some(Vec::new()),
            roles: Some(RolesRepresentation {
                realm: vec![
                    RoleRepresentation::new("user"),
                    RoleRepresentation::new("admin"),
                ],
                client: BTreeMap::new(),
            }),
            revoke_refresh_token: Some(true),
            refresh_token_max_reuse: Some(0),
            access_token_lifespan: Some(access_token_lifespan),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolesRepresentation {
    #[serde(default)]
    pub realm: Vec<RoleRepresentation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub client: BTreeMap<String, Vec<RoleRepresentation>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleRepresentation {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub composite: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RoleRepresentation {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// What Keycloak does when an imported resource already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImportPolicy {
    #[default]
    Skip,
    Overwrite,
    Fail,
}

impl fmt::Display for ImportPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImportPolicy::Skip => "SKIP",
            ImportPolicy::Overwrite => "OVERWRITE",
            ImportPolicy::Fail => "FAIL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialImportRepresentation {
    pub if_resource_exists: ImportPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_providers: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<RolesRepresentation>,
}

impl PartialImportRepresentation {
    pub fn from_realm(realm: RealmRepresentation, policy: ImportPolicy) -> Self {
        Self {
            if_resource_exists: policy,
            users: realm.users,
            clients: realm.clients,
            groups: realm.groups,
            identity_providers: realm.identity_providers,
            roles: realm.roles,
        }
    }
}

/// Read a realm export and turn it into a partial import
pub fn load_partial_import(
    path: &Path,
    policy: ImportPolicy,
) -> KeycloakResult<PartialImportRepresentation> {
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| KeycloakError::Io {
        path: display.clone(),
        source,
    })?;
    let realm: RealmRepresentation =
        serde_json::from_str(&content).map_err(|source| KeycloakError::Json {
            path: display,
            source,
        })?;
    Ok(PartialImportRepresentation::from_realm(realm, policy))
}
