//! Configuration file support for kubernetes-api

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::CliError;

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub kubernetes: KubernetesSettings,

    #[serde(default)]
    pub keycloak: KeycloakSettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub kind: KindSettings,
}

/// HTTP listener settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Kubernetes client settings
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct KubernetesSettings {
    /// Kubeconfig context to use.
    /// If not set, the in-cluster config or the current kubeconfig context is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Keycloak admin settings used by the realm initializer and token validation
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct KeycloakSettings {
    /// Base URL of the Keycloak server, without the `/realms/...` suffix
    #[serde(default = "default_keycloak_url")]
    pub server_url: String,

    #[serde(default = "default_realm")]
    pub realm: String,

    /// Realm definition to import at startup. No import happens when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm_init_filename: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,

    #[serde(default = "default_admin_client_id")]
    pub admin_client_id: String,

    /// Access token lifespan (seconds) applied to a freshly created realm
    #[serde(default = "default_access_token_lifespan")]
    pub access_token_lifespan: i32,
}

/// Bearer token authorization settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_allowed_roles")]
    pub allowed_roles: Vec<String>,

    #[serde(default = "default_jwks_refresh_secs")]
    pub jwks_refresh_secs: u64,
}

/// Defaults for the kind launcher
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct KindSettings {
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    #[serde(default = "default_kind_image")]
    pub image: String,

    #[serde(default = "default_kind_config_file")]
    pub config_file: String,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Keep the cluster around after the integration tests finish
    #[serde(default = "default_true")]
    pub keep_cluster: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_keycloak_url() -> String {
    "http://localhost:8180".to_string()
}

fn default_realm() -> String {
    "iep".to_string()
}

fn default_admin_client_id() -> String {
    "admin-cli".to_string()
}

fn default_access_token_lifespan() -> i32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_allowed_roles() -> Vec<String> {
    vec!["serviceAccount".to_string(), "user".to_string()]
}

fn default_jwks_refresh_secs() -> u64 {
    3600
}

fn default_cluster_name() -> String {
    "kind".to_string()
}

fn default_kind_image() -> String {
    "kindest/node:v1.22.2".to_string()
}

fn default_kind_config_file() -> String {
    "kind-config.yaml".to_string()
}

fn default_command_timeout_secs() -> u64 {
    180
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for KeycloakSettings {
    fn default() -> Self {
        Self {
            server_url: default_keycloak_url(),
            realm: default_realm(),
            realm_init_filename: None,
            admin_user: None,
            admin_password: None,
            admin_client_id: default_admin_client_id(),
            access_token_lifespan: default_access_token_lifespan(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            allowed_roles: default_allowed_roles(),
            jwks_refresh_secs: default_jwks_refresh_secs(),
        }
    }
}

impl Default for KindSettings {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            image: default_kind_image(),
            config_file: default_kind_config_file(),
            command_timeout_secs: default_command_timeout_secs(),
            keep_cluster: default_true(),
        }
    }
}

impl KindSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Environment variables that override file settings
pub const ENV_OVERRIDES: &[&str] = &[
    "BIND_ADDRESS",
    "KUBE_CONTEXT",
    "KEYCLOAK_URL",
    "KEYCLOAK_REALM",
    "KEYCLOAK_REALM_INIT_FILENAME",
    "KEYCLOAK_ADMIN_USER",
    "KEYCLOAK_ADMIN_PASSWORD",
    "AUTH_ENABLED",
    "KIND_KEEP_CLUSTER",
];

impl Settings {
    /// Load settings from an explicit file, a discovered file, or defaults,
    /// then apply environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut settings = match explicit {
            Some(path) => Self::load_from_file(path).map_err(|e| {
                CliError::invalid_config(&path.display().to_string(), &format!("{:#}", e))
            })?,
            None => match Self::find_config_file() {
                Some(path) => Self::load_from_file(&path).unwrap_or_else(|e| {
                    crate::log_warn!("Ignoring config file {}: {:#}", path.display(), e);
                    Self::default()
                }),
                None => Self::default(),
            },
        };

        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(settings)
    }

    /// Find config file in standard locations
    /// Priority:
    /// 1. .kubernetes-api.toml in current directory
    /// 2. ~/.config/kubernetes-api/config.toml (XDG config directory)
    fn find_config_file() -> Option<PathBuf> {
        let local_config = PathBuf::from(".kubernetes-api.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("kubernetes-api").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (see [`ENV_OVERRIDES`])
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("BIND_ADDRESS") {
            self.server.bind_address = v;
        }
        if let Some(v) = non_empty("KUBE_CONTEXT") {
            self.kubernetes.context = Some(v);
        }
        if let Some(v) = non_empty("KEYCLOAK_URL") {
            self.keycloak.server_url = v;
        }
        if let Some(v) = non_empty("KEYCLOAK_REALM") {
            self.keycloak.realm = v;
        }
        if let Some(v) = non_empty("KEYCLOAK_REALM_INIT_FILENAME") {
            self.keycloak.realm_init_filename = Some(v);
        }
        if let Some(v) = non_empty("KEYCLOAK_ADMIN_USER") {
            self.keycloak.admin_user = Some(v);
        }
        if let Some(v) = non_empty("KEYCLOAK_ADMIN_PASSWORD") {
            self.keycloak.admin_password = Some(v);
        }
        if let Some(v) = non_empty("AUTH_ENABLED") {
            self.auth.enabled = parse_bool(&v).unwrap_or(self.auth.enabled);
        }
        if let Some(v) = non_empty("KIND_KEEP_CLUSTER") {
            self.kind.keep_cluster = parse_bool(&v).unwrap_or(self.kind.keep_cluster);
        }
    }

    /// Save settings to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize settings")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Generate example config file content
    pub fn example_config() -> String {
        let example = Settings::default();
        let header = "# kubernetes-api configuration file\n\
                      # Place this file at ~/.config/kubernetes-api/config.toml or .kubernetes-api.toml in your project\n\
                      # keycloak.realm_init_filename, keycloak.admin_user and keycloak.admin_password are optional\n\n";

        match toml::to_string_pretty(&example) {
            Ok(config) => format!("{}{}", header, config),
            Err(_) => r#"# kubernetes-api configuration file

[server]
bind_address = "0.0.0.0:8080"

[keycloak]
server_url = "http://localhost:8180"
realm = "iep"
# realm_init_filename = "realm.json"

[auth]
enabled = true
allowed_roles = ["serviceAccount", "user"]

[kind]
cluster_name = "kind"
image = "kindest/node:v1.22.2"
"#
            .to_string(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
