//! Startup realm provisioning
//!
//! Makes sure the configured realm exists and merges a realm export into it.
//! Nothing here fails the caller: every problem is logged and recorded in the
//! returned [`InitReport`], and the server starts regardless.

use std::fmt;
use std::path::PathBuf;

use super::client::KeycloakAdminClient;
use super::error::{FailureKind, KeycloakError};
use super::representation::{ImportPolicy, RealmRepresentation, load_partial_import};
use crate::config::settings::KeycloakSettings;

/// What happened to the realm before the import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealmStatus {
    Existing,
    Created,
    CreateFailed,
}

/// One failed step of the initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitError {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&KeycloakError> for InitError {
    fn from(err: &KeycloakError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// `None` when no realm file is configured and nothing was attempted
    pub realm_file: Option<PathBuf>,
    pub realm: Option<RealmStatus>,
    pub imported: bool,
    pub errors: Vec<InitError>,
}

impl InitReport {
    pub fn skipped(&self) -> bool {
        self.realm_file.is_none()
    }
}

pub struct RealmInitializer {
    client: KeycloakAdminClient,
    realm: String,
    realm_file: Option<PathBuf>,
    access_token_lifespan: i32,
    policy: ImportPolicy,
}

impl RealmInitializer {
    pub fn new(client: KeycloakAdminClient, realm: &str, realm_file: Option<PathBuf>) -> Self {
        Self {
            client,
            realm: realm.to_string(),
            realm_file,
            access_token_lifespan: 3,
            policy: ImportPolicy::Skip,
        }
    }

    pub fn from_settings(settings: &KeycloakSettings) -> Self {
        let realm_file = settings
            .realm_init_filename
            .as_deref()
            .filter(|f| !f.is_empty())
            .map(PathBuf::from);
        Self::new(
            KeycloakAdminClient::from_settings(settings),
            &settings.realm,
            realm_file,
        )
        .with_access_token_lifespan(settings.access_token_lifespan)
    }

    pub fn with_access_token_lifespan(mut self, seconds: i32) -> Self {
        self.access_token_lifespan = seconds;
        self
    }

    pub fn with_policy(mut self, policy: ImportPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn run(&self) -> InitReport {
        let Some(realm_file) = &self.realm_file else {
            tracing::debug!("no realm file configured, skipping realm initialization");
            return InitReport::default();
        };

        let mut report = InitReport {
            realm_file: Some(realm_file.clone()),
            ..Default::default()
        };

        crate::log_info!("Importing realm [{}]", self.realm);

        // an unreachable server counts as "absent"; creation then reports the real problem
        let existing = match self.client.get_realm(&self.realm).await {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(realm = %self.realm, error = %e, "realm lookup failed");
                None
            }
        };

        if existing.is_some() {
            report.realm = Some(RealmStatus::Existing);
        } else {
            let realm = RealmRepresentation::default_realm(&self.realm, self.access_token_lifespan);
            match self.client.create_realm(&realm).await {
                Ok(()) => {
                    crate::log_info!("Created realm [{}]", self.realm);
                    report.realm = Some(RealmStatus::Created);
                }
                Err(e) => {
                    crate::log_error!("Unable to create realm [{}]: {}", self.realm, e);
                    report.realm = Some(RealmStatus::CreateFailed);
                    report.errors.push(InitError::from(&e));
                }
            }
        }

        let imported = match load_partial_import(realm_file, self.policy) {
            Ok(import) => self.client.partial_import(&self.realm, &import).await,
            Err(e) => Err(e),
        };
        match imported {
            Ok(summary) => {
                tracing::debug!(summary = %summary, "partial import finished");
                crate::log_info!(
                    "Imported realm file [{}] into [{}]",
                    realm_file.display(),
                    self.realm
                );
                report.imported = true;
            }
            Err(e) => {
                crate::log_error!(
                    "Unable to import realm file [{}]: {}",
                    realm_file.display(),
                    e
                );
                report.errors.push(InitError::from(&e));
            }
        }

        report
    }
}
