//! `import-realm`: run the realm provisioning on demand

use anyhow::Result;
use std::path::PathBuf;

use crate::config::Settings;
use crate::config::settings::KeycloakSettings;
use crate::keycloak::{FailureKind, ImportPolicy, InitReport, RealmInitializer, RealmStatus};
use crate::utils::CliError;

pub async fn import(settings: &Settings, file: Option<PathBuf>, policy: ImportPolicy) -> Result<()> {
    let mut keycloak = settings.keycloak.clone();
    if let Some(file) = file {
        keycloak.realm_init_filename = Some(file.display().to_string());
    }

    if keycloak.realm_init_filename.as_deref().is_none_or(str::is_empty) {
        return Err(CliError::new("No realm file to import")
            .suggest("Pass one with: kubernetes-api import-realm --file realm.json")
            .suggest("Or set KEYCLOAK_REALM_INIT_FILENAME / [keycloak] realm_init_filename")
            .into());
    }

    let report = RealmInitializer::from_settings(&keycloak)
        .with_policy(policy)
        .run()
        .await;
    print_report(&keycloak.realm, &report);

    if report.errors.is_empty() {
        Ok(())
    } else {
        Err(failure(&keycloak, &report).into())
    }
}

/// Build the error for a failed import, with one remedy per kind of failure
fn failure(keycloak: &KeycloakSettings, report: &InitReport) -> CliError {
    let mut kinds: Vec<FailureKind> = Vec::new();
    for error in &report.errors {
        if !kinds.contains(&error.kind) {
            kinds.push(error.kind);
        }
    }

    if kinds == [FailureKind::Unreachable] {
        return CliError::keycloak_unreachable(&keycloak.server_url);
    }

    let mut error = CliError::new(format!(
        "Importing into realm '{}' failed with {} error(s)",
        keycloak.realm,
        report.errors.len()
    ));
    for kind in kinds {
        error = match kind {
            FailureKind::Unreachable => error.suggest(format!(
                "Check that Keycloak is reachable at {} ([keycloak] server_url or KEYCLOAK_URL)",
                keycloak.server_url
            )),
            FailureKind::Unauthorized => error.suggest(
                "Verify the admin credentials (KEYCLOAK_ADMIN_USER / KEYCLOAK_ADMIN_PASSWORD)",
            ),
            FailureKind::Rejected => {
                error.suggest("Keycloak refused the request, rerun with -v to see its answer")
            }
            FailureKind::RealmFile => error.suggest(
                "Check that the realm file exists and is a Keycloak realm export in JSON",
            ),
        };
    }
    error
}

fn print_report(realm: &str, report: &InitReport) {
    let status = match report.realm {
        Some(RealmStatus::Existing) => "already present",
        Some(RealmStatus::Created) => "created",
        Some(RealmStatus::CreateFailed) => "could not be created",
        None => "not checked",
    };
    println!("Realm '{}': {}", realm, status);

    if let Some(file) = &report.realm_file {
        let outcome = if report.imported { "imported" } else { "not imported" };
        println!("Realm file {}: {}", file.display(), outcome);
    }

    for error in &report.errors {
        println!("  - {}", error);
    }
}
