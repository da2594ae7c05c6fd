//! CLI errors with actionable suggestions

use colored::Colorize;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{message}")]
pub struct CliError {
    pub message: String,
    pub suggestions: Vec<String>,
    pub docs_link: Option<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestions: Vec::new(),
            docs_link: None,
        }
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_docs(mut self, link: impl Into<String>) -> Self {
        self.docs_link = Some(link.into());
        self
    }

    /// Print the error and its suggestions to the terminal
    pub fn display(&self) {
        crate::log_error!("{}", self.message);

        if !self.suggestions.is_empty() {
            eprintln!();
            eprintln!("{}", "Suggestions:".yellow().bold());
            for suggestion in &self.suggestions {
                eprintln!("  {} {}", "→".blue(), suggestion);
            }
        }

        if let Some(docs) = &self.docs_link {
            eprintln!();
            eprintln!("{} {}", "Documentation:".cyan(), docs);
        }
    }

    pub fn cluster_not_found(name: &str) -> Self {
        Self::new(format!("Kind cluster '{}' not found", name))
            .suggest("List clusters with: kubernetes-api cluster list")
            .suggest(format!(
                "Create it with: kubernetes-api cluster create --name {}",
                name
            ))
    }

    pub fn tool_not_found(tool: &str, install_hint: &str) -> Self {
        Self::new(format!("Required tool '{}' not found in PATH", tool))
            .suggest(install_hint.to_string())
            .suggest("Run 'kubernetes-api check' to verify all prerequisites")
    }

    pub fn kubernetes_unreachable(context: Option<&str>) -> Self {
        let target = context.map_or_else(
            || "the current kubeconfig context".to_string(),
            |c| format!("context '{}'", c),
        );
        Self::new(format!("Unable to reach the Kubernetes API using {}", target))
            .suggest("Check the context with: kubectl config current-context")
            .suggest("Set [kubernetes] context in the config file or KUBE_CONTEXT")
            .suggest("For local development, run: kubernetes-api serve --in-memory")
    }

    pub fn keycloak_unreachable(url: &str) -> Self {
        Self::new(format!("Unable to reach Keycloak at {}", url))
            .suggest("Check [keycloak] server_url in the config file or KEYCLOAK_URL")
            .suggest("Verify the admin credentials (KEYCLOAK_ADMIN_USER / KEYCLOAK_ADMIN_PASSWORD)")
    }

    pub fn permission_denied(operation: &str) -> Self {
        Self::new(format!("Permission denied while trying to {}", operation))
            .suggest("Check RBAC for the service account: kubectl auth can-i --list")
            .suggest(format!(
                "Bind the '{}' cluster role with: kubernetes-api cluster namespace <ns> --role-binding",
                crate::k8s::kind::API_CLUSTER_ROLE
            ))
    }

    pub fn address_in_use(address: &str) -> Self {
        Self::new(format!("Address {} is already in use", address))
            .suggest("Pick another address with: kubernetes-api serve --bind <addr>")
            .suggest("Or set BIND_ADDRESS / [server] bind_address")
    }

    pub fn invalid_config(path: &str, reason: &str) -> Self {
        Self::new(format!("Invalid configuration file '{}': {}", path, reason))
            .suggest("Print a valid example with: kubernetes-api config example")
    }
}

pub fn display_error_and_exit(error: CliError) -> ! {
    error.display();
    std::process::exit(1);
}

/// Turn a plumbing error into a [`CliError`] with suggestions matching its text
pub fn enhance_error(err: anyhow::Error) -> CliError {
    if let Some(cli) = err.downcast_ref::<CliError>() {
        return CliError {
            message: cli.message.clone(),
            suggestions: cli.suggestions.clone(),
            docs_link: cli.docs_link.clone(),
        };
    }

    let err_str = format!("{:#}", err);
    let lower = err_str.to_lowercase();

    if lower.contains("no kind clusters found") || (lower.contains("not found") && lower.contains("cluster '")) {
        let cluster_name = extract_cluster_name(&err_str).unwrap_or("kind");
        return CliError::cluster_not_found(cluster_name);
    }

    if lower.contains("address already in use") {
        return CliError::new(err_str).suggest("Pick another address with: kubernetes-api serve --bind <addr>");
    }

    if lower.contains("connection refused") || lower.contains("timed out") || lower.contains("timeout") {
        return CliError::new(err_str)
            .suggest("Check that the cluster and Keycloak are running and reachable")
            .suggest("Run with -vv for the failing request");
    }

    if lower.contains("unauthorized") || lower.contains("forbidden") {
        return CliError::permission_denied("complete the operation");
    }

    CliError::new(err_str).suggest("Run with -vv for more details")
}

fn extract_cluster_name(msg: &str) -> Option<&str> {
    if let Some(start) = msg.find("cluster '")
        && let Some(end) = msg[start + 9..].find('\'')
    {
        return Some(&msg[start + 9..start + 9 + end]);
    }
    None
}
