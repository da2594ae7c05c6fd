//! Kind cluster management for integration testing
//!
//! Needs `kind` and `kubectl` on the PATH (see `kubernetes-api check`).

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::settings::KindSettings;
use crate::k8s::process::{CommandError, CommandOutput, CommandRunner, Invocation, SystemRunner};

pub const DEFAULT_CLUSTER_NAME: &str = "kind";
pub const DEFAULT_IMAGE: &str = "kindest/node:v1.22.2";
pub const DEFAULT_CONFIG_FILE: &str = "kind-config.yaml";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Cluster role bound in test namespaces so the service account can read them
pub const API_CLUSTER_ROLE: &str = "kubernetes-api-role";
/// Service account the API runs as inside the cluster
pub const API_SERVICE_ACCOUNT: &str = "kubeapi:sa-kubernetes-api";

/// What `kind get clusters` prints on stderr when there is nothing to list
const NO_CLUSTERS_MESSAGE: &str = "No kind clusters found.";

/// kind cluster configuration (`kind.x-k8s.io/v1alpha4`)
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KindConfig {
    pub kind: String,
    pub api_version: String,
    pub nodes: Vec<KindNode>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KindNode {
    pub role: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_port_mappings: Vec<PortMapping>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

impl KindConfig {
    /// One control-plane node, no workers
    pub fn single_node() -> Self {
        Self {
            kind: "Cluster".to_string(),
            api_version: "kind.x-k8s.io/v1alpha4".to_string(),
            nodes: vec![KindNode {
                role: "control-plane".to_string(),
                extra_port_mappings: Vec::new(),
            }],
        }
    }

    pub fn with_workers(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.nodes.push(KindNode {
                role: "worker".to_string(),
                extra_port_mappings: Vec::new(),
            });
        }
        self
    }

    /// Expose `container_port` of the control-plane node on `host_port`
    pub fn with_port_mapping(mut self, container_port: u16, host_port: u16) -> Self {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.role == "control-plane") {
            node.extra_port_mappings.push(PortMapping {
                container_port,
                host_port,
            });
        }
        self
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize kind config")
    }
}

/// Where `kind create cluster` gets its configuration from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterConfig {
    /// kind's built-in defaults
    None,
    /// An existing config file
    File(PathBuf),
    /// A config generated here and fed on stdin
    Generated(KindConfig),
}

impl ClusterConfig {
    /// Use `path` when it exists, otherwise fall back to a generated single-node config
    pub fn file_or_generated(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if path.is_file() {
            let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            ClusterConfig::File(absolute)
        } else {
            ClusterConfig::Generated(KindConfig::single_node())
        }
    }
}

/// Drives `kind` and `kubectl` to manage an ephemeral cluster
pub struct KindClusterLauncher<R: CommandRunner = SystemRunner> {
    runner: R,
    timeout: Duration,
    /// kubectl context of the cluster most recently created
    context: String,
}

impl KindClusterLauncher<SystemRunner> {
    pub fn new() -> Self {
        Self::with_runner(SystemRunner, DEFAULT_TIMEOUT)
    }
}

impl Default for KindClusterLauncher<SystemRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> KindClusterLauncher<R> {
    pub fn with_runner(runner: R, timeout: Duration) -> Self {
        Self {
            runner,
            timeout,
            context: context_for(DEFAULT_CLUSTER_NAME),
        }
    }

    /// kubectl context used for namespace and role-binding operations
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Point namespace operations at an already existing cluster
    pub fn use_cluster(&mut self, name: &str) {
        self.context = context_for(name);
    }

    async fn kind<I, S>(&self, args: I) -> Result<CommandOutput, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner
            .run(&Invocation::new("kind", args, self.timeout))
            .await
    }

    async fn kubectl<I, S>(&self, args: I) -> Result<CommandOutput, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner
            .run(&Invocation::new("kubectl", args, self.timeout))
            .await
    }

    /// Version of kind installed
    pub async fn kind_version(&self) -> Result<String> {
        let output = self
            .kind(["version"])
            .await
            .context("Failed to get kind version")?;
        Ok(output.stdout)
    }

    /// Check if kind can be executed
    pub async fn is_kind_installed(&self) -> bool {
        self.kind_version().await.is_ok()
    }

    /// Kubeconfig for the named cluster (the default cluster when `name` is empty)
    pub async fn kubeconfig(&self, name: &str) -> Result<String> {
        let mut args = vec!["get".to_string(), "kubeconfig".to_string()];
        if !name.is_empty() {
            args.push("--name".to_string());
            args.push(name.to_string());
        }

        let output = self
            .kind(args)
            .await
            .with_context(|| format!("Failed to get kubeconfig for cluster '{}'", name))?;
        Ok(output.stdout)
    }

    /// Write the cluster kubeconfig to `path`
    pub async fn export_kubeconfig(&self, name: &str, path: &Path) -> Result<PathBuf> {
        let kubeconfig = self.kubeconfig(name).await?;

        std::fs::write(path, kubeconfig).context("Failed to write kubeconfig file")?;

        let final_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        crate::log_info!("KUBECONFIG written to: {}", final_path.display());
        Ok(final_path)
    }

    /// List all kind clusters
    pub async fn list_clusters(&self) -> Result<Vec<String>> {
        let output = self
            .kind(["get", "clusters"])
            .await
            .context("Failed to list kind clusters")?;

        if output.stderr.trim() == NO_CLUSTERS_MESSAGE {
            return Ok(Vec::new());
        }

        Ok(output
            .stdout
            .lines()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    /// Check if a cluster exists. An empty name matches any cluster.
    pub async fn cluster_exists(&self, name: &str) -> Result<bool> {
        let clusters = self.list_clusters().await?;

        if name.is_empty() {
            return Ok(!clusters.is_empty());
        }

        Ok(clusters.iter().any(|c| c.eq_ignore_ascii_case(name)))
    }

    /// Current kubectl context, if one is set
    pub async fn current_kube_context(&self) -> Option<String> {
        match self.kubectl(["config", "current-context"]).await {
            Ok(output) if !output.stdout.is_empty() => Some(output.stdout),
            Ok(_) => None,
            Err(e) => {
                // context probably not set
                tracing::debug!(error = %e, "No current kubectl context");
                None
            }
        }
    }

    /// Switch the kubectl context
    pub async fn set_current_kube_context(&self, context: &str) -> Result<()> {
        self.kubectl(["config", "use-context", context])
            .await
            .with_context(|| format!("Failed to switch kubectl context to '{}'", context))?;
        Ok(())
    }

    /// Create a cluster
    ///
    /// With `keep_current_context` the kubectl context active before the call is
    /// restored afterwards, since `kind create cluster` switches to the new cluster.
    pub async fn create_cluster(
        &mut self,
        image: Option<&str>,
        name: Option<&str>,
        config: ClusterConfig,
        keep_current_context: bool,
    ) -> Result<()> {
        let mut args = vec!["create".to_string(), "cluster".to_string()];

        if let Some(image) = image.filter(|s| !s.is_empty()) {
            args.push("--image".to_string());
            args.push(image.to_string());
        }

        let name = name.filter(|s| !s.is_empty());
        if let Some(name) = name {
            args.push("--name".to_string());
            args.push(name.to_string());
        }

        let invocation = match config {
            ClusterConfig::None => Invocation::new("kind", args, self.timeout),
            ClusterConfig::File(path) => {
                args.push("--config".to_string());
                args.push(path.display().to_string());
                Invocation::new("kind", args, self.timeout)
            }
            ClusterConfig::Generated(config) => {
                args.push("--config".to_string());
                args.push("-".to_string());
                Invocation::new("kind", args, self.timeout).with_stdin(config.to_yaml()?)
            }
        };

        let previous_context = if keep_current_context {
            self.current_kube_context().await
        } else {
            None
        };

        crate::log_info!(
            "Creating kind cluster '{}'...",
            name.unwrap_or(DEFAULT_CLUSTER_NAME)
        );
        let spinner = crate::utils::progress::create_spinner("Waiting for kind to create the cluster");
        let result = self.runner.run(&invocation).await;
        spinner.finish_and_clear();
        result.context("Failed to create kind cluster")?;

        self.context = context_for(name.unwrap_or(DEFAULT_CLUSTER_NAME));

        if let Some(context) = previous_context {
            self.set_current_kube_context(&context).await?;
        }

        crate::log_info!("Cluster created, kubectl context: {}", self.context);
        Ok(())
    }

    /// Delete a cluster (the default cluster when `name` is empty)
    pub async fn delete_cluster(&self, name: &str) -> Result<()> {
        let mut args = vec!["delete".to_string(), "cluster".to_string()];
        if !name.is_empty() {
            args.push("--name".to_string());
            args.push(name.to_string());
        }

        crate::log_info!("Deleting kind cluster '{}'...", name);
        self.kind(args)
            .await
            .with_context(|| format!("Failed to delete kind cluster '{}'", name))?;
        Ok(())
    }

    /// Create the cluster from `settings`, reusing it when it already exists
    pub async fn init_with_settings(&mut self, settings: &KindSettings) -> Result<()> {
        if self.cluster_exists(&settings.cluster_name).await? {
            crate::log_info!("Reusing existing kind cluster '{}'", settings.cluster_name);
            self.use_cluster(&settings.cluster_name);
            return Ok(());
        }

        let config = ClusterConfig::file_or_generated(&settings.config_file);
        self.create_cluster(
            Some(&settings.image),
            Some(&settings.cluster_name),
            config,
            true,
        )
        .await
    }

    /// Create the cluster with the default image, name and configuration
    pub async fn init_with_defaults(&mut self) -> Result<()> {
        self.init_with_settings(&KindSettings::default()).await
    }

    /// Create a namespace in the cluster
    pub async fn create_namespace(&self, namespace: &str) -> Result<()> {
        self.kubectl(["--context", self.context.as_str(), "create", "namespace", namespace])
            .await
            .with_context(|| format!("Failed to create namespace '{}'", namespace))?;
        Ok(())
    }

    /// Delete a namespace in the cluster
    pub async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        self.kubectl(["--context", self.context.as_str(), "delete", "namespace", namespace])
            .await
            .with_context(|| format!("Failed to delete namespace '{}'", namespace))?;
        Ok(())
    }

    /// Delete the namespace if present, then create it
    pub async fn recreate_namespace(&self, namespace: &str) -> Result<()> {
        if let Err(e) = self.delete_namespace(namespace).await {
            tracing::debug!(namespace, error = %e, "Namespace was not deleted");
        }
        self.create_namespace(namespace).await
    }

    /// Bind the API cluster role to the API service account in `namespace`
    pub async fn create_role_binding(&self, role_binding: &str, namespace: &str) -> Result<()> {
        let cluster_role = format!("--clusterrole={}", API_CLUSTER_ROLE);
        let service_account = format!("--serviceaccount={}", API_SERVICE_ACCOUNT);
        let ns = format!("--namespace={}", namespace);

        self.kubectl([
            "--context",
            self.context.as_str(),
            "create",
            "rolebinding",
            role_binding,
            cluster_role.as_str(),
            service_account.as_str(),
            ns.as_str(),
        ])
        .await
        .with_context(|| {
            format!(
                "Failed to create rolebinding '{}' in namespace '{}'",
                role_binding, namespace
            )
        })?;
        Ok(())
    }
}

/// kubectl context name kind assigns to a cluster
pub fn context_for(cluster_name: &str) -> String {
    format!("kind-{}", cluster_name)
}

/// Integration-test fixture owning one kind cluster
pub struct KindTestCluster<R: CommandRunner = SystemRunner> {
    launcher: KindClusterLauncher<R>,
    settings: KindSettings,
}

impl KindTestCluster<SystemRunner> {
    pub fn new(settings: KindSettings) -> Self {
        let launcher = KindClusterLauncher::with_runner(SystemRunner, settings.command_timeout());
        Self::with_launcher(launcher, settings)
    }
}

impl<R: CommandRunner> KindTestCluster<R> {
    pub fn with_launcher(launcher: KindClusterLauncher<R>, settings: KindSettings) -> Self {
        Self { launcher, settings }
    }

    pub fn launcher(&self) -> &KindClusterLauncher<R> {
        &self.launcher
    }

    pub fn keep_cluster(&self) -> bool {
        self.settings.keep_cluster
    }

    /// Create the cluster
    ///
    /// A failure is only fatal when the cluster is not kept: with `keep_cluster`
    /// a previous run usually left a usable cluster behind.
    pub async fn start(&mut self) -> Result<()> {
        crate::log_info!("Creating Kind Cluster");

        let settings = self.settings.clone();
        match self.launcher.init_with_settings(&settings).await {
            Ok(()) => Ok(()),
            Err(e) => {
                crate::log_error!("Unable to create the cluster: {:#}", e);
                if self.settings.keep_cluster {
                    self.launcher.use_cluster(&self.settings.cluster_name);
                    Ok(())
                } else {
                    Err(anyhow!("Unable to create the cluster: {:#}", e))
                }
            }
        }
    }

    /// Delete the cluster unless it is kept
    pub async fn stop(&self) {
        if self.settings.keep_cluster {
            return;
        }

        if let Err(e) = self.launcher.delete_cluster(&self.settings.cluster_name).await {
            crate::log_error!("Unable to delete the cluster: {:#}", e);
        }
    }
}
