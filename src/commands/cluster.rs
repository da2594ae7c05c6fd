//! Cluster command implementations

use anyhow::Result;
use std::path::PathBuf;

use crate::config::settings::KindSettings;
use crate::k8s::kind::{ClusterConfig, KindClusterLauncher, KindConfig, context_for};
use crate::k8s::process::SystemRunner;
use crate::utils::{CliError, CommonPrereqs, Prerequisite};

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub name: Option<String>,
    pub image: Option<String>,
    pub config: Option<PathBuf>,
    /// Worker nodes for a generated config; ignored with `config`
    pub workers: usize,
    /// `(container, host)` ports exposed from the control plane; ignored with `config`
    pub ports: Vec<(u16, u16)>,
    /// Leave kubectl pointed at the new cluster
    pub switch_context: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NamespaceOptions {
    pub cluster: Option<String>,
    pub namespace: String,
    pub recreate: bool,
    pub delete: bool,
    pub role_binding: Option<String>,
}

fn launcher(settings: &KindSettings) -> KindClusterLauncher<SystemRunner> {
    KindClusterLauncher::with_runner(SystemRunner, settings.command_timeout())
}

fn ensure_tools() -> Result<()> {
    for tool in [CommonPrereqs::kind(), CommonPrereqs::kubectl()] {
        if tool.check().is_err() {
            return Err(CliError::tool_not_found(tool.name(), tool.install_hint()).into());
        }
    }
    Ok(())
}

fn cluster_config(settings: &KindSettings, options: &CreateOptions) -> ClusterConfig {
    match &options.config {
        Some(path) => ClusterConfig::File(path.clone()),
        None if options.workers > 0 || !options.ports.is_empty() => {
            let config = options
                .ports
                .iter()
                .fold(KindConfig::single_node().with_workers(options.workers), |config, (c, h)| {
                    config.with_port_mapping(*c, *h)
                });
            ClusterConfig::Generated(config)
        }
        None => ClusterConfig::file_or_generated(&settings.config_file),
    }
}

pub async fn create(settings: &KindSettings, options: CreateOptions) -> Result<()> {
    ensure_tools()?;

    let name = options
        .name
        .clone()
        .unwrap_or_else(|| settings.cluster_name.clone());
    let image = options
        .image
        .clone()
        .unwrap_or_else(|| settings.image.clone());

    let mut launcher = launcher(settings);
    if launcher.cluster_exists(&name).await? {
        crate::log_warn!("Cluster '{}' already exists", name);
        return Ok(());
    }

    let config = cluster_config(settings, &options);
    launcher
        .create_cluster(Some(&image), Some(&name), config, !options.switch_context)
        .await?;

    println!("Cluster '{}' created", name);
    println!("kubectl context: {}", launcher.context());
    if !options.switch_context {
        println!("Your current context was kept; use it with:");
        println!("  kubectl config use-context {}", launcher.context());
    }
    Ok(())
}

pub async fn delete(settings: &KindSettings, name: Option<String>, assume_yes: bool) -> Result<()> {
    ensure_tools()?;

    let name = name.unwrap_or_else(|| settings.cluster_name.clone());
    let launcher = launcher(settings);

    if !launcher.cluster_exists(&name).await? {
        crate::log_warn!("Cluster '{}' does not exist", name);
        return Ok(());
    }

    if !crate::utils::confirm(
        &format!("Are you sure you want to delete cluster '{}'?", name),
        assume_yes,
    )? {
        crate::log_info!("Deletion cancelled");
        return Ok(());
    }

    launcher.delete_cluster(&name).await?;
    println!("Cluster '{}' deleted", name);
    Ok(())
}

pub async fn list(settings: &KindSettings) -> Result<()> {
    ensure_tools()?;

    let clusters = launcher(settings).list_clusters().await?;
    if clusters.is_empty() {
        println!("No kind clusters found");
    } else {
        for cluster in clusters {
            println!("{}", cluster);
        }
    }
    Ok(())
}

pub async fn kubeconfig(
    settings: &KindSettings,
    name: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    ensure_tools()?;

    let name = name.unwrap_or_else(|| settings.cluster_name.clone());
    let launcher = launcher(settings);
    if !launcher.cluster_exists(&name).await? {
        return Err(CliError::cluster_not_found(&name).into());
    }

    match output {
        Some(path) => {
            launcher.export_kubeconfig(&name, &path).await?;
        }
        None => println!("{}", launcher.kubeconfig(&name).await?),
    }
    Ok(())
}

pub async fn namespace(settings: &KindSettings, options: NamespaceOptions) -> Result<()> {
    ensure_tools()?;

    let cluster = options
        .cluster
        .unwrap_or_else(|| settings.cluster_name.clone());
    let mut launcher = launcher(settings);
    if !launcher.cluster_exists(&cluster).await? {
        return Err(CliError::cluster_not_found(&cluster).into());
    }
    launcher.use_cluster(&cluster);

    if options.delete {
        launcher.delete_namespace(&options.namespace).await?;
        println!("Namespace '{}' deleted from {}", options.namespace, context_for(&cluster));
        return Ok(());
    }

    if options.recreate {
        launcher.recreate_namespace(&options.namespace).await?;
    } else {
        launcher.create_namespace(&options.namespace).await?;
    }
    println!("Namespace '{}' ready in {}", options.namespace, context_for(&cluster));

    if let Some(role_binding) = options.role_binding {
        launcher
            .create_role_binding(&role_binding, &options.namespace)
            .await?;
        println!(
            "Role binding '{}' grants {} to {}",
            role_binding,
            crate::k8s::kind::API_CLUSTER_ROLE,
            crate::k8s::kind::API_SERVICE_ACCOUNT
        );
    }
    Ok(())
}
