//! kubernetes-api CLI: ConfigMap REST service plus kind cluster tooling

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use colored::Colorize;
use kubernetes_api::commands::cluster::{CreateOptions, NamespaceOptions};
use kubernetes_api::commands::serve::ServeOptions;
use kubernetes_api::config::Settings;
use kubernetes_api::keycloak::ImportPolicy;
use kubernetes_api::utils::errors::{display_error_and_exit, enhance_error};
use kubernetes_api::utils::logger::init_tracing;
use kubernetes_api::utils::{CliError, CommonPrereqs, Prerequisite};
use kubernetes_api::{commands, log_info};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "kubernetes-api")]
#[command(author, version, about = "Keycloak-guarded REST API over Kubernetes ConfigMaps", long_about = None)]
struct Cli {
    /// Verbose output (can be used multiple times: -v, -vv, -vvv)
    /// -v: INFO, -vv: DEBUG, -vvv: TRACE
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (default: .kubernetes-api.toml, then ~/.config/kubernetes-api/config.toml)
    #[arg(short, long, global = true, env = "KUBERNETES_API_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the Keycloak realm and serve the ConfigMap API
    Serve {
        /// Listen address, overrides [server] bind_address
        #[arg(short, long)]
        bind: Option<String>,

        /// Do not create or import the Keycloak realm at startup
        #[arg(long)]
        skip_realm_init: bool,

        /// Serve an in-process store instead of a Kubernetes cluster
        #[arg(long)]
        in_memory: bool,
    },

    /// Create the realm if needed and import a realm file into it
    ImportRealm {
        /// Realm export to import, overrides [keycloak] realm_init_filename
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// What to do with resources that already exist
        #[arg(long, value_enum, default_value = "skip")]
        policy: ImportPolicy,
    },

    /// Manage kind clusters
    Cluster {
        #[command(subcommand)]
        command: ClusterCommands,
    },

    /// Check prerequisites
    Check,

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ClusterCommands {
    /// Create a new kind cluster
    Create {
        /// Cluster name (default: [kind] cluster_name)
        #[arg(short, long)]
        name: Option<String>,

        /// Node image (default: [kind] image)
        #[arg(long)]
        image: Option<String>,

        /// kind config file; a single-node config is generated when absent
        #[arg(long = "kind-config")]
        kind_config: Option<PathBuf>,

        /// Worker nodes in the generated config
        #[arg(long, default_value_t = 0)]
        workers: usize,

        /// Expose a control-plane port, CONTAINER:HOST (repeatable)
        #[arg(long = "port", value_parser = parse_port_mapping)]
        ports: Vec<(u16, u16)>,

        /// Switch kubectl to the new cluster instead of keeping the current context
        #[arg(long)]
        switch_context: bool,
    },

    /// Delete a kind cluster
    Delete {
        /// Cluster name (default: [kind] cluster_name)
        #[arg(short, long)]
        name: Option<String>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List kind clusters
    List,

    /// Print or export a cluster's kubeconfig
    Kubeconfig {
        /// Cluster name (default: [kind] cluster_name)
        #[arg(short, long)]
        name: Option<String>,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create, recreate or delete a namespace in a kind cluster
    Namespace {
        /// Namespace name
        namespace: String,

        /// Cluster name (default: [kind] cluster_name)
        #[arg(short, long)]
        name: Option<String>,

        /// Delete the namespace first if it exists
        #[arg(long, conflicts_with = "delete")]
        recreate: bool,

        /// Delete the namespace
        #[arg(long)]
        delete: bool,

        /// Bind the API cluster role to the API service account in the namespace
        #[arg(long, value_name = "NAME", conflicts_with = "delete")]
        role_binding: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print an example configuration file
    Example,

    /// Write the default configuration to a file
    Init {
        /// Destination file
        #[arg(short, long, default_value = ".kubernetes-api.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration (file, then environment overrides)
    Show,
}

fn parse_port_mapping(value: &str) -> Result<(u16, u16), String> {
    let (container, host) = value
        .split_once(':')
        .ok_or_else(|| format!("expected CONTAINER:HOST, got '{}'", value))?;
    let container = container
        .parse()
        .map_err(|_| format!("invalid container port '{}'", container))?;
    let host = host
        .parse()
        .map_err(|_| format!("invalid host port '{}'", host))?;
    Ok((container, host))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // a server is not much use without its info lines
    let verbosity = match cli.command {
        Commands::Serve { .. } => cli.verbose.max(1),
        _ => cli.verbose,
    };
    init_tracing(verbosity);

    if let Err(e) = run(cli).await {
        display_error_and_exit(enhance_error(e));
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Completion { shell } => handle_completion_command(shell),
        Commands::Version => handle_version_command(),
        Commands::Config {
            command: ConfigCommands::Example,
        } => {
            print!("{}", Settings::example_config());
            Ok(())
        }
        Commands::Config {
            command: ConfigCommands::Init { output, force },
        } => handle_config_init(&output, force),
        command => {
            let settings = Settings::load(cli.config.as_deref())?;
            dispatch(command, settings).await
        }
    }
}

async fn dispatch(command: Commands, settings: Settings) -> Result<()> {
    match command {
        Commands::Serve {
            bind,
            skip_realm_init,
            in_memory,
        } => {
            commands::serve::run(
                settings,
                ServeOptions {
                    bind,
                    skip_realm_init,
                    in_memory,
                },
            )
            .await
        }
        Commands::ImportRealm { file, policy } => {
            commands::realm::import(&settings, file, policy).await
        }
        Commands::Cluster { command } => handle_cluster_command(command, &settings).await,
        Commands::Check => handle_check_command(),
        Commands::Config {
            command: ConfigCommands::Show,
        } => handle_config_show(settings),
        Commands::Config {
            command: ConfigCommands::Example | ConfigCommands::Init { .. },
        }
        | Commands::Completion { .. }
        | Commands::Version => Ok(()),
    }
}

async fn handle_cluster_command(command: ClusterCommands, settings: &Settings) -> Result<()> {
    let kind = &settings.kind;
    match command {
        ClusterCommands::Create {
            name,
            image,
            kind_config,
            workers,
            ports,
            switch_context,
        } => {
            commands::cluster::create(
                kind,
                CreateOptions {
                    name,
                    image,
                    config: kind_config,
                    workers,
                    ports,
                    switch_context,
                },
            )
            .await
        }
        ClusterCommands::Delete { name, yes } => commands::cluster::delete(kind, name, yes).await,
        ClusterCommands::List => commands::cluster::list(kind).await,
        ClusterCommands::Kubeconfig { name, output } => {
            commands::cluster::kubeconfig(kind, name, output).await
        }
        ClusterCommands::Namespace {
            namespace,
            name,
            recreate,
            delete,
            role_binding,
        } => {
            commands::cluster::namespace(
                kind,
                NamespaceOptions {
                    cluster: name,
                    namespace,
                    recreate,
                    delete,
                    role_binding,
                },
            )
            .await
        }
    }
}

fn handle_check_command() -> Result<()> {
    log_info!("Checking prerequisites...");

    let tools = CommonPrereqs::cluster_tools();
    let prereqs: Vec<&dyn Prerequisite> = tools.iter().map(|t| t as &dyn Prerequisite).collect();
    let (found, missing) = CommonPrereqs::check_all(&prereqs);

    for name in &found {
        println!("  {} {}", "✓".green(), name);
    }
    for (name, _) in &missing {
        println!("  {} {}", "✗".red(), name);
    }

    if missing.is_empty() {
        println!("{}", "All prerequisites satisfied".green().bold());
        return Ok(());
    }

    let mut error = CliError::new(format!("{} prerequisite(s) missing", missing.len()));
    for (name, hint) in &missing {
        error = error.suggest(format!("{}: {}", name, hint));
    }
    Err(error.into())
}

fn handle_config_show(mut settings: Settings) -> Result<()> {
    if settings.keycloak.admin_password.is_some() {
        settings.keycloak.admin_password = Some("********".to_string());
    }
    print!("{}", toml::to_string_pretty(&settings)?);
    Ok(())
}

fn handle_config_init(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(CliError::new(format!("{} already exists", output.display()))
            .suggest("Pass --force to overwrite it")
            .into());
    }
    Settings::default().save(output)?;
    log_info!("Wrote default configuration to {}", output.display());
    Ok(())
}

fn handle_completion_command(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "kubernetes-api", &mut io::stdout());
    Ok(())
}

fn handle_version_command() -> Result<()> {
    println!("kubernetes-api {}", env!("CARGO_PKG_VERSION"));
    println!("Keycloak-guarded REST API over Kubernetes ConfigMaps");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_port_mapping() {
        assert_eq!(parse_port_mapping("30080:8080"), Ok((30080, 8080)));
        assert!(parse_port_mapping("8080").is_err());
        assert!(parse_port_mapping("x:1").is_err());
        assert!(parse_port_mapping("1:99999").is_err());
    }

    #[test]
    fn test_parse_serve_flags() {
        let cli = Cli::try_parse_from(["kubernetes-api", "-vv", "serve", "--in-memory", "--bind", "127.0.0.1:9000"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Serve { bind, in_memory, skip_realm_init } => {
                assert_eq!(bind.as_deref(), Some("127.0.0.1:9000"));
                assert!(in_memory);
                assert!(!skip_realm_init);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_config_init_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        handle_config_init(&path, false).unwrap();
        assert_eq!(
            Settings::load_from_file(&path).unwrap().keycloak.realm,
            Settings::default().keycloak.realm
        );

        std::fs::write(&path, "# mine\n").unwrap();
        assert!(handle_config_init(&path, false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine\n");

        handle_config_init(&path, true).unwrap();
        assert!(Settings::load_from_file(&path).is_ok());
    }

    #[test]
    fn test_parse_import_realm_policy() {
        let cli = Cli::try_parse_from(["kubernetes-api", "import-realm", "--policy", "overwrite"]).unwrap();
        match cli.command {
            Commands::ImportRealm { policy, file } => {
                assert_eq!(policy, ImportPolicy::Overwrite);
                assert!(file.is_none());
            }
            _ => panic!("expected import-realm"),
        }
    }
}
