#![forbid(unsafe_code)]

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kube::{CustomResourceExt, ResourceExt};
use svnop_core::{SvnGroup, SvnRepository, SvnServer, SvnUser};
use svnop_kubehub::{run_controller, ControllerConfig};
use svnop_reconcile::{ReconcilerConfig, DEFAULT_IMAGE};
use svnop_render::build_generator;
use tracing::{info, warn};

mod manifest;

#[derive(Parser, Debug)]
#[command(name = "svnopctl", version, about = "Subversion hosting operator")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace to watch or render for (default: all)
    #[arg(long = "ns", global = true, env = "SVNOP_NAMESPACE")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller against the current cluster
    Run {
        /// Image for servers that do not set podTemplate.image
        #[arg(long = "default-image", env = "SVNOP_DEFAULT_IMAGE", default_value = DEFAULT_IMAGE)]
        default_image: String,
        /// Seconds to wait before retrying a failed reconcile
        #[arg(long = "error-backoff-secs", env = "SVNOP_ERROR_BACKOFF_SECS", default_value_t = 5)]
        error_backoff_secs: u64,
    },
    /// Print the CustomResourceDefinitions
    Crd,
    /// Render the config files for one server from a local manifest
    Render {
        /// Multi-document YAML with SvnRepository, SvnGroup and SvnUser objects
        #[arg(short = 'f', long = "file")]
        file: std::path::PathBuf,
        /// Server the rows must reference
        #[arg(long = "server")]
        server: String,
    },
}

fn init_tracing() {
    let env = std::env::var("SVNOP_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SVNOP_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid SVNOP_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { default_image, error_backoff_secs } => {
            init_metrics();
            let client = svnop_kubehub::get_kube_client().await?;
            let config = ControllerConfig {
                namespace: cli.namespace,
                reconciler: ReconcilerConfig { default_image },
                error_backoff: Duration::from_secs(error_backoff_secs),
            };
            run_controller(client, config).await?;
        }
        Commands::Crd => {
            let crds = [SvnServer::crd(), SvnRepository::crd(), SvnGroup::crd(), SvnUser::crd()];
            match cli.output {
                Output::Human => {
                    for (i, crd) in crds.iter().enumerate() {
                        if i > 0 {
                            println!("---");
                        }
                        print!("{}", serde_yaml::to_string(crd)?);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&crds)?),
            }
        }
        Commands::Render { file, server } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let m = manifest::parse(&text)?;
            if !m.servers.is_empty() && !m.servers.iter().any(|s| s.name_any() == server) {
                warn!(server = %server, "no SvnServer with that name in manifest");
            }
            let ns = cli.namespace.as_deref();
            let rows = m.scoped(&server, ns);
            info!(
                server = %server,
                ns = ?ns,
                repos = rows.repositories.len(),
                groups = rows.groups.len(),
                users = rows.users.len(),
                "render invoked"
            );
            let data = build_generator(&rows.repositories, &rows.groups, &rows.users).render()?.into_data();
            match cli.output {
                Output::Human => {
                    for (key, body) in &data {
                        println!("# {}", key);
                        print!("{}", body);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&data)?),
            }
        }
    }
    Ok(())
}
