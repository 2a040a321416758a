//! second-opinion: MCP server bridging a coding assistant to a deep reasoner.
//!
//! Usage:
//!   second-opinion --mcp --root <path>      # Start MCP server
//!   second-opinion escalate < args.json     # One-shot escalation (CLI mode)
//!   second-opinion health                   # Run health checks
//!   second-opinion models                   # Show the provider chain

use clap::{Parser, Subcommand};
use rmcp::ServiceExt;
use second_opinion::config::Config;
use second_opinion::providers::registry::ProviderRegistry;
use second_opinion::server::SecondOpinionServer;
use second_opinion::Services;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "second-opinion")]
#[command(about = "MCP server that escalates hard code questions to a deep reasoning model")]
#[command(version)]
struct Cli {
    /// Run as MCP server (stdin/stdout JSON-RPC)
    #[arg(long)]
    mcp: bool,

    /// Workspace root for resolving relative paths
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Extra allow-listed root for cross-workspace reads (repeatable)
    #[arg(long = "allow")]
    allow: Vec<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a one-shot escalation; reads tool arguments (JSON) from stdin
    Escalate,

    /// Run the health checks
    Health {
        /// Run only this check
        #[arg(short, long)]
        check: Option<String>,
    },

    /// Show the configured provider chain
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // CRITICAL: Log to stderr only (stdout is JSON-RPC for MCP)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("second_opinion=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let root = cli.root.canonicalize().unwrap_or(cli.root);
    let mut config = Config::from_env(root);
    config.extra_roots.extend(cli.allow);

    let registry = Arc::new(ProviderRegistry::from_env()?);
    let services = Arc::new(Services::new(config, registry));

    if cli.mcp {
        run_mcp_server(services).await
    } else if let Some(cmd) = cli.command {
        run_cli(services, cmd).await
    } else {
        eprintln!("Use --mcp to start the MCP server, or a subcommand for CLI mode.");
        eprintln!("Run with --help for more information.");
        std::process::exit(1);
    }
}

async fn run_mcp_server(services: Arc<Services>) -> anyhow::Result<()> {
    tracing::info!(
        root = %services.config.workspace_root.display(),
        providers = services.orchestrator.registry().len(),
        "starting MCP server"
    );

    let _reaper = services.spawn_reaper();
    let server = SecondOpinionServer::new(services);

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}

async fn run_cli(services: Arc<Services>, cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Escalate => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            let params: second_opinion::params::EscalateParams = serde_json::from_str(&raw)?;
            let req = params.normalize().map_err(|e| anyhow::anyhow!(e))?;
            let output = second_opinion::analysis::escalate_analysis(&services, req)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Health { check } => {
            let results = second_opinion::health::health_check(&services, check.as_deref())
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        Commands::Models => {
            let info = services.orchestrator.registry().info();
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}
