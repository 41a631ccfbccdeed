use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lamb_fleet::config::{CoordinatorConfig, NodeConfig, RetentionConfig};
use lamb_fleet::coordinator::Coordinator;
use lamb_fleet::error::FleetError;
use lamb_fleet::node::NodeAgent;
use lamb_fleet::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "lamb-fleet")]
#[command(version)]
#[command(about = "Coordinate a fleet of engine data-generation nodes")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the coordinator (parameters, engine distribution, run history)
    Server(ServerArgs),

    /// Run a node that executes engine batches
    Node(NodeArgs),
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to listen on
    #[arg(long, env = "LAMB_LISTEN", default_value = "0.0.0.0:5001")]
    listen: SocketAddr,

    /// Directory for the run history database, uploads and the engine binary
    #[arg(long, env = "LAMB_DATA_DIR", default_value = "server_data")]
    data_dir: PathBuf,

    /// Engine binary to register at startup
    #[arg(long, env = "LAMB_ENGINE_BINARY")]
    engine: Option<PathBuf>,

    /// Rows in the latest-runs view
    #[arg(long, env = "LAMB_PAGE_SIZE", default_value = "20")]
    page_size: usize,
}

// =============================================================================
// Node Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct NodeArgs {
    /// Display name shown on the dashboard
    #[arg(long, env = "LAMB_NODE_NAME")]
    name: String,

    /// Number of concurrent batch loops
    #[arg(long, short = 'c', env = "LAMB_CONCURRENCY", default_value = "4")]
    concurrency: usize,

    /// Coordinator base URL
    #[arg(long, env = "LAMB_SERVER_URL", default_value = "http://127.0.0.1:5001")]
    server: String,

    /// Path of the engine binary
    #[arg(long, env = "LAMB_ENGINE_PATH", default_value = "./lamb")]
    engine_path: PathBuf,

    /// Directory engine artifacts are written to
    #[arg(long, env = "LAMB_OUTPUT_DIR", default_value = "data")]
    output_dir: PathBuf,

    /// Directory holding the node identity and engine state files
    #[arg(long, env = "LAMB_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Engine update policy: never, always or once_a_day
    #[arg(long, env = "LAMB_UPDATE_FREQUENCY")]
    update_frequency: Option<String>,

    /// Seconds between parameter polls
    #[arg(long, env = "LAMB_POLL_INTERVAL", default_value = "10")]
    poll_interval: u64,

    /// Start sweeping the output directory above this many GiB
    #[arg(long, env = "LAMB_RETENTION_HIGH_GB", default_value = "20")]
    retention_high_gb: u64,

    /// Sweep down to this many GiB
    #[arg(long, env = "LAMB_RETENTION_LOW_GB", default_value = "15")]
    retention_low_gb: u64,

    /// Discard the persisted identity and engine state, then register anew
    #[arg(long, env = "LAMB_FRESH")]
    fresh: bool,
}

const GIB: u64 = 1024 * 1024 * 1024;

impl NodeArgs {
    fn into_config(self) -> NodeConfig {
        let mut config = NodeConfig::new(self.name, self.server)
            .with_concurrency(self.concurrency)
            .with_engine_path(self.engine_path)
            .with_output_dir(self.output_dir);
        if let Some(dir) = self.state_dir {
            config = config.with_state_dir(dir);
        }
        config.update_frequency = self.update_frequency;
        config.poll_interval = Duration::from_secs(self.poll_interval.max(1));
        config.retention = RetentionConfig {
            high_water_bytes: self.retention_high_gb.saturating_mul(GIB),
            low_water_bytes: self
                .retention_low_gb
                .min(self.retention_high_gb)
                .saturating_mul(GIB),
            ..RetentionConfig::default()
        };
        config.fresh = self.fresh;
        config
    }
}

// =============================================================================
// Commands
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = CoordinatorConfig::new(args.listen, args.data_dir);
    config.page_size = args.page_size.max(1);
    if let Some(engine) = args.engine {
        config = config.with_engine_binary(engine);
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir.display(),
        engine_binary = ?config.engine_binary,
        "Starting lamb-fleet coordinator"
    );

    let shutdown = install_shutdown_handler();
    let coordinator = Coordinator::new(config)?;
    coordinator.run(shutdown).await?;
    Ok(())
}

async fn run_node(args: NodeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.into_config();

    tracing::info!(
        name = %config.name,
        server = %config.server_url,
        concurrency = config.concurrency,
        engine_path = %config.engine_path.display(),
        output_dir = %config.output_dir.display(),
        fresh = config.fresh,
        "Starting lamb-fleet node"
    );

    let shutdown = install_shutdown_handler();
    let agent = NodeAgent::new(config)?;
    match agent.run(shutdown).await {
        Ok(()) => Ok(()),
        Err(e @ FleetError::EngineUnavailable { .. }) => {
            tracing::error!(error = %e, "No usable engine binary");
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Node(node_args) => run_node(node_args).await?,
    }

    Ok(())
}
