//! Rodent node agent
//!
//! Serves the ZFS dataset API of this host over REST.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rodent::{ApiServer, ApiServerConfig, CommandExecutor, DatasetManager, ExecutorConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Rodent - ZFS node agent
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8042")]
    api_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run zfs through `sudo -n`
    #[arg(long, env = "USE_SUDO")]
    use_sudo: bool,

    /// Path of the zfs binary
    #[arg(long, env = "ZFS_PATH", default_value = "zfs")]
    zfs_path: PathBuf,

    /// Path of the ssh client used for remote receives
    #[arg(long, env = "SSH_PATH", default_value = "ssh")]
    ssh_path: PathBuf,

    /// Default per-command timeout in seconds, 0 for none
    #[arg(long, env = "COMMAND_TIMEOUT_SECS", default_value = "300")]
    command_timeout_secs: u64,

    /// Request timeout in seconds (transfers are exempt)
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "300")]
    request_timeout_secs: u64,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting Rodent node agent");
    info!("  Version: {}", rodent::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  zfs: {} (sudo: {})", args.zfs_path.display(), args.use_sudo);

    let executor_config = ExecutorConfig {
        use_sudo: args.use_sudo,
        zfs_path: args.zfs_path.clone(),
        ssh_path: args.ssh_path.clone(),
        default_timeout: match args.command_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
        ..Default::default()
    };
    let executor = Arc::new(CommandExecutor::new(executor_config));
    let manager = Arc::new(DatasetManager::new(executor));

    let rest_addr: SocketAddr = args
        .api_addr
        .parse()
        .with_context(|| format!("invalid REST API address {}", args.api_addr))?;
    let api_config = ApiServerConfig {
        rest_addr,
        request_timeout: Duration::from_secs(args.request_timeout_secs),
    };
    let server = Arc::new(ApiServer::new(api_config, manager));

    tokio::spawn({
        let server = server.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received interrupt, shutting down"),
                Err(e) => error!("Failed to listen for interrupt: {}", e),
            }
            server.shutdown();
        }
    });

    server.run().await?;

    info!("Agent shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("tower=warn".parse()?)
        .add_directive("axum=info".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
