//! Warren binary.
//!
//! Serves the Ping service over an AMQP broker, or calls one.

use std::time::Duration;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use warren_core::{
    cli::commands::Commands,
    cli::handlers::{handle_ping, handle_serve},
    config::RuntimeConfig,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging = cli.command.logging();
    let default_filter = format!("warren_core={},warren={}", logging.effective_level(), logging.effective_level());
    let filter = match &logging.log_filter {
        Some(filter) => filter.clone(),
        None => std::env::var("RUST_LOG").unwrap_or(default_filter),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .parse_lossy(filter),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("warren starting up");

    match cli.command {
        Commands::Serve(cmd) => {
            let config = RuntimeConfig::load(&cmd.runtime)?;
            handle_serve(config).await?
        }
        Commands::Ping(cmd) => {
            let config = RuntimeConfig::load(&cmd.runtime)?;
            handle_ping(config, cmd.target, Duration::from_millis(cmd.timeout_ms)).await?
        }
    }

    Ok(())
}
