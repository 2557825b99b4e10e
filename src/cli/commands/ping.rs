use clap::Args;

use super::LoggingArgs;
use crate::config::RuntimeArgs;

#[derive(Args)]
pub struct PingCommand {
    /// Queue the Ping service consumes from (defaults to the configured queue)
    #[arg(long, value_name = "QUEUE")]
    pub target: Option<String>,

    /// Call deadline in milliseconds
    #[arg(long = "timeout-ms", value_name = "MS", default_value_t = 1000)]
    pub timeout_ms: u64,

    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,
}
