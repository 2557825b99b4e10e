use clap::Args;

use super::LoggingArgs;
use crate::config::RuntimeArgs;

#[derive(Args)]
pub struct ServeCommand {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,
}
