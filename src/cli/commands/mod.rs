pub mod ping;
pub mod serve;

pub use ping::PingCommand;
pub use serve::ServeCommand;

use clap::{Args, Subcommand};

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the Ping service on the configured queue
    Serve(ServeCommand),
    /// Call a Ping service once and print the round trip
    Ping(PingCommand),
}

impl Commands {
    pub fn logging(&self) -> &LoggingArgs {
        match self {
            Commands::Serve(cmd) => &cmd.logging,
            Commands::Ping(cmd) => &cmd.logging,
        }
    }
}

/// Log level and filter flags.
#[derive(Debug, Clone, Default, Args)]
pub struct LoggingArgs {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log filter directives (overrides RUST_LOG)
    #[arg(long = "log-filter", value_name = "FILTER")]
    pub log_filter: Option<String>,
}

impl LoggingArgs {
    pub fn effective_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
