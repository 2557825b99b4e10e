//! Configuration management for the warren runtime.
//!
//! Configuration is assembled from, in increasing precedence:
//! 1. Default configuration (embedded in the binary)
//! 2. A user-specified configuration file
//! 3. Environment variables (prefixed with `WARREN_`, nested keys split on `__`)
//! 4. Command-line arguments
//!
//! # Environment Variables
//!
//! - `WARREN_BINDING__URL` - AMQP broker URL
//! - `WARREN_BINDING__QUEUE` - Queue this runtime consumes from
//! - `WARREN_BINDING__WAIT_FOR_ACK` - Explicit acknowledgement (`true`/`false`)
//! - `WARREN_BINDING__CHANNELS` - Number of channels on the connection
//! - `WARREN_BINDING__PRIVATE_QUEUE` - Exclusive, auto-delete queue (`true`/`false`)
//! - `WARREN_WORKERS` - Dispatch workers (0 = available parallelism)

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::transport::supervisor::RestartPolicy;
use crate::transport::BindingConfig;

/// Broker and runtime overrides shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct RuntimeArgs {
    /// Configuration file path
    #[arg(short, long, env = "WARREN_CONFIG")]
    pub config: Option<PathBuf>,

    /// AMQP broker URL
    #[arg(long)]
    pub url: Option<String>,

    /// Queue this runtime consumes from
    #[arg(long)]
    pub queue: Option<String>,

    /// Acknowledge deliveries only after they are queued for dispatch
    #[arg(long)]
    pub wait_for_ack: Option<bool>,

    /// Number of channels opened on the broker connection
    #[arg(long)]
    pub channels: Option<usize>,

    /// Number of dispatch workers (0 = available parallelism)
    #[arg(long)]
    pub workers: Option<usize>,
}

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Transport binding
    pub binding: BindingConfig,
    /// Dispatch workers (0 = available parallelism)
    #[serde(default)]
    pub workers: usize,
    /// Capacity of the inbound and outbound conveyors (0 = available parallelism)
    #[serde(default)]
    pub queue_capacity: usize,
    /// Sender id stamped on outgoing envelopes (empty = derived)
    #[serde(default)]
    pub sender_id: String,
    /// Answer dispatch faults with an explicit error reply
    #[serde(default)]
    pub error_replies: bool,
    /// Channel restart policy
    #[serde(default)]
    pub supervisor: RestartPolicy,
    /// Correlation router settings
    #[serde(default)]
    pub router: RouterSettings,
}

/// Correlation router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// How long a cancelled correlation id stays out of circulation
    #[serde(default = "default_id_cooldown_ms")]
    pub id_cooldown_ms: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            id_cooldown_ms: default_id_cooldown_ms(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binding: BindingConfig::default(),
            workers: 0,
            queue_capacity: 0,
            sender_id: String::new(),
            error_replies: false,
            supervisor: RestartPolicy::default(),
            router: RouterSettings::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from all sources
    pub fn load(args: &RuntimeArgs) -> Result<Self> {
        let mut builder = ::config::Config::builder().add_source(::config::File::from_str(
            include_str!("../config/default.toml"),
            ::config::FileFormat::Toml,
        ));

        if let Some(path) = &args.config {
            builder = builder.add_source(::config::File::from(path.as_path()));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("WARREN")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: RuntimeConfig = builder.build()?.try_deserialize()?;

        if let Some(url) = &args.url {
            config.binding.url = url.clone();
        }
        if let Some(queue) = &args.queue {
            config.binding.queue = queue.clone();
        }
        if let Some(wait) = args.wait_for_ack {
            config.binding.wait_for_ack = wait;
        }
        if let Some(channels) = args.channels {
            config.binding.channels = channels;
        }
        if let Some(workers) = args.workers {
            config.workers = workers;
        }

        Ok(config)
    }

    /// Dispatch workers to start.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }

    /// Conveyor capacity.
    pub fn conveyor_capacity(&self) -> usize {
        if self.queue_capacity == 0 {
            num_cpus::get()
        } else {
            self.queue_capacity
        }
    }

    /// Sender id stamped on outgoing envelopes.
    pub fn sender(&self) -> String {
        if self.sender_id.is_empty() {
            format!("{}-{}", self.binding.queue, std::process::id())
        } else {
            self.sender_id.clone()
        }
    }

    pub fn id_cooldown(&self) -> Duration {
        Duration::from_millis(self.router.id_cooldown_ms)
    }
}

fn default_id_cooldown_ms() -> u64 {
    30_000
}
