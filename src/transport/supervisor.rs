//! Channel supervision.
//!
//! Every channel loop runs under a supervisor task. When the loop dies on a
//! transport fault the supervisor consults the [`RestartPolicy`]: `Never`
//! lets the channel stay dead, `Backoff` reopens it after an exponentially
//! growing delay. A shutdown signal always wins over a pending restart.
//!
//! The backoff starts over once a channel has moved traffic, so only
//! consecutive failures grow the delay and count toward `max_restarts`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::traits::{Broker, ChannelSpec};
use super::{channel_loop, Conveyors};

/// What to do when a channel loop dies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Log and leave the channel down.
    #[default]
    Never,
    /// Reopen the channel, doubling the delay after each failure.
    Backoff {
        initial_ms: u64,
        max_ms: u64,
        /// Give up after this many consecutive restarts without traffic
        /// (unbounded when absent)
        #[serde(default)]
        max_restarts: Option<u32>,
    },
}

impl RestartPolicy {
    /// Delay before restart number `attempt` (0-based), or `None` to give up.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            RestartPolicy::Never => None,
            RestartPolicy::Backoff {
                initial_ms,
                max_ms,
                max_restarts,
            } => {
                if max_restarts.is_some_and(|max| attempt >= max) {
                    return None;
                }
                let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
                let ms = initial_ms.saturating_mul(factor).min(*max_ms);
                Some(Duration::from_millis(ms))
            }
        }
    }
}

/// Live view of a binding's channels.
#[derive(Debug, Default)]
pub struct BindingStats {
    live: AtomicUsize,
    restarts: AtomicU64,
}

impl BindingStats {
    /// Channel loops currently running or waiting to restart.
    pub fn live_channels(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Channel restarts performed so far.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Acquire)
    }

    pub(super) fn channel_started(&self) {
        self.live.fetch_add(1, Ordering::AcqRel);
    }

    fn channel_stopped(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Run one channel until shutdown or until the policy gives up.
///
/// `channel` is the already-opened channel for the first run; restarts
/// open a fresh one through `broker`.
#[allow(clippy::too_many_arguments)]
pub(super) async fn supervise<B: Broker>(
    index: usize,
    broker: Arc<B>,
    spec: ChannelSpec,
    channel: (B::Publisher, B::Consumer),
    conveyors: Conveyors,
    policy: RestartPolicy,
    shutdown: CancellationToken,
    stats: Arc<BindingStats>,
) {
    let mut current = Some(channel);
    let mut attempt = 0u32;

    loop {
        if let Some((mut publisher, mut consumer)) = current.take() {
            let mut moved = 0u64;
            let outcome =
                channel_loop(index, &spec, &mut publisher, &mut consumer, &conveyors, &shutdown, &mut moved).await;
            if moved > 0 {
                attempt = 0;
            }
            match outcome {
                Ok(()) => break,
                Err(e) => error!(channel = index, queue = %spec.queue, moved, "channel loop failed: {}", e),
            }
        }

        let Some(delay) = policy.delay(attempt) else {
            warn!(channel = index, queue = %spec.queue, "channel stopped, not restarting");
            break;
        };
        attempt += 1;

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        match broker.open_channel(&spec).await {
            Ok(channel) => {
                stats.restarts.fetch_add(1, Ordering::AcqRel);
                info!(channel = index, queue = %spec.queue, attempt, "channel reopened");
                current = Some(channel);
            }
            Err(e) => {
                error!(channel = index, queue = %spec.queue, attempt, "channel reopen failed: {}", e);
            }
        }
    }

    stats.channel_stopped();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_gives_up_immediately() {
        assert_eq!(RestartPolicy::Never.delay(0), None);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RestartPolicy::Backoff {
            initial_ms: 100,
            max_ms: 1000,
            max_restarts: None,
        };
        assert_eq!(policy.delay(0), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay(1), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay(3), Some(Duration::from_millis(800)));
        assert_eq!(policy.delay(4), Some(Duration::from_millis(1000)));
        assert_eq!(policy.delay(60), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_backoff_max_restarts() {
        let policy = RestartPolicy::Backoff {
            initial_ms: 10,
            max_ms: 10,
            max_restarts: Some(2),
        };
        assert!(policy.delay(1).is_some());
        assert_eq!(policy.delay(2), None);
    }
}
