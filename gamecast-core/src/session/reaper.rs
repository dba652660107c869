//! Background eviction of stale sessions

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::directory::SessionDirectory;
use crate::config::RelayConfig;

/// When a session counts as stale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub max_idle: Duration,
    pub max_age: Duration,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for EvictionPolicy {
    fn from(config: &RelayConfig) -> Self {
        Self {
            max_idle: config.max_idle(),
            max_age: config.max_age(),
        }
    }
}

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: usize,
    pub remaining: usize,
}

/// Periodic sweep over the session directory
#[derive(Debug)]
pub struct Reaper {
    directory: Arc<SessionDirectory>,
    policy: EvictionPolicy,
    interval: Duration,
}

impl Reaper {
    #[must_use]
    pub const fn new(directory: Arc<SessionDirectory>, policy: EvictionPolicy, interval: Duration) -> Self {
        Self {
            directory,
            policy,
            interval,
        }
    }

    #[must_use]
    pub fn from_config(directory: Arc<SessionDirectory>, config: &RelayConfig) -> Self {
        Self::new(directory, EvictionPolicy::from(config), config.sweep_interval())
    }

    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now())
    }

    /// Evict every session that is stale as of `now`.
    ///
    /// Staleness is checked again under the map's conditional remove, so a
    /// session that saw activity after the scan is kept.
    pub fn sweep_at(&self, now: Instant) -> SweepReport {
        let EvictionPolicy { max_idle, max_age } = self.policy;
        let mut evicted = 0;

        for record in self.directory.snapshot() {
            if !record.is_stale(now, max_idle, max_age) {
                continue;
            }
            let Some(record) = self
                .directory
                .evict_if(record.id().as_str(), |r| r.is_stale(now, max_idle, max_age))
            else {
                continue;
            };

            debug!(
                session_id = %record.id(),
                idle = ?record.idle(now),
                age = ?record.age(now),
                "Evicting stale session"
            );
            record.retire();
            evicted += 1;
        }

        self.directory.metrics().sessions_removed(evicted);

        let report = SweepReport {
            evicted,
            remaining: self.directory.len(),
        };
        if report.evicted > 0 {
            info!(
                evicted = report.evicted,
                remaining = report.remaining,
                "Stale session sweep completed"
            );
        }
        report
    }

    /// Run sweeps on the configured interval until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval = ?self.interval,
                max_idle = ?self.policy.max_idle,
                max_age = ?self.policy.max_age,
                "Session reaper started"
            );

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        info!("Session reaper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                }
            }
        })
    }
}
