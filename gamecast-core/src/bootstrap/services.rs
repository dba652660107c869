//! Service initialization and dependency injection

use std::sync::Arc;
use tracing::info;

use crate::metrics::MetricsCounter;
use crate::service::{InviteNotifier, LogInviteNotifier};
use crate::session::{ConnectionGateway, Reaper, SessionDirectory};
use crate::Config;

/// Container for all initialized services
#[derive(Clone)]
pub struct Services {
    /// Relay counters shared by every component
    pub metrics: Arc<MetricsCounter>,
    /// Live sessions
    pub directory: Arc<SessionDirectory>,
    /// Host and viewer connection handling
    pub gateway: ConnectionGateway,
    /// Share-link invitations
    pub invites: Arc<dyn InviteNotifier>,
}

impl Services {
    /// Reaper over this instance's directory, configured from `config`.
    #[must_use]
    pub fn reaper(&self, config: &Config) -> Reaper {
        Reaper::from_config(Arc::clone(&self.directory), &config.relay)
    }
}

/// Initialize all core services
#[must_use]
pub fn init_services(config: &Config) -> Services {
    let metrics = Arc::new(MetricsCounter::new());
    let directory = Arc::new(SessionDirectory::new(Arc::clone(&metrics)));
    let gateway = ConnectionGateway::new(Arc::clone(&directory), config.relay.outbound_queue_capacity);

    info!(
        queue_capacity = config.relay.outbound_queue_capacity,
        "Relay services initialized"
    );

    Services {
        metrics,
        directory,
        gateway,
        invites: Arc::new(LogInviteNotifier),
    }
}
