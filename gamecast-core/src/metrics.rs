//! Relay counters
//!
//! [`MetricsCounter`] is the source of truth behind the stats endpoint. It has
//! its own read/write lock and is never touched while a directory or session
//! lock is held, so stats reads never wait on session traffic.
//!
//! Every update is mirrored into a Prometheus registry exposed at `/metrics`.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Registry, TextEncoder,
};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

pub static GAMES_CREATED_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
    register_int_counter_with_registry!(
        "gamecast_games_created_total",
        "Total number of sessions created",
        REGISTRY.clone()
    ).expect("Failed to register GAMES_CREATED_TOTAL")
});

pub static ACTIVE_GAMES: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
    register_int_gauge_with_registry!(
        "gamecast_active_games",
        "Current number of live sessions",
        REGISTRY.clone()
    ).expect("Failed to register ACTIVE_GAMES")
});

pub static VIEWERS: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
    register_int_gauge_with_registry!(
        "gamecast_viewers",
        "Current number of connected viewers",
        REGISTRY.clone()
    ).expect("Failed to register VIEWERS")
});

pub static HOST_CONNECTIONS_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
    register_int_counter_with_registry!(
        "gamecast_host_connections_total",
        "Total number of accepted host connections",
        REGISTRY.clone()
    ).expect("Failed to register HOST_CONNECTIONS_TOTAL")
});

pub static FANOUT_DELIVERED_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
    register_int_counter_with_registry!(
        "gamecast_fanout_delivered_total",
        "Frames queued to viewers by fanout",
        REGISTRY.clone()
    ).expect("Failed to register FANOUT_DELIVERED_TOTAL")
});

pub static FANOUT_PRUNED_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
    register_int_counter_with_registry!(
        "gamecast_fanout_pruned_total",
        "Viewers dropped after a failed fanout write",
        REGISTRY.clone()
    ).expect("Failed to register FANOUT_PRUNED_TOTAL")
});

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    // Touch the statics so every family shows up even before first use
    let _ = (
        &*GAMES_CREATED_TOTAL,
        &*ACTIVE_GAMES,
        &*VIEWERS,
        &*HOST_CONNECTIONS_TOTAL,
        &*FANOUT_DELIVERED_TOTAL,
        &*FANOUT_PRUNED_TOTAL,
    );

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}

#[derive(Debug, Default)]
struct Counters {
    total_games_created: u64,
    active_games: i64,
    total_viewers: i64,
    total_host_connections: u64,
}

/// Aggregated relay counters
#[derive(Debug)]
pub struct MetricsCounter {
    counters: RwLock<Counters>,
    started: Instant,
    start_time: DateTime<Utc>,
}

/// Point-in-time copy of the counters, shaped for the stats response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_games_created: u64,
    pub active_games: i64,
    pub total_viewers: i64,
    pub total_host_connections: u64,
    pub uptime: String,
    pub start_time: String,
}

impl MetricsCounter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(Counters::default()),
            started: Instant::now(),
            start_time: Utc::now(),
        }
    }

    pub fn session_created(&self) {
        {
            let mut c = self.counters.write();
            c.total_games_created += 1;
            c.active_games += 1;
        }
        GAMES_CREATED_TOTAL.inc();
        ACTIVE_GAMES.inc();
    }

    pub fn sessions_removed(&self, count: usize) {
        if count == 0 {
            return;
        }
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        self.counters.write().active_games -= count;
        ACTIVE_GAMES.sub(count);
    }

    pub fn viewer_joined(&self) {
        self.counters.write().total_viewers += 1;
        VIEWERS.inc();
    }

    pub fn viewer_left(&self) {
        self.counters.write().total_viewers -= 1;
        VIEWERS.dec();
    }

    pub fn host_connected(&self) {
        self.counters.write().total_host_connections += 1;
        HOST_CONNECTIONS_TOTAL.inc();
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = Duration::from_secs(self.uptime().as_secs());
        let c = self.counters.read();
        MetricsSnapshot {
            total_games_created: c.total_games_created,
            active_games: c.active_games,
            total_viewers: c.total_viewers,
            total_host_connections: c.total_host_connections,
            uptime: humantime::format_duration(uptime).to_string(),
            start_time: self.start_time.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

impl Default for MetricsCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewer_count_tracks_signed_deltas() {
        let metrics = MetricsCounter::new();

        metrics.viewer_joined();
        metrics.viewer_joined();
        metrics.viewer_joined();
        metrics.viewer_left();

        assert_eq!(metrics.snapshot().total_viewers, 2);
    }

    #[test]
    fn test_host_connections_are_cumulative() {
        let metrics = MetricsCounter::new();

        metrics.host_connected();
        metrics.host_connected();

        assert_eq!(metrics.snapshot().total_host_connections, 2);
    }

    #[test]
    fn test_created_and_removed() {
        let metrics = MetricsCounter::new();

        metrics.session_created();
        metrics.session_created();
        metrics.sessions_removed(1);
        metrics.sessions_removed(0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_games_created, 2);
        assert_eq!(snapshot.active_games, 1);
    }

    #[test]
    fn test_snapshot_serializes_with_stats_field_names() {
        let metrics = MetricsCounter::new();
        let value = serde_json::to_value(metrics.snapshot()).unwrap();

        for key in [
            "totalGamesCreated",
            "activeGames",
            "totalViewers",
            "totalHostConnections",
            "uptime",
            "startTime",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        let start = value["startTime"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(start).is_ok());
    }

    #[test]
    fn test_gather_metrics_includes_relay_families() {
        MetricsCounter::new().session_created();
        let output = gather_metrics().unwrap();
        assert!(output.contains("gamecast_games_created_total"));
        assert!(output.contains("gamecast_fanout_pruned_total"));
    }
}
