use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use serde::Serialize;

/// Per-instance relay counters, readable without a metrics recorder.
#[derive(Debug, Default)]
pub struct RelayStats {
    relayed: AtomicU64,
    dropped: AtomicU64,
    data_deliveries: AtomicU64,
    bridge_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    pub relayed: u64,
    pub dropped: u64,
    pub data_deliveries: u64,
    pub bridge_failures: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            relayed: self.relayed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            data_deliveries: self.data_deliveries.load(Ordering::Relaxed),
            bridge_failures: self.bridge_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_relayed(&self, instance: &str, kind: &'static str) {
        self.relayed.fetch_add(1, Ordering::Relaxed);
        counter!(
            "stream_road_signals_relayed_total",
            1,
            "instance" => instance.to_string(),
            "kind" => kind
        );
    }

    pub(crate) fn record_dropped(&self, instance: &str, kind: &'static str, reason: &'static str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        counter!(
            "stream_road_signals_dropped_total",
            1,
            "instance" => instance.to_string(),
            "kind" => kind,
            "reason" => reason
        );
    }

    pub(crate) fn record_data_deliveries(&self, instance: &str, delivered: usize) {
        if delivered == 0 {
            return;
        }
        self.data_deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        counter!(
            "stream_road_data_deliveries_total",
            delivered as u64,
            "instance" => instance.to_string()
        );
    }

    pub(crate) fn record_bridge_failure(&self, instance: &str, operation: &'static str) {
        self.bridge_failures.fetch_add(1, Ordering::Relaxed);
        counter!(
            "stream_road_bridge_failures_total",
            1,
            "instance" => instance.to_string(),
            "operation" => operation
        );
    }
}

pub(crate) fn record_connection_opened(instance: &str, active: usize) {
    counter!(
        "stream_road_connections_total",
        1,
        "instance" => instance.to_string()
    );
    gauge!(
        "stream_road_connections_active",
        active as f64,
        "instance" => instance.to_string()
    );
}

pub(crate) fn record_connection_closed(instance: &str, active: usize) {
    gauge!(
        "stream_road_connections_active",
        active as f64,
        "instance" => instance.to_string()
    );
}

pub(crate) fn record_sessions_active(instance: &str, sessions: usize) {
    gauge!(
        "stream_road_sessions_active",
        sessions as f64,
        "instance" => instance.to_string()
    );
}

pub(crate) fn record_gps_sample() {
    counter!("stream_road_gps_samples_total", 1);
}
