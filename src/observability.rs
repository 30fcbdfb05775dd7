use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "slotbook_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "slotbook_command_duration_seconds";

// ── Booking domain ──────────────────────────────────────────────

/// Counter: booking documents written.
pub const BOOKINGS_COMMITTED_TOTAL: &str = "slotbook_bookings_committed_total";

/// Counter: successful commit batches.
pub const BATCHES_COMMITTED_TOTAL: &str = "slotbook_batches_committed_total";

/// Counter: commits rejected by a conflict. Labels: kind.
pub const CONFLICTS_TOTAL: &str = "slotbook_conflicts_total";

/// Counter: booking attempts denied by the rate limiter.
pub const RATE_LIMIT_DENIALS_TOTAL: &str = "slotbook_rate_limit_denials_total";

/// Counter: successful cancellations.
pub const CANCELLATIONS_TOTAL: &str = "slotbook_cancellations_total";

/// Histogram: suggestions returned per recommender call.
pub const SUGGESTIONS_RETURNED: &str = "slotbook_suggestions_returned";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Gauge: devices with a loaded rate limiter.
pub const DEVICES_ACTIVE: &str = "slotbook_devices_active";

/// Counter: hello failures (bad password, malformed hello, device rejected).
pub const HANDSHAKE_FAILURES_TOTAL: &str = "slotbook_handshake_failures_total";

/// Histogram: journal append plus fsync duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Install the fmt subscriber. `filter` uses `EnvFilter` syntax; `info` when unparsable.
pub fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}
