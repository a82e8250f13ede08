use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: slot queries answered. Labels: status.
pub const SLOT_QUERIES_TOTAL: &str = "roomslot_slot_queries_total";

/// Histogram: number of slots returned per query.
pub const SLOTS_RETURNED: &str = "roomslot_slots_returned";

/// Counter: booking attempts. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "roomslot_bookings_total";

/// Histogram: booking commit latency in seconds, notification included.
pub const COMMIT_DURATION_SECONDS: &str = "roomslot_commit_duration_seconds";

/// Counter: bookings canceled by operators.
pub const CANCELLATIONS_TOTAL: &str = "roomslot_cancellations_total";

/// Counter: confirmation deliveries. Labels: status.
pub const NOTIFICATIONS_TOTAL: &str = "roomslot_notifications_total";

// ── Storage metrics ─────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomslot_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "roomslot_wal_compactions_total";

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
