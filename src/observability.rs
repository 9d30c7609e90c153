use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── Booking flow ────────────────────────────────────────────────

/// Counter: booking attempts. Labels: operation (create, update), outcome
/// (ok or a rejection code).
pub const BOOKINGS_TOTAL: &str = "coworkd_bookings_total";

/// Histogram: booking latency in seconds, validation through commit. Labels: operation.
pub const BOOKING_DURATION_SECONDS: &str = "coworkd_booking_duration_seconds";

/// Counter: limit override requests sent to administrators.
pub const OVERRIDE_REQUESTS_TOTAL: &str = "coworkd_override_requests_total";

// ── Settlement ──────────────────────────────────────────────────

/// Counter: reservations moved ACTIVE -> COMPLETED. Labels: trigger (schedule, manual, selected).
pub const RESERVATIONS_COMPLETED_TOTAL: &str = "coworkd_reservations_completed_total";

/// Counter: scheduled completion runs that failed.
pub const SWEEP_FAILURES_TOTAL: &str = "coworkd_sweep_failures_total";

/// Counter: liquidations created.
pub const LIQUIDATIONS_CREATED_TOTAL: &str = "coworkd_liquidations_created_total";

/// Counter: liquidation items created.
pub const LIQUIDATION_ITEMS_CREATED_TOTAL: &str = "coworkd_liquidation_items_created_total";

// ── Settings cache ──────────────────────────────────────────────

pub const SETTINGS_CACHE_HITS_TOTAL: &str = "coworkd_settings_cache_hits_total";
pub const SETTINGS_CACHE_MISSES_TOTAL: &str = "coworkd_settings_cache_misses_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "coworkd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (transactions per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "coworkd_wal_flush_batch_size";

/// Install the fmt subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
