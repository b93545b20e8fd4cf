use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests. Labels: route, method, status.
pub const REQUESTS_TOTAL: &str = "aula_requests_total";

/// Histogram: request latency in seconds. Labels: route, method.
pub const REQUEST_DURATION_SECONDS: &str = "aula_request_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: booking writes refused because an approved booking holds the slot.
/// Labels: action.
pub const BOOKING_CONFLICTS_TOTAL: &str = "aula_booking_conflicts_total";

/// Counter: lifecycle transitions applied. Labels: from, to.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "aula_booking_transitions_total";

/// Counter: requests refused by the authorization policy. Labels: action.
pub const AUTHZ_DENIED_TOTAL: &str = "aula_authz_denied_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: requests currently being served.
pub const REQUESTS_IN_FLIGHT: &str = "aula_requests_in_flight";

/// Counter: requests rejected because the concurrency limit was reached.
pub const REQUESTS_REJECTED_TOTAL: &str = "aula_requests_rejected_total";

/// Counter: requests without valid credentials.
pub const AUTH_FAILURES_TOTAL: &str = "aula_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "aula_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "aula_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "aula_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
