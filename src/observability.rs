use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "prioritize_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "prioritize_query_duration_seconds";

/// Counter: reservations admitted.
pub const RESERVATIONS_ACCEPTED_TOTAL: &str = "prioritize_reservations_accepted_total";

/// Counter: reservations refused. Labels: reason.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "prioritize_reservations_rejected_total";

/// Counter: reservations removed by the retention sweep.
pub const RESERVATIONS_PURGED_TOTAL: &str = "prioritize_reservations_purged_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "prioritize_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "prioritize_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "prioritize_connections_rejected_total";

/// Counter: authentication failures. Labels: kind.
pub const AUTH_FAILURES_TOTAL: &str = "prioritize_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "prioritize_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "prioritize_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertReservation { .. } => "insert_reservation",
        Command::InsertAbsence { .. } => "insert_absence",
        Command::Amend { .. } => "amend",
        Command::Cancel { .. } => "cancel",
        Command::SelectDepartment { .. } => "select_department",
        Command::SelectResourceReservations { .. } => "select_resource_reservations",
        Command::SelectGroup { .. } => "select_group",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectOccupancy { .. } => "select_occupancy",
    }
}
