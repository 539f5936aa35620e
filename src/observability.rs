use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "seatlock_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "seatlock_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: reservations committed.
pub const BOOKINGS_TOTAL: &str = "seatlock_bookings_total";

/// Counter: bookings refused because a requested seat was held.
pub const BOOKING_CONFLICTS_TOTAL: &str = "seatlock_booking_conflicts_total";

/// Counter: reservations cancelled.
pub const CANCELLATIONS_TOTAL: &str = "seatlock_cancellations_total";

/// Counter: reservations completed after their showing.
pub const COMPLETIONS_TOTAL: &str = "seatlock_completions_total";

/// Counter: ledger changes undone after a failed durable write. Labels: op.
pub const COMPENSATIONS_TOTAL: &str = "seatlock_compensations_total";

/// Counter: reconciliations that found the ledger out of step with the store.
pub const LEDGER_DRIFT_TOTAL: &str = "seatlock_ledger_drift_total";

/// Gauge: screenings with a ledger entry.
pub const LEDGER_SCREENINGS: &str = "seatlock_ledger_screenings";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "seatlock_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "seatlock_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "seatlock_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "seatlock_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "seatlock_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "seatlock_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertScreening { .. } => "insert_screening",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectAvailableSeats { .. } => "select_available_seats",
        Command::SelectBookedSeats { .. } => "select_booked_seats",
        Command::SelectQuote { .. } => "select_quote",
        Command::SelectReservations => "select_reservations",
        Command::SelectScreenings => "select_screenings",
    }
}
