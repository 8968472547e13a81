use std::net::SocketAddr;
use std::sync::Once;

use crate::scheduler::BookingError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking attempts. Labels: outcome.
pub const BOOKING_REQUESTS_TOTAL: &str = "fieldbook_booking_requests_total";

/// Histogram: request_booking latency in seconds, lock wait included.
pub const BOOKING_DURATION_SECONDS: &str = "fieldbook_booking_duration_seconds";

/// Counter: reservation status transitions. Labels: to.
pub const STATUS_TRANSITIONS_TOTAL: &str = "fieldbook_status_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: store calls or lock waits that hit the configured timeout.
pub const STORE_TIMEOUTS_TOTAL: &str = "fieldbook_store_timeouts_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fieldbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "fieldbook_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "fieldbook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        tracing::error!("failed to install Prometheus metrics exporter: {e}");
        return;
    }
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Install the fmt subscriber once. Later calls are ignored.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().try_init();
    });
}

/// Map a booking outcome to a short label for metrics.
pub fn outcome_label<T>(result: &Result<T, BookingError>) -> &'static str {
    match result {
        Ok(_) => "created",
        Err(BookingError::ResourceNotFound(_)) => "resource_not_found",
        Err(BookingError::ResourceUnavailable { .. }) => "resource_unavailable",
        Err(BookingError::InvalidInterval { .. }) => "invalid_interval",
        Err(BookingError::InvalidParticipantCount(_)) => "invalid_participant_count",
        Err(BookingError::SlotAlreadyBooked { .. }) => "slot_already_booked",
        Err(BookingError::StoreUnavailable(_)) => "store_unavailable",
        Err(BookingError::LimitExceeded(_)) => "limit_exceeded",
        Err(BookingError::ReservationNotFound(_))
        | Err(BookingError::InvalidTransition { .. })
        | Err(BookingError::AlreadyPaid(_)) => "other",
    }
}
