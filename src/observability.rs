use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotmarket_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotmarket_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: bookings that reserved their slot.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotmarket_bookings_created_total";

/// Counter: booking attempts refused because the slot was already taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotmarket_booking_conflicts_total";

/// Counter: booking status transitions. Labels: status.
pub const BOOKING_STATUS_CHANGES_TOTAL: &str = "slotmarket_booking_status_changes_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "slotmarket_connections_active";
pub const CONNECTIONS_TOTAL: &str = "slotmarket_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotmarket_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotmarket_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotmarket_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotmarket_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
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
        Command::InsertTimeSlot { .. } => "insert_time_slot",
        Command::InsertProviderService { .. } => "insert_provider_service",
        Command::UpdateProviderService { .. } => "update_provider_service",
        Command::DeleteProviderService { .. } => "delete_provider_service",
        Command::InsertSlot { .. } => "insert_slot",
        Command::UpdateSlot { .. } => "update_slot",
        Command::ReserveSlot { .. } => "reserve_slot",
        Command::ReleaseSlot { .. } => "release_slot",
        Command::DeleteSlot { .. } => "delete_slot",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::InsertReview { .. } => "insert_review",
        Command::SelectTimeSlots { .. } => "select_time_slots",
        Command::SelectProviderServices { .. } => "select_provider_services",
        Command::SelectSlot { .. } => "select_slot",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectSlotConflict { .. } => "select_slot_conflict",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectReviews { .. } => "select_reviews",
    }
}
