use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: protocol requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "slotwise_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "slotwise_request_duration_seconds";

// ── Booking engine ──────────────────────────────────────────────

/// Counter: slot listings. Labels: outcome (open, closed).
pub const SLOT_QUERIES_TOTAL: &str = "slotwise_slot_queries_total";

/// Histogram: slots returned per open listing.
pub const SLOTS_RETURNED: &str = "slotwise_slots_returned";

/// Histogram: slot listing compute time in seconds.
pub const SLOT_QUERY_DURATION_SECONDS: &str = "slotwise_slot_query_duration_seconds";

pub const APPOINTMENTS_CREATED_TOTAL: &str = "slotwise_appointments_created_total";

/// Counter: writes refused because the slot was taken.
pub const SLOT_CONFLICTS_TOTAL: &str = "slotwise_slot_conflicts_total";

/// Counter: queue numbers found already held and re-issued.
pub const QUEUE_ALLOCATION_RETRIES_TOTAL: &str = "slotwise_queue_allocation_retries_total";

/// Counter: committed status changes. Labels: to.
pub const STATUS_TRANSITIONS_TOTAL: &str = "slotwise_status_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotwise_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotwise_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotwise_connections_rejected_total";

/// Histogram: WAL append + fsync duration in seconds.
pub const WAL_APPEND_DURATION_SECONDS: &str = "slotwise_wal_append_duration_seconds";

pub const WAL_COMPACTIONS_TOTAL: &str = "slotwise_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a request, for metrics.
pub fn request_label(request: &Request) -> &'static str {
    match request {
        Request::AvailableSlots { .. } => "available_slots",
        Request::BusinessAvailability { .. } => "business_availability",
        Request::CreateAppointment { .. } => "create_appointment",
        Request::Approve { .. } => "approve",
        Request::Start { .. } => "start",
        Request::Complete { .. } => "complete",
        Request::Cancel { .. } => "cancel",
        Request::NoShow { .. } => "no_show",
        Request::RequestReschedule { .. } => "request_reschedule",
        Request::ApproveReschedule { .. } => "approve_reschedule",
        Request::RejectReschedule { .. } => "reject_reschedule",
        Request::GetAppointment { .. } => "get_appointment",
        Request::ListAppointments { .. } => "list_appointments",
        Request::Subscribe { .. } => "subscribe",
    }
}
