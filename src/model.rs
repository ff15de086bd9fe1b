use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub use crate::time::Minutes;
use crate::time::{format_12h, hhmm};
use crate::weekday;

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    #[serde(with = "hhmm")]
    pub start: Minutes,
    #[serde(with = "hhmm")]
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// `"10:00 AM - 10:30 AM"`
    pub fn display(&self) -> String {
        format!("{} - {}", format_12h(self.start), format_12h(self.end))
    }
}

// ── Catalog records (consumed from collaborators) ────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
    Suspended,
}

/// One weekday of business hours, stored with a capitalised day name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayHours {
    #[serde(with = "weekday::capitalized_name")]
    pub day: Weekday,
    pub is_open: bool,
    #[serde(with = "hhmm")]
    pub open_time: Minutes,
    #[serde(with = "hhmm")]
    pub close_time: Minutes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Business {
    pub id: Ulid,
    pub name: String,
    pub verification_status: VerificationStatus,
    pub is_active: bool,
    pub is_currently_open: bool,
    #[serde(default)]
    pub temporary_closure_until: Option<NaiveDateTime>,
    #[serde(default)]
    pub temporary_closure_reason: Option<String>,
    #[serde(default)]
    pub business_hours: Vec<DayHours>,
}

impl Business {
    pub fn hours_for(&self, day: Weekday) -> Option<&DayHours> {
        self.business_hours.iter().find(|h| h.day == day)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffDay {
    #[serde(with = "hhmm")]
    pub start: Minutes,
    #[serde(with = "hhmm")]
    pub end: Minutes,
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Staff {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
    pub is_active: bool,
    /// Absent weekday = no staff-level restriction that day.
    #[serde(default, with = "weekday::lowercase_keys")]
    pub availability: HashMap<Weekday, StaffDay>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvanceUnit {
    Minutes,
    Hours,
    Days,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceNotice {
    pub value: u32,
    pub unit: AdvanceUnit,
}

impl AdvanceNotice {
    pub fn as_duration(&self) -> Duration {
        let value = i64::from(self.value);
        match self.unit {
            AdvanceUnit::Minutes => Duration::minutes(value),
            AdvanceUnit::Hours => Duration::hours(value),
            AdvanceUnit::Days => Duration::days(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
    /// Minutes, > 0.
    pub duration: Minutes,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub is_active: bool,
    #[serde(default)]
    pub assigned_staff: Vec<Ulid>,
    #[serde(default)]
    pub min_advance_booking: Option<AdvanceNotice>,
}

impl Service {
    /// An empty roster means any staff member of the business may perform it.
    pub fn is_assigned(&self, staff_id: Ulid) -> bool {
        self.assigned_staff.is_empty() || self.assigned_staff.contains(&staff_id)
    }
}

// ── Appointments ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Pending,
    Approved,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Approved => "approved",
            AppointmentStatus::InProgress => "in-progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no-show",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lane an appointment occupies: its staff member, or the business's
/// unassigned lane when no staff is set. Overlap is checked per calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Calendar {
    Staff(Ulid),
    Business(Ulid),
}

impl Calendar {
    pub fn of(business_id: Ulid, staff_id: Option<Ulid>) -> Self {
        staff_id.map_or(Calendar::Business(business_id), Calendar::Staff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    pub date: NaiveDate,
    pub time_slot: Span,
    pub reason: Option<String>,
    pub requested_at: NaiveDateTime,
}

/// Also the WAL payload. Keep serde attributes bincode-friendly
/// (no skipped or flattened fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Ulid,
    pub business_id: Ulid,
    pub customer_id: Ulid,
    pub service_id: Ulid,
    pub staff_id: Option<Ulid>,
    pub date: NaiveDate,
    pub time_slot: Span,
    pub status: AppointmentStatus,
    pub queue_number: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub final_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub discount_applied: Decimal,
    pub reschedule_request: Option<RescheduleRequest>,
    pub cancellation_reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Appointment {
    pub fn calendar(&self) -> Calendar {
        Calendar::of(self.business_id, self.staff_id)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Input to `Engine::create_appointment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    pub customer_id: Ulid,
    pub service_id: Ulid,
    #[serde(default)]
    pub staff_id: Option<Ulid>,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start: Minutes,
    #[serde(default)]
    pub queue_number: Option<String>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub discount: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// One flat event per committed change. This is the WAL record
/// format and what subscribers receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Event {
    AppointmentCreated {
        appointment: Appointment,
    },
    StatusChanged {
        id: Ulid,
        business_id: Ulid,
        from: AppointmentStatus,
        to: AppointmentStatus,
        reason: Option<String>,
        at: NaiveDateTime,
    },
    RescheduleRequested {
        id: Ulid,
        business_id: Ulid,
        request: RescheduleRequest,
    },
    RescheduleApproved {
        id: Ulid,
        business_id: Ulid,
        date: NaiveDate,
        time_slot: Span,
        at: NaiveDateTime,
    },
    RescheduleRejected {
        id: Ulid,
        business_id: Ulid,
        at: NaiveDateTime,
    },
}

impl Event {
    pub fn business_id(&self) -> Ulid {
        match self {
            Event::AppointmentCreated { appointment } => appointment.business_id,
            Event::StatusChanged { business_id, .. }
            | Event::RescheduleRequested { business_id, .. }
            | Event::RescheduleApproved { business_id, .. }
            | Event::RescheduleRejected { business_id, .. } => *business_id,
        }
    }

    pub fn appointment_id(&self) -> Ulid {
        match self {
            Event::AppointmentCreated { appointment } => appointment.id,
            Event::StatusChanged { id, .. }
            | Event::RescheduleRequested { id, .. }
            | Event::RescheduleApproved { id, .. }
            | Event::RescheduleRejected { id, .. } => *id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Why a whole day is unbookable. These are expected outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closure {
    NotAcceptingBookings,
    TemporarilyClosed {
        reason: Option<String>,
        until: NaiveDateTime,
    },
    ClosedOnWeekday(Weekday),
    StaffUnavailable,
    StaffInactive,
}

impl Closure {
    pub fn message(&self) -> String {
        match self {
            Closure::NotAcceptingBookings => "Business is not accepting bookings".to_string(),
            Closure::TemporarilyClosed {
                reason: Some(reason),
                ..
            } => format!("Business is temporarily closed: {reason}"),
            Closure::TemporarilyClosed { reason: None, .. } => {
                "Business is temporarily closed".to_string()
            }
            Closure::ClosedOnWeekday(day) => {
                format!("Business is closed on {}s", weekday::capitalized(*day))
            }
            Closure::StaffUnavailable => "Staff is not available on this day".to_string(),
            Closure::StaffInactive => "Staff member is not currently active".to_string(),
        }
    }

    pub fn closed_until(&self) -> Option<NaiveDateTime> {
        match self {
            Closure::TemporarilyClosed { until, .. } => Some(*until),
            _ => None,
        }
    }
}

impl std::fmt::Display for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(with = "hhmm")]
    pub start: Minutes,
    #[serde(with = "hhmm")]
    pub end: Minutes,
    pub display: String,
}

impl Slot {
    pub fn from_span(span: Span) -> Self {
        Self {
            start: span.start,
            end: span.end,
            display: span.display(),
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

/// `{slots}` when the day is open (possibly empty = fully booked), or
/// `{slots: [], message}` when a closure applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSlots {
    pub slots: Vec<Slot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_until: Option<NaiveDateTime>,
    #[serde(skip)]
    pub closure: Option<Closure>,
}

impl AvailableSlots {
    pub fn open(slots: Vec<Slot>) -> Self {
        Self {
            slots,
            message: None,
            closed_until: None,
            closure: None,
        }
    }

    pub fn closed(closure: Closure) -> Self {
        Self {
            slots: Vec::new(),
            message: Some(closure.message()),
            closed_until: closure.closed_until(),
            closure: Some(closure),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closure.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayWindow {
    #[serde(with = "weekday::capitalized_name")]
    pub day: Weekday,
    #[serde(with = "hhmm")]
    pub open_time: Minutes,
    #[serde(with = "hhmm")]
    pub close_time: Minutes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessAvailability {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_until: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_hours: Option<DayWindow>,
}
