use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Booked intervals of the active appointments, sorted and merged.
pub fn booked_spans<'a>(appointments: impl IntoIterator<Item = &'a Appointment>) -> Vec<Span> {
    let mut spans: Vec<Span> = appointments
        .into_iter()
        .filter(|a| a.is_active())
        .map(|a| a.time_slot)
        .collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// True if `span` intersects any of the disjoint, sorted `booked` spans.
fn hits_booked(booked: &[Span], span: &Span) -> bool {
    // Everything at index >= right_bound starts at or after span.end → can't overlap.
    let right_bound = booked.partition_point(|b| b.start < span.end);
    booked[..right_bound].last().is_some_and(|b| b.end > span.start)
}

/// Read-time filter: keep the candidates that overlap no booked interval.
pub fn filter_booked(slots: Vec<Slot>, booked: &[Span]) -> Vec<Slot> {
    if booked.is_empty() {
        return slots;
    }
    slots
        .into_iter()
        .filter(|s| !hits_booked(booked, &s.span()))
        .collect()
}

/// Write-time check against the calendar's appointments on the target day.
/// `exclude` skips the appointment being moved by a reschedule.
pub(crate) fn check_no_conflict(
    existing: &[Appointment],
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for appointment in existing {
        if Some(appointment.id) == exclude || !appointment.is_active() {
            continue;
        }
        if appointment.time_slot.overlaps(span) {
            return Err(EngineError::SlotConflict(appointment.id));
        }
    }
    Ok(())
}
