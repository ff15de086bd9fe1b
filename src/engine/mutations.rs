use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    APPOINTMENTS_CREATED_TOTAL, QUEUE_ALLOCATION_RETRIES_TOTAL, SLOT_CONFLICTS_TOTAL,
    STATUS_TRANSITIONS_TOTAL,
};
use crate::time::add_minutes;

use super::conflict::check_no_conflict;
use super::lifecycle::validate_transition;
use super::queue::{format_queue_number, next_sequence, parse_queue_number};
use super::{starts_at, BookingContext, Engine, EngineError, StoreError};

fn check_len(field: &str, value: Option<&str>, max: usize) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::Validation(format!(
            "{field} is longer than {max} characters"
        ))),
        _ => Ok(()),
    }
}

/// `[start, start + duration)`, refusing services that would run past midnight.
fn service_span(start: Minutes, duration: Minutes) -> Result<Span, EngineError> {
    let end = add_minutes(start, duration).map_err(|e| EngineError::Validation(e.to_string()))?;
    Ok(Span::new(start, end))
}

impl Engine {
    /// Write-path admission for `span` on `date`: day gates, containment in
    /// the effective window, then advance notice.
    fn check_bookable(
        &self,
        ctx: &BookingContext,
        date: NaiveDate,
        span: Span,
        now: NaiveDateTime,
    ) -> Result<(), EngineError> {
        let window = ctx.window(date, now).map_err(EngineError::Closed)?;
        if !window.contains_span(&span) {
            return Err(EngineError::Validation(format!(
                "{} is outside available hours {}",
                span.display(),
                window.display()
            )));
        }
        if let Some(earliest) = ctx.earliest_start(now)
            && starts_at(date, span.start) < earliest
        {
            return Err(EngineError::Validation(format!(
                "{} needs advance notice; earliest start is {earliest}",
                ctx.service.name
            )));
        }
        Ok(())
    }

    pub async fn create_appointment(
        &self,
        request: NewAppointment,
    ) -> Result<Appointment, EngineError> {
        check_len("notes", request.notes.as_deref(), MAX_NOTES_LEN)?;
        let ctx = self
            .booking_context(request.service_id, request.staff_id)
            .await?;
        let span = service_span(request.start, ctx.service.duration)?;

        let discount = request.discount.unwrap_or(Decimal::ZERO);
        if discount.is_sign_negative() || discount > ctx.service.price {
            return Err(EngineError::Validation(format!(
                "discount {discount} must be between 0 and the price {}",
                ctx.service.price
            )));
        }
        if let Some(q) = &request.queue_number
            && parse_queue_number(q).is_none()
        {
            return Err(EngineError::Validation(format!(
                "queue number {q:?} is not of the form QYYYYMMDD-NNN"
            )));
        }

        let now = self.clock.now();
        self.check_bookable(&ctx, request.date, span, now)?;

        let calendar = ctx.calendar();
        let _day = self.lock_day(calendar, request.date).await;
        let existing = self.store.active_on(calendar, request.date).await?;
        if let Err(e) = check_no_conflict(&existing, &span, None) {
            metrics::counter!(SLOT_CONFLICTS_TOTAL).increment(1);
            warn!(?calendar, date = %request.date, slot = %span.display(), "booking rejected: {e}");
            return Err(e);
        }

        let appointment = Appointment {
            id: Ulid::new(),
            business_id: ctx.business.id,
            customer_id: request.customer_id,
            service_id: ctx.service.id,
            staff_id: ctx.staff.as_ref().map(|s| s.id),
            date: request.date,
            time_slot: span,
            status: AppointmentStatus::Pending,
            queue_number: String::new(),
            final_price: ctx.service.price - discount,
            discount_applied: discount,
            reschedule_request: None,
            cancellation_reason: None,
            notes: request.notes,
            created_at: now,
            updated_at: now,
        };
        let created = self
            .insert_with_queue_number(appointment, request.queue_number)
            .await?;

        metrics::counter!(APPOINTMENTS_CREATED_TOTAL).increment(1);
        info!(
            id = %created.id,
            business = %created.business_id,
            date = %created.date,
            slot = %created.time_slot.display(),
            queue_number = %created.queue_number,
            "appointment created"
        );
        Ok(created)
    }

    /// Assign a queue number and persist. Caller must hold the day lock.
    ///
    /// Generated numbers are issued under the creation day's queue lock and
    /// retried past numbers the store already holds.
    async fn insert_with_queue_number(
        &self,
        mut appointment: Appointment,
        requested: Option<String>,
    ) -> Result<Appointment, EngineError> {
        if let Some(q) = requested {
            appointment.queue_number = q;
            return match self.commit(Event::AppointmentCreated { appointment }).await {
                Err(EngineError::Store(StoreError::DuplicateQueueNumber(q))) => Err(
                    EngineError::Validation(format!("queue number {q} is already taken")),
                ),
                other => other,
            };
        }

        let day = appointment.created_at.date();
        let mut last_issued = self.queue.lock_day(day).await;
        for attempt in 1..=QUEUE_ALLOCATION_ATTEMPTS {
            let stored = self.store.last_sequence_on(day).await?;
            let sequence = next_sequence(*last_issued, stored);
            appointment.queue_number = format_queue_number(day, sequence);
            let event = Event::AppointmentCreated {
                appointment: appointment.clone(),
            };
            match self.commit(event).await {
                Ok(created) => {
                    *last_issued = Some(sequence);
                    return Ok(created);
                }
                Err(EngineError::Store(StoreError::DuplicateQueueNumber(q))) => {
                    *last_issued = Some(sequence);
                    metrics::counter!(QUEUE_ALLOCATION_RETRIES_TOTAL).increment(1);
                    warn!(queue_number = %q, attempt, "queue number already held, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(EngineError::AllocationRace(QUEUE_ALLOCATION_ATTEMPTS))
    }

    pub async fn approve(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Approved, None).await
    }

    pub async fn start(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::InProgress, None).await
    }

    pub async fn complete(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Completed, None).await
    }

    pub async fn cancel(&self, id: Ulid, reason: Option<String>) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Cancelled, reason).await
    }

    pub async fn mark_no_show(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::NoShow, None).await
    }

    /// Status change under the appointment's day lock. The status is read
    /// after locking, so of two racing `complete` calls exactly one commits.
    async fn transition(
        &self,
        id: Ulid,
        to: AppointmentStatus,
        reason: Option<String>,
    ) -> Result<Appointment, EngineError> {
        check_len("reason", reason.as_deref(), MAX_REASON_LEN)?;
        let (current, _day) = self.lock_appointment(id).await?;
        validate_transition(current.status, to)?;

        let event = Event::StatusChanged {
            id,
            business_id: current.business_id,
            from: current.status,
            to,
            reason,
            at: self.clock.now(),
        };
        let updated = self.commit(event).await?;
        metrics::counter!(STATUS_TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        info!(%id, from = %current.status, %to, "appointment status changed");
        Ok(updated)
    }

    /// Record a request to move an active appointment. The target is checked
    /// now for early feedback and again on approval.
    pub async fn request_reschedule(
        &self,
        id: Ulid,
        date: NaiveDate,
        start: Minutes,
        reason: Option<String>,
    ) -> Result<Appointment, EngineError> {
        check_len("reason", reason.as_deref(), MAX_REASON_LEN)?;
        let (current, _day) = self.lock_appointment(id).await?;
        if !current.status.can_reschedule() {
            return Err(EngineError::Validation(format!(
                "a {} appointment cannot be rescheduled",
                current.status
            )));
        }
        if current.reschedule_request.is_some() {
            return Err(EngineError::Validation(
                "a reschedule request is already pending".into(),
            ));
        }

        let ctx = self
            .booking_context(current.service_id, current.staff_id)
            .await?;
        let span = service_span(start, ctx.service.duration)?;
        let now = self.clock.now();
        self.check_bookable(&ctx, date, span, now)?;
        let existing = self.store.active_on(current.calendar(), date).await?;
        check_no_conflict(&existing, &span, Some(id))?;

        let event = Event::RescheduleRequested {
            id,
            business_id: current.business_id,
            request: RescheduleRequest {
                date,
                time_slot: span,
                reason,
                requested_at: now,
            },
        };
        let updated = self.commit(event).await?;
        info!(%id, %date, slot = %span.display(), "reschedule requested");
        Ok(updated)
    }

    /// Move the appointment to its requested slot. Both the current and the
    /// target day are locked, and the target re-validated, before the move.
    pub async fn approve_reschedule(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let mut seen = self.load(id).await?;
        let (current, request, _days) = loop {
            let request = seen
                .reschedule_request
                .clone()
                .ok_or_else(|| EngineError::Validation("no reschedule request pending".into()))?;
            let calendar = seen.calendar();
            let days = self
                .lock_days(vec![(calendar, seen.date), (calendar, request.date)])
                .await;
            let fresh = self.load(id).await?;
            if fresh.date == seen.date && fresh.reschedule_request.as_ref() == Some(&request) {
                break (fresh, request, days);
            }
            drop(days);
            seen = fresh;
        };

        if !current.is_active() {
            return Err(EngineError::Validation(format!(
                "a {} appointment cannot be rescheduled",
                current.status
            )));
        }
        let ctx = self
            .booking_context(current.service_id, current.staff_id)
            .await?;
        let now = self.clock.now();
        self.check_bookable(&ctx, request.date, request.time_slot, now)?;
        let existing = self.store.active_on(current.calendar(), request.date).await?;
        if let Err(e) = check_no_conflict(&existing, &request.time_slot, Some(id)) {
            metrics::counter!(SLOT_CONFLICTS_TOTAL).increment(1);
            warn!(%id, date = %request.date, "reschedule rejected: {e}");
            return Err(e);
        }

        let event = Event::RescheduleApproved {
            id,
            business_id: current.business_id,
            date: request.date,
            time_slot: request.time_slot,
            at: now,
        };
        let moved = self.commit(event).await?;
        info!(
            %id,
            from = %current.date,
            to = %moved.date,
            slot = %moved.time_slot.display(),
            "reschedule approved"
        );
        Ok(moved)
    }

    pub async fn reject_reschedule(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let (current, _day) = self.lock_appointment(id).await?;
        if current.reschedule_request.is_none() {
            return Err(EngineError::Validation("no reschedule request pending".into()));
        }
        let event = Event::RescheduleRejected {
            id,
            business_id: current.business_id,
            at: self.clock.now(),
        };
        let updated = self.commit(event).await?;
        info!(%id, "reschedule rejected");
        Ok(updated)
    }
}
