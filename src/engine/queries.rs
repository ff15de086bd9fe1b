use std::time::Instant;

use chrono::{Datelike, NaiveDate};
use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::observability::{SLOTS_RETURNED, SLOT_QUERIES_TOTAL, SLOT_QUERY_DURATION_SECONDS};

use super::conflict::{booked_spans, filter_booked};
use super::hours::{business_window, EffectiveHours};
use super::slots::generate_slots;
use super::{check_business, starts_at, Engine, EngineError};

impl Engine {
    /// Bookable slots for a service on `date`, optionally with a specific
    /// staff member. Takes no locks; two calls with no write in between
    /// return the same list.
    pub async fn get_available_slots(
        &self,
        service_id: Ulid,
        staff_id: Option<Ulid>,
        date: NaiveDate,
    ) -> Result<AvailableSlots, EngineError> {
        let started = Instant::now();
        let ctx = self.booking_context(service_id, staff_id).await?;
        let now = self.clock.now();

        let window = match ctx.window(date, now) {
            Ok(window) => window,
            Err(closure) => {
                debug!(%service_id, %date, reason = %closure, "no slots: day closed");
                metrics::counter!(SLOT_QUERIES_TOTAL, "outcome" => "closed").increment(1);
                return Ok(AvailableSlots::closed(closure));
            }
        };

        let candidates = generate_slots(window, ctx.service.duration);
        let existing = self.store.active_on(ctx.calendar(), date).await?;
        let mut slots = filter_booked(candidates, &booked_spans(&existing));
        if let Some(earliest) = ctx.earliest_start(now) {
            slots.retain(|s| starts_at(date, s.start) >= earliest);
        }

        debug!(
            %service_id,
            %date,
            window = %window.display(),
            booked = existing.len(),
            slots = slots.len(),
            "slots computed"
        );
        metrics::counter!(SLOT_QUERIES_TOTAL, "outcome" => "open").increment(1);
        metrics::histogram!(SLOTS_RETURNED).record(slots.len() as f64);
        metrics::histogram!(SLOT_QUERY_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(AvailableSlots::open(slots))
    }

    /// Whether the business takes bookings on `date`, and its hours if so.
    pub async fn get_business_availability(
        &self,
        business_id: Ulid,
        date: NaiveDate,
    ) -> Result<BusinessAvailability, EngineError> {
        let business = self
            .directory
            .business(business_id)
            .await?
            .ok_or_else(|| EngineError::not_found("business", business_id))?;

        let closed = |closure: Closure| BusinessAvailability {
            available: false,
            reason: Some(closure.message()),
            closed_until: closure.closed_until(),
            business_hours: None,
        };

        if let Err(closure) = check_business(&business, self.clock.now()) {
            return Ok(closed(closure));
        }
        let day = date.weekday();
        match business_window(&business, day) {
            EffectiveHours::Closed(closure) => Ok(closed(closure)),
            EffectiveHours::Open(window) => Ok(BusinessAvailability {
                available: true,
                reason: None,
                closed_until: None,
                business_hours: Some(DayWindow {
                    day,
                    open_time: window.start,
                    close_time: window.end,
                }),
            }),
        }
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.load(id).await
    }

    /// All of a business's appointments on `date`, any status, by start time.
    pub async fn list_appointments(
        &self,
        business_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError> {
        Ok(self.store.for_business_on(business_id, date).await?)
    }
}
