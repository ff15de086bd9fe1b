mod closure;
mod conflict;
mod error;
mod hours;
mod lifecycle;
mod mutations;
mod queries;
mod queue;
mod slots;
mod store;
#[cfg(test)]
mod tests;

pub use closure::{check_business, check_staff};
pub use conflict::{booked_spans, filter_booked, merge_overlapping};
pub use error::{EngineError, StoreError};
pub use hours::{business_window, resolve_hours, EffectiveHours};
pub use queue::{format_queue_number, parse_queue_number, QueueAllocator};
pub use slots::{cadence, generate_slots, SlotIter};
pub use store::{AppointmentLedger, AppointmentStore};

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::catalog::Directory;
use crate::clock::Clock;
use crate::model::*;
use crate::notify::NotifyHub;

type DayKey = (Calendar, NaiveDate);

pub struct Engine {
    directory: Arc<dyn Directory>,
    store: Arc<dyn AppointmentStore>,
    clock: Arc<dyn Clock>,
    pub notify: Arc<NotifyHub>,
    /// Write serialisation per (calendar, date). Reads never take these.
    day_locks: DashMap<DayKey, Arc<Mutex<()>>>,
    queue: QueueAllocator,
}

/// The catalog records a booking for `(service, staff)` resolves to, already
/// checked to belong together.
pub(super) struct BookingContext {
    pub business: Business,
    pub service: Service,
    pub staff: Option<Staff>,
}

impl BookingContext {
    pub fn calendar(&self) -> Calendar {
        Calendar::of(self.business.id, self.staff.as_ref().map(|s| s.id))
    }

    /// Day gates, then the effective window for `date`'s weekday.
    pub fn window(&self, date: NaiveDate, now: NaiveDateTime) -> Result<Span, Closure> {
        check_business(&self.business, now)?;
        check_staff(self.staff.as_ref())?;
        match resolve_hours(&self.business, self.staff.as_ref(), date.weekday()) {
            EffectiveHours::Open(window) => Ok(window),
            EffectiveHours::Closed(closure) => Err(closure),
        }
    }

    /// Earliest bookable start under the service's advance-notice rule.
    /// Saturates, so a notice past the calendar's end books nothing.
    pub fn earliest_start(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        self.service.min_advance_booking.map(|notice| {
            now.checked_add_signed(notice.as_duration())
                .unwrap_or(NaiveDateTime::MAX)
        })
    }
}

/// Wall-clock instant a time of day on `date` denotes.
pub(crate) fn starts_at(date: NaiveDate, minutes: Minutes) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::minutes(i64::from(minutes))
}

impl Engine {
    pub fn new(
        directory: Arc<dyn Directory>,
        store: Arc<dyn AppointmentStore>,
        clock: Arc<dyn Clock>,
        notify: Arc<NotifyHub>,
    ) -> Self {
        Self {
            directory,
            store,
            clock,
            notify,
            day_locks: DashMap::new(),
            queue: QueueAllocator::new(),
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Look up service, business and staff, and check they fit together.
    pub(super) async fn booking_context(
        &self,
        service_id: Ulid,
        staff_id: Option<Ulid>,
    ) -> Result<BookingContext, EngineError> {
        let service = self
            .directory
            .service(service_id)
            .await?
            .ok_or_else(|| EngineError::not_found("service", service_id))?;
        if !service.is_active {
            return Err(EngineError::Validation(format!(
                "service {} is not offered",
                service.name
            )));
        }
        let business = self
            .directory
            .business(service.business_id)
            .await?
            .ok_or_else(|| EngineError::not_found("business", service.business_id))?;

        let staff = match staff_id {
            None => None,
            Some(id) => {
                let staff = self
                    .directory
                    .staff(id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("staff", id))?;
                if staff.business_id != business.id {
                    return Err(EngineError::Validation(format!(
                        "{} does not work at {}",
                        staff.name, business.name
                    )));
                }
                if !service.is_assigned(staff.id) {
                    return Err(EngineError::Validation(format!(
                        "{} does not perform {}",
                        staff.name, service.name
                    )));
                }
                Some(staff)
            }
        };

        Ok(BookingContext {
            business,
            service,
            staff,
        })
    }

    pub(super) async fn lock_day(&self, calendar: Calendar, date: NaiveDate) -> OwnedMutexGuard<()> {
        let lock = self.day_locks.entry((calendar, date)).or_default().clone();
        lock.lock_owned().await
    }

    /// Lock several days at once in key order, so two writers touching the
    /// same pair of days cannot deadlock.
    pub(super) async fn lock_days(&self, mut keys: Vec<DayKey>) -> Vec<OwnedMutexGuard<()>> {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for (calendar, date) in keys {
            guards.push(self.lock_day(calendar, date).await);
        }
        guards
    }

    /// Load an appointment and lock its day. Re-reads after locking until
    /// the record's day matches the lock held.
    pub(super) async fn lock_appointment(
        &self,
        id: Ulid,
    ) -> Result<(Appointment, OwnedMutexGuard<()>), EngineError> {
        let mut seen = self.load(id).await?;
        loop {
            let guard = self.lock_day(seen.calendar(), seen.date).await;
            let fresh = self.load(id).await?;
            if fresh.calendar() == seen.calendar() && fresh.date == seen.date {
                return Ok((fresh, guard));
            }
            drop(guard);
            seen = fresh;
        }
    }

    pub(super) async fn load(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("appointment", id))
    }

    /// Persist an event and tell subscribers. Nothing is published unless
    /// the store accepted it.
    pub(super) async fn commit(&self, event: Event) -> Result<Appointment, EngineError> {
        let appointment = self.store.append(&event).await?;
        self.notify.send(event.business_id(), &event);
        Ok(appointment)
    }

    /// Forget day locks and queue counters for dates before `before` that no
    /// writer currently holds.
    pub fn prune_day_locks(&self, before: NaiveDate) -> usize {
        let start = self.day_locks.len();
        self.day_locks
            .retain(|(_, date), lock| *date >= before || Arc::strong_count(lock) > 1);
        let pruned = start - self.day_locks.len();
        pruned + self.queue.prune(before)
    }
}
