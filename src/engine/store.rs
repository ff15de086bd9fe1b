use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::error::StoreError;
use super::queue::parse_queue_number;

/// Appointment persistence as the engine sees it.
///
/// `append` is the only write: the store validates the event against what it
/// holds, makes it durable, applies it, and returns the resulting record.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get(&self, id: Ulid) -> Result<Option<Appointment>, StoreError>;

    /// Appointments in an active status on `calendar` for `date`.
    async fn active_on(
        &self,
        calendar: Calendar,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Every appointment of the business on `date`, ordered by start time.
    async fn for_business_on(
        &self,
        business_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Highest sequence among stored queue numbers dated `day`, 0 if none.
    async fn last_sequence_on(&self, day: NaiveDate) -> Result<u32, StoreError>;

    async fn append(&self, event: &Event) -> Result<Appointment, StoreError>;
}

/// In-memory appointment index, optionally backed by a WAL.
pub struct AppointmentLedger {
    appointments: DashMap<Ulid, Appointment>,
    by_calendar_day: DashMap<(Calendar, NaiveDate), Vec<Ulid>>,
    by_business_day: DashMap<(Ulid, NaiveDate), Vec<Ulid>>,
    queue_numbers: DashMap<String, Ulid>,
    /// Highest queue sequence per queue-number date.
    last_sequence: DashMap<NaiveDate, u32>,
    /// Serialises validate → log → apply. `None` for a memory-only ledger.
    writer: Mutex<Option<Wal>>,
}

impl AppointmentLedger {
    fn empty(wal: Option<Wal>) -> Self {
        Self {
            appointments: DashMap::new(),
            by_calendar_day: DashMap::new(),
            by_business_day: DashMap::new(),
            queue_numbers: DashMap::new(),
            last_sequence: DashMap::new(),
            writer: Mutex::new(wal),
        }
    }

    pub fn in_memory() -> Self {
        Self::empty(None)
    }

    /// Replay the WAL at `path`, then keep appending to it.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let events = Wal::recover(path)?;
        let ledger = Self::empty(Some(Wal::open(path)?));
        let mut skipped = 0usize;
        for event in &events {
            match ledger.check(event).and_then(|()| ledger.apply(event)) {
                Ok(_) => {}
                Err(e) => {
                    skipped += 1;
                    warn!(appointment = %event.appointment_id(), "skipping WAL event: {e}");
                }
            }
        }
        tracing::info!(
            path = %path.display(),
            replayed = events.len() - skipped,
            skipped,
            "appointment ledger loaded"
        );
        Ok(ledger)
    }

    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }

    /// Reject events that would break the ledger's invariants. Pure read.
    fn check(&self, event: &Event) -> Result<(), StoreError> {
        match event {
            Event::AppointmentCreated { appointment } => {
                if self.appointments.contains_key(&appointment.id) {
                    return Err(StoreError::InvalidRecord(format!(
                        "appointment {} already exists",
                        appointment.id
                    )));
                }
                if self.queue_numbers.contains_key(&appointment.queue_number) {
                    return Err(StoreError::DuplicateQueueNumber(
                        appointment.queue_number.clone(),
                    ));
                }
                if appointment.time_slot.start >= appointment.time_slot.end {
                    return Err(StoreError::InvalidRecord("empty time slot".into()));
                }
                Ok(())
            }
            Event::StatusChanged { id, from, .. } => {
                let current = self
                    .appointments
                    .get(id)
                    .ok_or(StoreError::UnknownAppointment(*id))?;
                if current.status != *from {
                    return Err(StoreError::InvalidRecord(format!(
                        "appointment {id} is {}, not {from}",
                        current.status
                    )));
                }
                Ok(())
            }
            Event::RescheduleRequested { id, .. }
            | Event::RescheduleApproved { id, .. }
            | Event::RescheduleRejected { id, .. } => {
                if self.appointments.contains_key(id) {
                    Ok(())
                } else {
                    Err(StoreError::UnknownAppointment(*id))
                }
            }
        }
    }

    /// Apply a checked event to the indexes and return the updated record.
    fn apply(&self, event: &Event) -> Result<Appointment, StoreError> {
        match event {
            Event::AppointmentCreated { appointment } => {
                let a = appointment.clone();
                self.by_calendar_day
                    .entry((a.calendar(), a.date))
                    .or_default()
                    .push(a.id);
                self.by_business_day
                    .entry((a.business_id, a.date))
                    .or_default()
                    .push(a.id);
                self.queue_numbers.insert(a.queue_number.clone(), a.id);
                if let Some((day, sequence)) = parse_queue_number(&a.queue_number) {
                    let mut last = self.last_sequence.entry(day).or_insert(0);
                    *last = (*last).max(sequence);
                }
                self.appointments.insert(a.id, a.clone());
                Ok(a)
            }
            Event::StatusChanged { id, to, reason, at, .. } => self.update(*id, |a| {
                a.status = *to;
                if *to == AppointmentStatus::Cancelled {
                    a.cancellation_reason = reason.clone();
                }
                if to.is_terminal() {
                    a.reschedule_request = None;
                }
                a.updated_at = *at;
            }),
            Event::RescheduleRequested { id, request, .. } => self.update(*id, |a| {
                a.reschedule_request = Some(request.clone());
                a.updated_at = request.requested_at;
            }),
            Event::RescheduleApproved {
                id,
                date,
                time_slot,
                at,
                ..
            } => {
                let before = self
                    .appointments
                    .get(id)
                    .map(|a| a.date)
                    .ok_or(StoreError::UnknownAppointment(*id))?;
                let moved = self.update(*id, |a| {
                    a.date = *date;
                    a.time_slot = *time_slot;
                    a.reschedule_request = None;
                    a.updated_at = *at;
                })?;
                if before != *date {
                    self.reindex_date(&moved, before);
                }
                Ok(moved)
            }
            Event::RescheduleRejected { id, at, .. } => self.update(*id, |a| {
                a.reschedule_request = None;
                a.updated_at = *at;
            }),
        }
    }

    fn update(
        &self,
        id: Ulid,
        f: impl FnOnce(&mut Appointment),
    ) -> Result<Appointment, StoreError> {
        let mut entry = self
            .appointments
            .get_mut(&id)
            .ok_or(StoreError::UnknownAppointment(id))?;
        f(entry.value_mut());
        Ok(entry.value().clone())
    }

    fn reindex_date(&self, moved: &Appointment, old_date: NaiveDate) {
        if let Some(mut ids) = self.by_calendar_day.get_mut(&(moved.calendar(), old_date)) {
            ids.retain(|i| *i != moved.id);
        }
        if let Some(mut ids) = self.by_business_day.get_mut(&(moved.business_id, old_date)) {
            ids.retain(|i| *i != moved.id);
        }
        self.by_calendar_day
            .entry((moved.calendar(), moved.date))
            .or_default()
            .push(moved.id);
        self.by_business_day
            .entry((moved.business_id, moved.date))
            .or_default()
            .push(moved.id);
    }

    fn collect(&self, ids: &[Ulid]) -> Vec<Appointment> {
        ids.iter()
            .filter_map(|id| self.appointments.get(id).map(|a| a.value().clone()))
            .collect()
    }

    /// One `AppointmentCreated` per record, ordered by creation. Replaying
    /// these rebuilds every index including the per-day queue sequences.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut all: Vec<Appointment> = self
            .appointments
            .iter()
            .map(|e| e.value().clone())
            .collect();
        all.sort_by_key(|a| (a.created_at, a.id));
        all.into_iter()
            .map(|appointment| Event::AppointmentCreated { appointment })
            .collect()
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.writer
            .lock()
            .await
            .as_ref()
            .map_or(0, Wal::appends_since_compact)
    }

    /// Rewrite the WAL down to [`snapshot`](Self::snapshot). Holds the
    /// writer lock throughout, so no append interleaves.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().await;
        let Some(wal) = writer.as_mut() else {
            return Ok(());
        };
        let events = self.snapshot();
        wal.compact(&events)?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        tracing::info!(path = %wal.path().display(), events = events.len(), "WAL compacted");
        Ok(())
    }
}

#[async_trait]
impl AppointmentStore for AppointmentLedger {
    async fn get(&self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.appointments.get(&id).map(|a| a.value().clone()))
    }

    async fn active_on(
        &self,
        calendar: Calendar,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        let ids = self
            .by_calendar_day
            .get(&(calendar, date))
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut found = self.collect(&ids);
        found.retain(Appointment::is_active);
        Ok(found)
    }

    async fn for_business_on(
        &self,
        business_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        let ids = self
            .by_business_day
            .get(&(business_id, date))
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut found = self.collect(&ids);
        found.sort_by_key(|a| (a.time_slot.start, a.created_at, a.id));
        Ok(found)
    }

    async fn last_sequence_on(&self, day: NaiveDate) -> Result<u32, StoreError> {
        Ok(self.last_sequence.get(&day).map_or(0, |s| *s))
    }

    async fn append(&self, event: &Event) -> Result<Appointment, StoreError> {
        let mut writer = self.writer.lock().await;
        self.check(event)?;
        if let Some(wal) = writer.as_mut() {
            let started = std::time::Instant::now();
            wal.append(event)?;
            metrics::histogram!(crate::observability::WAL_APPEND_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
        }
        self.apply(event)
    }
}
