use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::limits::QUEUE_SEQUENCE_WIDTH;

/// `Q{YYYYMMDD}-{NNN}`
pub fn format_queue_number(day: NaiveDate, sequence: u32) -> String {
    format!(
        "Q{}-{:0width$}",
        day.format("%Y%m%d"),
        sequence,
        width = QUEUE_SEQUENCE_WIDTH
    )
}

/// Inverse of [`format_queue_number`]. Sequences past 999 widen rather than wrap.
pub fn parse_queue_number(s: &str) -> Option<(NaiveDate, u32)> {
    let rest = s.strip_prefix('Q')?;
    let (date, seq) = rest.split_once('-')?;
    if date.len() != 8 || seq.len() < QUEUE_SEQUENCE_WIDTH {
        return None;
    }
    if !date.bytes().chain(seq.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let day = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    let sequence: u32 = seq.parse().ok()?;
    (sequence > 0).then_some((day, sequence))
}

/// Per-day serialisation point for queue numbers. Each day's mutex holds
/// the last sequence this process issued, `None` until seeded from the store.
#[derive(Default)]
pub struct QueueAllocator {
    days: DashMap<NaiveDate, Arc<Mutex<Option<u32>>>>,
}

impl QueueAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `day`'s counter. Hold the guard across issue + insert.
    pub async fn lock_day(&self, day: NaiveDate) -> OwnedMutexGuard<Option<u32>> {
        let counter = self.days.entry(day).or_default().value().clone();
        counter.lock_owned().await
    }

    /// Drop counters for days before `before` that nobody is waiting on.
    pub fn prune(&self, before: NaiveDate) -> usize {
        let start = self.days.len();
        self.days
            .retain(|day, counter| *day >= before || Arc::strong_count(counter) > 1);
        start - self.days.len()
    }
}

/// Next sequence to try: one past the larger of what we issued and the
/// highest the store holds for the day.
pub(crate) fn next_sequence(last_issued: Option<u32>, stored_last: u32) -> u32 {
    last_issued.unwrap_or(0).max(stored_last) + 1
}
