use crate::time::Minutes;

/// Slot cadence never goes finer than this, however short the service.
pub const MIN_SLOT_CADENCE_MINUTES: Minutes = 10;

/// Hours assumed for a weekday the business never configured.
pub const DEFAULT_OPEN_MINUTES: Minutes = 9 * 60;
pub const DEFAULT_CLOSE_MINUTES: Minutes = 18 * 60;

/// Attempts at issuing a queue number before giving up with a race error.
pub const QUEUE_ALLOCATION_ATTEMPTS: u32 = 3;

/// Queue sequence is zero-padded to this many digits.
pub const QUEUE_SEQUENCE_WIDTH: usize = 3;

/// Longest advance notice a service may demand, in days.
pub const MAX_ADVANCE_NOTICE_DAYS: i64 = 3650;

pub const MAX_REASON_LEN: usize = 500;
pub const MAX_NOTES_LEN: usize = 2000;

/// Longest accepted protocol line, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
