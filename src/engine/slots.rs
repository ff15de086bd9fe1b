use crate::limits::MIN_SLOT_CADENCE_MINUTES;
use crate::model::*;

/// Distance between consecutive slot starts for a service of `duration`.
pub fn cadence(duration: Minutes) -> Minutes {
    duration.max(MIN_SLOT_CADENCE_MINUTES)
}

/// Lazily walks an open window producing `[t, t + duration)` candidates,
/// starting at the window's open and stepping by [`cadence`]. A candidate
/// that would end after close is dropped, never truncated, and ends the walk.
#[derive(Debug, Clone)]
pub struct SlotIter {
    next_start: Minutes,
    close: Minutes,
    duration: Minutes,
    step: Minutes,
}

impl SlotIter {
    pub fn new(window: Span, duration: Minutes) -> Self {
        Self {
            next_start: window.start,
            close: window.end,
            duration,
            step: cadence(duration),
        }
    }
}

impl Iterator for SlotIter {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        if self.duration == 0 {
            return None;
        }
        let start = self.next_start;
        let end = start.checked_add(self.duration)?;
        if end > self.close {
            return None;
        }
        self.next_start = start.saturating_add(self.step);
        Some(Span::new(start, end))
    }
}

/// All bookable slots in `window`, ascending, with display strings.
pub fn generate_slots(window: Span, duration: Minutes) -> Vec<Slot> {
    SlotIter::new(window, duration).map(Slot::from_span).collect()
}
