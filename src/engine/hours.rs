use chrono::Weekday;

use crate::limits::{DEFAULT_CLOSE_MINUTES, DEFAULT_OPEN_MINUTES};
use crate::model::*;

/// Result of merging business hours with staff availability for one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveHours {
    Open(Span),
    Closed(Closure),
}

/// The business's own window for `day`.
///
/// A weekday missing from `business_hours` gets the default 09:00–18:00,
/// not a closed day.
pub fn business_window(business: &Business, day: Weekday) -> EffectiveHours {
    match business.hours_for(day) {
        None => EffectiveHours::Open(Span::new(DEFAULT_OPEN_MINUTES, DEFAULT_CLOSE_MINUTES)),
        Some(h) if !h.is_open => EffectiveHours::Closed(Closure::ClosedOnWeekday(day)),
        Some(h) => EffectiveHours::Open(Span::new(h.open_time, h.close_time)),
    }
}

/// Most-restrictive-wins merge of business hours and staff availability.
///
/// Business closed: closed, staff never reopens a day. Staff unavailable:
/// closed. Otherwise the later open and the earlier close; a staff member
/// with no entry for `day` leaves the business window untouched.
pub fn resolve_hours(business: &Business, staff: Option<&Staff>, day: Weekday) -> EffectiveHours {
    let window = match business_window(business, day) {
        EffectiveHours::Open(w) => w,
        closed => return closed,
    };

    let Some(entry) = staff.and_then(|s| s.availability.get(&day)) else {
        return EffectiveHours::Open(window);
    };
    if !entry.is_available {
        return EffectiveHours::Closed(Closure::StaffUnavailable);
    }

    let open = window.start.max(entry.start);
    let close = window.end.min(entry.end);
    if open >= close {
        // Staff hours fall entirely outside business hours.
        return EffectiveHours::Closed(Closure::StaffUnavailable);
    }
    EffectiveHours::Open(Span::new(open, close))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;
    use ulid::Ulid;

    use super::*;

    fn business(hours: Vec<DayHours>) -> Business {
        Business {
            id: Ulid::new(),
            name: "Studio".into(),
            verification_status: VerificationStatus::Approved,
            is_active: true,
            is_currently_open: true,
            temporary_closure_until: None,
            temporary_closure_reason: None,
            business_hours: hours,
        }
    }

    fn hours(day: Weekday, is_open: bool, open: Minutes, close: Minutes) -> DayHours {
        DayHours {
            day,
            is_open,
            open_time: open,
            close_time: close,
        }
    }

    fn staff(entries: Vec<(Weekday, StaffDay)>) -> Staff {
        Staff {
            id: Ulid::new(),
            business_id: Ulid::new(),
            name: "Sam".into(),
            is_active: true,
            availability: entries.into_iter().collect::<HashMap<_, _>>(),
        }
    }

    fn avail(start: Minutes, end: Minutes, is_available: bool) -> StaffDay {
        StaffDay {
            start,
            end,
            is_available,
        }
    }

    #[test]
    fn staff_narrows_business_window() {
        let b = business(vec![hours(Weekday::Mon, true, 9 * 60, 18 * 60)]);
        let s = staff(vec![(Weekday::Mon, avail(10 * 60, 16 * 60, true))]);
        assert_eq!(
            resolve_hours(&b, Some(&s), Weekday::Mon),
            EffectiveHours::Open(Span::new(600, 960))
        );
    }

    #[test]
    fn staff_cannot_widen_business_window() {
        let b = business(vec![hours(Weekday::Mon, true, 10 * 60, 14 * 60)]);
        let s = staff(vec![(Weekday::Mon, avail(8 * 60, 20 * 60, true))]);
        assert_eq!(
            resolve_hours(&b, Some(&s), Weekday::Mon),
            EffectiveHours::Open(Span::new(600, 840))
        );
    }

    #[test]
    fn partial_overlap_takes_later_open_and_earlier_close() {
        let b = business(vec![hours(Weekday::Tue, true, 9 * 60, 17 * 60)]);
        let s = staff(vec![(Weekday::Tue, avail(12 * 60, 19 * 60, true))]);
        assert_eq!(
            resolve_hours(&b, Some(&s), Weekday::Tue),
            EffectiveHours::Open(Span::new(720, 1020))
        );
    }

    #[test]
    fn equal_boundaries_are_kept() {
        let b = business(vec![hours(Weekday::Wed, true, 9 * 60, 17 * 60)]);
        let s = staff(vec![(Weekday::Wed, avail(9 * 60, 17 * 60, true))]);
        assert_eq!(
            resolve_hours(&b, Some(&s), Weekday::Wed),
            EffectiveHours::Open(Span::new(540, 1020))
        );
    }

    #[test]
    fn missing_business_day_gets_default_hours() {
        let b = business(vec![]);
        assert_eq!(
            resolve_hours(&b, None, Weekday::Thu),
            EffectiveHours::Open(Span::new(DEFAULT_OPEN_MINUTES, DEFAULT_CLOSE_MINUTES))
        );
    }

    #[test]
    fn closed_business_day_wins_over_available_staff() {
        let b = business(vec![hours(Weekday::Sun, false, 0, 0)]);
        let s = staff(vec![(Weekday::Sun, avail(9 * 60, 17 * 60, true))]);
        assert_eq!(
            resolve_hours(&b, Some(&s), Weekday::Sun),
            EffectiveHours::Closed(Closure::ClosedOnWeekday(Weekday::Sun))
        );
    }

    #[test]
    fn unavailable_staff_closes_the_day() {
        let b = business(vec![]);
        let s = staff(vec![(Weekday::Fri, avail(9 * 60, 17 * 60, false))]);
        assert_eq!(
            resolve_hours(&b, Some(&s), Weekday::Fri),
            EffectiveHours::Closed(Closure::StaffUnavailable)
        );
    }

    #[test]
    fn staff_without_entry_leaves_business_hours() {
        let b = business(vec![hours(Weekday::Sat, true, 8 * 60, 12 * 60)]);
        let s = staff(vec![(Weekday::Mon, avail(10 * 60, 11 * 60, true))]);
        assert_eq!(
            resolve_hours(&b, Some(&s), Weekday::Sat),
            EffectiveHours::Open(Span::new(480, 720))
        );
    }

    #[test]
    fn disjoint_staff_hours_close_the_day() {
        let b = business(vec![hours(Weekday::Mon, true, 9 * 60, 12 * 60)]);
        let s = staff(vec![(Weekday::Mon, avail(13 * 60, 17 * 60, true))]);
        assert_eq!(
            resolve_hours(&b, Some(&s), Weekday::Mon),
            EffectiveHours::Closed(Closure::StaffUnavailable)
        );
    }

    fn window() -> impl Strategy<Value = (Minutes, Minutes)> {
        (0..1439u32).prop_flat_map(|s| (Just(s), (s + 1)..=1439u32))
    }

    proptest! {
        #[test]
        fn effective_window_never_wider_than_either_input(
            (bo, bc) in window(),
            (so, sc) in window(),
            business_open in any::<bool>(),
            staff_available in any::<bool>(),
        ) {
            let b = business(vec![hours(Weekday::Mon, business_open, bo, bc)]);
            let s = staff(vec![(Weekday::Mon, avail(so, sc, staff_available))]);
            match resolve_hours(&b, Some(&s), Weekday::Mon) {
                EffectiveHours::Open(w) => {
                    prop_assert!(business_open && staff_available);
                    prop_assert!(Span::new(bo, bc).contains_span(&w));
                    prop_assert!(Span::new(so, sc).contains_span(&w));
                }
                EffectiveHours::Closed(_) => {
                    prop_assert!(!business_open || !staff_available || bo.max(so) >= bc.min(sc));
                }
            }
        }
    }
}
