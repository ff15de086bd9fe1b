use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, Weekday};
use rust_decimal::Decimal;
use ulid::Ulid;

use super::*;
use crate::catalog::InMemoryDirectory;
use crate::clock::{Clock, ManualClock};
use crate::model::*;
use crate::notify::NotifyHub;

const H: Minutes = 60;

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
}

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    date(d).and_hms_opt(h, m, 0).unwrap()
}

/// Monday 2 June 2025; the fixture clock starts the Sunday before.
fn mon() -> NaiveDate {
    date(2)
}

fn hours(day: Weekday, open: Minutes, close: Minutes) -> DayHours {
    DayHours {
        day,
        is_open: true,
        open_time: open,
        close_time: close,
    }
}

fn closed(day: Weekday) -> DayHours {
    DayHours {
        day,
        is_open: false,
        open_time: 0,
        close_time: 0,
    }
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotwise_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// Business open Mon 09–18 and Tue 09–17, closed Sunday. One staff member
/// available Mon 10–16 and off on Tuesday. One 30-minute service.
struct Fixture {
    engine: Arc<Engine>,
    directory: Arc<InMemoryDirectory>,
    clock: Arc<ManualClock>,
    business: Business,
    staff: Staff,
    service: Service,
}

impl Fixture {
    fn new() -> Self {
        Self::with_ledger(AppointmentLedger::in_memory())
    }

    fn with_ledger(ledger: AppointmentLedger) -> Self {
        let clock = Arc::new(ManualClock::new(at(1, 8, 0)));
        let business = Business {
            id: Ulid::new(),
            name: "Corner Barber".into(),
            verification_status: VerificationStatus::Approved,
            is_active: true,
            is_currently_open: true,
            temporary_closure_until: None,
            temporary_closure_reason: None,
            business_hours: vec![
                hours(Weekday::Mon, 9 * H, 18 * H),
                hours(Weekday::Tue, 9 * H, 17 * H),
                closed(Weekday::Sun),
            ],
        };
        let staff = Staff {
            id: Ulid::new(),
            business_id: business.id,
            name: "Ana".into(),
            is_active: true,
            availability: HashMap::from([
                (
                    Weekday::Mon,
                    StaffDay {
                        start: 10 * H,
                        end: 16 * H,
                        is_available: true,
                    },
                ),
                (
                    Weekday::Tue,
                    StaffDay {
                        start: 0,
                        end: 0,
                        is_available: false,
                    },
                ),
            ]),
        };
        let service = Service {
            id: Ulid::new(),
            business_id: business.id,
            name: "Haircut".into(),
            duration: 30,
            price: Decimal::new(2500, 2),
            is_active: true,
            assigned_staff: vec![staff.id],
            min_advance_booking: None,
        };

        let directory = Arc::new(InMemoryDirectory::new());
        directory.insert_business(business.clone()).unwrap();
        directory.insert_staff(staff.clone()).unwrap();
        directory.insert_service(service.clone()).unwrap();

        let engine = Arc::new(Engine::new(
            directory.clone(),
            Arc::new(ledger),
            clock.clone(),
            Arc::new(NotifyHub::new()),
        ));
        Self {
            engine,
            directory,
            clock,
            business,
            staff,
            service,
        }
    }

    /// A second engine over the same catalog and clock, reading `path`.
    fn reopen(&self, path: &Path) -> Engine {
        Engine::new(
            self.directory.clone(),
            Arc::new(AppointmentLedger::open(path).unwrap()),
            self.clock.clone(),
            Arc::new(NotifyHub::new()),
        )
    }

    fn update_business(&mut self, f: impl FnOnce(&mut Business)) {
        f(&mut self.business);
        self.directory.insert_business(self.business.clone()).unwrap();
    }

    /// Extra service of this business, open to every staff member.
    fn add_service(&self, duration: Minutes, f: impl FnOnce(&mut Service)) -> Service {
        let mut service = Service {
            id: Ulid::new(),
            business_id: self.business.id,
            name: format!("{duration}-minute service"),
            duration,
            price: Decimal::new(40, 0),
            is_active: true,
            assigned_staff: vec![],
            min_advance_booking: None,
        };
        f(&mut service);
        self.directory.insert_service(service.clone()).unwrap();
        service
    }

    fn add_staff(&self, f: impl FnOnce(&mut Staff)) -> Staff {
        let mut staff = Staff {
            id: Ulid::new(),
            business_id: self.business.id,
            name: "Ben".into(),
            is_active: true,
            availability: HashMap::new(),
        };
        f(&mut staff);
        self.directory.insert_staff(staff.clone()).unwrap();
        staff
    }

    fn request(&self, date: NaiveDate, start: Minutes) -> NewAppointment {
        NewAppointment {
            customer_id: Ulid::new(),
            service_id: self.service.id,
            staff_id: Some(self.staff.id),
            date,
            start,
            queue_number: None,
            discount: None,
            notes: None,
        }
    }

    async fn book(&self, date: NaiveDate, start: Minutes) -> Appointment {
        self.engine
            .create_appointment(self.request(date, start))
            .await
            .unwrap()
    }

    async fn slot_starts(&self, date: NaiveDate) -> Vec<Minutes> {
        self.engine
            .get_available_slots(self.service.id, Some(self.staff.id), date)
            .await
            .unwrap()
            .slots
            .iter()
            .map(|s| s.start)
            .collect()
    }
}

// ── Slot listing ─────────────────────────────────────────

#[tokio::test]
async fn staff_window_narrows_monday_slots() {
    let f = Fixture::new();
    let result = f
        .engine
        .get_available_slots(f.service.id, Some(f.staff.id), mon())
        .await
        .unwrap();

    assert!(!result.is_closed());
    assert_eq!(result.slots.len(), 12);
    let first = &result.slots[0];
    assert_eq!((first.start, first.end), (10 * H, 10 * H + 30));
    assert_eq!(first.display, "10:00 AM - 10:30 AM");
    let last = &result.slots[11];
    assert_eq!((last.start, last.end), (15 * H + 30, 16 * H));
    assert_eq!(last.display, "3:30 PM - 4:00 PM");
}

#[tokio::test]
async fn without_staff_the_business_window_applies() {
    let f = Fixture::new();
    let open_roster = f.add_service(30, |_| {});
    let result = f
        .engine
        .get_available_slots(open_roster.id, None, mon())
        .await
        .unwrap();
    assert_eq!(result.slots.len(), 18);
    assert_eq!(result.slots[0].start, 9 * H);
    assert_eq!(result.slots[17].end, 18 * H);
}

#[tokio::test]
async fn closed_sunday_reports_reason() {
    let f = Fixture::new();
    let result = f
        .engine
        .get_available_slots(f.service.id, Some(f.staff.id), date(8))
        .await
        .unwrap();

    assert!(result.is_closed());
    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        serde_json::json!({"slots": [], "message": "Business is closed on Sundays"})
    );
}

#[tokio::test]
async fn staff_day_off_closes_their_calendar() {
    let f = Fixture::new();
    let result = f
        .engine
        .get_available_slots(f.service.id, Some(f.staff.id), date(3))
        .await
        .unwrap();
    assert_eq!(result.closure, Some(Closure::StaffUnavailable));
    assert_eq!(result.message.as_deref(), Some("Staff is not available on this day"));
}

#[tokio::test]
async fn unconfigured_weekday_defaults_to_nine_to_six() {
    let f = Fixture::new();
    let open_roster = f.add_service(60, |_| {});
    // Thursday has no hours entry.
    let result = f
        .engine
        .get_available_slots(open_roster.id, None, date(5))
        .await
        .unwrap();
    let starts: Vec<_> = result.slots.iter().map(|s| s.start).collect();
    assert_eq!(starts, (9..18).map(|h| h * H).collect::<Vec<_>>());
}

#[tokio::test]
async fn ninety_minutes_fits_only_an_exact_window() {
    let mut f = Fixture::new();
    let long = f.add_service(90, |_| {});
    f.update_business(|b| b.business_hours.push(hours(Weekday::Wed, 9 * H, 10 * H + 30)));

    let exact = f
        .engine
        .get_available_slots(long.id, None, date(4))
        .await
        .unwrap();
    assert_eq!(exact.slots.len(), 1);
    assert_eq!((exact.slots[0].start, exact.slots[0].end), (9 * H, 10 * H + 30));

    f.update_business(|b| {
        b.business_hours.retain(|h| h.day != Weekday::Wed);
        b.business_hours.push(hours(Weekday::Wed, 9 * H, 10 * H + 29));
    });
    let short = f
        .engine
        .get_available_slots(long.id, None, date(4))
        .await
        .unwrap();
    assert!(short.slots.is_empty());
    // Fully booked-looking, but not a closure.
    assert!(!short.is_closed());
    assert!(short.message.is_none());
}

#[tokio::test]
async fn booked_interval_blocks_overlap_but_not_adjacent() {
    let f = Fixture::new();
    let booked = f.book(mon(), 10 * H).await;

    let starts = f.slot_starts(mon()).await;
    assert!(!starts.contains(&(10 * H)));
    assert!(starts.contains(&(10 * H + 30)));
    assert_eq!(starts.len(), 11);

    let err = f
        .engine
        .create_appointment(f.request(mon(), 10 * H + 15))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SlotConflict(id) if id == booked.id));

    f.book(mon(), 10 * H + 30).await;
}

#[tokio::test]
async fn repeated_reads_are_identical() {
    let f = Fixture::new();
    f.book(mon(), 12 * H).await;
    let a = f
        .engine
        .get_available_slots(f.service.id, Some(f.staff.id), mon())
        .await
        .unwrap();
    let b = f
        .engine
        .get_available_slots(f.service.id, Some(f.staff.id), mon())
        .await
        .unwrap();
    assert_eq!(a, b);
}

// ── Gates and validation ─────────────────────────────────

#[tokio::test]
async fn temporary_closure_lifts_after_its_timestamp() {
    let mut f = Fixture::new();
    let until = f.clock.now() + Duration::hours(2);
    f.update_business(|b| {
        b.temporary_closure_until = Some(until);
        b.temporary_closure_reason = Some("renovation".into());
    });

    let during = f
        .engine
        .get_business_availability(f.business.id, mon())
        .await
        .unwrap();
    assert!(!during.available);
    assert_eq!(
        during.reason.as_deref(),
        Some("Business is temporarily closed: renovation")
    );
    assert_eq!(during.closed_until, Some(until));
    assert!(during.business_hours.is_none());

    let slots = f
        .engine
        .get_available_slots(f.service.id, Some(f.staff.id), mon())
        .await
        .unwrap();
    assert_eq!(slots.closed_until, Some(until));
    assert!(slots.slots.is_empty());

    f.clock.set(until + Duration::seconds(1));
    let after = f
        .engine
        .get_business_availability(f.business.id, mon())
        .await
        .unwrap();
    assert!(after.available);
    assert!(after.reason.is_none());
    assert_eq!(
        after.business_hours,
        Some(DayWindow {
            day: Weekday::Mon,
            open_time: 9 * H,
            close_time: 18 * H,
        })
    );
}

#[tokio::test]
async fn business_availability_on_closed_weekday() {
    let f = Fixture::new();
    let a = f
        .engine
        .get_business_availability(f.business.id, date(8))
        .await
        .unwrap();
    assert!(!a.available);
    assert_eq!(a.reason.as_deref(), Some("Business is closed on Sundays"));
    assert!(a.closed_until.is_none());

    let err = f
        .engine
        .get_business_availability(Ulid::new(), mon())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "business", .. }));
}

#[tokio::test]
async fn unapproved_business_takes_no_bookings() {
    let mut f = Fixture::new();
    f.update_business(|b| b.verification_status = VerificationStatus::Pending);

    let slots = f
        .engine
        .get_available_slots(f.service.id, Some(f.staff.id), mon())
        .await
        .unwrap();
    assert_eq!(slots.message.as_deref(), Some("Business is not accepting bookings"));

    let err = f
        .engine
        .create_appointment(f.request(mon(), 10 * H))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Closed(Closure::NotAcceptingBookings)));
    assert_eq!(err.code(), "CLOSED");
}

#[tokio::test]
async fn inactive_staff_gates_the_day() {
    let f = Fixture::new();
    let away = f.add_staff(|s| s.is_active = false);
    let open_roster = f.add_service(30, |_| {});

    let slots = f
        .engine
        .get_available_slots(open_roster.id, Some(away.id), mon())
        .await
        .unwrap();
    assert_eq!(slots.closure, Some(Closure::StaffInactive));

    let mut request = f.request(mon(), 10 * H);
    request.service_id = open_roster.id;
    request.staff_id = Some(away.id);
    let err = f.engine.create_appointment(request).await.unwrap_err();
    assert!(matches!(err, EngineError::Closed(Closure::StaffInactive)));
}

#[tokio::test]
async fn staff_must_belong_to_business_and_roster() {
    let f = Fixture::new();
    let outsider = f.add_staff(|s| s.business_id = Ulid::new());
    let err = f
        .engine
        .get_available_slots(f.service.id, Some(outsider.id), mon())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(m) if m.contains("does not work at")));

    let colleague = f.add_staff(|_| {});
    let err = f
        .engine
        .get_available_slots(f.service.id, Some(colleague.id), mon())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(m) if m.contains("does not perform")));
}

#[tokio::test]
async fn unknown_or_retired_service() {
    let f = Fixture::new();
    let err = f
        .engine
        .get_available_slots(Ulid::new(), None, mon())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "service", .. }));
    assert_eq!(err.code(), "NOT_FOUND");

    let retired = f.add_service(30, |s| s.is_active = false);
    let err = f
        .engine
        .get_available_slots(retired.id, None, mon())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn booking_outside_effective_window_rejected() {
    let f = Fixture::new();
    // Business is open at 09:30 but the staff member starts at 10:00.
    let err = f
        .engine
        .create_appointment(f.request(mon(), 9 * H + 30))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(m) if m.contains("outside available hours")));

    let err = f
        .engine
        .create_appointment(f.request(mon(), 15 * H + 45))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn service_running_past_midnight_rejected() {
    let mut f = Fixture::new();
    f.update_business(|b| b.business_hours.push(hours(Weekday::Sat, 9 * H, 23 * H + 59)));
    let open_roster = f.add_service(30, |_| {});
    let mut request = f.request(date(7), 23 * H + 45);
    request.service_id = open_roster.id;
    request.staff_id = None;

    let err = f.engine.create_appointment(request).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(m) if m.contains("past midnight")));
}

#[tokio::test]
async fn discount_applied_to_final_price() {
    let f = Fixture::new();
    let mut request = f.request(mon(), 10 * H);
    request.discount = Some(Decimal::new(500, 2));
    let a = f.engine.create_appointment(request).await.unwrap();
    assert_eq!(a.final_price, Decimal::new(2000, 2));
    assert_eq!(a.discount_applied, Decimal::new(5, 0));
    assert_eq!(a.status, AppointmentStatus::Pending);

    let mut request = f.request(mon(), 11 * H);
    request.discount = Some(Decimal::new(30, 0));
    let err = f.engine.create_appointment(request).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn overlong_notes_rejected() {
    let f = Fixture::new();
    let mut request = f.request(mon(), 10 * H);
    request.notes = Some("x".repeat(crate::limits::MAX_NOTES_LEN + 1));
    let err = f.engine.create_appointment(request).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

// ── Advance notice ───────────────────────────────────────

#[tokio::test]
async fn min_advance_booking_hides_and_rejects_near_slots() {
    let f = Fixture::new();
    let notice = f.add_service(30, |s| {
        s.min_advance_booking = Some(AdvanceNotice {
            value: 2,
            unit: AdvanceUnit::Hours,
        });
    });
    f.clock.set(at(2, 9, 50));

    let slots = f
        .engine
        .get_available_slots(notice.id, Some(f.staff.id), mon())
        .await
        .unwrap();
    // Earliest start 11:50, so 11:30 is gone and 12:00 is first.
    assert_eq!(slots.slots[0].start, 12 * H);
    assert_eq!(slots.slots.len(), 8);

    let mut request = f.request(mon(), 11 * H + 30);
    request.service_id = notice.id;
    let err = f.engine.create_appointment(request.clone()).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(m) if m.contains("advance notice")));

    request.start = 12 * H;
    f.engine.create_appointment(request).await.unwrap();
}

#[test]
fn notice_past_calendar_end_saturates() {
    let f = Fixture::new();
    let mut service = f.service.clone();
    service.min_advance_booking = Some(AdvanceNotice {
        value: u32::MAX,
        unit: AdvanceUnit::Days,
    });
    let ctx = BookingContext {
        business: f.business.clone(),
        service,
        staff: None,
    };
    assert_eq!(ctx.earliest_start(at(1, 8, 0)), Some(NaiveDateTime::MAX));
    assert!(starts_at(mon(), 10 * H) < NaiveDateTime::MAX);
}

#[tokio::test]
async fn without_notice_rule_nothing_is_hidden() {
    let f = Fixture::new();
    f.clock.set(at(2, 13, 0));
    assert_eq!(f.slot_starts(mon()).await.len(), 12);
}

// ── Calendars ────────────────────────────────────────────

#[tokio::test]
async fn staffless_bookings_share_the_business_lane() {
    let f = Fixture::new();
    let open_roster = f.add_service(30, |_| {});
    let mut request = f.request(mon(), 10 * H);
    request.service_id = open_roster.id;
    request.staff_id = None;

    let first = f.engine.create_appointment(request.clone()).await.unwrap();
    assert_eq!(first.calendar(), Calendar::Business(f.business.id));
    let err = f
        .engine
        .create_appointment(request.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SlotConflict(id) if id == first.id));

    // The staff member's own calendar is separate.
    f.book(mon(), 10 * H).await;
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_for_same_slot_one_wins() {
    let f = Fixture::new();
    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = f.engine.clone();
        let request = f.request(mon(), 10 * H);
        handles.push(tokio::spawn(
            async move { engine.create_appointment(request).await },
        ));
    }

    let mut won = Vec::new();
    let mut conflicts = Vec::new();
    for h in handles {
        match h.await.unwrap() {
            Ok(a) => won.push(a),
            Err(EngineError::SlotConflict(id)) => conflicts.push(id),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(won.len(), 1);
    assert_eq!(conflicts, vec![won[0].id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_contenders_never_double_book() {
    let f = Fixture::new();
    let mut handles = Vec::new();
    for i in 0..16u32 {
        let engine = f.engine.clone();
        // Half aim at 10:00, half at 10:15. Any two of them overlap.
        let request = f.request(mon(), 10 * H + 15 * (i % 2));
        handles.push(tokio::spawn(
            async move { engine.create_appointment(request).await },
        ));
    }
    let mut won = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => won += 1,
            Err(e) => assert_eq!(e.code(), "SLOT_CONFLICT"),
        }
    }
    assert_eq!(won, 1);

    let listed = f.engine.list_appointments(f.business.id, mon()).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_get_distinct_sequential_queue_numbers() {
    let f = Fixture::new();
    let mut handles = Vec::new();
    for i in 0..12u32 {
        let engine = f.engine.clone();
        let request = f.request(mon(), 10 * H + 30 * i);
        handles.push(tokio::spawn(
            async move { engine.create_appointment(request).await },
        ));
    }
    let mut numbers = Vec::new();
    for h in handles {
        numbers.push(h.await.unwrap().unwrap().queue_number);
    }
    numbers.sort();
    let expected: Vec<_> = (1..=12).map(|n| format!("Q20250601-{n:03}")).collect();
    assert_eq!(numbers, expected);
}

// ── Queue numbers ────────────────────────────────────────

#[tokio::test]
async fn queue_numbers_count_up_per_creation_day() {
    let f = Fixture::new();
    let a = f.book(mon(), 10 * H).await;
    let b = f.book(mon(), 10 * H + 30).await;
    let c = f.book(mon(), 11 * H).await;
    assert_eq!(a.queue_number, "Q20250601-001");
    assert_eq!(b.queue_number, "Q20250601-002");
    assert_eq!(c.queue_number, "Q20250601-003");

    // A new creation day starts again at 001, whatever the appointment date.
    f.clock.set(at(2, 7, 0));
    let d = f.book(mon(), 12 * H).await;
    assert_eq!(d.queue_number, "Q20250602-001");
}

#[tokio::test]
async fn caller_supplied_queue_numbers() {
    let f = Fixture::new();

    let mut bad = f.request(mon(), 10 * H);
    bad.queue_number = Some("A-17".into());
    let err = f.engine.create_appointment(bad).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let mut own = f.request(mon(), 10 * H);
    own.queue_number = Some("Q20250601-002".into());
    let a = f.engine.create_appointment(own).await.unwrap();
    assert_eq!(a.queue_number, "Q20250601-002");

    // Generated numbering skips past the one already held.
    let b = f.book(mon(), 11 * H).await;
    assert_eq!(b.queue_number, "Q20250601-003");
    let c = f.book(mon(), 12 * H).await;
    assert_eq!(c.queue_number, "Q20250601-004");

    let mut taken = f.request(mon(), 13 * H);
    taken.queue_number = Some("Q20250601-003".into());
    let err = f.engine.create_appointment(taken).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(m) if m.contains("already taken")));
}

#[tokio::test]
async fn caller_number_for_another_date_leaves_today_alone() {
    let f = Fixture::new();

    let mut future = f.request(mon(), 10 * H);
    future.queue_number = Some("Q20250705-001".into());
    let a = f.engine.create_appointment(future).await.unwrap();
    assert_eq!(a.queue_number, "Q20250705-001");

    let b = f.book(mon(), 11 * H).await;
    assert_eq!(b.queue_number, "Q20250601-001");
    let c = f.book(mon(), 12 * H).await;
    assert_eq!(c.queue_number, "Q20250601-002");
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn full_lifecycle_then_terminal() {
    let f = Fixture::new();
    let a = f.book(mon(), 10 * H).await;

    assert_eq!(f.engine.approve(a.id).await.unwrap().status, AppointmentStatus::Approved);
    assert_eq!(f.engine.start(a.id).await.unwrap().status, AppointmentStatus::InProgress);
    let done = f.engine.complete(a.id).await.unwrap();
    assert_eq!(done.status, AppointmentStatus::Completed);
    assert!(done.updated_at >= done.created_at);

    let err = f.engine.complete(a.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            from: AppointmentStatus::Completed,
            to: AppointmentStatus::Completed
        }
    ));
    assert_eq!(err.code(), "INVALID_STATE_TRANSITION");

    // Completed no longer occupies the calendar.
    assert!(f.slot_starts(mon()).await.contains(&(10 * H)));
}

#[tokio::test]
async fn pending_cannot_skip_ahead() {
    let f = Fixture::new();
    let a = f.book(mon(), 10 * H).await;
    assert!(matches!(
        f.engine.start(a.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        f.engine.mark_no_show(a.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        f.engine.approve(Ulid::new()).await,
        Err(EngineError::NotFound { kind: "appointment", .. })
    ));
}

#[tokio::test]
async fn cancelling_frees_the_slot() {
    let f = Fixture::new();
    let a = f.book(mon(), 10 * H).await;
    f.engine.approve(a.id).await.unwrap();

    let cancelled = f
        .engine
        .cancel(a.id, Some("customer ill".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("customer ill"));

    assert!(f.slot_starts(mon()).await.contains(&(10 * H)));
    let again = f.book(mon(), 10 * H).await;
    assert_ne!(again.id, a.id);

    // Both remain visible to the business.
    assert_eq!(f.engine.list_appointments(f.business.id, mon()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn no_show_after_approval() {
    let f = Fixture::new();
    let a = f.book(mon(), 10 * H).await;
    f.engine.approve(a.id).await.unwrap();
    let missed = f.engine.mark_no_show(a.id).await.unwrap();
    assert_eq!(missed.status, AppointmentStatus::NoShow);
    assert!(f.engine.cancel(a.id, None).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_completions_commit_once() {
    let f = Fixture::new();
    let a = f.book(mon(), 10 * H).await;
    f.engine.approve(a.id).await.unwrap();
    f.engine.start(a.id).await.unwrap();
    let mut events = f.engine.notify.subscribe(f.business.id);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = f.engine.clone();
        handles.push(tokio::spawn(async move { engine.complete(a.id).await }));
    }
    let mut ok = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    assert_eq!(ok, 1);

    let mut completions = 0;
    while let Ok(event) = events.try_recv() {
        if let Event::StatusChanged {
            to: AppointmentStatus::Completed,
            ..
        } = event
        {
            completions += 1;
        }
    }
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn overlong_reason_rejected() {
    let f = Fixture::new();
    let a = f.book(mon(), 10 * H).await;
    let reason = "x".repeat(crate::limits::MAX_REASON_LEN + 1);
    let err = f.engine.cancel(a.id, Some(reason)).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(f.engine.get_appointment(a.id).await.unwrap().status, AppointmentStatus::Pending);
}

// ── Reschedule ───────────────────────────────────────────

#[tokio::test]
async fn reschedule_request_then_approve_moves_slot() {
    let f = Fixture::new();
    let a = f.book(mon(), 10 * H).await;
    f.engine.approve(a.id).await.unwrap();

    let requested = f
        .engine
        .request_reschedule(a.id, mon(), 14 * H, Some("late train".into()))
        .await
        .unwrap();
    let pending = requested.reschedule_request.clone().unwrap();
    assert_eq!(pending.time_slot, Span::new(14 * H, 14 * H + 30));
    assert_eq!(pending.reason.as_deref(), Some("late train"));
    // Requests hold nothing.
    assert!(f.slot_starts(mon()).await.contains(&(14 * H)));

    let moved = f.engine.approve_reschedule(a.id).await.unwrap();
    assert_eq!(moved.time_slot, Span::new(14 * H, 14 * H + 30));
    assert_eq!(moved.status, AppointmentStatus::Approved);
    assert!(moved.reschedule_request.is_none());
    assert_eq!(moved.queue_number, a.queue_number);

    let starts = f.slot_starts(mon()).await;
    assert!(starts.contains(&(10 * H)));
    assert!(!starts.contains(&(14 * H)));
}

#[tokio::test]
async fn reschedule_to_another_date() {
    let f = Fixture::new();
    let a = f.book(mon(), 10 * H).await;
    let next_monday = date(9);
    f.engine
        .request_reschedule(a.id, next_monday, 11 * H, None)
        .await
        .unwrap();
    let moved = f.engine.approve_reschedule(a.id).await.unwrap();
    assert_eq!(moved.date, next_monday);
    assert_eq!(moved.status, AppointmentStatus::Pending);

    assert!(f.engine.list_appointments(f.business.id, mon()).await.unwrap().is_empty());
    assert_eq!(
        f.engine
            .list_appointments(f.business.id, next_monday)
            .await
            .unwrap()
            .len(),
        1
    );
    assert!(!f.slot_starts(next_monday).await.contains(&(11 * H)));
}

#[tokio::test]
async fn reschedule_target_taken_before_approval() {
    let f = Fixture::new();
    let a = f.book(mon(), 10 * H).await;
    f.engine
        .request_reschedule(a.id, mon(), 14 * H, None)
        .await
        .unwrap();
    let b = f.book(mon(), 14 * H).await;

    let err = f.engine.approve_reschedule(a.id).await.unwrap_err();
    assert!(matches!(err, EngineError::SlotConflict(id) if id == b.id));

    let unchanged = f.engine.get_appointment(a.id).await.unwrap();
    assert_eq!(unchanged.time_slot, Span::new(10 * H, 10 * H + 30));
    assert!(unchanged.reschedule_request.is_some());
}

#[tokio::test]
async fn reschedule_may_overlap_its_own_slot() {
    let f = Fixture::new();
    let a = f.book(mon(), 10 * H).await;
    f.engine
        .request_reschedule(a.id, mon(), 10 * H + 15, None)
        .await
        .unwrap();
    let moved = f.engine.approve_reschedule(a.id).await.unwrap();
    assert_eq!(moved.time_slot.start, 10 * H + 15);
}

#[tokio::test]
async fn reschedule_rules() {
    let f = Fixture::new();
    let a = f.book(mon(), 10 * H).await;

    // Outside the staff member's hours.
    let err = f
        .engine
        .request_reschedule(a.id, mon(), 17 * H, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    // Into a closed day.
    let err = f
        .engine
        .request_reschedule(a.id, date(8), 10 * H, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Closed(Closure::ClosedOnWeekday(Weekday::Sun))));

    // Nothing to approve or reject yet.
    assert!(matches!(
        f.engine.approve_reschedule(a.id).await,
        Err(EngineError::Validation(_))
    ));

    f.engine
        .request_reschedule(a.id, mon(), 12 * H, None)
        .await
        .unwrap();
    let err = f
        .engine
        .request_reschedule(a.id, mon(), 13 * H, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(m) if m.contains("already pending")));

    let rejected = f.engine.reject_reschedule(a.id).await.unwrap();
    assert!(rejected.reschedule_request.is_none());
    assert!(f.engine.reject_reschedule(a.id).await.is_err());
}

#[tokio::test]
async fn terminal_appointments_cannot_reschedule() {
    let f = Fixture::new();
    let a = f.book(mon(), 10 * H).await;
    f.engine
        .request_reschedule(a.id, mon(), 12 * H, None)
        .await
        .unwrap();
    let cancelled = f.engine.cancel(a.id, None).await.unwrap();
    assert!(cancelled.reschedule_request.is_none());

    let err = f
        .engine
        .request_reschedule(a.id, mon(), 13 * H, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

// ── Events, persistence, collaborators ───────────────────

#[tokio::test]
async fn committed_changes_are_published() {
    let f = Fixture::new();
    let mut events = f.engine.notify.subscribe(f.business.id);

    let a = f.book(mon(), 10 * H).await;
    f.engine.approve(a.id).await.unwrap();

    match events.recv().await.unwrap() {
        Event::AppointmentCreated { appointment } => assert_eq!(appointment, a),
        other => panic!("expected creation, got {other:?}"),
    }
    match events.recv().await.unwrap() {
        Event::StatusChanged { id, from, to, .. } => {
            assert_eq!(id, a.id);
            assert_eq!((from, to), (AppointmentStatus::Pending, AppointmentStatus::Approved));
        }
        other => panic!("expected status change, got {other:?}"),
    }

    // A rejected write publishes nothing.
    let _ = f.engine.create_appointment(f.request(mon(), 10 * H)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn appointments_survive_restart() {
    let path = test_wal_path("restart.wal");
    let f = Fixture::with_ledger(AppointmentLedger::open(&path).unwrap());
    let a = f.book(mon(), 10 * H).await;
    let b = f.book(mon(), 11 * H).await;
    f.engine.cancel(a.id, None).await.unwrap();

    let engine = f.reopen(&path);
    assert_eq!(
        engine.get_appointment(a.id).await.unwrap().status,
        AppointmentStatus::Cancelled
    );
    assert_eq!(engine.get_appointment(b.id).await.unwrap(), b);

    let slots = engine
        .get_available_slots(f.service.id, Some(f.staff.id), mon())
        .await
        .unwrap();
    let starts: Vec<_> = slots.slots.iter().map(|s| s.start).collect();
    assert!(starts.contains(&(10 * H)));
    assert!(!starts.contains(&(11 * H)));

    // Numbering continues from what the log holds.
    let c = engine
        .create_appointment(f.request(mon(), 12 * H))
        .await
        .unwrap();
    assert_eq!(c.queue_number, "Q20250601-003");
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn prune_keeps_current_days() {
    let f = Fixture::new();
    f.book(mon(), 10 * H).await;
    // The Monday calendar lock stays; the Sunday queue counter goes.
    assert_eq!(f.engine.prune_day_locks(mon()), 1);
    assert_eq!(f.engine.prune_day_locks(date(3)), 1);
    assert_eq!(f.engine.prune_day_locks(date(3)), 0);
}

struct BrokenStore;

#[async_trait::async_trait]
impl AppointmentStore for BrokenStore {
    async fn get(&self, _: Ulid) -> Result<Option<Appointment>, StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk gone")))
    }
    async fn active_on(&self, _: Calendar, _: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk gone")))
    }
    async fn for_business_on(&self, _: Ulid, _: NaiveDate) -> Result<Vec<Appointment>, StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk gone")))
    }
    async fn last_sequence_on(&self, _: NaiveDate) -> Result<u32, StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk gone")))
    }
    async fn append(&self, _: &Event) -> Result<Appointment, StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk gone")))
    }
}

#[tokio::test]
async fn store_failure_is_an_error_not_an_empty_day() {
    let f = Fixture::new();
    let engine = Engine::new(
        f.directory.clone(),
        Arc::new(BrokenStore),
        f.clock.clone(),
        Arc::new(NotifyHub::new()),
    );

    let err = engine
        .get_available_slots(f.service.id, Some(f.staff.id), mon())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(StoreError::Io(_))));
    assert_eq!(err.code(), "STORE_ERROR");

    // A closed day never reaches the store.
    let closed = engine
        .get_available_slots(f.service.id, Some(f.staff.id), date(8))
        .await
        .unwrap();
    assert!(closed.is_closed());

    let err = engine
        .create_appointment(f.request(mon(), 10 * H))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "STORE_ERROR");
}
