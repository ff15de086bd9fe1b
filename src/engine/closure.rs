use chrono::NaiveDateTime;

use crate::model::*;

/// Day-level gates evaluated before any hours are computed, in order:
/// the business must be active, approved and open for bookings, and must
/// not be inside a temporary closure. Independent of weekday.
pub fn check_business(business: &Business, now: NaiveDateTime) -> Result<(), Closure> {
    let accepting = business.is_active
        && business.verification_status == VerificationStatus::Approved
        && business.is_currently_open;
    if !accepting {
        return Err(Closure::NotAcceptingBookings);
    }
    if let Some(until) = business.temporary_closure_until
        && until > now
    {
        return Err(Closure::TemporarilyClosed {
            reason: business.temporary_closure_reason.clone(),
            until,
        });
    }
    Ok(())
}

/// An inactive staff member gates the whole day for their calendar.
pub fn check_staff(staff: Option<&Staff>) -> Result<(), Closure> {
    match staff {
        Some(s) if !s.is_active => Err(Closure::StaffInactive),
        _ => Ok(()),
    }
}
