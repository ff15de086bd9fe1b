use crate::model::AppointmentStatus;
use crate::model::AppointmentStatus::*;

use super::EngineError;

impl AppointmentStatus {
    /// Statuses that occupy a calendar and take part in overlap checks.
    pub fn is_active(self) -> bool {
        matches!(self, Pending | Approved | InProgress)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Completed | Cancelled | NoShow)
    }

    pub fn allowed_transitions(self) -> &'static [AppointmentStatus] {
        match self {
            Pending => &[Approved, Cancelled],
            Approved => &[InProgress, Cancelled, NoShow],
            InProgress => &[Completed, Cancelled, NoShow],
            Completed | Cancelled | NoShow => &[],
        }
    }

    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// A reschedule request may be raised while the appointment is active.
    pub fn can_reschedule(self) -> bool {
        self.is_active()
    }
}

pub(crate) fn validate_transition(
    from: AppointmentStatus,
    to: AppointmentStatus,
) -> Result<(), EngineError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}
