use std::io;

use thiserror::Error;
use ulid::Ulid;

use crate::model::{AppointmentStatus, Closure};
use crate::time::TimeError;

/// Failures from the collaborator stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("queue number {0} already issued")]
    DuplicateQueueNumber(String),
    #[error("unknown appointment: {0}")]
    UnknownAppointment(Ulid),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("WAL error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Ulid },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Malformed(#[from] TimeError),
    #[error("{0}")]
    Closed(Closure),
    #[error("slot conflicts with appointment {0}")]
    SlotConflict(Ulid),
    #[error("cannot move appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("could not allocate a queue number after {0} attempts")]
    AllocationRace(u32),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub(crate) fn not_found(kind: &'static str, id: Ulid) -> Self {
        EngineError::NotFound { kind, id }
    }

    /// Stable machine-readable code for the wire protocol.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::Malformed(_) => "MALFORMED_INPUT",
            EngineError::Closed(_) => "CLOSED",
            EngineError::SlotConflict(_) => "SLOT_CONFLICT",
            EngineError::InvalidTransition { .. } => "INVALID_STATE_TRANSITION",
            EngineError::AllocationRace(_) => "ALLOCATION_RACE",
            EngineError::Store(StoreError::DuplicateQueueNumber(_)) => "ALLOCATION_RACE",
            EngineError::Store(_) => "STORE_ERROR",
        }
    }
}
