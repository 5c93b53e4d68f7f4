use thiserror::Error;
use ulid::Ulid;

use crate::clock::ClockError;
use crate::model::{BookingStatus, UnknownStatus};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("invalid time: {0}")]
    Time(#[from] ClockError),
    #[error(transparent)]
    Status(#[from] UnknownStatus),
    #[error("booking {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("already exists: {0}")]
    Duplicate(String),
    #[error("slot {0} is already reserved")]
    Conflict(Ulid),
    #[error("provider service {0} has bookings and cannot be deleted")]
    HasBookings(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

/// Coarse classification surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Duplicate,
    NotFound,
    Conflict,
    InUse,
    Limit,
    Storage,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_)
            | EngineError::Time(_)
            | EngineError::Status(_)
            | EngineError::InvalidTransition { .. } => ErrorKind::Validation,
            EngineError::Duplicate(_) => ErrorKind::Duplicate,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::HasBookings(_) => ErrorKind::InUse,
            EngineError::LimitExceeded(_) => ErrorKind::Limit,
            EngineError::WalError(_) => ErrorKind::Storage,
        }
    }
}
