use std::fmt;

use ulid::Ulid;

use crate::engine::EngineError;
use crate::lifecycle::TransitionError;
use crate::model::{Reservation, StatusKind};

#[derive(Debug)]
pub enum BookingError {
    /// A field of the request is missing, malformed or out of range.
    Validation { field: &'static str, message: String },
    /// The slot is held by an approved booking, or the booking changed under us.
    Conflict { holder: Option<Ulid>, message: String },
    Forbidden { action: &'static str },
    NotFound(Ulid),
    InvalidTransition { from: StatusKind, to: StatusKind },
    Store(EngineError),
}

impl BookingError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        BookingError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Conflict naming the approved booking that holds the slot.
    pub fn slot_taken(holder: &Reservation) -> Self {
        BookingError::Conflict {
            holder: Some(holder.id),
            message: format!(
                "slot already booked on {} from {} to {} (booking {})",
                holder.date, holder.span.start, holder.span.end, holder.id
            ),
        }
    }
}

impl fmt::Display for BookingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingError::Validation { field, message } => write!(f, "{field}: {message}"),
            BookingError::Conflict { message, .. } => f.write_str(message),
            BookingError::Forbidden { action } => write!(f, "not allowed to {action}"),
            BookingError::NotFound(id) => write!(f, "not found: {id}"),
            BookingError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition from {from} to {to}")
            }
            BookingError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookingError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineError> for BookingError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(id) => BookingError::NotFound(id),
            EngineError::Conflict(holder) => BookingError::Conflict {
                holder: Some(holder),
                message: format!("slot already taken by approved booking {holder}"),
            },
            EngineError::Stale(id) => BookingError::Conflict {
                holder: None,
                message: format!("booking {id} was modified concurrently, retry"),
            },
            EngineError::HasReservations(id) => BookingError::validation(
                "id",
                format!("resource {id} still has bookings"),
            ),
            EngineError::Unavailable(id, status) => BookingError::validation(
                "resourceId",
                format!("resource {id} is {status} and cannot be booked"),
            ),
            EngineError::LimitExceeded(msg) => BookingError::validation("body", msg),
            e @ (EngineError::AlreadyExists(_) | EngineError::WalError(_)) => {
                BookingError::Store(e)
            }
        }
    }
}

impl From<TransitionError> for BookingError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::Invalid { from, to } => BookingError::InvalidTransition { from, to },
            TransitionError::MissingRemarks => {
                BookingError::validation("adminRemarks", "remarks are required to reject a booking")
            }
        }
    }
}
