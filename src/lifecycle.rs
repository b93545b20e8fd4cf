use std::fmt;

use crate::model::{BookingStatus, Ms, StatusKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    Invalid { from: StatusKind, to: StatusKind },
    MissingRemarks,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::Invalid { from, to } => {
                write!(f, "cannot move a {from} booking to {to}")
            }
            TransitionError::MissingRemarks => write!(f, "rejection requires admin remarks"),
        }
    }
}

impl std::error::Error for TransitionError {}

/// The edges of the lifecycle graph. `rejected` and `cancelled` have none.
pub fn is_allowed(from: StatusKind, to: StatusKind) -> bool {
    use StatusKind::*;
    matches!(
        (from, to),
        (Pending, Approved) | (Pending, Rejected) | (Pending, Cancelled) | (Approved, Cancelled)
    )
}

/// Compute the status a booking moves to.
///
/// Returns `Ok(None)` when `to` equals the current, non-terminal status: the
/// request carries no transition and the per-state data (approval stamp) is kept.
/// Anything requested of a terminal booking is an invalid transition, including
/// repeating the terminal status itself.
pub fn transition(
    current: &BookingStatus,
    to: StatusKind,
    actor_id: &str,
    now: Ms,
    remarks: Option<&str>,
) -> Result<Option<BookingStatus>, TransitionError> {
    let from = current.kind();
    if from == to && !from.is_terminal() {
        return Ok(None);
    }
    if !is_allowed(from, to) {
        return Err(TransitionError::Invalid { from, to });
    }
    let next = match to {
        StatusKind::Approved => BookingStatus::Approved {
            approved_at: now,
            approved_by: actor_id.to_string(),
        },
        StatusKind::Rejected => {
            let remarks = remarks
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or(TransitionError::MissingRemarks)?;
            BookingStatus::Rejected {
                remarks: remarks.to_string(),
                rejected_at: now,
                rejected_by: actor_id.to_string(),
            }
        }
        StatusKind::Cancelled => BookingStatus::Cancelled {
            cancelled_at: now,
            cancelled_by: actor_id.to_string(),
        },
        StatusKind::Pending => unreachable!("no edge leads back to pending"),
    };
    Ok(Some(next))
}

/// Initial status of a new booking: admins' requests are approved on the spot.
pub fn initial_status(is_admin: bool, actor_id: &str, now: Ms) -> BookingStatus {
    if is_admin {
        BookingStatus::Approved {
            approved_at: now,
            approved_by: actor_id.to_string(),
        }
    } else {
        BookingStatus::Pending
    }
}
