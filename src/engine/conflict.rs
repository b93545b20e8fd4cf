use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

/// The approved reservation in `candidates` that `span` collides with, if any.
///
/// Only approved reservations hold a slot; pending, rejected and cancelled ones are
/// transparent. `exclude` skips the reservation being re-checked against itself.
pub fn find_conflict<'a>(
    candidates: impl IntoIterator<Item = &'a Reservation>,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<&'a Reservation> {
    candidates.into_iter().find(|r| {
        r.status.is_approved() && Some(r.id) != exclude && r.span.overlaps(span)
    })
}

/// Overlap detector: does `span` on `date` collide with an approved reservation?
pub fn conflicts(rs: &ResourceState, date: NaiveDate, span: &Span, exclude: Option<Ulid>) -> bool {
    find_conflict(rs.overlapping(date, span), span, exclude).is_some()
}

pub(crate) fn check_no_conflict(
    rs: &ResourceState,
    date: NaiveDate,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(rs.overlapping(date, span), span, exclude) {
        Some(holder) => Err(EngineError::Conflict(holder.id)),
        None => Ok(()),
    }
}

/// A state whose resource was deleted while the caller queued for its lock is gone.
pub(crate) fn check_live(rs: &ResourceState) -> Result<(), EngineError> {
    if rs.deleted {
        return Err(EngineError::NotFound(rs.id()));
    }
    Ok(())
}

/// New reservations, and reservations moving in, need an available resource.
pub(crate) fn check_bookable(rs: &ResourceState) -> Result<(), EngineError> {
    check_live(rs)?;
    match rs.resource.status {
        ResourceStatus::Available => Ok(()),
        status => Err(EngineError::Unavailable(rs.id(), status)),
    }
}

pub(crate) fn validate_reservation(r: &Reservation) -> Result<(), EngineError> {
    if r.span.start >= r.span.end {
        return Err(EngineError::LimitExceeded("empty time range"));
    }
    if r.purpose.len() > MAX_PURPOSE_LEN {
        return Err(EngineError::LimitExceeded("purpose too long"));
    }
    if r.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    if r.requirements.len() > MAX_REQUIREMENTS {
        return Err(EngineError::LimitExceeded("too many requirements"));
    }
    if r.requirements.iter().any(|t| t.len() > MAX_REQUIREMENT_LEN) {
        return Err(EngineError::LimitExceeded("requirement too long"));
    }
    if r.requester_id.len() > MAX_ID_LEN
        || r.department_id.as_ref().is_some_and(|d| d.len() > MAX_ID_LEN)
    {
        return Err(EngineError::LimitExceeded("identifier too long"));
    }
    if let BookingStatus::Rejected { remarks, .. } = &r.status
        && remarks.len() > MAX_REMARKS_LEN
    {
        return Err(EngineError::LimitExceeded("remarks too long"));
    }
    Ok(())
}

pub(crate) fn validate_resource(resource: &Resource) -> Result<(), EngineError> {
    if resource.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    if resource.location.as_ref().is_some_and(|l| l.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("resource location too long"));
    }
    Ok(())
}
