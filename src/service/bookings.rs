use chrono::NaiveDate;
use tracing::{debug, info};
use ulid::Ulid;

use crate::engine::{EngineError, ReservationStore, ResourceRegistry, now_ms};
use crate::lifecycle;
use crate::limits::*;
use crate::model::*;
use crate::observability::{AUTHZ_DENIED_TOTAL, BOOKING_CONFLICTS_TOTAL, BOOKING_TRANSITIONS_TOTAL};
use crate::policy::{self, Action, Actor};

use super::{BookingError, BookingService};

/// A booking request as submitted by its requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub purpose: String,
    pub attendees: u32,
    pub requirements: Vec<String>,
    pub notes: Option<String>,
}

/// Partial update. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingChanges {
    pub resource_id: Option<Ulid>,
    pub date: Option<NaiveDate>,
    pub start: Option<TimeOfDay>,
    pub end: Option<TimeOfDay>,
    pub purpose: Option<String>,
    pub attendees: Option<u32>,
    pub requirements: Option<Vec<String>>,
    pub notes: Option<String>,
    pub status: Option<StatusKind>,
    pub admin_remarks: Option<String>,
}

impl BookingChanges {
    pub fn touches_schedule(&self) -> bool {
        self.resource_id.is_some() || self.date.is_some() || self.start.is_some() || self.end.is_some()
    }

    fn touches_details(&self) -> bool {
        self.touches_schedule()
            || self.purpose.is_some()
            || self.attendees.is_some()
            || self.requirements.is_some()
            || self.notes.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && !self.touches_details()
    }

    /// The request does nothing but move the booking to `cancelled`.
    pub fn cancels_only(&self) -> bool {
        self.status == Some(StatusKind::Cancelled) && !self.touches_details()
    }

    /// The action a request is authorized as.
    pub fn action(&self) -> Action {
        match self.status {
            Some(StatusKind::Approved) => Action::Approve,
            Some(StatusKind::Rejected) => Action::Reject,
            Some(StatusKind::Cancelled) if self.cancels_only() => Action::Cancel,
            _ => Action::UpdateSchedule,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based.
    pub page: usize,
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub pages: usize,
}

impl<S> BookingService<S>
where
    S: ReservationStore + ResourceRegistry,
{
    /// Create a booking. Admin requests are approved immediately; everyone else's
    /// start pending. Either way the slot must not overlap an approved booking.
    pub async fn create_booking(&self, actor: &Actor, req: NewBooking) -> Result<Reservation, BookingError> {
        if !policy::can_perform(actor, Action::Create, None) {
            return Err(denied(actor, Action::Create));
        }
        let span = span_of(req.start, req.end)?;
        validate_details(&req.purpose, req.attendees, &req.requirements, req.notes.as_deref())?;
        self.require_bookable(req.resource_id).await?;

        if let Some(holder) = self
            .store
            .find_overlapping(req.resource_id, req.date, span, None)
            .await?
        {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL, "action" => "create").increment(1);
            return Err(BookingError::slot_taken(&holder));
        }

        let now = now_ms();
        let reservation = Reservation {
            id: Ulid::new(),
            resource_id: req.resource_id,
            date: req.date,
            span,
            requester_id: actor.id.clone(),
            department_id: actor.department_id.clone(),
            purpose: req.purpose.trim().to_string(),
            attendees: req.attendees,
            requirements: req.requirements,
            notes: req.notes.filter(|n| !n.trim().is_empty()),
            status: lifecycle::initial_status(actor.is_admin(), &actor.id, now),
            created_at: now,
            updated_at: now,
            updated_by: actor.id.clone(),
            revision: 0,
        };
        self.store
            .insert(reservation.clone())
            .await
            .map_err(|e| match e {
                EngineError::NotFound(id) if id == reservation.resource_id => missing_resource(id),
                e => store_error(Action::Create, e),
            })?;

        info!(
            id = %reservation.id,
            resource = %reservation.resource_id,
            date = %reservation.date,
            start = %reservation.span.start,
            end = %reservation.span.end,
            status = %reservation.status.kind(),
            by = %actor.id,
            "booking created"
        );
        Ok(reservation)
    }

    pub async fn get_booking(&self, actor: &Actor, id: Ulid) -> Result<Reservation, BookingError> {
        let booking = self.store.get(id).await.ok_or(BookingError::NotFound(id))?;
        if !policy::can_perform(actor, Action::View, Some(&booking)) {
            return Err(denied(actor, Action::View));
        }
        Ok(booking)
    }

    /// Bookings matching `filter` that `actor` may view, one page at a time.
    pub async fn list_bookings(
        &self,
        actor: &Actor,
        filter: &ReservationFilter,
        page: PageRequest,
    ) -> Result<Page<Reservation>, BookingError> {
        if page.page == 0 {
            return Err(BookingError::validation("page", "page must be at least 1"));
        }
        if page.limit == 0 {
            return Err(BookingError::validation("limit", "limit must be at least 1"));
        }
        let limit = page.limit.min(MAX_PAGE_LIMIT);

        let visible: Vec<Reservation> = self
            .store
            .list(filter)
            .await
            .into_iter()
            .filter(|b| policy::can_perform(actor, Action::View, Some(b)))
            .collect();
        let total = visible.len();
        let items = visible
            .into_iter()
            .skip((page.page - 1).saturating_mul(limit))
            .take(limit)
            .collect();

        Ok(Page {
            items,
            total,
            page: page.page,
            limit,
            pages: total.div_ceil(limit),
        })
    }

    /// Apply a partial update: a status transition, schedule/detail edits, or both.
    ///
    /// Checks run in a fixed order: authorization, then the lifecycle (an invalid
    /// transition beats missing remarks), then field validation, then overlap.
    pub async fn update_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        changes: BookingChanges,
    ) -> Result<Reservation, BookingError> {
        if changes.is_empty() {
            return Err(BookingError::validation("body", "no changes requested"));
        }
        let current = self.store.get(id).await.ok_or(BookingError::NotFound(id))?;
        let action = changes.action();
        if !policy::authorize(actor, action, &current, changes.cancels_only()) {
            return Err(denied(actor, action));
        }

        let now = now_ms();
        let mut next = current.clone();
        if let Some(to) = changes.status
            && let Some(status) = lifecycle::transition(
                &current.status,
                to,
                &actor.id,
                now,
                changes.admin_remarks.as_deref(),
            )?
        {
            next.status = status;
        }
        if changes
            .admin_remarks
            .as_ref()
            .is_some_and(|r| r.len() > MAX_REMARKS_LEN)
        {
            return Err(BookingError::validation(
                "adminRemarks",
                format!("remarks exceed {MAX_REMARKS_LEN} bytes"),
            ));
        }

        if let Some(resource_id) = changes.resource_id {
            next.resource_id = resource_id;
        }
        if let Some(date) = changes.date {
            next.date = date;
        }
        if changes.start.is_some() || changes.end.is_some() {
            next.span = span_of(
                changes.start.unwrap_or(current.span.start),
                changes.end.unwrap_or(current.span.end),
            )?;
        }
        if let Some(purpose) = changes.purpose {
            next.purpose = purpose.trim().to_string();
        }
        if let Some(attendees) = changes.attendees {
            next.attendees = attendees;
        }
        if let Some(requirements) = changes.requirements {
            next.requirements = requirements;
        }
        if let Some(notes) = changes.notes {
            // Blank notes clear them.
            next.notes = Some(notes).filter(|n| !n.trim().is_empty());
        }
        validate_details(&next.purpose, next.attendees, &next.requirements, next.notes.as_deref())?;

        if next.resource_id != current.resource_id {
            self.require_bookable(next.resource_id).await?;
        }
        let rescheduled = next.resource_id != current.resource_id
            || next.date != current.date
            || next.span != current.span;
        let becomes_approved = next.status.is_approved() && !current.status.is_approved();
        if next.status.is_approved()
            && (rescheduled || becomes_approved)
            && let Some(holder) = self
                .store
                .find_overlapping(next.resource_id, next.date, next.span, Some(id))
                .await?
        {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL, "action" => action.as_str()).increment(1);
            return Err(BookingError::slot_taken(&holder));
        }

        next.updated_at = now;
        next.updated_by = actor.id.clone();
        next.revision = current.revision + 1;
        self.store
            .update(next.clone())
            .await
            .map_err(|e| match e {
                EngineError::NotFound(rid) if rid == next.resource_id => missing_resource(rid),
                e => store_error(action, e),
            })?;

        let (from, to) = (current.status.kind(), next.status.kind());
        if from != to {
            metrics::counter!(
                BOOKING_TRANSITIONS_TOTAL,
                "from" => from.as_str(),
                "to" => to.as_str()
            )
            .increment(1);
        }
        info!(%id, %action, %from, %to, by = %actor.id, "booking updated");
        Ok(next)
    }

    /// Hard-delete a booking, returning the removed record.
    pub async fn delete_booking(&self, actor: &Actor, id: Ulid) -> Result<Reservation, BookingError> {
        let current = self.store.get(id).await.ok_or(BookingError::NotFound(id))?;
        if !policy::authorize(actor, Action::Delete, &current, false) {
            return Err(denied(actor, Action::Delete));
        }
        // Refuse if the booking moved on (e.g. got approved) since the check above.
        let removed = self
            .store
            .delete(id, Some(current.revision))
            .await
            .map_err(|e| store_error(Action::Delete, e))?;
        info!(%id, status = %removed.status.kind(), by = %actor.id, "booking deleted");
        Ok(removed)
    }

    /// Overlap detector over the store: would `[start, end)` on `date` collide with
    /// an approved booking other than `exclude`?
    pub async fn conflicts(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        start: TimeOfDay,
        end: TimeOfDay,
        exclude: Option<Ulid>,
    ) -> Result<bool, BookingError> {
        let span = span_of(start, end)?;
        Ok(self
            .store
            .find_overlapping(resource_id, date, span, exclude)
            .await?
            .is_some())
    }

    /// The resource must exist and be open for bookings.
    async fn require_bookable(&self, resource_id: Ulid) -> Result<Resource, BookingError> {
        let resource = self
            .store
            .resource(resource_id)
            .await
            .ok_or_else(|| missing_resource(resource_id))?;
        if resource.status != ResourceStatus::Available {
            return Err(BookingError::validation(
                "resourceId",
                format!("{} is {} and cannot be booked", resource.name, resource.status),
            ));
        }
        Ok(resource)
    }
}

fn denied(actor: &Actor, action: Action) -> BookingError {
    metrics::counter!(AUTHZ_DENIED_TOTAL, "action" => action.as_str()).increment(1);
    debug!(actor = %actor.id, role = ?actor.role, %action, "denied");
    BookingError::Forbidden {
        action: action.as_str(),
    }
}

fn missing_resource(resource_id: Ulid) -> BookingError {
    BookingError::validation("resourceId", format!("resource {resource_id} does not exist"))
}

fn store_error(action: Action, e: EngineError) -> BookingError {
    if matches!(e, EngineError::Conflict(_) | EngineError::Stale(_)) {
        metrics::counter!(BOOKING_CONFLICTS_TOTAL, "action" => action.as_str()).increment(1);
    }
    e.into()
}

fn span_of(start: TimeOfDay, end: TimeOfDay) -> Result<Span, BookingError> {
    Span::try_new(start, end)
        .ok_or_else(|| BookingError::validation("endTime", "end time must be after start time"))
}

fn validate_details(
    purpose: &str,
    attendees: u32,
    requirements: &[String],
    notes: Option<&str>,
) -> Result<(), BookingError> {
    if purpose.trim().is_empty() {
        return Err(BookingError::validation("purpose", "purpose is required"));
    }
    if purpose.len() > MAX_PURPOSE_LEN {
        return Err(BookingError::validation(
            "purpose",
            format!("purpose exceeds {MAX_PURPOSE_LEN} bytes"),
        ));
    }
    if attendees == 0 {
        return Err(BookingError::validation("attendees", "attendees must be at least 1"));
    }
    if requirements.len() > MAX_REQUIREMENTS {
        return Err(BookingError::validation(
            "requirements",
            format!("at most {MAX_REQUIREMENTS} requirements"),
        ));
    }
    if requirements
        .iter()
        .any(|r| r.trim().is_empty() || r.len() > MAX_REQUIREMENT_LEN)
    {
        return Err(BookingError::validation(
            "requirements",
            format!("requirements must be non-empty and at most {MAX_REQUIREMENT_LEN} bytes"),
        ));
    }
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(BookingError::validation(
            "additionalNotes",
            format!("notes exceed {MAX_NOTES_LEN} bytes"),
        ));
    }
    Ok(())
}
