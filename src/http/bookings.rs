use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::DEFAULT_PAGE_LIMIT;
use crate::model::*;
use crate::policy::Actor;
use crate::service::{BookingChanges, NewBooking, Page, PageRequest};

use super::{ApiError, AppState};

// ── Wire types ───────────────────────────────────────────

/// Booking as returned to clients. Status-specific data is flattened next to `status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub requester_id: String,
    pub department_id: Option<String>,
    pub purpose: String,
    pub attendees: u32,
    pub requirements: Vec<String>,
    pub additional_notes: Option<String>,
    pub status: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_remarks: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    pub revision: u32,
}

pub(super) fn timestamp(ms: Ms) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

impl From<Reservation> for BookingView {
    fn from(r: Reservation) -> Self {
        let mut view = BookingView {
            id: r.id,
            resource_id: r.resource_id,
            date: r.date,
            start_time: r.span.start,
            end_time: r.span.end,
            requester_id: r.requester_id,
            department_id: r.department_id,
            purpose: r.purpose,
            attendees: r.attendees,
            requirements: r.requirements,
            additional_notes: r.notes,
            status: r.status.kind(),
            approved_at: None,
            approved_by: None,
            admin_remarks: None,
            rejected_at: None,
            rejected_by: None,
            cancelled_at: None,
            cancelled_by: None,
            created_at: timestamp(r.created_at),
            updated_at: timestamp(r.updated_at),
            updated_by: r.updated_by,
            revision: r.revision,
        };
        match r.status {
            BookingStatus::Pending => {}
            BookingStatus::Approved {
                approved_at,
                approved_by,
            } => {
                view.approved_at = Some(timestamp(approved_at));
                view.approved_by = Some(approved_by);
            }
            BookingStatus::Rejected {
                remarks,
                rejected_at,
                rejected_by,
            } => {
                view.admin_remarks = Some(remarks);
                view.rejected_at = Some(timestamp(rejected_at));
                view.rejected_by = Some(rejected_by);
            }
            BookingStatus::Cancelled {
                cancelled_at,
                cancelled_by,
            } => {
                view.cancelled_at = Some(timestamp(cancelled_at));
                view.cancelled_by = Some(cancelled_by);
            }
        }
        view
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingBody {
    pub resource_id: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub purpose: Option<String>,
    pub attendees: Option<i64>,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub additional_notes: Option<String>,
}

impl CreateBookingBody {
    fn into_request(self) -> Result<NewBooking, ApiError> {
        Ok(NewBooking {
            resource_id: parse_ulid("resourceId", &required("resourceId", self.resource_id)?)?,
            date: parse_date("date", &required("date", self.date)?)?,
            start: parse_time("startTime", &required("startTime", self.start_time)?)?,
            end: parse_time("endTime", &required("endTime", self.end_time)?)?,
            purpose: required("purpose", self.purpose)?,
            attendees: parse_attendees(required("attendees", self.attendees)?)?,
            requirements: self.requirements,
            notes: self.additional_notes.filter(|n| !n.trim().is_empty()),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingBody {
    pub resource_id: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub purpose: Option<String>,
    pub attendees: Option<i64>,
    pub requirements: Option<Vec<String>>,
    pub additional_notes: Option<String>,
    pub status: Option<String>,
    pub admin_remarks: Option<String>,
}

impl UpdateBookingBody {
    fn into_changes(self) -> Result<BookingChanges, ApiError> {
        Ok(BookingChanges {
            resource_id: self
                .resource_id
                .map(|s| parse_ulid("resourceId", &s))
                .transpose()?,
            date: self.date.map(|s| parse_date("date", &s)).transpose()?,
            start: self.start_time.map(|s| parse_time("startTime", &s)).transpose()?,
            end: self.end_time.map(|s| parse_time("endTime", &s)).transpose()?,
            purpose: self.purpose,
            attendees: self.attendees.map(parse_attendees).transpose()?,
            requirements: self.requirements,
            notes: self.additional_notes,
            status: self.status.map(|s| parse_status(&s)).transpose()?,
            admin_remarks: self.admin_remarks,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub resource_id: Option<String>,
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub status: Option<String>,
    pub requester_id: Option<String>,
    pub department_id: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl ListParams {
    fn into_query(self) -> Result<(ReservationFilter, PageRequest), ApiError> {
        let (date_from, date_to) = match self.date {
            Some(date) => {
                let date = parse_date("date", &date)?;
                (Some(date), Some(date))
            }
            None => (
                self.from.map(|s| parse_date("from", &s)).transpose()?,
                self.to.map(|s| parse_date("to", &s)).transpose()?,
            ),
        };
        let filter = ReservationFilter {
            resource_id: self
                .resource_id
                .map(|s| parse_ulid("resourceId", &s))
                .transpose()?,
            date_from,
            date_to,
            status: self.status.map(|s| parse_status(&s)).transpose()?,
            requester_id: self.requester_id.filter(|s| !s.is_empty()),
            department_id: self.department_id.filter(|s| !s.is_empty()),
        };
        let page = PageRequest {
            page: parse_count("page", self.page)?.unwrap_or(1),
            limit: parse_count("limit", self.limit)?.unwrap_or(DEFAULT_PAGE_LIMIT),
        };
        Ok((filter, page))
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub pages: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BookingList {
    pub bookings: Vec<BookingView>,
    pub pagination: Pagination,
}

impl From<Page<Reservation>> for BookingList {
    fn from(page: Page<Reservation>) -> Self {
        Self {
            bookings: page.items.into_iter().map(BookingView::from).collect(),
            pagination: Pagination {
                total: page.total,
                page: page.page,
                limit: page.limit,
                pages: page.pages,
            },
        }
    }
}

// ── Parsing helpers ──────────────────────────────────────

fn required<T>(field: &'static str, value: Option<T>) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::bad_request(field, format!("{field} is required")))
}

pub(super) fn parse_ulid(field: &'static str, s: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(s.trim())
        .map_err(|_| ApiError::bad_request(field, format!("{field} is not a valid id")))
}

pub(super) fn parse_date(field: &'static str, s: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request(field, format!("{field} must be YYYY-MM-DD")))
}

fn parse_time(field: &'static str, s: &str) -> Result<TimeOfDay, ApiError> {
    s.trim()
        .parse()
        .map_err(|_| ApiError::bad_request(field, format!("{field} must be HH:MM")))
}

fn parse_status(s: &str) -> Result<StatusKind, ApiError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "pending" => Ok(StatusKind::Pending),
        "approved" => Ok(StatusKind::Approved),
        "rejected" => Ok(StatusKind::Rejected),
        "cancelled" | "canceled" => Ok(StatusKind::Cancelled),
        other => Err(ApiError::bad_request("status", format!("unknown status: {other}"))),
    }
}

fn parse_attendees(n: i64) -> Result<u32, ApiError> {
    u32::try_from(n)
        .ok()
        .filter(|&n| n >= 1)
        .ok_or_else(|| ApiError::bad_request("attendees", "attendees must be at least 1"))
}

fn parse_count(field: &'static str, s: Option<String>) -> Result<Option<usize>, ApiError> {
    s.filter(|s| !s.is_empty())
        .map(|s| {
            s.trim()
                .parse()
                .map_err(|_| ApiError::bad_request(field, format!("{field} must be a positive integer")))
        })
        .transpose()
}

/// Ids that cannot parse cannot exist.
fn booking_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::NotFound(format!("booking {raw} not found")))
}

// ── Handlers ─────────────────────────────────────────────

pub async fn create(
    State(state): State<AppState>,
    actor: Actor,
    body: Result<Json<CreateBookingBody>, JsonRejection>,
) -> Result<(StatusCode, Json<BookingView>), ApiError> {
    let Json(body) = body?;
    let created = state
        .service
        .create_booking(&actor, body.into_request()?)
        .await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn list(
    State(state): State<AppState>,
    actor: Actor,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<BookingList>, ApiError> {
    let Query(params) = params?;
    let (filter, page) = params.into_query()?;
    let page = state.service.list_bookings(&actor, &filter, page).await?;
    Ok(Json(page.into()))
}

pub async fn get(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<BookingView>, ApiError> {
    let booking = state.service.get_booking(&actor, booking_id(&id)?).await?;
    Ok(Json(booking.into()))
}

pub async fn update(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    body: Result<Json<UpdateBookingBody>, JsonRejection>,
) -> Result<Json<BookingView>, ApiError> {
    let id = booking_id(&id)?;
    let Json(body) = body?;
    let updated = state
        .service
        .update_booking(&actor, id, body.into_changes()?)
        .await?;
    Ok(Json(updated.into()))
}

pub async fn delete(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<BookingView>, ApiError> {
    let removed = state
        .service
        .delete_booking(&actor, booking_id(&id)?)
        .await?;
    Ok(Json(removed.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_flattens_rejection() {
        let r = Reservation {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            date: "2025-06-02".parse().unwrap(),
            span: Span::new("09:00".parse().unwrap(), "10:30".parse().unwrap()),
            requester_id: "alice".into(),
            department_id: None,
            purpose: "Recital".into(),
            attendees: 50,
            requirements: vec![],
            notes: Some("piano".into()),
            status: BookingStatus::Rejected {
                remarks: "closed".into(),
                rejected_at: 1_700_000_000_000,
                rejected_by: "root".into(),
            },
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_000,
            updated_by: "root".into(),
            revision: 1,
        };
        let json = serde_json::to_value(BookingView::from(r)).unwrap();
        assert_eq!(json["status"], "rejected");
        assert_eq!(json["startTime"], "09:00");
        assert_eq!(json["endTime"], "10:30");
        assert_eq!(json["date"], "2025-06-02");
        assert_eq!(json["adminRemarks"], "closed");
        assert_eq!(json["additionalNotes"], "piano");
        assert!(json.get("approvedBy").is_none());
    }

    #[test]
    fn create_body_reports_missing_and_bad_fields() {
        let err = CreateBookingBody::default().into_request().unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { field: "resourceId", .. }));

        let body = CreateBookingBody {
            resource_id: Some(Ulid::new().to_string()),
            date: Some("2025-06-02".into()),
            start_time: Some("9am".into()),
            end_time: Some("10:00".into()),
            purpose: Some("Talk".into()),
            attendees: Some(10),
            ..Default::default()
        };
        assert!(matches!(
            body.into_request(),
            Err(ApiError::BadRequest { field: "startTime", .. })
        ));

        let body = CreateBookingBody {
            resource_id: Some(Ulid::new().to_string()),
            date: Some("2025-06-02".into()),
            start_time: Some("09:00".into()),
            end_time: Some("10:00".into()),
            purpose: Some("Talk".into()),
            attendees: Some(-3),
            ..Default::default()
        };
        assert!(matches!(
            body.into_request(),
            Err(ApiError::BadRequest { field: "attendees", .. })
        ));
    }

    #[test]
    fn list_params_date_overrides_range() {
        let params = ListParams {
            date: Some("2025-06-02".into()),
            from: Some("2025-01-01".into()),
            status: Some("Approved".into()),
            limit: Some("25".into()),
            ..Default::default()
        };
        let (filter, page) = params.into_query().unwrap();
        let day: NaiveDate = "2025-06-02".parse().unwrap();
        assert_eq!(filter.date_from, Some(day));
        assert_eq!(filter.date_to, Some(day));
        assert_eq!(filter.status, Some(StatusKind::Approved));
        assert_eq!(page, PageRequest { page: 1, limit: 25 });
    }

    #[test]
    fn update_body_parses_status() {
        let body = UpdateBookingBody {
            status: Some("cancelled".into()),
            ..Default::default()
        };
        assert_eq!(
            body.into_changes().unwrap(),
            BookingChanges {
                status: Some(StatusKind::Cancelled),
                ..Default::default()
            }
        );
        let body = UpdateBookingBody {
            status: Some("archived".into()),
            ..Default::default()
        };
        assert!(matches!(
            body.into_changes(),
            Err(ApiError::BadRequest { field: "status", .. })
        ));
    }
}
