use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::NaiveDate;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::policy::{self, Action, Actor};
use crate::service::{NewResource, ResourceChanges};

use super::bookings::{BookingView, parse_date};
use super::{ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceBody {
    pub name: Option<String>,
    pub location: Option<String>,
    pub capacity: Option<i64>,
    pub status: Option<String>,
}

impl ResourceBody {
    fn into_new(self) -> Result<NewResource, ApiError> {
        Ok(NewResource {
            name: self
                .name
                .ok_or_else(|| ApiError::bad_request("name", "name is required"))?,
            location: self.location,
            capacity: parse_capacity(
                self.capacity
                    .ok_or_else(|| ApiError::bad_request("capacity", "capacity is required"))?,
            )?,
            status: self.status.map(|s| parse_resource_status(&s)).transpose()?,
        })
    }

    fn into_changes(self) -> Result<ResourceChanges, ApiError> {
        Ok(ResourceChanges {
            name: self.name,
            location: self.location,
            capacity: self.capacity.map(parse_capacity).transpose()?,
            status: self.status.map(|s| parse_resource_status(&s)).transpose()?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityParams {
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeSpan {
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityView {
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub free: Vec<FreeSpan>,
}

fn parse_capacity(n: i64) -> Result<u32, ApiError> {
    u32::try_from(n)
        .ok()
        .filter(|&n| n >= 1)
        .ok_or_else(|| ApiError::bad_request("capacity", "capacity must be at least 1"))
}

fn parse_resource_status(s: &str) -> Result<ResourceStatus, ApiError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "available" => Ok(ResourceStatus::Available),
        "unavailable" => Ok(ResourceStatus::Unavailable),
        "maintenance" => Ok(ResourceStatus::Maintenance),
        other => Err(ApiError::bad_request("status", format!("unknown status: {other}"))),
    }
}

fn resource_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::NotFound(format!("resource {raw} not found")))
}

pub async fn list(State(state): State<AppState>, _actor: Actor) -> Json<Vec<Resource>> {
    Json(state.service.list_resources().await)
}

pub async fn get(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<Resource>, ApiError> {
    Ok(Json(state.service.get_resource(resource_id(&id)?).await?))
}

pub async fn create(
    State(state): State<AppState>,
    actor: Actor,
    body: Result<Json<ResourceBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Resource>), ApiError> {
    let Json(body) = body?;
    let created = state
        .service
        .create_resource(&actor, body.into_new()?)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    body: Result<Json<ResourceBody>, JsonRejection>,
) -> Result<Json<Resource>, ApiError> {
    let id = resource_id(&id)?;
    let Json(body) = body?;
    let updated = state
        .service
        .update_resource(&actor, id, body.into_changes()?)
        .await?;
    Ok(Json(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .delete_resource(&actor, resource_id(&id)?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn availability(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<String>,
    params: Result<Query<AvailabilityParams>, QueryRejection>,
) -> Result<Json<AvailabilityView>, ApiError> {
    let id = resource_id(&id)?;
    let Query(params) = params?;
    let date = params
        .date
        .ok_or_else(|| ApiError::bad_request("date", "date is required"))?;
    let date = parse_date("date", &date)?;
    let free = state
        .service
        .availability(id, date)
        .await?
        .into_iter()
        .map(|s| FreeSpan {
            start_time: s.start,
            end_time: s.end,
        })
        .collect();
    Ok(Json(AvailabilityView {
        resource_id: id,
        date,
        free,
    }))
}

/// Server-sent events for one resource. Booking payloads pass the same view
/// rule as `GET /bookings/:id`; deletions carry only the id.
pub async fn events(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let id = resource_id(&id)?;
    let rx = state.service.events(id).await?;
    debug!(resource = %id, actor = %actor.id, "event stream opened");

    let stream = futures::stream::unfold((rx, actor), |(mut rx, actor)| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(sse) = to_sse(&event, &actor) {
                        return Some((Ok::<_, Infallible>(sse), (rx, actor)));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn to_sse(event: &Event, actor: &Actor) -> Option<SseEvent> {
    let data = match event {
        Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation, .. } => {
            if !policy::can_perform(actor, Action::View, Some(reservation)) {
                return None;
            }
            json!({ "booking": BookingView::from(reservation.clone()) })
        }
        Event::ReservationDeleted { id, .. } => json!({ "id": id }),
        Event::ResourceUpdated { resource } => json!({ "resource": resource }),
        Event::ResourceDeleted { id } => json!({ "id": id }),
        Event::ResourceCreated { .. } => return None,
    };
    SseEvent::default().event(event.kind()).json_data(data).ok()
}
