use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Read/write access to bookable resources.
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    async fn resource(&self, id: Ulid) -> Option<Resource>;
    async fn resources(&self) -> Vec<Resource>;
    async fn create_resource(&self, resource: Resource) -> Result<(), EngineError>;
    async fn update_resource(&self, resource: Resource) -> Result<(), EngineError>;
    async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError>;
    /// Committed events for one resource; fails with `NotFound` once it is deleted.
    async fn subscribe(&self, id: Ulid) -> Result<broadcast::Receiver<Event>, EngineError>;
}

/// Booking records keyed by resource, day and time range.
///
/// `insert` and `update` re-validate that no two approved reservations overlap
/// and fail with `EngineError::Conflict` otherwise; `update` also fails with
/// `EngineError::Stale` unless `next.revision` is one past the stored revision.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get(&self, id: Ulid) -> Option<Reservation>;
    /// First approved reservation on the same resource and day overlapping `span`.
    async fn find_overlapping(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Option<Reservation>, EngineError>;
    async fn list(&self, filter: &ReservationFilter) -> Vec<Reservation>;
    async fn insert(&self, reservation: Reservation) -> Result<(), EngineError>;
    async fn update(&self, next: Reservation) -> Result<(), EngineError>;
    /// Fails with `EngineError::Stale` if `expected_revision` is set and no longer current.
    async fn delete(&self, id: Ulid, expected_revision: Option<u32>) -> Result<Reservation, EngineError>;
    async fn free_spans(&self, resource_id: Ulid, date: NaiveDate) -> Result<Vec<Span>, EngineError>;
}

#[async_trait]
impl ResourceRegistry for Engine {
    async fn resource(&self, id: Ulid) -> Option<Resource> {
        Engine::resource(self, id).await
    }

    async fn resources(&self) -> Vec<Resource> {
        self.list_resources().await
    }

    async fn create_resource(&self, resource: Resource) -> Result<(), EngineError> {
        Engine::create_resource(self, resource).await
    }

    async fn update_resource(&self, resource: Resource) -> Result<(), EngineError> {
        Engine::update_resource(self, resource).await
    }

    async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError> {
        Engine::delete_resource(self, id).await
    }

    async fn subscribe(&self, id: Ulid) -> Result<broadcast::Receiver<Event>, EngineError> {
        Engine::subscribe(self, id).await
    }
}

#[async_trait]
impl ReservationStore for Engine {
    async fn get(&self, id: Ulid) -> Option<Reservation> {
        self.get_reservation(id).await
    }

    async fn find_overlapping(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Option<Reservation>, EngineError> {
        self.find_approved_overlap(resource_id, date, &span, exclude)
            .await
    }

    async fn list(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        self.list_reservations(filter).await
    }

    async fn insert(&self, reservation: Reservation) -> Result<(), EngineError> {
        self.insert_reservation(reservation).await
    }

    async fn update(&self, next: Reservation) -> Result<(), EngineError> {
        self.update_reservation(next).await
    }

    async fn delete(&self, id: Ulid, expected_revision: Option<u32>) -> Result<Reservation, EngineError> {
        self.delete_reservation(id, expected_revision).await
    }

    async fn free_spans(&self, resource_id: Ulid, date: NaiveDate) -> Result<Vec<Span>, EngineError> {
        self.compute_free_spans(resource_id, date).await
    }
}
