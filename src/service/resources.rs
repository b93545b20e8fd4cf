use chrono::NaiveDate;
use tokio::sync::broadcast;
use tracing::info;
use ulid::Ulid;

use crate::engine::{ReservationStore, ResourceRegistry};
use crate::limits::MAX_NAME_LEN;
use crate::model::*;
use crate::observability::AUTHZ_DENIED_TOTAL;
use crate::policy::Actor;

use super::{BookingError, BookingService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResource {
    pub name: String,
    pub location: Option<String>,
    pub capacity: u32,
    /// Defaults to `Available`.
    pub status: Option<ResourceStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceChanges {
    pub name: Option<String>,
    pub location: Option<String>,
    pub capacity: Option<u32>,
    pub status: Option<ResourceStatus>,
}

impl<S> BookingService<S>
where
    S: ReservationStore + ResourceRegistry,
{
    pub async fn list_resources(&self) -> Vec<Resource> {
        self.store.resources().await
    }

    pub async fn get_resource(&self, id: Ulid) -> Result<Resource, BookingError> {
        self.store
            .resource(id)
            .await
            .ok_or(BookingError::NotFound(id))
    }

    pub async fn create_resource(&self, actor: &Actor, req: NewResource) -> Result<Resource, BookingError> {
        require_admin(actor)?;
        let resource = Resource {
            id: Ulid::new(),
            name: req.name.trim().to_string(),
            location: req.location,
            capacity: req.capacity,
            status: req.status.unwrap_or(ResourceStatus::Available),
        };
        validate_resource(&resource)?;
        self.store.create_resource(resource.clone()).await?;
        info!(id = %resource.id, name = %resource.name, by = %actor.id, "resource created");
        Ok(resource)
    }

    /// Changing the status does not touch existing bookings; it only gates new ones.
    pub async fn update_resource(
        &self,
        actor: &Actor,
        id: Ulid,
        changes: ResourceChanges,
    ) -> Result<Resource, BookingError> {
        require_admin(actor)?;
        let mut resource = self.get_resource(id).await?;
        if let Some(name) = changes.name {
            resource.name = name.trim().to_string();
        }
        if let Some(location) = changes.location {
            resource.location = Some(location);
        }
        if let Some(capacity) = changes.capacity {
            resource.capacity = capacity;
        }
        if let Some(status) = changes.status {
            resource.status = status;
        }
        validate_resource(&resource)?;
        self.store.update_resource(resource.clone()).await?;
        info!(%id, status = %resource.status, by = %actor.id, "resource updated");
        Ok(resource)
    }

    pub async fn delete_resource(&self, actor: &Actor, id: Ulid) -> Result<(), BookingError> {
        require_admin(actor)?;
        self.store.delete_resource(id).await?;
        info!(%id, by = %actor.id, "resource deleted");
        Ok(())
    }

    /// Live feed of committed changes to one resource and its bookings. Callers
    /// filter booking payloads through the view rule.
    pub async fn events(&self, resource_id: Ulid) -> Result<broadcast::Receiver<Event>, BookingError> {
        Ok(self.store.subscribe(resource_id).await?)
    }

    /// Free `[start, end)` ranges of a day once approved bookings are taken out.
    pub async fn availability(&self, resource_id: Ulid, date: NaiveDate) -> Result<Vec<Span>, BookingError> {
        Ok(self.store.free_spans(resource_id, date).await?)
    }
}

fn require_admin(actor: &Actor) -> Result<(), BookingError> {
    if actor.is_admin() {
        return Ok(());
    }
    metrics::counter!(AUTHZ_DENIED_TOTAL, "action" => "manage_resources").increment(1);
    Err(BookingError::Forbidden {
        action: "manage resources",
    })
}

fn validate_resource(resource: &Resource) -> Result<(), BookingError> {
    if resource.name.is_empty() {
        return Err(BookingError::validation("name", "name is required"));
    }
    if resource.name.len() > MAX_NAME_LEN {
        return Err(BookingError::validation(
            "name",
            format!("name exceeds {MAX_NAME_LEN} bytes"),
        ));
    }
    if resource.location.as_ref().is_some_and(|l| l.len() > MAX_NAME_LEN) {
        return Err(BookingError::validation(
            "location",
            format!("location exceeds {MAX_NAME_LEN} bytes"),
        ));
    }
    if resource.capacity == 0 {
        return Err(BookingError::validation("capacity", "capacity must be at least 1"));
    }
    Ok(())
}
