use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_bookable, check_live, check_no_conflict, validate_reservation, validate_resource,
};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_resource(&self, resource: Resource) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        if self.state.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        validate_resource(&resource)?;
        if self.state.contains_key(&resource.id) {
            return Err(EngineError::AlreadyExists(resource.id));
        }

        let id = resource.id;
        let event = Event::ResourceCreated {
            resource: resource.clone(),
        };
        self.wal_append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(ResourceState::new(resource))));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_resource(&self, resource: Resource) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        validate_resource(&resource)?;
        let rs = self
            .get_resource(&resource.id)
            .ok_or(EngineError::NotFound(resource.id))?;
        let mut guard = rs.write().await;
        check_live(&guard)?;
        let event = Event::ResourceUpdated { resource };
        self.persist_and_apply(&mut guard, None, &event).await
    }

    /// Only resources without reservations can go; history is never dropped implicitly.
    pub async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        check_live(&guard)?;
        if guard.reservation_count() > 0 {
            return Err(EngineError::HasReservations(id));
        }

        let event = Event::ResourceDeleted { id };
        self.wal_append(&event).await?;
        guard.deleted = true;
        self.state.remove(&id);
        drop(guard);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    /// Store a new reservation. An approved reservation is re-checked for overlap
    /// under the resource's write lock, whatever the caller checked before.
    pub async fn insert_reservation(&self, reservation: Reservation) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        validate_reservation(&reservation)?;
        let rs = self
            .get_resource(&reservation.resource_id)
            .ok_or(EngineError::NotFound(reservation.resource_id))?;
        let mut guard = rs.write().await;
        check_bookable(&guard)?;
        if guard.reservation_count() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }
        if self.reservation_index.contains_key(&reservation.id) {
            return Err(EngineError::AlreadyExists(reservation.id));
        }
        if reservation.status.is_approved() {
            check_no_conflict(&guard, reservation.date, &reservation.span, None)?;
        }

        let event = Event::ReservationCreated { reservation };
        self.persist_and_apply(&mut guard, None, &event).await
    }

    /// Replace a reservation with its next revision.
    ///
    /// `next.revision` must be exactly one past the stored revision, otherwise the
    /// caller worked from a stale read and gets `Stale`. When the reservation moves
    /// to another resource both write locks are taken in id order.
    pub async fn update_reservation(&self, next: Reservation) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        validate_reservation(&next)?;
        let from = self
            .get_reservation_key(&next.id)
            .ok_or(EngineError::NotFound(next.id))?;

        if from.resource_id == next.resource_id {
            let rs = self
                .get_resource(&from.resource_id)
                .ok_or(EngineError::NotFound(from.resource_id))?;
            let mut guard = rs.write().await;
            check_live(&guard)?;
            check_revision(&guard, from, &next)?;
            if next.status.is_approved() {
                check_no_conflict(&guard, next.date, &next.span, Some(next.id))?;
            }
            let event = Event::ReservationUpdated { from, reservation: next };
            return self.persist_and_apply(&mut guard, None, &event).await;
        }

        let old_rs = self
            .get_resource(&from.resource_id)
            .ok_or(EngineError::NotFound(from.resource_id))?;
        let new_rs = self
            .get_resource(&next.resource_id)
            .ok_or(EngineError::NotFound(next.resource_id))?;

        // Acquire write locks in sorted order to prevent deadlocks.
        let (mut old_guard, mut new_guard) = if from.resource_id < next.resource_id {
            let old_guard = old_rs.write_owned().await;
            let new_guard = new_rs.write_owned().await;
            (old_guard, new_guard)
        } else {
            let new_guard = new_rs.write_owned().await;
            let old_guard = old_rs.write_owned().await;
            (old_guard, new_guard)
        };

        check_live(&old_guard)?;
        check_bookable(&new_guard)?;
        check_revision(&old_guard, from, &next)?;
        if new_guard.reservation_count() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }
        if next.status.is_approved() {
            check_no_conflict(&new_guard, next.date, &next.span, Some(next.id))?;
        }
        let event = Event::ReservationUpdated { from, reservation: next };
        self.persist_and_apply(&mut old_guard, Some(&mut new_guard), &event)
            .await
    }

    /// Hard-delete a reservation, returning what was removed. With
    /// `expected_revision` set, the delete only goes through if nothing changed
    /// since the caller read that revision.
    pub async fn delete_reservation(
        &self,
        id: Ulid,
        expected_revision: Option<u32>,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (key, mut guard) = self.resolve_reservation_write(&id).await?;
        let removed = guard
            .get_reservation(id, key.date)
            .cloned()
            .ok_or(EngineError::Stale(id))?;
        if expected_revision.is_some_and(|rev| rev != removed.revision) {
            return Err(EngineError::Stale(id));
        }
        let event = Event::ReservationDeleted { id, key };
        self.persist_and_apply(&mut guard, None, &event).await?;
        Ok(removed)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // No append can land between the snapshot and the file swap.
        let _gate = self.compaction_gate.write().await;
        let mut events = Vec::new();
        let states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        for rs in states {
            let guard = rs.read().await;
            events.push(Event::ResourceCreated {
                resource: guard.resource.clone(),
            });
            events.extend(guard.reservations().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// The stored reservation must still be where `from` says and one revision behind `next`.
fn check_revision(
    rs: &ResourceState,
    from: ReservationKey,
    next: &Reservation,
) -> Result<(), EngineError> {
    match rs.get_reservation(next.id, from.date) {
        Some(current) if current.revision.checked_add(1) == Some(next.revision) => Ok(()),
        _ => Err(EngineError::Stale(next.id)),
    }
}
