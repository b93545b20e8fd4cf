use chrono::NaiveDate;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::*;

use super::availability::free_spans;
use super::conflict::{check_live, find_conflict};
use super::{Engine, EngineError};

impl Engine {
    pub async fn resource(&self, id: Ulid) -> Option<Resource> {
        let rs = self.get_resource(&id)?;
        let guard = rs.read().await;
        Some(guard.resource.clone())
    }

    /// Committed events of one resource. The stream ends when the resource is deleted.
    ///
    /// Subscribing under the read lock means a concurrent delete either sees the
    /// subscriber and closes its channel, or wins and the subscription is refused.
    pub async fn subscribe(&self, resource_id: Ulid) -> Result<broadcast::Receiver<Event>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        check_live(&guard)?;
        Ok(self.notify.subscribe(resource_id))
    }

    /// All resources, sorted by name then id.
    pub async fn list_resources(&self) -> Vec<Resource> {
        let states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for rs in states {
            out.push(rs.read().await.resource.clone());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        // The index can move under us between lookup and lock; retry once on a miss.
        for _ in 0..2 {
            let key = self.get_reservation_key(&id)?;
            let rs = self.get_resource(&key.resource_id)?;
            let guard = rs.read().await;
            if let Some(r) = guard.get_reservation(id, key.date) {
                return Some(r.clone());
            }
        }
        None
    }

    /// Reservations matching `filter`, ordered by date, start time, then id.
    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        let from = filter.date_from.unwrap_or(NaiveDate::MIN);
        let to = filter.date_to.unwrap_or(NaiveDate::MAX);
        if from > to {
            return Vec::new();
        }
        let states: Vec<_> = match filter.resource_id {
            Some(id) => self.get_resource(&id).into_iter().collect(),
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };

        let mut out = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            for (_, day) in guard.days.range(from..=to) {
                out.extend(day.iter().filter(|r| filter.matches(r)).cloned());
            }
        }
        out.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then(a.span.start.cmp(&b.span.start))
                .then(a.id.cmp(&b.id))
        });
        out
    }

    /// The approved reservation on `resource_id`/`date` that `span` would collide with.
    pub async fn find_approved_overlap(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        span: &Span,
        exclude: Option<Ulid>,
    ) -> Result<Option<Reservation>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(find_conflict(guard.overlapping(date, span), span, exclude).cloned())
    }

    pub async fn compute_free_spans(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(free_spans(&guard, date))
    }
}
