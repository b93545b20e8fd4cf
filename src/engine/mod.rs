mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{free_spans, merge_overlapping, subtract_intervals};
pub use conflict::{conflicts, find_conflict};
pub use error::EngineError;
pub use store::{ReservationStore, ResourceRegistry};

pub(crate) use conflict::now_ms;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Every append that is already queued when the first one arrives joins its
/// batch; the batch is fsynced once and all senders get the same outcome.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batch: Vec<PendingAppend> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut deferred = match cmd {
            WalCommand::Append { event, response } => {
                batch.push((event, response));
                None
            }
            other => Some(other),
        };

        while deferred.is_none() {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => deferred = Some(other),
                Err(_) => break,
            }
        }

        if !batch.is_empty() {
            flush_and_respond(&mut wal, &mut batch);
        }
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    // The callers of a failed batch are told it failed, so none of it may
    // survive on disk or in the write buffer.
    if let Err(e) = &result {
        tracing::error!("WAL batch of {} failed: {e}", batch.len());
        if let Err(e) = wal.rollback() {
            tracing::error!("WAL rollback failed, refusing further appends: {e}");
        }
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// In-memory booking state for every resource, made durable by the WAL.
///
/// Each resource sits behind its own `RwLock`. Every mutation takes the write
/// lock of the resource(s) it touches, re-checks the approved-overlap invariant,
/// appends to the WAL and only then applies to memory, so a check and the write
/// it guards can never interleave with another writer on the same resource.
pub struct Engine {
    pub state: DashMap<Ulid, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → (resource, day)
    pub(super) reservation_index: DashMap<Ulid, ReservationKey>,
    /// Held shared for the whole of every mutation (taken before any resource
    /// lock), exclusively while the WAL is compacted.
    pub(super) compaction_gate: RwLock<()>,
}

/// Apply an event to a ResourceState (no locking; caller holds the lock).
///
/// `dest` is only used by `ReservationUpdated` when the reservation moves to a
/// different resource: `rs` is then the old resource and `dest` the new one.
fn apply_to_resource(
    rs: &mut ResourceState,
    dest: Option<&mut ResourceState>,
    event: &Event,
    index: &DashMap<Ulid, ReservationKey>,
) {
    match event {
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.key());
            rs.insert_reservation(reservation.clone());
        }
        Event::ReservationUpdated { from, reservation } => {
            rs.remove_reservation(reservation.id, from.date);
            index.insert(reservation.id, reservation.key());
            match dest {
                Some(dest) => dest.insert_reservation(reservation.clone()),
                None => rs.insert_reservation(reservation.clone()),
            }
        }
        Event::ReservationDeleted { id, key } => {
            rs.remove_reservation(*id, key.date);
            index.remove(id);
        }
        Event::ResourceUpdated { resource } => {
            rs.resource = resource.clone();
        }
        // ResourceCreated/Deleted are handled at the DashMap level, not here
        Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            reservation_index: DashMap::new(),
            compaction_gate: RwLock::new(()),
        };

        // Nobody else holds these Arcs yet, so try_write always succeeds.
        // Never use blocking_write here: we may be inside an async context.
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            events = events.len(),
            resources = engine.state.len(),
            reservations = engine.reservation_index.len(),
            "replayed WAL"
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::ResourceCreated { resource } => {
                let rs = ResourceState::new(resource.clone());
                self.state.insert(resource.id, Arc::new(RwLock::new(rs)));
            }
            Event::ResourceDeleted { id } => {
                self.state.remove(id);
            }
            Event::ReservationUpdated { from, reservation }
                if from.resource_id != reservation.resource_id =>
            {
                let (Some(old), Some(new)) = (
                    self.get_resource(&from.resource_id),
                    self.get_resource(&reservation.resource_id),
                ) else {
                    tracing::warn!(id = %reservation.id, "replay: reservation moved between unknown resources");
                    return;
                };
                let (Ok(mut old), Ok(mut new)) = (old.try_write(), new.try_write()) else {
                    tracing::warn!(id = %reservation.id, "replay: resource state contended");
                    return;
                };
                apply_to_resource(&mut old, Some(&mut new), event, &self.reservation_index);
            }
            other => {
                let Some(resource_id) = event_resource_id(other) else {
                    return;
                };
                let Some(rs) = self.get_resource(&resource_id) else {
                    return;
                };
                if let Ok(mut guard) = rs.try_write() {
                    apply_to_resource(&mut guard, None, other, &self.reservation_index);
                }
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_reservation_key(&self, id: &Ulid) -> Option<ReservationKey> {
        self.reservation_index.get(id).map(|e| *e.value())
    }

    /// WAL-append, then apply, then notify. The append is the commit point: if it
    /// fails, memory is untouched.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        dest: Option<&mut ResourceState>,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        let source_id = rs.id();
        let dest_id = dest.as_ref().map(|d| d.id());
        apply_to_resource(rs, dest, event, &self.reservation_index);
        self.notify.send(source_id, event);
        if let Some(dest_id) = dest_id {
            self.notify.send(dest_id, event);
        }
        Ok(())
    }

    /// Lookup reservation → resource, acquire that resource's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<(ReservationKey, OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let key = self.get_reservation_key(id).ok_or(EngineError::NotFound(*id))?;
        let rs = self
            .get_resource(&key.resource_id)
            .ok_or(EngineError::NotFound(key.resource_id))?;
        let guard = rs.write_owned().await;
        conflict::check_live(&guard)?;
        Ok((key, guard))
    }
}

/// The resource whose state a (non Create/Delete) event touches first.
fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ReservationCreated { reservation } => Some(reservation.resource_id),
        Event::ReservationUpdated { from, .. } => Some(from.resource_id),
        Event::ReservationDeleted { key, .. } => Some(key.resource_id),
        Event::ResourceUpdated { resource } => Some(resource.id),
        Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } => None,
    }
}
