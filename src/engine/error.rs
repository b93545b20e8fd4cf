use ulid::Ulid;

use crate::model::ResourceStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The write would put two approved reservations on the same slot; carries the holder.
    Conflict(Ulid),
    /// The write was based on a revision that is no longer current.
    Stale(Ulid),
    HasReservations(Ulid),
    /// The resource is not open for new reservations.
    Unavailable(Ulid, ResourceStatus),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with approved reservation: {id}"),
            EngineError::Stale(id) => write!(f, "reservation {id} was modified concurrently"),
            EngineError::HasReservations(id) => {
                write!(f, "cannot delete resource {id}: has reservations")
            }
            EngineError::Unavailable(id, status) => write!(f, "resource {id} is {status}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
