mod bookings;
mod error;
mod resources;

pub use bookings::{BookingChanges, NewBooking, Page, PageRequest};
pub use error::BookingError;
pub use resources::{NewResource, ResourceChanges};

use std::sync::Arc;

use crate::engine::{ReservationStore, ResourceRegistry};

/// Booking use cases: authorization, lifecycle and overlap checks composed over a store.
///
/// The store is the last line of defence: it re-checks the approved-overlap
/// invariant and the revision under its own lock, so the checks here only decide
/// which error a caller sees first.
pub struct BookingService<S> {
    store: Arc<S>,
}

impl<S> Clone for BookingService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S> BookingService<S>
where
    S: ReservationStore + ResourceRegistry,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}
