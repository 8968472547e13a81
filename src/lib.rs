//! Conflict-free booking of sport fields.
//!
//! [`scheduler::ReservationScheduler`] validates a booking request, checks it
//! against the field's active reservations under a per-field lock, prices it
//! from the hourly rate, and persists it through a
//! [`store::ReservationStore`].

pub mod compactor;
pub mod config;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod scheduler;
pub mod store;
pub mod wal;

pub use config::SchedulerConfig;
pub use model::{BookingRequest, Reservation, Resource};
pub use scheduler::{BookingError, ReservationScheduler};
pub use store::{InMemoryStore, ReservationStore, StoreError};
