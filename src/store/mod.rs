mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    ResourceNotFound(ResourceId),
    ReservationNotFound(ReservationId),
    /// Exclusion constraint hit: an active reservation already covers part of the span.
    Conflict(ReservationId),
    /// Transient backend failure; safe to retry from scratch.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::ResourceNotFound(id) => write!(f, "resource not found: {id}"),
            StoreError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            StoreError::Conflict(id) => write!(f, "overlaps active reservation {id}"),
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persistence collaborator of the scheduler.
///
/// Implementations must make `insert_reservation` reject a draft whose span
/// overlaps an active reservation on the same field with
/// [`StoreError::Conflict`], atomically with the insert.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get_resource(&self, id: ResourceId) -> Result<Resource, StoreError>;

    async fn upsert_resource(&self, resource: Resource) -> Result<(), StoreError>;

    /// Reservations on `resource_id` whose status is in `statuses`.
    async fn list_active_reservations(
        &self,
        resource_id: ResourceId,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, StoreError>;

    async fn insert_reservation(&self, draft: ReservationDraft) -> Result<Reservation, StoreError>;

    async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, StoreError>;

    /// Unordered; callers sort.
    async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, StoreError>;

    /// Overwrite a stored reservation. Id, field and span must be unchanged.
    async fn update_reservation(&self, reservation: Reservation) -> Result<Reservation, StoreError>;
}
