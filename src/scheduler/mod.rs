mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{free_spans, merge_overlapping, subtract_intervals};
pub use error::BookingError;

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::config::SchedulerConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::STORE_TIMEOUTS_TOTAL;
use crate::store::{ReservationStore, StoreError};

/// Books sport fields without ever double-booking one.
///
/// Every mutation of a field's reservations runs under that field's lock,
/// held from the conflict check through the insert. The store's own
/// exclusion check at insert time backs this up for writers that bypass
/// the scheduler (other processes sharing the store).
pub struct ReservationScheduler {
    store: Arc<dyn ReservationStore>,
    notify: Arc<NotifyHub>,
    config: SchedulerConfig,
    locks: DashMap<ResourceId, Arc<Mutex<()>>>,
}

impl ReservationScheduler {
    pub fn new(store: Arc<dyn ReservationStore>, notify: Arc<NotifyHub>, config: SchedulerConfig) -> Self {
        Self {
            store,
            notify,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.store
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Acquire the per-field lock, waiting at most `store_timeout`.
    pub(super) async fn lock_resource(&self, resource_id: ResourceId) -> Result<FieldLock<'_>, BookingError> {
        let lock = self.locks.entry(resource_id).or_default().value().clone();
        match tokio::time::timeout(self.config.store_timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(FieldLock {
                guard: Some(guard),
                locks: &self.locks,
                resource_id,
            }),
            Err(_) => {
                release_idle_lock(&self.locks, resource_id);
                metrics::counter!(STORE_TIMEOUTS_TOTAL).increment(1);
                warn!("timed out waiting for lock on field {resource_id}");
                Err(BookingError::StoreUnavailable("timed out waiting for field lock".into()))
            }
        }
    }

    /// Run a store call under the configured timeout.
    pub(super) async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, BookingError> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result.map_err(BookingError::from),
            Err(_) => {
                metrics::counter!(STORE_TIMEOUTS_TOTAL).increment(1);
                warn!("store call exceeded {:?}", self.config.store_timeout);
                Err(BookingError::StoreUnavailable("store call timed out".into()))
            }
        }
    }
}

/// Held per-field lock. On drop the map entry goes too unless another
/// caller is holding or waiting on it, so `locks` only tracks busy fields.
pub(super) struct FieldLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a DashMap<ResourceId, Arc<Mutex<()>>>,
    resource_id: ResourceId,
}

impl Drop for FieldLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        release_idle_lock(self.locks, self.resource_id);
    }
}

/// Remove the entry when the map holds the only reference. `remove_if` runs
/// under the shard lock, the same one `entry` takes, so no caller can clone
/// the `Arc` in between.
fn release_idle_lock(locks: &DashMap<ResourceId, Arc<Mutex<()>>>, resource_id: ResourceId) {
    locks.remove_if(&resource_id, |_, lock| Arc::strong_count(lock) == 1);
}
