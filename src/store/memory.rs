use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::WAL_COMPACTIONS_TOTAL;
use crate::wal::{Wal, WalHandle};

use super::{ReservationStore, StoreError};

pub type SharedLedger = Arc<RwLock<FieldLedger>>;

/// Reference store: fields and reservations in memory, optionally backed by a WAL.
///
/// The per-field ledger write lock is held across the overlap check and the
/// insert, which gives `insert_reservation` exclusion-constraint semantics.
/// Lock order is always `persist_gate` then ledger.
///
/// On a durable store every mutation runs to completion on its own task.
/// A caller that stops waiting (a timeout, a dropped request) still gets its
/// logged event applied in memory, so the WAL and the ledgers never diverge.
pub struct InMemoryStore {
    state: Arc<StoreState>,
}

struct StoreState {
    resources: DashMap<ResourceId, Resource>,
    ledgers: DashMap<ResourceId, SharedLedger>,
    /// Reverse lookup: reservation id → field id
    reservation_to_resource: DashMap<ReservationId, ResourceId>,
    wal: Option<WalHandle>,
    /// Writers hold it shared; compaction holds it exclusively so no append
    /// can land between the snapshot and the file swap.
    persist_gate: RwLock<()>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Volatile store.
    pub fn new() -> Self {
        Self {
            state: Arc::new(StoreState {
                resources: DashMap::new(),
                ledgers: DashMap::new(),
                reservation_to_resource: DashMap::new(),
                wal: None,
                persist_gate: RwLock::new(()),
            }),
        }
    }

    /// Durable store: replay `path`, then append every mutation to it.
    /// Must be called inside a tokio runtime.
    ///
    /// Replay enforces the exclusion constraint again: an active reservation
    /// overlapping one already loaded is skipped with a warning.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;

        let mut resources = HashMap::new();
        let mut ledgers: HashMap<ResourceId, FieldLedger> = HashMap::new();
        let index = DashMap::new();
        let mut skipped = 0usize;
        for event in &events {
            match event {
                Event::ResourceUpserted { resource } => {
                    ledgers
                        .entry(resource.id)
                        .or_insert_with(|| FieldLedger::new(resource.id));
                    resources.insert(resource.id, resource.clone());
                }
                Event::ReservationCreated { reservation } => {
                    let Some(ledger) = ledgers.get_mut(&reservation.resource_id) else {
                        continue;
                    };
                    if reservation.is_active()
                        && let Some(existing) = ledger.first_active_conflict(&reservation.span(), None)
                    {
                        warn!(
                            "replay: skipping reservation {} overlapping active reservation {}",
                            reservation.id, existing.id
                        );
                        skipped += 1;
                        continue;
                    }
                    index.insert(reservation.id, reservation.resource_id);
                    ledger.insert(reservation.clone());
                }
                Event::ReservationUpdated { reservation } => {
                    let Some(ledger) = ledgers.get_mut(&reservation.resource_id) else {
                        continue;
                    };
                    if reservation.is_active()
                        && let Some(existing) = ledger.first_active_conflict(&reservation.span(), Some(reservation.id))
                    {
                        warn!(
                            "replay: skipping update of reservation {} overlapping active reservation {}",
                            reservation.id, existing.id
                        );
                        skipped += 1;
                        continue;
                    }
                    ledger.replace(reservation.clone());
                }
            }
        }
        info!(
            "replayed {} events from {} ({} fields, {skipped} skipped)",
            events.len(),
            path.display(),
            resources.len()
        );

        Ok(Self {
            state: Arc::new(StoreState {
                resources: resources.into_iter().collect(),
                ledgers: ledgers
                    .into_iter()
                    .map(|(id, l)| (id, Arc::new(RwLock::new(l))))
                    .collect(),
                reservation_to_resource: index,
                wal: Some(WalHandle::spawn(wal)),
                persist_gate: RwLock::new(()),
            }),
        })
    }

    pub fn is_durable(&self) -> bool {
        self.state.wal.is_some()
    }

    pub fn resource_count(&self) -> usize {
        self.state.resources.len()
    }

    pub async fn appends_since_compact(&self) -> u64 {
        match &self.state.wal {
            Some(wal) => wal.appends_since_compact().await,
            None => 0,
        }
    }

    /// Rewrite the WAL with one snapshot event per live field and reservation.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let state = &self.state;
        let Some(wal) = &state.wal else { return Ok(()) };
        let _gate = state.persist_gate.write().await;

        let mut events: Vec<Event> = state
            .resources
            .iter()
            .map(|e| Event::ResourceUpserted {
                resource: e.value().clone(),
            })
            .collect();
        for ledger in state.all_ledgers() {
            let guard = ledger.read().await;
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }

        let count = events.len();
        wal.compact(events)
            .await
            .map_err(|e| StoreError::Unavailable(format!("WAL compaction failed: {e}")))?;
        metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
        debug!("compacted WAL to {count} events");
        Ok(())
    }

    /// Run a mutation so that dropping the returned future cannot split its
    /// WAL append from its in-memory apply.
    ///
    /// Volatile mutations never suspend between the overlap check and the
    /// apply, so they run inline.
    async fn commit<T, F, Fut>(&self, mutation: F) -> Result<T, StoreError>
    where
        F: FnOnce(Arc<StoreState>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        let task = mutation(self.state.clone());
        if self.state.wal.is_none() {
            return task.await;
        }
        tokio::spawn(task)
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

impl StoreState {
    fn ledger(&self, resource_id: ResourceId) -> Option<SharedLedger> {
        self.ledgers.get(&resource_id).map(|e| e.value().clone())
    }

    fn all_ledgers(&self) -> Vec<SharedLedger> {
        self.ledgers.iter().map(|e| e.value().clone()).collect()
    }

    async fn persist(&self, event: &Event) -> Result<(), StoreError> {
        match &self.wal {
            Some(wal) => wal
                .append(event)
                .await
                .map_err(|e| StoreError::Unavailable(format!("WAL append failed: {e}"))),
            None => Ok(()),
        }
    }

    async fn upsert_resource(&self, resource: Resource) -> Result<(), StoreError> {
        let _gate = self.persist_gate.read().await;
        let event = Event::ResourceUpserted {
            resource: resource.clone(),
        };
        self.persist(&event).await?;
        self.ledgers
            .entry(resource.id)
            .or_insert_with(|| Arc::new(RwLock::new(FieldLedger::new(resource.id))));
        self.resources.insert(resource.id, resource);
        Ok(())
    }

    async fn insert_reservation(&self, draft: ReservationDraft) -> Result<Reservation, StoreError> {
        let _gate = self.persist_gate.read().await;
        let ledger = self
            .ledger(draft.resource_id)
            .ok_or(StoreError::ResourceNotFound(draft.resource_id))?;
        let mut guard = ledger.write().await;

        if draft.status.is_active()
            && let Some(existing) = guard.first_active_conflict(&draft.span, None) {
                return Err(StoreError::Conflict(existing.id));
            }

        let reservation = draft.into_reservation(Ulid::new(), now_ms());
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist(&event).await?;
        self.reservation_to_resource
            .insert(reservation.id, reservation.resource_id);
        guard.insert(reservation.clone());
        Ok(reservation)
    }

    async fn update_reservation(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        let _gate = self.persist_gate.read().await;
        let id = reservation.id;
        let resource_id = self
            .reservation_to_resource
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::ReservationNotFound(id))?;
        let ledger = self
            .ledger(resource_id)
            .ok_or(StoreError::ReservationNotFound(id))?;
        let mut guard = ledger.write().await;
        let existing = guard
            .get(&id)
            .cloned()
            .ok_or(StoreError::ReservationNotFound(id))?;

        // Identity, span and price are fixed at creation.
        let updated = Reservation {
            id: existing.id,
            resource_id: existing.resource_id,
            user_id: existing.user_id.clone(),
            start_time: existing.start_time,
            end_time: existing.end_time,
            total_price: existing.total_price,
            created_at: existing.created_at,
            updated_at: now_ms().max(existing.updated_at),
            ..reservation
        };

        if updated.is_active()
            && !existing.is_active()
            && let Some(other) = guard.first_active_conflict(&updated.span(), Some(id)) {
                return Err(StoreError::Conflict(other.id));
            }

        let event = Event::ReservationUpdated {
            reservation: updated.clone(),
        };
        self.persist(&event).await?;
        guard.replace(updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn get_resource(&self, id: ResourceId) -> Result<Resource, StoreError> {
        self.state
            .resources
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::ResourceNotFound(id))
    }

    async fn upsert_resource(&self, resource: Resource) -> Result<(), StoreError> {
        self.commit(move |state| async move { state.upsert_resource(resource).await })
            .await
    }

    async fn list_active_reservations(
        &self,
        resource_id: ResourceId,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, StoreError> {
        let ledger = self
            .state
            .ledger(resource_id)
            .ok_or(StoreError::ResourceNotFound(resource_id))?;
        let guard = ledger.read().await;
        Ok(guard
            .reservations
            .iter()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect())
    }

    async fn insert_reservation(&self, draft: ReservationDraft) -> Result<Reservation, StoreError> {
        self.commit(move |state| async move { state.insert_reservation(draft).await })
            .await
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, StoreError> {
        let resource_id = self
            .state
            .reservation_to_resource
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::ReservationNotFound(id))?;
        let ledger = self
            .state
            .ledger(resource_id)
            .ok_or(StoreError::ReservationNotFound(id))?;
        let guard = ledger.read().await;
        guard
            .get(&id)
            .cloned()
            .ok_or(StoreError::ReservationNotFound(id))
    }

    async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, StoreError> {
        let ledgers = match filter.resource_id {
            Some(rid) => self.state.ledger(rid).into_iter().collect(),
            None => self.state.all_ledgers(),
        };
        let mut out = Vec::new();
        for ledger in ledgers {
            let guard = ledger.read().await;
            match filter.window {
                Some(window) => out.extend(guard.overlapping(&window).filter(|r| filter.matches(r)).cloned()),
                None => out.extend(guard.reservations.iter().filter(|r| filter.matches(r)).cloned()),
            }
        }
        Ok(out)
    }

    async fn update_reservation(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        self.commit(move |state| async move { state.update_reservation(reservation).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use rust_decimal::Decimal;
    use std::path::PathBuf;

    const H: Ms = MS_PER_HOUR;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fieldbook_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn draft(resource_id: ResourceId, start: Ms, end: Ms) -> ReservationDraft {
        ReservationDraft {
            resource_id,
            user_id: "user-1".into(),
            span: Span::new(start, end),
            status: ReservationStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            total_price: Decimal::from(100),
            participant_count: Some(10),
            notes: None,
        }
    }

    async fn store_with_field() -> (InMemoryStore, ResourceId) {
        let store = InMemoryStore::new();
        let rid = Ulid::new();
        store
            .upsert_resource(Resource::new(rid, Decimal::from(100), ResourceStatus::Available))
            .await
            .unwrap();
        (store, rid)
    }

    #[tokio::test]
    async fn insert_assigns_id_and_is_listed() {
        let (store, rid) = store_with_field().await;
        let r = store.insert_reservation(draft(rid, 10 * H, 11 * H)).await.unwrap();
        assert_eq!(r.status, ReservationStatus::Pending);
        assert_eq!(store.get_reservation(r.id).await.unwrap(), r);

        let active = store
            .list_active_reservations(rid, &ReservationStatus::ACTIVE)
            .await
            .unwrap();
        assert_eq!(active, vec![r]);
    }

    #[tokio::test]
    async fn insert_unknown_field_fails() {
        let store = InMemoryStore::new();
        let rid = Ulid::new();
        let err = store.insert_reservation(draft(rid, 0, H)).await.unwrap_err();
        assert_eq!(err, StoreError::ResourceNotFound(rid));
    }

    #[tokio::test]
    async fn exclusion_constraint_rejects_overlap() {
        let (store, rid) = store_with_field().await;
        let first = store.insert_reservation(draft(rid, 10 * H, 11 * H)).await.unwrap();
        let err = store
            .insert_reservation(draft(rid, 10 * H + 30 * 60_000, 12 * H))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Conflict(first.id));
        // Adjacent is fine.
        store.insert_reservation(draft(rid, 11 * H, 12 * H)).await.unwrap();
    }

    #[tokio::test]
    async fn update_keeps_immutable_fields() {
        let (store, rid) = store_with_field().await;
        let r = store.insert_reservation(draft(rid, 10 * H, 11 * H)).await.unwrap();
        let mut tampered = r.clone();
        tampered.status = ReservationStatus::Cancelled;
        tampered.total_price = Decimal::from(1);
        tampered.end_time = 20 * H;

        let updated = store.update_reservation(tampered).await.unwrap();
        assert_eq!(updated.status, ReservationStatus::Cancelled);
        assert_eq!(updated.total_price, r.total_price);
        assert_eq!(updated.end_time, r.end_time);

        // Cancelled no longer blocks the slot.
        store.insert_reservation(draft(rid, 10 * H, 11 * H)).await.unwrap();
    }

    #[tokio::test]
    async fn update_unknown_reservation_fails() {
        let (store, rid) = store_with_field().await;
        let mut ghost = draft(rid, 0, H).into_reservation(Ulid::new(), 0);
        ghost.notes = Some("x".into());
        let err = store.update_reservation(ghost.clone()).await.unwrap_err();
        assert_eq!(err, StoreError::ReservationNotFound(ghost.id));
    }

    #[tokio::test]
    async fn list_by_window_and_user() {
        let (store, rid) = store_with_field().await;
        store.insert_reservation(draft(rid, 8 * H, 9 * H)).await.unwrap();
        let mid = store.insert_reservation(draft(rid, 12 * H, 13 * H)).await.unwrap();
        let mut other_user = draft(rid, 15 * H, 16 * H);
        other_user.user_id = "user-2".into();
        store.insert_reservation(other_user).await.unwrap();

        let in_window = store
            .list_reservations(&ReservationFilter {
                resource_id: Some(rid),
                window: Some(Span::new(9 * H, 14 * H)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(in_window, vec![mid]);

        let mine = store
            .list_reservations(&ReservationFilter {
                user_id: Some("user-1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);
    }

    #[tokio::test]
    async fn durable_store_survives_reopen() {
        let path = test_wal_path("reopen.wal");
        let rid = Ulid::new();
        let (kept, cancelled) = {
            let store = InMemoryStore::open(&path).unwrap();
            assert!(store.is_durable());
            store
                .upsert_resource(Resource::new(rid, Decimal::from(200), ResourceStatus::Available))
                .await
                .unwrap();
            let kept = store.insert_reservation(draft(rid, 10 * H, 11 * H)).await.unwrap();
            let c = store.insert_reservation(draft(rid, 12 * H, 13 * H)).await.unwrap();
            let mut c2 = c.clone();
            c2.status = ReservationStatus::Cancelled;
            let cancelled = store.update_reservation(c2).await.unwrap();
            (kept, cancelled)
        };

        let store = InMemoryStore::open(&path).unwrap();
        assert_eq!(store.resource_count(), 1);
        assert_eq!(store.get_reservation(kept.id).await.unwrap(), kept);
        assert_eq!(store.get_reservation(cancelled.id).await.unwrap(), cancelled);
        let err = store.insert_reservation(draft(rid, 10 * H, 11 * H)).await.unwrap_err();
        assert_eq!(err, StoreError::Conflict(kept.id));
    }

    #[tokio::test]
    async fn compact_preserves_state() {
        let path = test_wal_path("compact.wal");
        let rid = Ulid::new();
        let kept = {
            let store = InMemoryStore::open(&path).unwrap();
            store
                .upsert_resource(Resource::new(rid, Decimal::from(200), ResourceStatus::Available))
                .await
                .unwrap();
            let mut kept = store.insert_reservation(draft(rid, 10 * H, 11 * H)).await.unwrap();
            for note in ["a", "b", "c"] {
                kept.notes = Some(note.into());
                kept = store.update_reservation(kept).await.unwrap();
            }
            assert_eq!(store.appends_since_compact().await, 5);
            store.compact().await.unwrap();
            assert_eq!(store.appends_since_compact().await, 0);
            kept
        };

        assert_eq!(Wal::replay(&path).unwrap().len(), 2);
        let store = InMemoryStore::open(&path).unwrap();
        assert_eq!(store.get_reservation(kept.id).await.unwrap(), kept);
    }

    #[tokio::test]
    async fn dropped_insert_still_applies_on_durable_store() {
        let path = test_wal_path("dropped_insert.wal");
        let rid = Ulid::new();
        {
            let store = InMemoryStore::open(&path).unwrap();
            store
                .upsert_resource(Resource::new(rid, Decimal::from(100), ResourceStatus::Available))
                .await
                .unwrap();

            // One poll then drop, as a timed-out caller does.
            let pending = store.insert_reservation(draft(rid, 10 * H, 11 * H)).now_or_never();
            assert!(pending.is_none());

            let err = store.insert_reservation(draft(rid, 10 * H, 11 * H)).await.unwrap_err();
            assert!(matches!(err, StoreError::Conflict(_)));
            let active = store
                .list_active_reservations(rid, &ReservationStatus::ACTIVE)
                .await
                .unwrap();
            assert_eq!(active.len(), 1);
        }

        let store = InMemoryStore::open(&path).unwrap();
        let active = store
            .list_active_reservations(rid, &ReservationStatus::ACTIVE)
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn replay_skips_overlapping_active_rows() {
        let path = test_wal_path("overlap_replay.wal");
        let rid = Ulid::new();
        let first = draft(rid, 10 * H, 11 * H).into_reservation(Ulid::new(), 1);
        let overlapping = draft(rid, 10 * H + 30 * 60_000, 11 * H).into_reservation(Ulid::new(), 2);
        let mut cancelled = draft(rid, 10 * H, 11 * H).into_reservation(Ulid::new(), 3);
        cancelled.status = ReservationStatus::Cancelled;
        let mut reactivated = cancelled.clone();
        reactivated.status = ReservationStatus::Pending;
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&Event::ResourceUpserted {
                resource: Resource::new(rid, Decimal::from(100), ResourceStatus::Available),
            })
            .unwrap();
            for reservation in [first.clone(), overlapping.clone(), cancelled.clone()] {
                wal.append(&Event::ReservationCreated { reservation }).unwrap();
            }
            wal.append(&Event::ReservationUpdated { reservation: reactivated }).unwrap();
        }

        let store = InMemoryStore::open(&path).unwrap();
        let active = store
            .list_active_reservations(rid, &ReservationStatus::ACTIVE)
            .await
            .unwrap();
        assert_eq!(active, vec![first]);
        assert_eq!(
            store.get_reservation(overlapping.id).await,
            Err(StoreError::ReservationNotFound(overlapping.id))
        );
        assert_eq!(store.get_reservation(cancelled.id).await.unwrap(), cancelled);
    }

    #[tokio::test]
    async fn volatile_compact_is_noop() {
        let (store, _) = store_with_field().await;
        assert!(!store.is_durable());
        store.compact().await.unwrap();
        assert_eq!(store.appends_since_compact().await, 0);
    }
}
