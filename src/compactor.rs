use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::store::InMemoryStore;

/// Background task that compacts the store's WAL once `threshold` appends
/// have accumulated since the last compaction.
pub async fn run_compactor(store: Arc<InMemoryStore>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let appends = store.appends_since_compact().await;
        if appends < threshold.max(1) {
            continue;
        }
        match store.compact().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

/// Spawn [`run_compactor`] for a durable store. Returns `None` for volatile stores.
pub fn spawn_compactor(store: Arc<InMemoryStore>, threshold: u64, period: Duration) -> Option<JoinHandle<()>> {
    if !store.is_durable() {
        return None;
    }
    Some(tokio::spawn(run_compactor(store, threshold, period)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::store::ReservationStore;
    use crate::wal::Wal;
    use rust_decimal::Decimal;
    use ulid::Ulid;

    #[tokio::test]
    async fn compactor_rewrites_after_threshold() {
        let dir = std::env::temp_dir().join("fieldbook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("threshold.wal");
        let _ = std::fs::remove_file(&path);

        let store = Arc::new(InMemoryStore::open(&path).unwrap());
        let rid = Ulid::new();
        for rate in [100, 150, 200] {
            store
                .upsert_resource(Resource::new(rid, Decimal::from(rate), ResourceStatus::Available))
                .await
                .unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap().len(), 3);

        let handle = spawn_compactor(store.clone(), 3, Duration::from_millis(10)).unwrap();
        let mut compacted = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store.appends_since_compact().await == 0 {
                compacted = true;
                break;
            }
        }
        handle.abort();
        assert!(compacted);

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 1);
        let Event::ResourceUpserted { resource } = &replayed[0] else {
            panic!("expected a field snapshot, got {:?}", replayed[0]);
        };
        assert_eq!(resource.hourly_rate, Decimal::from(200));
    }

    #[tokio::test]
    async fn volatile_store_gets_no_compactor() {
        let store = Arc::new(InMemoryStore::new());
        assert!(spawn_compactor(store, 1, Duration::from_millis(10)).is_none());
    }
}
