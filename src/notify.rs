use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, ResourceId};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed reservation events, per field plus a firehose.
///
/// The scheduler only publishes; mail dispatch and dashboards subscribe.
/// A lagging or absent subscriber never affects the booking that produced
/// the event.
pub struct NotifyHub {
    channels: DashMap<ResourceId, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to notifications for one field. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: ResourceId) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every field.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        let resource_id = event.resource_id();
        if let Some(sender) = self.channels.get(&resource_id) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event.clone());
    }

    /// Remove a channel (e.g. when a field is retired).
    pub fn remove(&self, resource_id: &ResourceId) {
        self.channels.remove(resource_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Resource, ResourceStatus};
    use rust_decimal::Decimal;
    use ulid::Ulid;

    fn upsert(id: ResourceId) -> Event {
        Event::ResourceUpserted {
            resource: Resource::new(id, Decimal::from(100), ResourceStatus::Available),
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(rid);
        let mut all = hub.subscribe_all();

        let event = upsert(rid);
        hub.send(&event);

        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(all.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_fields_not_delivered() {
        let hub = NotifyHub::new();
        let watched = Ulid::new();
        let mut rx = hub.subscribe(watched);
        hub.send(&upsert(Ulid::new()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber, no panic.
        hub.send(&upsert(Ulid::new()));
    }

    #[tokio::test]
    async fn removed_channel_closes_receiver() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(rid);
        hub.remove(&rid);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
