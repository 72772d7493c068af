//! Broadcast of cache keys made stale by store writes.
//!
//! Delivery is fire-and-forget: lagging or absent subscribers miss events and
//! fall back to TTL expiry of whatever they cached.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::metrics;
use crate::types::EntityKind;

/// Pub/sub channel name shared with other processes.
pub const DELETE_CACHE_KEYS_CHANNEL: &str = "deleteCacheKeys";

/// `<kind>.<id>.<group>`
pub fn entity_group_key(kind: EntityKind, id: &str, group: &str) -> String {
    format!("{}.{}.{}", kind.as_str(), id, group)
}

/// `<kind>.<id>`
pub fn entity_key(kind: EntityKind, id: &str) -> String {
    format!("{}.{}", kind.as_str(), id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationEvent {
    #[serde(rename = "deleteCacheKeys")]
    DeleteCacheKeys(Vec<String>),
}

impl InvalidationEvent {
    pub fn keys(&self) -> &[String] {
        match self {
            InvalidationEvent::DeleteCacheKeys(keys) => keys,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<InvalidationEvent>,
}

impl InvalidationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes `keys`; returns the number of receivers reached.
    pub fn publish(&self, keys: Vec<String>) -> usize {
        if keys.is_empty() {
            return 0;
        }
        metrics::increment_invalidations(keys.len() as u64);
        self.sender
            .send(InvalidationEvent::DeleteCacheKeys(keys))
            .unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_format() {
        assert_eq!(entity_group_key(EntityKind::Pair, "erd1qqq", "prices"), "pair.erd1qqq.prices");
        assert_eq!(entity_key(EntityKind::Token, "MEX-455c57"), "token.MEX-455c57");
    }

    #[test]
    fn test_publish_without_receivers_returns_zero() {
        let bus = InvalidationBus::new(16);
        assert_eq!(bus.publish(vec!["pair.a.info".to_string()]), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_keys() {
        let bus = InvalidationBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.publish(Vec::new()), 0);
        assert_eq!(bus.publish(vec!["token.MEX.prices".to_string()]), 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.keys(), ["token.MEX.prices".to_string()]);
    }

    #[test]
    fn test_wire_format() {
        let event = InvalidationEvent::DeleteCacheKeys(vec!["pair.a.info".to_string()]);
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"deleteCacheKeys":["pair.a.info"]}"#
        );
    }
}
