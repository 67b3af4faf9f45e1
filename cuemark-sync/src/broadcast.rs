//! Per-topic fan-out of live annotations.
//!
//! Uses tokio broadcast channels so one publish reaches every subscriber of
//! a topic, the publisher included. Each subscriber buffers up to
//! `capacity` annotations before it starts lagging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::annotation::Annotation;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub annotations_sent: u64,
    pub active_subscribers: usize,
}

/// All subscribers of one feed topic.
pub struct TopicGroup {
    sender: broadcast::Sender<Arc<Annotation>>,

    /// Joined connections and their display names
    subscribers: Arc<RwLock<HashMap<Uuid, String>>>,

    capacity: usize,

    annotations_sent: AtomicU64,
}

impl TopicGroup {
    /// Create a new group with the given per-subscriber buffer.
    ///
    /// The buffer holds at least one annotation.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            annotations_sent: AtomicU64::new(0),
        }
    }

    /// Register a connection and hand back its receiver.
    pub async fn add_subscriber(
        &self,
        conn_id: Uuid,
        username: impl Into<String>,
    ) -> broadcast::Receiver<Arc<Annotation>> {
        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(conn_id, username.into());
        self.sender.subscribe()
    }

    /// Remove a connection. Returns its display name if it was present.
    pub async fn remove_subscriber(&self, conn_id: &Uuid) -> Option<String> {
        self.subscribers.write().await.remove(conn_id)
    }

    /// Fan an annotation out to every receiver.
    ///
    /// Returns the number of receivers reached.
    pub fn publish(&self, annotation: Annotation) -> usize {
        let count = self.sender.send(Arc::new(annotation)).unwrap_or(0);
        self.annotations_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn has_subscriber(&self, conn_id: &Uuid) -> bool {
        self.subscribers.read().await.contains_key(conn_id)
    }

    /// Display name of a joined connection.
    pub async fn username(&self, conn_id: &Uuid) -> Option<String> {
        self.subscribers.read().await.get(conn_id).cloned()
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            annotations_sent: self.annotations_sent.load(Ordering::Relaxed),
            active_subscribers: self.subscriber_count().await,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Maps topic names to their broadcast groups.
pub struct TopicRegistry {
    topics: Arc<RwLock<HashMap<String, Arc<TopicGroup>>>>,
    default_capacity: usize,
}

impl TopicRegistry {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            default_capacity: default_capacity.max(1),
        }
    }

    /// Get or create the group for `topic`.
    pub async fn get_or_create(&self, topic: &str) -> Arc<TopicGroup> {
        {
            let topics = self.topics.read().await;
            if let Some(group) = topics.get(topic) {
                return group.clone();
            }
        }

        let mut topics = self.topics.write().await;
        // Another task may have created it between the two locks
        if let Some(group) = topics.get(topic) {
            return group.clone();
        }

        let group = Arc::new(TopicGroup::new(self.default_capacity));
        topics.insert(topic.to_string(), group.clone());
        group
    }

    pub async fn get(&self, topic: &str) -> Option<Arc<TopicGroup>> {
        self.topics.read().await.get(topic).cloned()
    }

    /// Drop the group for `topic` once nobody is subscribed.
    pub async fn remove_if_empty(&self, topic: &str) -> bool {
        let mut topics = self.topics.write().await;
        if let Some(group) = topics.get(topic) {
            if group.subscriber_count().await == 0 {
                topics.remove(topic);
                return true;
            }
        }
        false
    }

    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }

    pub async fn active_topics(&self) -> Vec<String> {
        self.topics.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Author;

    fn ann(id: u64) -> Annotation {
        Annotation::new(id, id * 1000, format!("note {id}"), Author::new("ana"))
    }

    #[tokio::test]
    async fn test_topic_group_add_remove() {
        let group = TopicGroup::new(16);
        let conn = Uuid::new_v4();

        let _rx = group.add_subscriber(conn, "ana").await;
        assert_eq!(group.subscriber_count().await, 1);
        assert!(group.has_subscriber(&conn).await);
        assert_eq!(group.username(&conn).await.as_deref(), Some("ana"));

        assert_eq!(group.remove_subscriber(&conn).await.as_deref(), Some("ana"));
        assert_eq!(group.subscriber_count().await, 0);
        assert!(!group.has_subscriber(&conn).await);
    }

    #[tokio::test]
    async fn test_publish_reaches_everyone() {
        let group = TopicGroup::new(16);
        let mut rx1 = group.add_subscriber(Uuid::new_v4(), "ana").await;
        let mut rx2 = group.add_subscriber(Uuid::new_v4(), "bo").await;

        assert_eq!(group.publish(ann(1)), 2);

        assert_eq!(rx1.recv().await.unwrap().id, 1);
        assert_eq!(rx2.recv().await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_holds_one_annotation() {
        let group = TopicGroup::new(0);
        assert_eq!(group.capacity(), 1);

        let mut rx = group.add_subscriber(Uuid::new_v4(), "ana").await;
        assert_eq!(group.publish(ann(1)), 1);
        assert_eq!(rx.recv().await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let group = TopicGroup::new(16);
        assert_eq!(group.publish(ann(1)), 0);
        assert_eq!(group.stats().await.annotations_sent, 1);
    }

    #[tokio::test]
    async fn test_broadcast_stats() {
        let group = TopicGroup::new(16);
        let _rx = group.add_subscriber(Uuid::new_v4(), "ana").await;
        group.publish(ann(1));
        group.publish(ann(2));

        let stats = group.stats().await;
        assert_eq!(stats.annotations_sent, 2);
        assert_eq!(stats.active_subscribers, 1);
        assert_eq!(group.capacity(), 16);
    }

    #[tokio::test]
    async fn test_registry_get_or_create() {
        let registry = TopicRegistry::new(16);
        let a = registry.get_or_create("videos:1").await;
        let b = registry.get_or_create("videos:1").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.topic_count().await, 1);
        assert!(registry.get("videos:2").await.is_none());
    }

    #[tokio::test]
    async fn test_registry_isolation() {
        let registry = TopicRegistry::new(16);
        let one = registry.get_or_create("videos:1").await;
        let two = registry.get_or_create("videos:2").await;

        let mut rx1 = one.add_subscriber(Uuid::new_v4(), "ana").await;
        two.publish(ann(7));

        assert!(rx1.try_recv().is_err());
        let topics = registry.active_topics().await;
        assert!(topics.contains(&"videos:1".to_string()));
        assert!(topics.contains(&"videos:2".to_string()));
    }

    #[tokio::test]
    async fn test_registry_cleanup() {
        let registry = TopicRegistry::new(16);
        let group = registry.get_or_create("videos:1").await;
        let conn = Uuid::new_v4();
        let _rx = group.add_subscriber(conn, "ana").await;

        assert!(!registry.remove_if_empty("videos:1").await);

        group.remove_subscriber(&conn).await;
        assert!(registry.remove_if_empty("videos:1").await);
        assert_eq!(registry.topic_count().await, 0);
    }
}
