//! Publish/subscribe transport contract and an in-process implementation.
//!
//! A transport joins feed topics (carrying the resume hint), pushes
//! annotation drafts, and delivers live events to subscribers. Retry and
//! backoff are the transport's business; the engine only reacts to the
//! [`FeedEvent`]s it emits.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::annotation::{Annotation, Author, NewAnnotation};
use crate::error::{JoinError, PushError};
use crate::feed::FeedHub;
use crate::protocol::JoinParams;

/// Capacity of each subscriber's event channel.
pub const EVENT_CAPACITY: usize = 256;

/// Events a transport delivers to topic subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Live `new_annotation` push
    NewAnnotation(Annotation),
    /// The underlying connection dropped
    Disconnected,
    /// The connection is back; joined topics must be rejoined
    Reconnected,
}

/// The feed transport collaborator.
pub trait Transport: Send + Sync + 'static {
    /// Join `topic`, returning the backlog the feed decided to send.
    fn join(
        &self,
        topic: &str,
        params: JoinParams,
    ) -> impl Future<Output = Result<Vec<Annotation>, JoinError>> + Send;

    /// Push an annotation draft. The feed broadcasts the result back to
    /// every subscriber, sender included.
    fn push(
        &self,
        topic: &str,
        draft: NewAnnotation,
    ) -> impl Future<Output = Result<(), PushError>> + Send;

    /// Receive live events for `topic`.
    fn subscribe(&self, topic: &str) -> mpsc::Receiver<FeedEvent>;
}

pub(crate) type Subscribers = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<FeedEvent>>>>>;

/// Deliver `event` to every live subscriber of `topic`, pruning closed ones.
pub(crate) async fn dispatch(subscribers: &Subscribers, topic: &str, event: FeedEvent) {
    let senders: Vec<mpsc::Sender<FeedEvent>> = {
        let mut map = subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        match map.get_mut(topic) {
            Some(list) => {
                list.retain(|tx| !tx.is_closed());
                list.clone()
            }
            None => return,
        }
    };
    for tx in senders {
        let _ = tx.send(event.clone()).await;
    }
}

/// Deliver `event` to the subscribers of every topic.
pub(crate) async fn dispatch_all(subscribers: &Subscribers, event: FeedEvent) {
    let topics: Vec<String> = subscribers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    for topic in topics {
        dispatch(subscribers, &topic, event.clone()).await;
    }
}

pub(crate) fn register(subscribers: &Subscribers, topic: &str, capacity: usize) -> mpsc::Receiver<FeedEvent> {
    let (tx, rx) = mpsc::channel(capacity);
    subscribers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(topic.to_string())
        .or_default()
        .push(tx);
    rx
}

/// In-process transport backed by a shared [`FeedHub`].
///
/// Every `LocalTransport` acts as one client connection; several of them
/// sharing a hub behave like several viewers of the same server.
pub struct LocalTransport {
    hub: Arc<FeedHub>,
    conn_id: Uuid,
    username: String,
    subscribers: Subscribers,
    /// Live pumps from hub broadcast to subscribers, per joined topic
    forwarders: Mutex<HashMap<String, JoinHandle<()>>>,
    join_rejection: Mutex<Option<String>>,
    push_rejection: Mutex<Option<String>>,
}

impl LocalTransport {
    pub fn new(hub: Arc<FeedHub>, username: impl Into<String>) -> Self {
        Self {
            hub,
            conn_id: Uuid::new_v4(),
            username: username.into(),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            forwarders: Mutex::new(HashMap::new()),
            join_rejection: Mutex::new(None),
            push_rejection: Mutex::new(None),
        }
    }

    pub fn hub(&self) -> &Arc<FeedHub> {
        &self.hub
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Make subsequent joins fail with `reason` (`None` restores normal joins).
    pub fn reject_joins(&self, reason: Option<String>) {
        *self.join_rejection.lock().unwrap_or_else(PoisonError::into_inner) = reason;
    }

    /// Make subsequent pushes fail with `reason` (`None` restores normal pushes).
    pub fn reject_pushes(&self, reason: Option<String>) {
        *self.push_rejection.lock().unwrap_or_else(PoisonError::into_inner) = reason;
    }

    /// Drop every joined topic as a lost connection would, and tell
    /// subscribers. Annotations published from now on are only recoverable
    /// through a rejoin backlog.
    pub async fn drop_connection(&self) {
        let forwarders: Vec<(String, JoinHandle<()>)> = self
            .forwarders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (topic, handle) in forwarders {
            handle.abort();
            self.hub.leave(&topic, &self.conn_id).await;
        }
        dispatch_all(&self.subscribers, FeedEvent::Disconnected).await;
    }

    /// Announce that the connection is back so subscribers rejoin.
    pub async fn restore_connection(&self) {
        dispatch_all(&self.subscribers, FeedEvent::Reconnected).await;
    }

    fn spawn_forwarder(&self, topic: &str, mut receiver: broadcast::Receiver<Arc<Annotation>>) {
        let subscribers = self.subscribers.clone();
        let owned_topic = topic.to_string();
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(annotation) => {
                        let event = FeedEvent::NewAnnotation((*annotation).clone());
                        dispatch(&subscribers, &owned_topic, event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("local subscriber on {owned_topic} lagged by {n} annotations");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let previous = self
            .forwarders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string(), handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Transport for LocalTransport {
    async fn join(&self, topic: &str, params: JoinParams) -> Result<Vec<Annotation>, JoinError> {
        let rejection = self
            .join_rejection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(reason) = rejection {
            return Err(JoinError::rejected(reason));
        }

        let subscription = self
            .hub
            .join(topic, self.conn_id, &self.username, params)
            .await
            .map_err(JoinError::rejected)?;
        self.spawn_forwarder(topic, subscription.receiver);
        Ok(subscription.backlog)
    }

    async fn push(&self, topic: &str, draft: NewAnnotation) -> Result<(), PushError> {
        let rejection = self
            .push_rejection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(reason) = rejection {
            return Err(PushError::rejected(reason));
        }

        let joined = self
            .forwarders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(topic);
        if !joined {
            return Err(PushError::rejected(format!("not joined to {topic}")));
        }

        self.hub
            .publish(topic, Author::new(self.username.clone()), draft)
            .await
            .map(|_| ())
            .map_err(PushError::rejected)
    }

    fn subscribe(&self, topic: &str) -> mpsc::Receiver<FeedEvent> {
        register(&self.subscribers, topic, EVENT_CAPACITY)
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        let forwarders = self
            .forwarders
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in forwarders.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    async fn next_event(rx: &mut mpsc::Receiver<FeedEvent>) -> FeedEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_join_returns_backlog() {
        let hub = Arc::new(FeedHub::default());
        let writer = LocalTransport::new(hub.clone(), "ana");
        writer.join("videos:1", JoinParams::default()).await.unwrap();
        writer.push("videos:1", NewAnnotation::new("hi", 0)).await.unwrap();

        let reader = LocalTransport::new(hub, "bo");
        let backlog = reader.join("videos:1", JoinParams::default()).await.unwrap();
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].author.username, "ana");
    }

    #[tokio::test]
    async fn test_push_echoes_to_sender() {
        let hub = Arc::new(FeedHub::default());
        let transport = LocalTransport::new(hub, "ana");
        let mut events = transport.subscribe("videos:1");
        transport.join("videos:1", JoinParams::default()).await.unwrap();

        transport.push("videos:1", NewAnnotation::new("mine", 1200)).await.unwrap();

        match next_event(&mut events).await {
            FeedEvent::NewAnnotation(ann) => {
                assert_eq!(ann.id, 1);
                assert_eq!(ann.at, 1200);
                assert_eq!(ann.body, "mine");
            }
            other => panic!("Expected NewAnnotation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_push_requires_join() {
        let transport = LocalTransport::new(Arc::new(FeedHub::default()), "ana");
        let err = transport
            .push("videos:1", NewAnnotation::new("early", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_rejections() {
        let transport = LocalTransport::new(Arc::new(FeedHub::default()), "ana");
        transport.reject_joins(Some("maintenance".into()));
        assert_eq!(
            transport.join("videos:1", JoinParams::default()).await,
            Err(JoinError::rejected("maintenance"))
        );

        transport.reject_joins(None);
        transport.join("videos:1", JoinParams::default()).await.unwrap();

        transport.reject_pushes(Some("read only".into()));
        assert_eq!(
            transport.push("videos:1", NewAnnotation::new("x", 0)).await,
            Err(PushError::rejected("read only"))
        );
    }

    #[tokio::test]
    async fn test_drop_and_restore_connection() {
        let hub = Arc::new(FeedHub::default());
        let transport = LocalTransport::new(hub.clone(), "ana");
        let mut events = transport.subscribe("videos:1");
        transport.join("videos:1", JoinParams::default()).await.unwrap();

        transport.drop_connection().await;
        assert_eq!(next_event(&mut events).await, FeedEvent::Disconnected);

        // Published while away: not delivered live
        let other = LocalTransport::new(hub, "bo");
        other.join("videos:1", JoinParams::default()).await.unwrap();
        other.push("videos:1", NewAnnotation::new("missed", 0)).await.unwrap();

        transport.restore_connection().await;
        assert_eq!(next_event(&mut events).await, FeedEvent::Reconnected);

        let backlog = transport
            .join("videos:1", JoinParams { last_seen_id: None })
            .await
            .unwrap();
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].body, "missed");
    }
}
