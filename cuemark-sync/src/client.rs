//! WebSocket feed client.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, reconnect)
//! - Request/reply correlation for join and push
//! - Live `new_annotation` fan-out to topic subscribers
//!
//! Reconnecting does not rejoin anything by itself. Subscribers receive
//! [`FeedEvent::Reconnected`] and rejoin with their own resume cursor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::annotation::{Annotation, NewAnnotation};
use crate::error::{JoinError, PushError};
use crate::protocol::{FeedMessage, JoinParams, JoinRequest, MessageType, ProtocolError};
use crate::transport::{dispatch, dispatch_all, register, FeedEvent, Subscribers, Transport, EVENT_CAPACITY};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long a join or push waits for its reply
    pub request_timeout: Duration,
    /// Capacity of each subscriber's event channel
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            event_capacity: EVENT_CAPACITY,
        }
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<FeedMessage>>>>;
type Outgoing = Arc<RwLock<Option<mpsc::Sender<Vec<u8>>>>>;

/// The feed client.
///
/// One WebSocket connection shared by every topic this client joins.
pub struct FeedClient {
    url: String,
    username: String,
    config: ClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    /// Next request reference; 0 is reserved for broadcasts
    next_ref: AtomicU64,
    pending: PendingReplies,
    /// Channel to the WebSocket writer task
    outgoing_tx: Outgoing,
    subscribers: Subscribers,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl FeedClient {
    pub fn new(url: impl Into<String>, username: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            next_ref: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outgoing_tx: Arc::new(RwLock::new(None)),
            subscribers: Arc::new(StdMutex::new(HashMap::new())),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::error!("Failed to connect to {}: {e}", self.url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        *self.outgoing_tx.write().await = Some(out_tx);
        // Set before the reader runs so an immediate close is not overwritten
        *self.state.write().await = ConnectionState::Connected;

        // Writer task: forward outgoing channel to WebSocket
        let writer = tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: route replies and live annotations
        let pending = self.pending.clone();
        let subscribers = self.subscribers.clone();
        let state = self.state.clone();
        let outgoing = self.outgoing_tx.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match FeedMessage::decode(&bytes) {
                            Ok(message) => route_incoming(message, &pending, &subscribers).await,
                            Err(e) => log::warn!("Failed to decode feed message: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost: refuse new requests, fail in-flight ones,
            // tell subscribers
            *outgoing.write().await = None;
            *state.write().await = ConnectionState::Disconnected;
            pending.lock().await.clear();
            dispatch_all(&subscribers, FeedEvent::Disconnected).await;
            log::warn!("Feed connection lost");
        });

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.push(writer);
            tasks.push(reader);
        }

        log::info!("Connected to {} as {}", self.url, self.username);
        Ok(())
    }

    /// Close the connection. Subscribers are not notified.
    pub async fn disconnect(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        *self.outgoing_tx.write().await = None;
        self.pending.lock().await.clear();
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Drop the current connection, connect again and tell every
    /// subscriber to rejoin.
    pub async fn reconnect(&self) -> Result<(), ProtocolError> {
        self.disconnect().await;
        self.connect().await?;
        dispatch_all(&self.subscribers, FeedEvent::Reconnected).await;
        Ok(())
    }

    /// Leave a topic and drop its subscribers. Fire and forget.
    ///
    /// Subscribers are dropped even if the leave cannot be sent, so a later
    /// reconnect never asks them to rejoin.
    pub async fn leave(&self, topic: &str) -> Result<(), ProtocolError> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        self.send_raw(FeedMessage::leave(topic).encode()?).await
    }

    /// Send a ping and wait for the pong. Returns the round trip time.
    pub async fn send_ping(&self) -> Result<Duration, ProtocolError> {
        let started = Instant::now();
        self.request(|reference| Ok(FeedMessage::ping(reference))).await?;
        Ok(started.elapsed())
    }

    async fn send_raw(&self, encoded: Vec<u8>) -> Result<(), ProtocolError> {
        let tx = self
            .outgoing_tx
            .read()
            .await
            .clone()
            .ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(encoded)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Send a request built around a fresh reference and wait for its reply.
    async fn request<F>(&self, build: F) -> Result<FeedMessage, ProtocolError>
    where
        F: FnOnce(u64) -> Result<FeedMessage, ProtocolError>,
    {
        let reference = self.next_ref.fetch_add(1, Ordering::Relaxed);
        let encoded = build(reference)?.encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(reference, tx);
        if let Err(e) = self.send_raw(encoded).await {
            self.pending.lock().await.remove(&reference);
            return Err(e);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&reference);
                Err(ProtocolError::Timeout)
            }
        }
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Requests still waiting for a reply.
    pub async fn pending_requests(&self) -> usize {
        self.pending.lock().await.len()
    }
}

async fn route_incoming(message: FeedMessage, pending: &PendingReplies, subscribers: &Subscribers) {
    if message.is_reply() {
        match pending.lock().await.remove(&message.reference) {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => log::debug!("Dropping reply to unknown request {}", message.reference),
        }
        return;
    }

    match message.msg_type {
        MessageType::NewAnnotation => match message.annotation() {
            Ok(annotation) => {
                dispatch(subscribers, &message.topic, FeedEvent::NewAnnotation(annotation)).await;
            }
            Err(e) => log::warn!("Malformed annotation on {}: {e}", message.topic),
        },
        other => log::debug!("Unhandled message type: {other:?}"),
    }
}

impl Transport for FeedClient {
    async fn join(&self, topic: &str, params: JoinParams) -> Result<Vec<Annotation>, JoinError> {
        let request = JoinRequest {
            params,
            username: self.username.clone(),
        };
        let reply = self
            .request(|reference| FeedMessage::join(reference, topic, &request))
            .await?;
        let accepted = reply
            .join_outcome()?
            .into_result()
            .map_err(JoinError::rejected)?;
        Ok(accepted.annotations)
    }

    async fn push(&self, topic: &str, draft: NewAnnotation) -> Result<(), PushError> {
        let reply = self
            .request(|reference| FeedMessage::push(reference, topic, &draft))
            .await?;
        let accepted = reply
            .push_outcome()?
            .into_result()
            .map_err(PushError::rejected)?;
        log::trace!("push to {topic} stored as {}", accepted.id);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> mpsc::Receiver<FeedEvent> {
        register(&self.subscribers, topic, self.config.event_capacity.max(1))
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Author;
    use crate::protocol::{JoinAccepted, Reply};

    fn client() -> FeedClient {
        FeedClient::new("ws://127.0.0.1:1", "ana", ClientConfig::default())
    }

    #[test]
    fn test_client_creation() {
        let client = client();
        assert_eq!(client.url(), "ws://127.0.0.1:1");
        assert_eq!(client.username(), "ana");
        assert_eq!(client.config().request_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = client();
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert_eq!(client.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn test_join_while_disconnected_fails() {
        let client = client();
        let err = client.join("videos:1", JoinParams::default()).await.unwrap_err();
        assert_eq!(err, JoinError::Transport(ProtocolError::ConnectionClosed));
        assert_eq!(client.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn test_push_while_disconnected_fails() {
        let client = client();
        let err = client
            .push("videos:1", NewAnnotation::new("hi", 0))
            .await
            .unwrap_err();
        assert_eq!(err, PushError::Transport(ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let client = client();
        assert_eq!(client.connect().await, Err(ProtocolError::ConnectionClosed));
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_leave_drops_topic_subscribers() {
        let client = client();
        let mut left = client.subscribe("videos:1");
        let mut kept = client.subscribe("videos:2");

        assert_eq!(client.leave("videos:1").await, Err(ProtocolError::ConnectionClosed));
        dispatch_all(&client.subscribers, FeedEvent::Reconnected).await;

        assert_eq!(left.recv().await, None);
        assert_eq!(kept.recv().await, Some(FeedEvent::Reconnected));
    }

    #[tokio::test]
    async fn test_route_reply_to_pending_request() {
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let subscribers: Subscribers = Arc::new(StdMutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(3, tx);

        let reply = FeedMessage::join_reply(3, "videos:1", &Reply::Ok(JoinAccepted { annotations: vec![] }))
            .unwrap();
        route_incoming(reply.clone(), &pending, &subscribers).await;

        assert_eq!(rx.await.unwrap(), reply);
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_route_broadcast_to_topic_subscribers() {
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let subscribers: Subscribers = Arc::new(StdMutex::new(HashMap::new()));
        let mut on_topic = register(&subscribers, "videos:1", 4);
        let mut elsewhere = register(&subscribers, "videos:2", 4);

        let annotation = Annotation::new(9, 1500, "hi", Author::new("bo"));
        let message = FeedMessage::new_annotation("videos:1", &annotation).unwrap();
        route_incoming(message, &pending, &subscribers).await;

        assert_eq!(on_topic.recv().await, Some(FeedEvent::NewAnnotation(annotation)));
        assert!(elsewhere.try_recv().is_err());
    }
}
