//! WebSocket feed server with topic-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── join videos:42 ── FeedHub ── Feed (ids, backlog)
//! Client B ──┘                        │
//!                                     └── TopicGroup (fan-out)
//!                                              │
//!                          ┌───────────────────┼───────────┐
//!                          ▼                   ▼           ▼
//!                       Client A            Client B    Client C
//! ```
//!
//! Every connection may join several topics. Each joined topic gets a
//! forwarder task that turns broadcast annotations into `NewAnnotation`
//! frames; the sender of a push receives its own annotation back.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::annotation::{Annotation, Author};
use crate::feed::{FeedHub, DEFAULT_BACKLOG_LIMIT};
use crate::protocol::{FeedMessage, JoinAccepted, MessageType, PushAccepted, Reply};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per topic
    pub broadcast_capacity: usize,
    /// Largest backlog returned by a join
    pub backlog_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4000".to_string(),
            broadcast_capacity: 256,
            backlog_limit: DEFAULT_BACKLOG_LIMIT,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub annotations_published: u64,
    pub active_topics: usize,
}

/// The feed server.
pub struct FeedServer {
    config: ServerConfig,
    hub: Arc<FeedHub>,
    stats: Arc<RwLock<ServerStats>>,
}

impl FeedServer {
    /// Create a new feed server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let hub = Arc::new(FeedHub::new(config.broadcast_capacity, config.backlog_limit));
        Self {
            config,
            hub,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept WebSocket connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        log::info!("Feed server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, hub, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn hub(&self) -> &Arc<FeedHub> {
        &self.hub
    }
}

/// Topics one connection has joined: username and live forwarder.
#[derive(Default)]
struct Membership {
    topics: HashMap<String, (String, JoinHandle<()>)>,
}

impl Membership {
    fn insert(&mut self, topic: &str, username: String, forwarder: JoinHandle<()>) {
        if let Some((_, previous)) = self.topics.insert(topic.to_string(), (username, forwarder)) {
            previous.abort();
        }
    }

    fn username(&self, topic: &str) -> Option<&str> {
        self.topics.get(topic).map(|(username, _)| username.as_str())
    }

    fn remove(&mut self, topic: &str) -> bool {
        match self.topics.remove(topic) {
            Some((_, forwarder)) => {
                forwarder.abort();
                true
            }
            None => false,
        }
    }

    fn drain(&mut self) -> Vec<String> {
        self.topics
            .drain()
            .map(|(topic, (_, forwarder))| {
                forwarder.abort();
                topic
            })
            .collect()
    }
}

fn spawn_forwarder(
    topic: String,
    mut receiver: broadcast::Receiver<Arc<Annotation>>,
    out: mpsc::Sender<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(annotation) => {
                    match FeedMessage::new_annotation(&topic, &annotation).and_then(|m| m.encode()) {
                        Ok(encoded) => {
                            if out.send(encoded).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::error!("Failed to encode annotation {}: {e}", annotation.id),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Subscriber on {topic} lagged by {n} annotations");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<FeedHub>,
    stats: Arc<RwLock<ServerStats>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;

    let conn_id = Uuid::new_v4();
    log::info!("WebSocket connection {conn_id} established from {addr}");

    {
        let mut s = stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let mut membership = Membership::default();

    let result = process_messages(ws_stream, addr, conn_id, &hub, &stats, &mut membership).await;

    // Cleanup: leave every joined topic
    for topic in membership.drain() {
        hub.leave(&topic, &conn_id).await;
    }
    {
        let mut s = stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
        s.active_topics = hub.registry().topic_count().await;
    }
    result
}

/// Serve one connection until it closes.
async fn process_messages(
    ws_stream: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    conn_id: Uuid,
    hub: &FeedHub,
    stats: &RwLock<ServerStats>,
    membership: &mut Membership,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);

    loop {
        tokio::select! {
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    let bytes: Vec<u8> = data.into();
                    {
                        let mut s = stats.write().await;
                        s.total_messages += 1;
                        s.total_bytes += bytes.len() as u64;
                    }

                    let message = match FeedMessage::decode(&bytes) {
                        Ok(message) => message,
                        Err(e) => {
                            log::warn!("Failed to decode message from {addr}: {e}");
                            continue;
                        }
                    };

                    let reply = match message.msg_type {
                        MessageType::Join => {
                            let outcome = match message.join_request() {
                                Ok(request) => match hub
                                    .join(&message.topic, conn_id, &request.username, request.params)
                                    .await
                                {
                                    Ok(subscription) => {
                                        let forwarder = spawn_forwarder(
                                            message.topic.clone(),
                                            subscription.receiver,
                                            out_tx.clone(),
                                        );
                                        membership.insert(&message.topic, request.username, forwarder);
                                        Reply::Ok(JoinAccepted {
                                            annotations: subscription.backlog,
                                        })
                                    }
                                    Err(reason) => Reply::error(reason),
                                },
                                Err(e) => Reply::error(e.to_string()),
                            };
                            Some(FeedMessage::join_reply(message.reference, &message.topic, &outcome)?)
                        }
                        MessageType::Push => {
                            let outcome = match (message.draft(), membership.username(&message.topic)) {
                                (Ok(draft), Some(username)) => {
                                    match hub.publish(&message.topic, Author::new(username), draft).await {
                                        Ok(annotation) => {
                                            stats.write().await.annotations_published += 1;
                                            Reply::Ok(PushAccepted { id: annotation.id })
                                        }
                                        Err(reason) => Reply::error(reason),
                                    }
                                }
                                (Ok(_), None) => Reply::error(format!("not joined to {}", message.topic)),
                                (Err(e), _) => Reply::error(e.to_string()),
                            };
                            Some(FeedMessage::push_reply(message.reference, &message.topic, &outcome)?)
                        }
                        MessageType::Leave => {
                            if membership.remove(&message.topic) {
                                hub.leave(&message.topic, &conn_id).await;
                                log::debug!("{conn_id} left {}", message.topic);
                            }
                            None
                        }
                        MessageType::Ping => Some(FeedMessage::pong(message.reference)),
                        other => {
                            log::debug!("Unhandled message type: {other:?}");
                            None
                        }
                    };

                    if let Some(reply) = reply {
                        ws_sender.send(Message::Binary(reply.encode()?.into())).await?;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    log::info!("Connection closed from {addr}");
                    break;
                }
                Some(Ok(Message::Ping(data))) => {
                    ws_sender.send(Message::Pong(data)).await?;
                }
                Some(Err(e)) => {
                    log::error!("WebSocket error from {addr}: {e}");
                    break;
                }
                _ => {}
            },

            // Outgoing live annotation
            Some(encoded) = out_rx.recv() => {
                ws_sender.send(Message::Binary(encoded.into())).await?;
            }
        }
    }
    Ok(())
}
