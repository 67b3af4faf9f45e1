//! Server-side annotation feeds.
//!
//! A [`Feed`] owns the annotations of one video topic, assigns their ids and
//! answers backlog queries for resuming clients. [`FeedHub`] pairs every
//! feed with its broadcast group; both the WebSocket server and the
//! in-process transport are thin shells around it.
//!
//! Annotations live in memory for the lifetime of the hub.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::annotation::{Annotation, Author, NewAnnotation};
use crate::broadcast::TopicRegistry;
use crate::protocol::JoinParams;

/// Largest backlog a single join returns.
pub const DEFAULT_BACKLOG_LIMIT: usize = 200;

const TOPIC_PREFIX: &str = "videos:";

/// Extract the video id from a `videos:<id>` topic.
pub fn parse_topic(topic: &str) -> Result<u64, String> {
    topic
        .strip_prefix(TOPIC_PREFIX)
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| format!("unknown topic: {topic}"))
}

/// Topic name for a video.
pub fn video_topic(video_id: u64) -> String {
    format!("{TOPIC_PREFIX}{video_id}")
}

/// Annotations of a single video.
#[derive(Debug, Default)]
pub struct Feed {
    annotations: Vec<Annotation>,
    last_id: u64,
}

impl Feed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotations the client has not seen according to its hint,
    /// ordered by timeline position (ties by id) and capped at `limit`.
    pub fn backlog(&self, params: JoinParams, limit: usize) -> Vec<Annotation> {
        let mut unseen: Vec<Annotation> = self
            .annotations
            .iter()
            .filter(|a| params.last_seen_id.map_or(true, |seen| a.id > seen))
            .cloned()
            .collect();
        unseen.sort_by_key(|a| (a.at, a.id));
        unseen.truncate(limit);
        unseen
    }

    /// Validate a draft and append it with the next id.
    pub fn append(&mut self, author: Author, draft: NewAnnotation) -> Result<Annotation, String> {
        if draft.body.trim().is_empty() {
            return Err("body can't be blank".to_string());
        }
        self.last_id += 1;
        let annotation = Annotation {
            id: self.last_id,
            at: draft.at,
            body: draft.body,
            author,
        };
        self.annotations.push(annotation.clone());
        Ok(annotation)
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }
}

/// A successful join: the backlog plus the live receiver.
pub struct Subscription {
    pub backlog: Vec<Annotation>,
    pub receiver: broadcast::Receiver<Arc<Annotation>>,
}

/// All feeds of a server, keyed by topic.
pub struct FeedHub {
    feeds: RwLock<HashMap<String, Feed>>,
    registry: TopicRegistry,
    backlog_limit: usize,
}

impl FeedHub {
    pub fn new(broadcast_capacity: usize, backlog_limit: usize) -> Self {
        Self {
            feeds: RwLock::new(HashMap::new()),
            registry: TopicRegistry::new(broadcast_capacity),
            backlog_limit,
        }
    }

    /// Join `topic` as `conn_id`.
    ///
    /// Subscribing and computing the backlog happen under the feed lock, so
    /// an annotation published concurrently lands in exactly one of them.
    pub async fn join(
        &self,
        topic: &str,
        conn_id: Uuid,
        username: &str,
        params: JoinParams,
    ) -> Result<Subscription, String> {
        parse_topic(topic)?;

        let mut feeds = self.feeds.write().await;
        let feed = feeds.entry(topic.to_string()).or_default();
        let group = self.registry.get_or_create(topic).await;
        let receiver = group.add_subscriber(conn_id, username).await;
        let backlog = feed.backlog(params, self.backlog_limit);

        log::debug!(
            "{username} joined {topic} (last_seen_id={:?}, backlog={})",
            params.last_seen_id,
            backlog.len()
        );
        Ok(Subscription { backlog, receiver })
    }

    /// Leave `topic`. Returns whether the connection had joined it.
    pub async fn leave(&self, topic: &str, conn_id: &Uuid) -> bool {
        // Held so an empty group is never dropped under a concurrent join
        let _feeds = self.feeds.write().await;
        let removed = match self.registry.get(topic).await {
            Some(group) => group.remove_subscriber(conn_id).await.is_some(),
            None => false,
        };
        self.registry.remove_if_empty(topic).await;
        removed
    }

    /// Append a draft to `topic` and broadcast it to every subscriber.
    pub async fn publish(
        &self,
        topic: &str,
        author: Author,
        draft: NewAnnotation,
    ) -> Result<Annotation, String> {
        parse_topic(topic)?;

        let mut feeds = self.feeds.write().await;
        let annotation = feeds
            .entry(topic.to_string())
            .or_default()
            .append(author, draft)?;

        if let Some(group) = self.registry.get(topic).await {
            let reached = group.publish(annotation.clone());
            log::trace!("annotation {} on {topic} reached {reached} subscribers", annotation.id);
        }
        Ok(annotation)
    }

    /// Number of annotations stored for `topic`.
    pub async fn annotation_count(&self, topic: &str) -> usize {
        self.feeds.read().await.get(topic).map_or(0, Feed::len)
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }
}

impl Default for FeedHub {
    fn default() -> Self {
        Self::new(256, DEFAULT_BACKLOG_LIMIT)
    }
}
