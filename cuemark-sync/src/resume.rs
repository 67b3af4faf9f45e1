//! Resume protocol: join a feed with the cursor as hint, and keep the
//! cursor current as annotations arrive.
//!
//! The cursor moves in exactly two places:
//! - after a successful join, to the largest id in the backlog
//!   ([`ResumeProtocol::on_cursor_seed`]);
//! - on every live annotation, per the configured [`CursorPolicy`]
//!   ([`ResumeProtocol::on_live_annotation`]).
//!
//! A failed join changes nothing and is never retried from here.

use std::future::Future;
use std::sync::Arc;

use crate::annotation::Annotation;
use crate::cursor::{CursorPolicy, ResumeCursor};
use crate::error::JoinError;
use crate::protocol::JoinParams;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct ResumeProtocol {
    topic: String,
    cursor: ResumeCursor,
    policy: CursorPolicy,
}

impl ResumeProtocol {
    pub fn new(topic: impl Into<String>, policy: CursorPolicy) -> Self {
        Self {
            topic: topic.into(),
            cursor: ResumeCursor::new(),
            policy,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn cursor(&self) -> ResumeCursor {
        self.cursor
    }

    pub fn last_seen_id(&self) -> Option<u64> {
        self.cursor.last_seen_id()
    }

    pub fn policy(&self) -> CursorPolicy {
        self.policy
    }

    /// Parameters for the next (re)join, carrying the current cursor.
    pub fn join_params(&self) -> JoinParams {
        JoinParams {
            last_seen_id: self.cursor.last_seen_id(),
        }
    }

    /// Join the feed with the current cursor as resume hint.
    ///
    /// The returned future owns everything it needs, so the caller can keep
    /// handling events (and mutating this protocol) while it is in flight.
    /// The hint is captured now; the backlog is not seeded into the cursor.
    pub fn join<T: Transport>(
        &self,
        transport: Arc<T>,
    ) -> impl Future<Output = Result<Vec<Annotation>, JoinError>> + Send + 'static {
        let topic = self.topic.clone();
        let params = self.join_params();
        async move {
            log::debug!("joining {topic} with last_seen_id={:?}", params.last_seen_id);
            let result = transport.join(&topic, params).await;
            match &result {
                Ok(backlog) => log::info!("joined {topic}, backlog of {}", backlog.len()),
                Err(e) => log::error!("join {topic} failed: {e}"),
            }
            result
        }
    }

    /// Seed the cursor from a join backlog (max id; empty leaves it alone).
    pub fn on_cursor_seed(&mut self, backlog: &[Annotation]) {
        self.cursor.seed(backlog.iter().map(|a| a.id));
    }

    /// Record a live annotation.
    pub fn on_live_annotation(&mut self, annotation: &Annotation) {
        self.cursor.observe(annotation.id, self.policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Author, NewAnnotation};
    use crate::feed::FeedHub;
    use crate::transport::LocalTransport;

    fn ann(id: u64) -> Annotation {
        Annotation::new(id, 0, "x", Author::new("ana"))
    }

    #[test]
    fn test_seed_uses_max_id() {
        let mut resume = ResumeProtocol::new("videos:1", CursorPolicy::LastWrite);
        resume.on_cursor_seed(&[ann(5), ann(2), ann(9)]);
        assert_eq!(resume.last_seen_id(), Some(9));
    }

    #[test]
    fn test_seed_empty_backlog_leaves_cursor_unset() {
        let mut resume = ResumeProtocol::new("videos:1", CursorPolicy::LastWrite);
        resume.on_cursor_seed(&[]);
        assert_eq!(resume.last_seen_id(), None);
        assert_eq!(resume.join_params(), JoinParams { last_seen_id: None });
    }

    #[test]
    fn test_live_update_overwrites() {
        let mut resume = ResumeProtocol::new("videos:1", CursorPolicy::LastWrite);
        resume.on_live_annotation(&ann(9));
        resume.on_live_annotation(&ann(3));
        assert_eq!(resume.last_seen_id(), Some(3));
        assert_eq!(resume.join_params().last_seen_id, Some(3));
    }

    #[test]
    fn test_monotonic_policy_keeps_highest() {
        let mut resume = ResumeProtocol::new("videos:1", CursorPolicy::Monotonic);
        resume.on_live_annotation(&ann(9));
        resume.on_live_annotation(&ann(3));
        assert_eq!(resume.last_seen_id(), Some(9));
    }

    #[tokio::test]
    async fn test_join_sends_cursor_as_hint() {
        let hub = Arc::new(FeedHub::default());
        let writer = Arc::new(LocalTransport::new(hub.clone(), "ana"));
        writer.join("videos:1", JoinParams::default()).await.unwrap();
        for i in 0..4 {
            writer
                .push("videos:1", NewAnnotation::new(format!("n{i}"), i * 100))
                .await
                .unwrap();
        }

        let mut resume = ResumeProtocol::new("videos:1", CursorPolicy::LastWrite);
        resume.on_live_annotation(&ann(2));

        let reader = Arc::new(LocalTransport::new(hub, "bo"));
        let backlog = resume.join(reader).await.unwrap();
        let ids: Vec<u64> = backlog.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 4]);
        // Seeding is the caller's step
        assert_eq!(resume.last_seen_id(), Some(2));
    }

    #[tokio::test]
    async fn test_failed_join_leaves_cursor_unchanged() {
        let transport = Arc::new(LocalTransport::new(Arc::new(FeedHub::default()), "ana"));
        transport.reject_joins(Some("closed".into()));

        let mut resume = ResumeProtocol::new("videos:1", CursorPolicy::LastWrite);
        resume.on_cursor_seed(&[ann(7)]);

        let err = resume.join(transport).await.unwrap_err();
        assert_eq!(err, JoinError::rejected("closed"));
        assert_eq!(resume.last_seen_id(), Some(7));
    }

    #[tokio::test]
    async fn test_join_unknown_topic_is_rejected() {
        let transport = Arc::new(LocalTransport::new(Arc::new(FeedHub::default()), "ana"));
        let resume = ResumeProtocol::new("lobby", CursorPolicy::LastWrite);
        assert!(matches!(
            resume.join(transport).await,
            Err(JoinError::Rejected { .. })
        ));
    }
}
