//! Session wiring: resume protocol + scheduler + collaborators.
//!
//! ```text
//!   Readiness ──► join(cursor) ──► backlog ──► on_cursor_seed + enqueue_all
//!                                                      │
//!   Transport ── NewAnnotation ──► on_live_annotation + enqueue
//!             ── Reconnected ───► join(cursor) again
//!                                                      │
//!   RevealTimer ── tick(player.current_time_ms()) ──► Renderer
//!   SessionHandle ── seek ──► player.seek_to + on_seek
//!                 ── post ──► transport.push({ body, at: now })
//! ```
//!
//! A spawned session is a single task. Timer, transport events and handle
//! commands are handled one at a time inside one `select!` loop, so the
//! cursor and the pending set need no locking.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::annotation::{Annotation, NewAnnotation};
use crate::cursor::CursorPolicy;
use crate::error::{JoinError, PushError, SessionError};
use crate::playback::{Playback, Readiness};
use crate::render::Renderer;
use crate::resume::ResumeProtocol;
use crate::scheduler::{PlaybackScheduler, RevealTimer, DEFAULT_TICK_INTERVAL};
use crate::transport::{FeedEvent, Transport};

type PendingJoin = Pin<Box<dyn Future<Output = Result<Vec<Annotation>, JoinError>> + Send>>;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay between the end of one tick and the start of the next
    pub tick_interval: Duration,
    /// How live annotations move the resume cursor
    pub cursor_policy: CursorPolicy,
    /// Buffered handle commands
    pub command_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            cursor_policy: CursorPolicy::LastWrite,
            command_capacity: 64,
        }
    }
}

/// Lifecycle of a spawned session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    WaitingForPlayer,
    Joining,
    /// Joined; `backlog` counts annotations newly scheduled from the reply
    Joined { backlog: usize },
    JoinFailed { reason: String },
    Disconnected,
    Closed,
}

/// Point-in-time view of a session's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub last_seen_id: Option<u64>,
    pub pending: usize,
    pub revealed: usize,
    pub last_seek_ms: Option<u64>,
}

enum Command {
    Seek(u64),
    Post {
        body: String,
        reply: oneshot::Sender<Result<(), PushError>>,
    },
    Rejoin,
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Composes the resume protocol and the scheduler around the transport,
/// player and renderer of one viewing session.
pub struct SyncController<T, P, R> {
    transport: Arc<T>,
    player: Arc<P>,
    renderer: R,
    resume: ResumeProtocol,
    scheduler: PlaybackScheduler,
    config: SessionConfig,
}

impl<T, P, R> SyncController<T, P, R>
where
    T: Transport,
    P: Playback,
    R: Renderer + Send + 'static,
{
    pub fn new(
        topic: impl Into<String>,
        transport: Arc<T>,
        player: Arc<P>,
        renderer: R,
        config: SessionConfig,
    ) -> Self {
        Self {
            resume: ResumeProtocol::new(topic, config.cursor_policy),
            scheduler: PlaybackScheduler::new(),
            transport,
            player,
            renderer,
            config,
        }
    }

    pub fn topic(&self) -> &str {
        self.resume.topic()
    }

    pub fn resume(&self) -> &ResumeProtocol {
        &self.resume
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribe to this session's topic on the transport.
    pub fn subscribe(&self) -> mpsc::Receiver<FeedEvent> {
        self.transport.subscribe(self.resume.topic())
    }

    /// Join (or rejoin) the feed and schedule the backlog.
    ///
    /// Returns how many backlog annotations were newly scheduled.
    pub async fn join(&mut self) -> Result<usize, JoinError> {
        let backlog = self.resume.join(self.transport.clone()).await?;
        Ok(self.on_join_backlog(backlog))
    }

    /// Seed the cursor from a join backlog, then schedule it.
    pub fn on_join_backlog(&mut self, backlog: Vec<Annotation>) -> usize {
        self.resume.on_cursor_seed(&backlog);
        self.scheduler.enqueue_all(backlog)
    }

    /// Record and schedule a live annotation.
    pub fn on_live_annotation(&mut self, annotation: Annotation) -> bool {
        self.resume.on_live_annotation(&annotation);
        self.scheduler.enqueue(annotation)
    }

    /// Apply one transport event. Returns `true` if the feed must be rejoined.
    pub fn on_feed_event(&mut self, event: FeedEvent) -> bool {
        match event {
            FeedEvent::NewAnnotation(annotation) => {
                self.on_live_annotation(annotation);
                false
            }
            FeedEvent::Disconnected => {
                log::warn!("transport for {} disconnected", self.topic());
                false
            }
            FeedEvent::Reconnected => {
                log::info!(
                    "transport for {} reconnected, rejoining after {:?}",
                    self.topic(),
                    self.resume.last_seen_id()
                );
                true
            }
        }
    }

    /// Reveal everything due at the player's current position.
    pub fn tick(&mut self) -> usize {
        let now_ms = self.player.current_time_ms();
        self.scheduler.tick(now_ms, &mut self.renderer)
    }

    /// Seek the player and tell the scheduler.
    pub fn seek(&mut self, ms: u64) {
        self.player.seek_to(ms);
        self.scheduler.on_seek(ms);
    }

    /// Push a new annotation at the player's current position.
    pub async fn post(&self, body: impl Into<String>) -> Result<(), PushError> {
        let draft = NewAnnotation::new(body, self.player.current_time_ms());
        push_draft(self.transport.clone(), self.resume.topic().to_string(), draft).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            last_seen_id: self.resume.last_seen_id(),
            pending: self.scheduler.pending_len(),
            revealed: self.scheduler.revealed_count(),
            last_seek_ms: self.scheduler.last_seek_ms(),
        }
    }

    /// Run the session on its own task.
    ///
    /// The task waits for `readiness`, joins, then drives the reveal loop
    /// until [`SessionHandle::shutdown`] is called or the handle is dropped.
    pub fn spawn(self, readiness: Readiness) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::channel(self.config.command_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::WaitingForPlayer);
        let events = self.subscribe();

        let task = tokio::spawn(self.run(readiness, events, command_rx, shutdown_rx, status_tx));

        SessionHandle {
            commands: command_tx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
            status: status_rx,
        }
    }

    async fn run(
        mut self,
        readiness: Readiness,
        mut events: mpsc::Receiver<FeedEvent>,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown: oneshot::Receiver<()>,
        status: watch::Sender<SessionStatus>,
    ) {
        tokio::select! {
            ready = readiness.wait() => {
                if let Err(e) = ready {
                    log::error!("session for {} not started: {e}", self.topic());
                    status.send_replace(SessionStatus::Closed);
                    return;
                }
            }
            _ = &mut shutdown => {
                status.send_replace(SessionStatus::Closed);
                return;
            }
        }

        status.send_replace(SessionStatus::Joining);
        let mut join: Option<PendingJoin> = Some(Box::pin(self.resume.join(self.transport.clone())));
        let mut timer = RevealTimer::new(self.config.tick_interval);
        let mut pushes: JoinSet<()> = JoinSet::new();
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                result = async {
                    match join.as_mut() {
                        Some(pending) => pending.await,
                        None => std::future::pending().await,
                    }
                } => {
                    join = None;
                    match result {
                        Ok(backlog) => {
                            let scheduled = self.on_join_backlog(backlog);
                            status.send_replace(SessionStatus::Joined { backlog: scheduled });
                        }
                        Err(e) => {
                            let reason = match e {
                                JoinError::Rejected { reason } => reason,
                                other => other.to_string(),
                            };
                            status.send_replace(SessionStatus::JoinFailed { reason });
                        }
                    }
                }

                _ = timer.expired() => {
                    let revealed = self.tick();
                    if revealed > 0 {
                        log::trace!("tick revealed {revealed} annotations");
                    }
                    timer.rearm();
                }

                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        let disconnected = event == FeedEvent::Disconnected;
                        if self.on_feed_event(event) {
                            status.send_replace(SessionStatus::Joining);
                            join = Some(Box::pin(self.resume.join(self.transport.clone())));
                        } else if disconnected {
                            status.send_replace(SessionStatus::Disconnected);
                        }
                    }
                    None => {
                        log::warn!("event stream for {} ended", self.topic());
                        events_open = false;
                    }
                },

                command = commands.recv() => match command {
                    Some(Command::Seek(ms)) => self.seek(ms),
                    Some(Command::Post { body, reply }) => {
                        let draft = NewAnnotation::new(body, self.player.current_time_ms());
                        let transport = self.transport.clone();
                        let topic = self.resume.topic().to_string();
                        pushes.spawn(async move {
                            let _ = reply.send(push_draft(transport, topic, draft).await);
                        });
                    }
                    Some(Command::Rejoin) => {
                        // Replacing a pending join drops (cancels) it
                        status.send_replace(SessionStatus::Joining);
                        join = Some(Box::pin(self.resume.join(self.transport.clone())));
                    }
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    None => break,
                },

                Some(_) = pushes.join_next(), if !pushes.is_empty() => {}
            }
        }

        pushes.abort_all();
        log::debug!("session for {} closed", self.topic());
        status.send_replace(SessionStatus::Closed);
    }
}

async fn push_draft<T: Transport>(
    transport: Arc<T>,
    topic: String,
    draft: NewAnnotation,
) -> Result<(), PushError> {
    let result = transport.push(&topic, draft).await;
    if let Err(e) = &result {
        log::error!("posting to {topic} failed: {e}");
    }
    result
}

/// Control surface of a spawned session.
///
/// Dropping the handle stops the session.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Seek the player to `ms` (e.g. a clicked annotation timestamp).
    pub async fn seek(&self, ms: u64) -> Result<(), SessionError> {
        self.send(Command::Seek(ms)).await
    }

    /// Post an annotation at the current playback position.
    ///
    /// Resolves once the feed accepted or rejected it.
    pub async fn post(&self, body: impl Into<String>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Post {
            body: body.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Closed)??;
        Ok(())
    }

    /// Rejoin the feed with the current cursor.
    pub async fn rejoin(&self) -> Result<(), SessionError> {
        self.send(Command::Rejoin).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Wait until the status satisfies `predicate`.
    pub async fn wait_for_status<F>(&self, mut predicate: F) -> Result<SessionStatus, SessionError>
    where
        F: FnMut(&SessionStatus) -> bool,
    {
        let mut status = self.status.clone();
        let matched = status
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(matched.clone())
    }

    /// Stop the reveal loop and any pending join, and wait for the task.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("session task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
