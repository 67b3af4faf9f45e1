//! Playback-driven reveal scheduling.
//!
//! Annotations wait in a pending set, in the order they arrived, until
//! playback reaches their offset. Each tick moves every due annotation out
//! of the pending set and hands it to the renderer, still in arrival order.
//! Reveals are final: seeking backwards neither hides anything nor brings a
//! revealed annotation back.
//!
//! ```text
//!  enqueue(ann) ──► pending [a5000, b3000, c9000]
//!                        │
//!  tick(6000) ───────────┤ take_due: a5000, b3000   (arrival order)
//!                        ▼
//!                   render(a), render(b)
//!                   pending [c9000], revealed {a, b}
//! ```

use std::collections::HashSet;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, Sleep};

use crate::annotation::Annotation;
use crate::render::Renderer;

/// Cadence of the reveal loop.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// Pending set plus reveal bookkeeping for one session.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    /// Not yet revealed, in arrival order
    pending: Vec<Annotation>,
    pending_ids: HashSet<u64>,
    revealed: HashSet<u64>,
    last_seek_ms: Option<u64>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an annotation behind everything already pending.
    ///
    /// Returns `false` if the annotation is already pending or was already
    /// revealed; such duplicates are dropped.
    pub fn enqueue(&mut self, annotation: Annotation) -> bool {
        if self.revealed.contains(&annotation.id) || !self.pending_ids.insert(annotation.id) {
            log::debug!("annotation {} already scheduled, skipping", annotation.id);
            return false;
        }
        self.pending.push(annotation);
        true
    }

    /// Enqueue a batch in order. Returns how many were accepted.
    pub fn enqueue_all<I>(&mut self, annotations: I) -> usize
    where
        I: IntoIterator<Item = Annotation>,
    {
        annotations
            .into_iter()
            .map(|a| self.enqueue(a))
            .filter(|accepted| *accepted)
            .count()
    }

    /// Pending annotations that are due at `now_ms`, in arrival order.
    pub fn due(&self, now_ms: u64) -> Vec<&Annotation> {
        self.pending.iter().filter(|a| a.is_due(now_ms)).collect()
    }

    /// Remove and return everything due at `now_ms`, in arrival order, and
    /// mark it revealed. The pending set keeps only `at > now_ms`.
    pub fn take_due(&mut self, now_ms: u64) -> Vec<Annotation> {
        let (due, not_due): (Vec<Annotation>, Vec<Annotation>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|a| a.is_due(now_ms));
        self.pending = not_due;

        for annotation in &due {
            self.pending_ids.remove(&annotation.id);
            self.revealed.insert(annotation.id);
        }
        due
    }

    /// Reveal everything due at `now_ms`. Returns the number revealed.
    pub fn tick<R>(&mut self, now_ms: u64, renderer: &mut R) -> usize
    where
        R: Renderer + ?Sized,
    {
        let due = self.take_due(now_ms);
        for annotation in &due {
            log::debug!("revealing annotation {} (at={}ms, now={now_ms}ms)", annotation.id, annotation.at);
            renderer.render(annotation);
        }
        due.len()
    }

    /// Note a seek. The pending set is left as it is: nothing
    /// revealed before the seek is revealed again, nothing is hidden.
    pub fn on_seek(&mut self, new_time_ms: u64) {
        log::debug!(
            "seek to {new_time_ms}ms ({} pending, {} revealed)",
            self.pending.len(),
            self.revealed.len()
        );
        self.last_seek_ms = Some(new_time_ms);
    }

    /// Pending annotations in arrival order.
    pub fn pending(&self) -> &[Annotation] {
        &self.pending
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending_ids.contains(&id)
    }

    pub fn has_revealed(&self, id: u64) -> bool {
        self.revealed.contains(&id)
    }

    pub fn revealed_count(&self) -> usize {
        self.revealed.len()
    }

    /// Target of the most recent seek.
    pub fn last_seek_ms(&self) -> Option<u64> {
        self.last_seek_ms
    }
}

/// Self-rearming tick timer.
///
/// The next deadline is only armed by [`RevealTimer::rearm`], which the
/// owner calls after the tick body has run, so a slow tick pushes the next
/// one back instead of letting ticks pile up.
#[derive(Debug)]
pub struct RevealTimer {
    interval: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl RevealTimer {
    /// Timer whose first deadline is one interval from now.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            sleep: Box::pin(tokio::time::sleep(interval)),
        }
    }

    /// Wait for the armed deadline. Cancel safe.
    pub async fn expired(&mut self) {
        self.sleep.as_mut().await;
    }

    /// Arm the next deadline one interval from now.
    pub fn rearm(&mut self) {
        let next = Instant::now() + self.interval;
        self.sleep.as_mut().reset(next);
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
