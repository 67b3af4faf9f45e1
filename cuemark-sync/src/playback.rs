//! Playback collaborator.
//!
//! The engine only needs two things from a video player: where playback is
//! right now, and a way to jump. Readiness is an explicit one-shot handed to
//! the player when it is built, so nothing waits on a process-wide hook.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::oneshot;

use crate::error::PlayerError;

/// Current-position source and seek target.
pub trait Playback: Send + Sync + 'static {
    /// Current playback position in milliseconds.
    fn current_time_ms(&self) -> u64;

    /// Move playback to `ms`.
    fn seek_to(&self, ms: u64);
}

/// Player side of the readiness handshake. Fires at most once.
#[derive(Debug)]
pub struct ReadySignal {
    tx: Option<oneshot::Sender<()>>,
}

impl ReadySignal {
    /// Signal readiness. Later calls are no-ops.
    pub fn fire(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn has_fired(&self) -> bool {
        self.tx.is_none()
    }
}

/// Session side of the readiness handshake.
#[derive(Debug)]
pub struct Readiness {
    rx: oneshot::Receiver<()>,
}

impl Readiness {
    /// Resolve once the player signals readiness.
    pub async fn wait(self) -> Result<(), PlayerError> {
        self.rx.await.map_err(|_| PlayerError::NeverReady)
    }

    /// A readiness that has already resolved, for players that are usable
    /// as soon as they exist.
    pub fn ready() -> Self {
        let (mut signal, readiness) = readiness();
        signal.fire();
        readiness
    }
}

/// Create a linked signal/readiness pair.
pub fn readiness() -> (ReadySignal, Readiness) {
    let (tx, rx) = oneshot::channel();
    (ReadySignal { tx: Some(tx) }, Readiness { rx })
}

#[derive(Debug)]
struct Clock {
    /// Position at `anchor`
    base_ms: u64,
    /// Wall-clock instant `base_ms` was recorded, `None` while paused
    anchor: Option<Instant>,
}

impl Clock {
    fn position(&self) -> u64 {
        match self.anchor {
            Some(anchor) => {
                let elapsed = u64::try_from(anchor.elapsed().as_millis()).unwrap_or(u64::MAX);
                self.base_ms.saturating_add(elapsed)
            }
            None => self.base_ms,
        }
    }
}

/// Wall-clock driven player, standing in for a real video element.
#[derive(Debug)]
pub struct SimulatedPlayer {
    clock: Mutex<Clock>,
    ready: Mutex<ReadySignal>,
}

impl SimulatedPlayer {
    /// Create a paused player at position 0. `ready` fires on first `load`.
    pub fn new(ready: ReadySignal) -> Self {
        Self {
            clock: Mutex::new(Clock {
                base_ms: 0,
                anchor: None,
            }),
            ready: Mutex::new(ready),
        }
    }

    /// Finish loading and signal readiness.
    pub fn load(&self) {
        self.ready.lock().unwrap_or_else(PoisonError::into_inner).fire();
        log::debug!("simulated player ready");
    }

    pub fn play(&self) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        if clock.anchor.is_none() {
            clock.anchor = Some(Instant::now());
        }
    }

    pub fn pause(&self) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        clock.base_ms = clock.position();
        clock.anchor = None;
    }

    pub fn is_playing(&self) -> bool {
        self.clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .anchor
            .is_some()
    }
}

impl Playback for SimulatedPlayer {
    fn current_time_ms(&self) -> u64 {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner).position()
    }

    fn seek_to(&self, ms: u64) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        clock.base_ms = ms;
        if clock.anchor.is_some() {
            clock.anchor = Some(Instant::now());
        }
    }
}
