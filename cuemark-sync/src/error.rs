//! Error taxonomy for the sync engine.
//!
//! None of these are fatal to a session: a failed join or push leaves the
//! cursor and the pending set untouched and the annotation stream simply
//! stalls until the caller acts.

use thiserror::Error;

/// Wire and connection level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Invalid message type")]
    InvalidMessageType,
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Request timed out")]
    Timeout,
}

/// The feed rejected the join, or could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// Server-supplied rejection reason
    #[error("join rejected: {reason}")]
    Rejected { reason: String },
    #[error("join failed: {0}")]
    Transport(#[from] ProtocolError),
}

impl JoinError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// An outbound annotation was not delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("push rejected: {reason}")]
    Rejected { reason: String },
    #[error("push failed: {0}")]
    Transport(#[from] ProtocolError),
}

impl PushError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Failures reported through a session handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error(transparent)]
    Push(#[from] PushError),
}

/// Playback collaborator failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    #[error("player was dropped before signalling readiness")]
    NeverReady,
}
