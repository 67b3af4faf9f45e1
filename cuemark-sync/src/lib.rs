//! # cuemark-sync: Time-coded annotation sync for video playback
//!
//! Keeps a live feed of annotations in step with a player's position,
//! across reconnects and seeking.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ FeedClient  │ ◄─────────────────► │ FeedServer  │
//! │ (Transport) │     Binary Proto    │ (central)   │
//! └──────┬──────┘                     └──────┬──────┘
//!        │ FeedEvent                         │
//!        ▼                                   ▼
//! ┌─────────────────┐                 ┌─────────────┐
//! │ SyncController  │                 │ FeedHub     │
//! │  ResumeProtocol │                 │ (ids,       │
//! │  Scheduler      │                 │  backlog)   │
//! └──────┬──────────┘                 └──────┬──────┘
//!        │ tick(current_time_ms)             │
//!        ▼                           ┌───────┴───────┐
//! ┌─────────────┐                    │ TopicGroup    │
//! │ Renderer    │                    │ (fan-out)     │
//! └─────────────┘                    └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`annotation`]: Annotation, author and outbound draft
//! - [`cursor`]: Resume cursor and its update policy
//! - [`resume`]: Join with resume hint, cursor maintenance
//! - [`scheduler`]: Pending set, reveal ticks, seek handling
//! - [`controller`]: Session wiring and the spawned session task
//! - [`protocol`]: Binary wire protocol (bincode-encoded FeedMessage)
//! - [`transport`]: Transport contract and in-process transport
//! - [`client`]: WebSocket transport client
//! - [`server`]: WebSocket feed server
//! - [`feed`]: Server-side feeds and backlog queries
//! - [`broadcast`]: Topic-based fan-out with backpressure
//! - [`playback`]: Player contract, readiness, simulated player
//! - [`render`]: Renderer contract and formatting helpers

pub mod annotation;
pub mod broadcast;
pub mod client;
pub mod controller;
pub mod cursor;
pub mod error;
pub mod feed;
pub mod playback;
pub mod protocol;
pub mod render;
pub mod resume;
pub mod scheduler;
pub mod server;
pub mod transport;

// Re-exports for convenience
pub use annotation::{Annotation, Author, NewAnnotation};
pub use broadcast::{BroadcastStats, TopicGroup, TopicRegistry};
pub use client::{ClientConfig, ConnectionState, FeedClient};
pub use controller::{SessionConfig, SessionHandle, SessionSnapshot, SessionStatus, SyncController};
pub use cursor::{CursorPolicy, ResumeCursor};
pub use error::{JoinError, PlayerError, ProtocolError, PushError, SessionError};
pub use feed::{parse_topic, video_topic, Feed, FeedHub, DEFAULT_BACKLOG_LIMIT};
pub use playback::{readiness, Playback, ReadySignal, Readiness, SimulatedPlayer};
pub use protocol::{FeedMessage, JoinParams, MessageType};
pub use render::{annotation_html, escape_html, format_timestamp, parse_timestamp, LineRenderer, Renderer};
pub use resume::ResumeProtocol;
pub use scheduler::{PlaybackScheduler, RevealTimer, DEFAULT_TICK_INTERVAL};
pub use server::{FeedServer, ServerConfig, ServerStats};
pub use transport::{FeedEvent, LocalTransport, Transport};
