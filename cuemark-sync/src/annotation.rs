//! Annotation data model.
//!
//! An annotation is a note pinned to a millisecond offset in a video's
//! timeline. Ids are assigned by the feed and are unique and increasing
//! per topic; `at` is independent of `id`, so a later annotation may well
//! point at an earlier moment in the video.

use serde::{Deserialize, Serialize};

/// Author attribution carried with every annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub username: String,
}

impl Author {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// A feed-confirmed annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Feed-assigned identifier
    pub id: u64,
    /// Position in the video timeline, in milliseconds
    pub at: u64,
    pub body: String,
    pub author: Author,
}

impl Annotation {
    pub fn new(id: u64, at: u64, body: impl Into<String>, author: Author) -> Self {
        Self {
            id,
            at,
            body: body.into(),
            author,
        }
    }

    /// Whether playback at `now_ms` has reached this annotation.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.at <= now_ms
    }
}

/// Outbound annotation draft. The feed assigns `id` and `author`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAnnotation {
    pub body: String,
    pub at: u64,
}

impl NewAnnotation {
    pub fn new(body: impl Into<String>, at: u64) -> Self {
        Self {
            body: body.into(),
            at,
        }
    }
}
