//! Binary wire protocol for the annotation feed.
//!
//! Every WebSocket binary frame carries one bincode-encoded [`FeedMessage`]:
//! ```text
//! ┌──────────┬──────────┬───────────┬──────────┐
//! │ msg_type │ topic    │ reference │ payload  │
//! │ 1 byte   │ variable │ varint    │ variable │
//! └──────────┴──────────┴───────────┴──────────┘
//! ```
//!
//! Requests (`Join`, `Push`, `Ping`) carry a client-chosen `reference`; the
//! matching reply echoes it back. Broadcasts use reference 0.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::annotation::{Annotation, NewAnnotation};
pub use crate::error::ProtocolError;

/// Message types for the feed protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Join a topic, carrying the resume hint
    Join = 1,
    /// Reply to a join: backlog or rejection
    JoinReply = 2,
    /// Outbound annotation draft
    Push = 3,
    /// Reply to a push: assigned id or rejection
    PushReply = 4,
    /// Live annotation broadcast
    NewAnnotation = 5,
    /// Leave a topic
    Leave = 6,
    /// Heartbeat ping
    Ping = 7,
    /// Heartbeat pong
    Pong = 8,
}

/// Resume hint sent with every join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinParams {
    pub last_seen_id: Option<u64>,
}

/// Join payload as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub params: JoinParams,
    /// Display name used to attribute annotations pushed on this topic
    pub username: String,
}

/// Request outcome, echoed back under the request's reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply<T> {
    Ok(T),
    Error { reason: String },
}

impl<T> Reply<T> {
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Error { reason } => Err(reason),
        }
    }
}

/// Successful join: the backlog the server decided to (re)send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinAccepted {
    pub annotations: Vec<Annotation>,
}

/// Successful push: the id the feed assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAccepted {
    pub id: u64,
}

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedMessage {
    pub msg_type: MessageType,
    /// Feed topic, e.g. `videos:42`
    pub topic: String,
    /// Request/reply correlation, 0 for broadcasts
    pub reference: u64,
    /// Message payload (varies by msg_type)
    pub payload: Vec<u8>,
}

fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(value)
}

impl FeedMessage {
    fn with_payload<T: Serialize>(
        msg_type: MessageType,
        topic: &str,
        reference: u64,
        value: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            msg_type,
            topic: topic.to_string(),
            reference,
            payload: encode_payload(value)?,
        })
    }

    /// Create a join request.
    pub fn join(reference: u64, topic: &str, request: &JoinRequest) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageType::Join, topic, reference, request)
    }

    /// Create a join reply.
    pub fn join_reply(
        reference: u64,
        topic: &str,
        reply: &Reply<JoinAccepted>,
    ) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageType::JoinReply, topic, reference, reply)
    }

    /// Create an outbound push.
    pub fn push(reference: u64, topic: &str, draft: &NewAnnotation) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageType::Push, topic, reference, draft)
    }

    /// Create a push reply.
    pub fn push_reply(
        reference: u64,
        topic: &str,
        reply: &Reply<PushAccepted>,
    ) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageType::PushReply, topic, reference, reply)
    }

    /// Create a live annotation broadcast.
    pub fn new_annotation(topic: &str, annotation: &Annotation) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageType::NewAnnotation, topic, 0, annotation)
    }

    /// Create a leave notification.
    pub fn leave(topic: &str) -> Self {
        Self {
            msg_type: MessageType::Leave,
            topic: topic.to_string(),
            reference: 0,
            payload: Vec::new(),
        }
    }

    /// Create a ping message.
    pub fn ping(reference: u64) -> Self {
        Self {
            msg_type: MessageType::Ping,
            topic: String::new(),
            reference,
            payload: Vec::new(),
        }
    }

    /// Create a pong message.
    pub fn pong(reference: u64) -> Self {
        Self {
            msg_type: MessageType::Pong,
            topic: String::new(),
            reference,
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_payload(self)
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode_payload(bytes)
    }

    fn expect_payload<T: DeserializeOwned>(&self, msg_type: MessageType) -> Result<T, ProtocolError> {
        if self.msg_type != msg_type {
            return Err(ProtocolError::InvalidMessageType);
        }
        decode_payload(&self.payload)
    }

    /// Parse join request payload.
    pub fn join_request(&self) -> Result<JoinRequest, ProtocolError> {
        self.expect_payload(MessageType::Join)
    }

    /// Parse join reply payload.
    pub fn join_outcome(&self) -> Result<Reply<JoinAccepted>, ProtocolError> {
        self.expect_payload(MessageType::JoinReply)
    }

    /// Parse push payload.
    pub fn draft(&self) -> Result<NewAnnotation, ProtocolError> {
        self.expect_payload(MessageType::Push)
    }

    /// Parse push reply payload.
    pub fn push_outcome(&self) -> Result<Reply<PushAccepted>, ProtocolError> {
        self.expect_payload(MessageType::PushReply)
    }

    /// Parse broadcast annotation payload.
    pub fn annotation(&self) -> Result<Annotation, ProtocolError> {
        self.expect_payload(MessageType::NewAnnotation)
    }

    /// Whether this message answers a request (and so carries its reference).
    pub fn is_reply(&self) -> bool {
        matches!(
            self.msg_type,
            MessageType::JoinReply | MessageType::PushReply | MessageType::Pong
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Author;

    #[test]
    fn test_join_carries_resume_hint() {
        let request = JoinRequest {
            params: JoinParams { last_seen_id: Some(41) },
            username: "ana".into(),
        };
        let msg = FeedMessage::join(7, "videos:1", &request).unwrap();
        let decoded = FeedMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.msg_type, MessageType::Join);
        assert_eq!(decoded.topic, "videos:1");
        assert_eq!(decoded.reference, 7);
        assert_eq!(decoded.join_request().unwrap(), request);
    }

    #[test]
    fn test_join_without_cursor() {
        let request = JoinRequest {
            params: JoinParams::default(),
            username: "ana".into(),
        };
        let msg = FeedMessage::join(1, "videos:1", &request).unwrap();
        let parsed = msg.join_request().unwrap();
        assert_eq!(parsed.params.last_seen_id, None);
    }

    #[test]
    fn test_join_reply_error_keeps_reason() {
        let reply: Reply<JoinAccepted> = Reply::error("unknown topic");
        let msg = FeedMessage::join_reply(3, "nope", &reply).unwrap();
        let decoded = FeedMessage::decode(&msg.encode().unwrap()).unwrap();

        let outcome = decoded.join_outcome().unwrap().into_result();
        assert_eq!(outcome, Err("unknown topic".to_string()));
    }

    #[test]
    fn test_join_reply_backlog_order_preserved() {
        let author = Author::new("bo");
        let backlog = vec![
            Annotation::new(5, 100, "a", author.clone()),
            Annotation::new(2, 200, "b", author.clone()),
            Annotation::new(9, 300, "c", author),
        ];
        let reply = Reply::Ok(JoinAccepted {
            annotations: backlog.clone(),
        });
        let msg = FeedMessage::join_reply(1, "videos:1", &reply).unwrap();
        let decoded = FeedMessage::decode(&msg.encode().unwrap()).unwrap();

        let accepted = decoded.join_outcome().unwrap().into_result().unwrap();
        let ids: Vec<u64> = accepted.annotations.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![5, 2, 9]);
    }

    #[test]
    fn test_broadcast_uses_reference_zero() {
        let ann = Annotation::new(3, 1500, "yo", Author::new("cy"));
        let msg = FeedMessage::new_annotation("videos:9", &ann).unwrap();
        assert_eq!(msg.reference, 0);
        assert!(!msg.is_reply());
        assert_eq!(msg.annotation().unwrap(), ann);
    }

    #[test]
    fn test_invalid_message_type_error() {
        let msg = FeedMessage::ping(1);
        assert_eq!(msg.annotation(), Err(ProtocolError::InvalidMessageType));
        assert_eq!(msg.join_request(), Err(ProtocolError::InvalidMessageType));
        assert!(msg.draft().is_err());
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(FeedMessage::decode(&garbage).is_err());
    }

    #[test]
    fn test_reply_classification() {
        assert!(FeedMessage::pong(1).is_reply());
        assert!(!FeedMessage::ping(1).is_reply());
        assert!(!FeedMessage::leave("videos:1").is_reply());
    }

    #[test]
    fn test_message_type_values() {
        assert_eq!(MessageType::Join as u8, 1);
        assert_eq!(MessageType::JoinReply as u8, 2);
        assert_eq!(MessageType::Push as u8, 3);
        assert_eq!(MessageType::PushReply as u8, 4);
        assert_eq!(MessageType::NewAnnotation as u8, 5);
        assert_eq!(MessageType::Leave as u8, 6);
        assert_eq!(MessageType::Ping as u8, 7);
        assert_eq!(MessageType::Pong as u8, 8);
    }
}
