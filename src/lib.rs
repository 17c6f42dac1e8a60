//! Switchboard: a bounded message ingestion and orchestration engine for
//! multi-gateway conversational agents.
//!
//! Inbound messages from any gateway flow through a single pipeline:
//! directive parsing, a security gate, context load, compaction, tool policy
//! resolution, skill matching, prompt assembly, dispatch to an external
//! reasoning component, persistence, and response routing. The engine owns
//! ordering and failure isolation per channel; everything that talks to the
//! outside world (gateways, the LLM, summarization, host probing) is a trait.

pub mod bus;
pub mod compaction;
pub mod config;
pub mod context;
pub mod directives;
pub mod error;
pub mod gateway;
pub mod pipeline;
pub mod policy;
pub mod reasoning;
pub mod security;
pub mod skills;
pub mod telemetry;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Channel identifier type. One channel is one conversation scope.
pub type ChannelId = Arc<str>;

/// Message identifier type.
pub type MessageId = uuid::Uuid;

/// Correlation identifier threading one message through telemetry.
pub type CorrelationId = uuid::Uuid;

/// The gateway a message arrived through (or leaves through).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Cli,
    WebSocket,
    Telegram,
    Http,
    Scheduler,
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayKind::Cli => write!(f, "cli"),
            GatewayKind::WebSocket => write!(f, "websocket"),
            GatewayKind::Telegram => write!(f, "telegram"),
            GatewayKind::Http => write!(f, "http"),
            GatewayKind::Scheduler => write!(f, "scheduler"),
        }
    }
}

/// Response capabilities a gateway (or an outbound payload) supports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCapability {
    Text,
    Audio,
    Image,
}

/// Processing status of an inbound message. Transitions are forward-only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Done,
    Failed,
    DeadLettered,
}

impl MessageStatus {
    /// Whether this status is terminal. Every message reaches exactly one.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Done | MessageStatus::Failed | MessageStatus::DeadLettered
        )
    }

    /// Advance to `next`, rejecting backward transitions and moves out of a
    /// terminal state. Returns whether the transition happened.
    pub fn advance(&mut self, next: MessageStatus) -> bool {
        if next > *self && !self.is_terminal() {
            *self = next;
            true
        } else {
            false
        }
    }
}

/// File attachment metadata. Content lives in external storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub url: Option<String>,
}

impl Attachment {
    pub fn is_audio(&self) -> bool {
        self.content_type.starts_with("audio/")
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

/// Inbound message from any gateway.
///
/// Immutable after creation except `status`, which only moves forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub user_id: Option<String>,
    pub gateway: GatewayKind,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub correlation_id: CorrelationId,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub status: MessageStatus,
}

impl InboundMessage {
    /// Build a new pending message with fresh identity and correlation ids.
    pub fn new(
        channel_id: impl Into<ChannelId>,
        gateway: GatewayKind,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            channel_id: channel_id.into(),
            user_id: None,
            gateway,
            text: text.into(),
            attachments: Vec::new(),
            correlation_id: uuid::Uuid::new_v4(),
            received_at: chrono::Utc::now(),
            status: MessageStatus::Pending,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Outbound response to a gateway. Created once per successfully processed
/// inbound message and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: MessageId,
    pub reply_to: MessageId,
    pub channel_id: ChannelId,
    pub gateway: GatewayKind,
    pub capability: ResponseCapability,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub correlation_id: CorrelationId,
}

impl OutboundMessage {
    /// Build a text reply to `message`.
    pub fn reply_to(message: &InboundMessage, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            reply_to: message.id,
            channel_id: message.channel_id.clone(),
            gateway: message.gateway,
            capability: ResponseCapability::Text,
            text: text.into(),
            attachments: Vec::new(),
            correlation_id: message.correlation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_advances_forward_only() {
        let mut status = MessageStatus::Pending;
        assert!(status.advance(MessageStatus::Processing));
        assert!(status.advance(MessageStatus::Done));
        assert_eq!(status, MessageStatus::Done);

        // Terminal states never move again.
        assert!(!status.advance(MessageStatus::Failed));
        assert!(!status.advance(MessageStatus::Processing));
        assert_eq!(status, MessageStatus::Done);
    }

    #[test]
    fn status_rejects_backward_transition() {
        let mut status = MessageStatus::Processing;
        assert!(!status.advance(MessageStatus::Pending));
        assert_eq!(status, MessageStatus::Processing);
    }

    #[test]
    fn reply_inherits_channel_and_correlation() {
        let inbound = InboundMessage::new("chan-1", GatewayKind::Cli, "hello");
        let outbound = OutboundMessage::reply_to(&inbound, "hi");

        assert_eq!(outbound.reply_to, inbound.id);
        assert_eq!(outbound.correlation_id, inbound.correlation_id);
        assert_eq!(outbound.channel_id.as_ref(), "chan-1");
    }
}
