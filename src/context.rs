//! Per-channel conversation context and its persistence seam.

mod memory;
mod sqlite;

pub use memory::InMemoryContextStore;
pub use sqlite::SqliteContextStore;

use crate::ChannelId;
use crate::compaction::estimate_tokens;
use crate::error::StoreError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn of conversation. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Estimated token cost of this turn.
    pub fn tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

/// Everything the engine remembers about one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelContext {
    pub channel_id: ChannelId,
    /// Turns in arrival order, oldest first.
    pub turns: Vec<ConversationTurn>,
    /// Durable facts about the user, maintained by summarization.
    pub user_summary: String,
    /// Rolling summary of turns folded away by progressive compaction.
    pub conversation_summary: String,
    /// Estimated token total across all turns. Kept current by `push_turn`.
    pub total_tokens: usize,
    /// Set when the token total crosses the configured threshold; the next
    /// message for this channel triggers progressive summarization.
    pub needs_summarization: bool,
}

impl ChannelContext {
    pub fn new(channel_id: impl Into<ChannelId>) -> Self {
        Self {
            channel_id: channel_id.into(),
            turns: Vec::new(),
            user_summary: String::new(),
            conversation_summary: String::new(),
            total_tokens: 0,
            needs_summarization: false,
        }
    }

    pub fn push_turn(&mut self, turn: ConversationTurn) {
        self.total_tokens += turn.tokens();
        self.turns.push(turn);
    }

    /// Recompute the token total from scratch. Called after compaction
    /// replaces the turn list.
    pub fn recompute_tokens(&mut self) {
        self.total_tokens = self.turns.iter().map(ConversationTurn::tokens).sum();
    }

    /// User and conversation summaries merged for prompt assembly. Empty
    /// sections are omitted.
    pub fn combined_summary(&self) -> String {
        match (self.user_summary.is_empty(), self.conversation_summary.is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.user_summary.clone(),
            (true, false) => self.conversation_summary.clone(),
            (false, false) => {
                format!("{}\n\n{}", self.user_summary, self.conversation_summary)
            }
        }
    }
}

/// Durable storage for channel contexts.
///
/// `load` returns a fresh empty context for unknown channels; callers cannot
/// distinguish "new channel" from "empty channel" and never need to.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn load(&self, channel_id: &ChannelId) -> Result<ChannelContext, StoreError>;
    async fn save(&self, context: &ChannelContext) -> Result<(), StoreError>;
}
