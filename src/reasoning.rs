//! Reasoning and summarization seams.
//!
//! The engine never talks to an LLM directly. It hands an assembled prompt
//! to a [`Reasoner`] and folded history to a [`Summarizer`], both injected at
//! startup. The stand-in implementations here exist for local runs and tests.

use crate::context::ConversationTurn;
use crate::pipeline::PromptPayload;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One tool invocation requested by the reasoning component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Reply from the reasoning component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// External reasoning component (the LLM call).
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Produce a reply for one assembled prompt. Failures are transient from
    /// the pipeline's point of view and go through the bus retry path.
    async fn invoke(&self, prompt: &PromptPayload) -> anyhow::Result<ReasoningReply>;
}

/// External summarization component used by progressive compaction.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Fold `dropped` turns into `prior`, returning the updated summary.
    /// Must be a pure function of its inputs so that re-running compaction
    /// over the same history cannot compound the summary.
    async fn fold(&self, prior: &str, dropped: &[ConversationTurn]) -> anyhow::Result<String>;
}

/// Reasoner that echoes the message text back. Used by the CLI gateway when
/// no model backend is configured, and by tests.
pub struct EchoReasoner;

#[async_trait]
impl Reasoner for EchoReasoner {
    async fn invoke(&self, prompt: &PromptPayload) -> anyhow::Result<ReasoningReply> {
        Ok(ReasoningReply {
            text: format!("echo: {}", prompt.user_text),
            tool_calls: Vec::new(),
        })
    }
}

/// Deterministic summarizer: one line per folded turn, appended to the prior
/// summary. Good enough for local runs; a model-backed implementation
/// replaces it in production.
pub struct FoldSummarizer;

#[async_trait]
impl Summarizer for FoldSummarizer {
    async fn fold(&self, prior: &str, dropped: &[ConversationTurn]) -> anyhow::Result<String> {
        let mut summary = String::from(prior);
        for turn in dropped {
            if !summary.is_empty() {
                summary.push('\n');
            }
            let mut line = turn.content.chars().take(120).collect::<String>();
            if turn.content.chars().count() > 120 {
                line.push('…');
            }
            summary.push_str(&format!("[{}] {line}", turn.role));
        }
        Ok(summary)
    }
}
