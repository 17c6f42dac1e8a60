//! Context compaction: fitting conversation history into a token budget.
//!
//! All strategies work on an estimated token count, never the real tokenizer.
//! The estimate is deterministic and monotonic in text length, which is all
//! the budget arithmetic needs. Compaction never fails a message: when even
//! the minimum history breaches the budget, the outcome is marked degraded
//! and processing continues.

use crate::config::CompactionConfig;
use crate::context::{ChannelContext, ConversationTurn};
use crate::error::PipelineError;
use crate::reasoning::Summarizer;

use serde::{Deserialize, Serialize};

/// Deterministic token estimate: one token per four characters, rounded up.
/// Counts characters, not bytes, so multibyte text is not over-charged.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// How history is reduced when it exceeds the budget.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStrategy {
    /// Drop the oldest turns until the rest fits.
    Truncate,
    /// Walk newest to oldest keeping every turn that still fits, with a hard
    /// floor of recent turns that are kept even when they breach the budget.
    #[default]
    Adaptive,
    /// Keep a recent window intact and fold everything older into the
    /// conversation summary.
    Progressive,
}

/// Result of compacting one channel's history for one message.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    /// Turns to present to the reasoner, oldest first.
    pub turns: Vec<ConversationTurn>,
    /// Conversation summary after compaction. Unchanged unless
    /// `summary_updated` is set.
    pub conversation_summary: String,
    /// Whether progressive compaction folded turns into the summary.
    pub summary_updated: bool,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub turns_dropped: usize,
    /// The minimum-turn floor forced the budget to be exceeded.
    pub degraded: bool,
}

/// Applies the configured strategy to one channel context.
pub struct CompactionEngine {
    config: CompactionConfig,
}

impl CompactionEngine {
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    pub fn strategy(&self) -> CompactionStrategy {
        self.config.strategy
    }

    /// History token budget, recomputed per call so config reloads take
    /// effect immediately.
    pub fn budget(&self) -> usize {
        let ratio_budget =
            (self.config.max_context_tokens as f32 * self.config.budget_ratio) as usize;
        let reserve_budget = self
            .config
            .max_context_tokens
            .saturating_sub(self.config.response_reserve_tokens);
        ratio_budget.min(reserve_budget)
    }

    /// Compact `context` for one message using `strategy`.
    ///
    /// Progressive compaction calls the summarizer; its failures surface as
    /// transient pipeline errors and go through the retry path. The other
    /// strategies cannot fail.
    pub async fn compact(
        &self,
        context: &ChannelContext,
        strategy: CompactionStrategy,
        summarizer: &dyn Summarizer,
    ) -> Result<CompactionOutcome, PipelineError> {
        let budget = self.budget();
        let tokens_before: usize = context.turns.iter().map(ConversationTurn::tokens).sum();

        if tokens_before <= budget {
            return Ok(CompactionOutcome {
                turns: context.turns.clone(),
                conversation_summary: context.conversation_summary.clone(),
                summary_updated: false,
                tokens_before,
                tokens_after: tokens_before,
                turns_dropped: 0,
                degraded: false,
            });
        }

        match strategy {
            CompactionStrategy::Truncate => Ok(self.truncate(context, budget, tokens_before)),
            CompactionStrategy::Adaptive => Ok(self.adaptive(context, budget, tokens_before)),
            CompactionStrategy::Progressive => {
                self.progressive(context, budget, tokens_before, summarizer)
                    .await
            }
        }
    }

    /// Drop the oldest contiguous run of turns until the remainder fits.
    fn truncate(
        &self,
        context: &ChannelContext,
        budget: usize,
        tokens_before: usize,
    ) -> CompactionOutcome {
        let mut tokens_after = tokens_before;
        let mut first_kept = 0;
        while tokens_after > budget && first_kept < context.turns.len() {
            tokens_after -= context.turns[first_kept].tokens();
            first_kept += 1;
        }

        CompactionOutcome {
            turns: context.turns[first_kept..].to_vec(),
            conversation_summary: context.conversation_summary.clone(),
            summary_updated: false,
            tokens_before,
            tokens_after,
            turns_dropped: first_kept,
            degraded: false,
        }
    }

    /// Newest-backward selection keeping every turn that still fits, then the
    /// minimum-turn floor. The floor wins over the budget: when it forces a
    /// breach the outcome is degraded, never an error.
    fn adaptive(
        &self,
        context: &ChannelContext,
        budget: usize,
        tokens_before: usize,
    ) -> CompactionOutcome {
        let mut kept_indices: Vec<usize> = Vec::new();
        let mut remaining = budget;

        for (index, turn) in context.turns.iter().enumerate().rev() {
            let tokens = turn.tokens();
            if tokens <= remaining {
                remaining -= tokens;
                kept_indices.push(index);
            }
        }
        kept_indices.reverse();

        let floor = self.config.min_turns.min(context.turns.len());
        let mut degraded = false;
        if kept_indices.len() < floor {
            // The newest `floor` turns, regardless of size.
            kept_indices = (context.turns.len() - floor..context.turns.len()).collect();
            degraded = true;
        }

        let turns: Vec<ConversationTurn> = kept_indices
            .iter()
            .map(|&index| context.turns[index].clone())
            .collect();
        let tokens_after = turns.iter().map(ConversationTurn::tokens).sum();

        CompactionOutcome {
            turns_dropped: context.turns.len() - kept_indices.len(),
            turns,
            conversation_summary: context.conversation_summary.clone(),
            summary_updated: false,
            tokens_before,
            tokens_after,
            degraded: degraded && tokens_after > budget,
        }
    }

    /// Keep a contiguous recent window intact and fold everything older into
    /// the conversation summary.
    async fn progressive(
        &self,
        context: &ChannelContext,
        budget: usize,
        tokens_before: usize,
        summarizer: &dyn Summarizer,
    ) -> Result<CompactionOutcome, PipelineError> {
        let recent_budget = (budget as f32 * self.config.recent_ratio) as usize;

        // Walk newest to oldest; the window ends at the first turn that no
        // longer fits, so the kept turns are always contiguous.
        let mut remaining = recent_budget;
        let mut first_kept = context.turns.len();
        for (index, turn) in context.turns.iter().enumerate().rev() {
            let tokens = turn.tokens();
            if tokens > remaining {
                break;
            }
            remaining -= tokens;
            first_kept = index;
        }

        let dropped = &context.turns[..first_kept];
        let conversation_summary = if dropped.is_empty() {
            context.conversation_summary.clone()
        } else {
            summarizer
                .fold(&context.conversation_summary, dropped)
                .await
                .map_err(|error| PipelineError::Summarization(error.to_string()))?
        };

        let turns = context.turns[first_kept..].to_vec();
        let tokens_after = turns.iter().map(ConversationTurn::tokens).sum();

        Ok(CompactionOutcome {
            turns,
            summary_updated: !dropped.is_empty(),
            conversation_summary,
            tokens_before,
            tokens_after,
            turns_dropped: dropped.len(),
            degraded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompactionConfig;
    use crate::context::Role;
    use crate::reasoning::FoldSummarizer;

    fn engine(config: CompactionConfig) -> CompactionEngine {
        CompactionEngine::new(config)
    }

    fn small_config() -> CompactionConfig {
        CompactionConfig {
            max_context_tokens: 100,
            response_reserve_tokens: 20,
            budget_ratio: 0.5,
            min_turns: 2,
            recent_ratio: 0.6,
            ..CompactionConfig::default()
        }
    }

    fn context_with(turn_chars: &[usize]) -> ChannelContext {
        let mut context = ChannelContext::new("chan");
        for (index, chars) in turn_chars.iter().enumerate() {
            let role = if index % 2 == 0 { Role::User } else { Role::Assistant };
            context.push_turn(ConversationTurn::new(role, "x".repeat(*chars)));
        }
        context
    }

    #[test]
    fn estimate_is_ceil_of_quarter_chars() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        // Characters, not bytes.
        assert_eq!(estimate_tokens("ééééé"), 2);
    }

    #[test]
    fn budget_is_min_of_ratio_and_reserve() {
        // ratio: 100 * 0.5 = 50; reserve: 100 - 20 = 80.
        assert_eq!(engine(small_config()).budget(), 50);

        let mut config = small_config();
        config.response_reserve_tokens = 60;
        // reserve now wins: 100 - 60 = 40.
        assert_eq!(engine(config).budget(), 40);
    }

    #[tokio::test]
    async fn history_within_budget_is_untouched() {
        // 3 turns of 10 tokens each, budget 50.
        let context = context_with(&[40, 40, 40]);
        let outcome = engine(small_config())
            .compact(&context, CompactionStrategy::Adaptive, &FoldSummarizer)
            .await
            .unwrap();

        assert_eq!(outcome.turns.len(), 3);
        assert_eq!(outcome.turns_dropped, 0);
        assert!(!outcome.degraded);
        assert_eq!(outcome.tokens_before, outcome.tokens_after);
    }

    #[tokio::test]
    async fn truncate_drops_oldest_contiguously() {
        // Turns of 20, 20, 20, 10 tokens; budget 50. Dropping the oldest
        // brings the total to exactly the budget.
        let context = context_with(&[80, 80, 80, 40]);
        let outcome = engine(small_config())
            .compact(&context, CompactionStrategy::Truncate, &FoldSummarizer)
            .await
            .unwrap();

        assert_eq!(outcome.turns_dropped, 1);
        assert_eq!(outcome.turns.len(), 3);
        assert_eq!(outcome.tokens_after, 50);
        // Kept turns are the newest ones, still in order.
        assert_eq!(outcome.turns[0].content.len(), 80);
        assert_eq!(outcome.turns[2].content.len(), 40);
    }

    #[tokio::test]
    async fn adaptive_keeps_newer_small_turns_past_a_large_one() {
        // Tokens: 10, 45, 10, 10. Budget 50. Newest-backward: 10 + 10 fit,
        // 45 does not, oldest 10 still fits.
        let context = context_with(&[40, 180, 40, 40]);
        let outcome = engine(small_config())
            .compact(&context, CompactionStrategy::Adaptive, &FoldSummarizer)
            .await
            .unwrap();

        assert_eq!(outcome.turns.len(), 3);
        assert_eq!(outcome.turns_dropped, 1);
        assert!(outcome.turns.iter().all(|t| t.content.len() == 40));
        assert!(!outcome.degraded);
    }

    #[tokio::test]
    async fn adaptive_floor_forces_degraded_outcome() {
        // Two huge turns; min_turns = 2 keeps both despite the budget.
        let context = context_with(&[400, 400]);
        let outcome = engine(small_config())
            .compact(&context, CompactionStrategy::Adaptive, &FoldSummarizer)
            .await
            .unwrap();

        assert_eq!(outcome.turns.len(), 2);
        assert!(outcome.degraded);
        assert!(outcome.tokens_after > engine(small_config()).budget());
    }

    #[tokio::test]
    async fn adaptive_keeps_exactly_the_newest_turns_that_fit() {
        // 100 uniform turns of 5 tokens; budget fits 10 of them; floor of 5.
        let config = CompactionConfig {
            max_context_tokens: 100,
            response_reserve_tokens: 0,
            budget_ratio: 0.5,
            min_turns: 5,
            ..CompactionConfig::default()
        };
        let context = context_with(&[20; 100]);

        let outcome = engine(config)
            .compact(&context, CompactionStrategy::Adaptive, &FoldSummarizer)
            .await
            .unwrap();

        assert_eq!(outcome.turns.len(), 10);
        assert_eq!(outcome.turns_dropped, 90);
        assert!(!outcome.degraded);
        // The kept turns are the newest ten, in original order.
        assert_eq!(outcome.turns, context.turns[90..].to_vec());
    }

    #[tokio::test]
    async fn progressive_folds_old_turns_into_summary() {
        // Budget 50, recent budget 30. Tokens: 20, 20, 10, 10.
        let context = context_with(&[80, 80, 40, 40]);
        let outcome = engine(small_config())
            .compact(&context, CompactionStrategy::Progressive, &FoldSummarizer)
            .await
            .unwrap();

        assert!(outcome.summary_updated);
        assert_eq!(outcome.turns_dropped, 2);
        assert_eq!(outcome.turns.len(), 2);
        assert!(outcome.tokens_after <= 30);
        assert!(!outcome.conversation_summary.is_empty());
    }

    #[tokio::test]
    async fn progressive_folding_is_idempotent_over_same_history() {
        let context = context_with(&[80, 80, 40, 40]);
        let engine = engine(small_config());

        let first = engine
            .compact(&context, CompactionStrategy::Progressive, &FoldSummarizer)
            .await
            .unwrap();
        let second = engine
            .compact(&context, CompactionStrategy::Progressive, &FoldSummarizer)
            .await
            .unwrap();

        // Same input context, same summary. Re-running over an already
        // compacted context (summary applied, turns replaced) folds nothing.
        assert_eq!(first.conversation_summary, second.conversation_summary);

        let mut compacted = ChannelContext::new("chan");
        compacted.conversation_summary = first.conversation_summary.clone();
        for turn in &first.turns {
            compacted.push_turn(turn.clone());
        }
        let third = engine
            .compact(&compacted, CompactionStrategy::Progressive, &FoldSummarizer)
            .await
            .unwrap();
        assert!(!third.summary_updated);
        assert_eq!(third.conversation_summary, first.conversation_summary);
    }
}
