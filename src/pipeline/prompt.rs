//! Deterministic prompt assembly.
//!
//! The payload handed to the reasoner is a pure function of its inputs: the
//! same context, skills, tools, and directives always produce the same
//! payload. Ordering is fixed so prompt caches stay warm across turns.

use crate::context::ConversationTurn;
use crate::directives::{Directives, PromptMode};
use crate::policy::ToolDescriptor;
use crate::skills::MatchedSkill;

const FULL_PREAMBLE: &str = "You are a helpful assistant reachable through multiple \
messaging gateways. Answer in the voice and format appropriate to the channel. Use the \
provided tools when they help; never fabricate tool results.";

const MINIMAL_PREAMBLE: &str = "You are a helpful assistant.";

/// Everything the reasoning component receives for one message.
#[derive(Debug, Clone)]
pub struct PromptPayload {
    /// System preamble including summaries and skill instructions. Empty
    /// under `/silent`.
    pub system: String,
    /// Compacted history, oldest first.
    pub history: Vec<ConversationTurn>,
    /// Cleaned message text, directives stripped.
    pub user_text: String,
    /// Effective tool descriptors, name-sorted.
    pub tools: Vec<ToolDescriptor>,
    /// Extended reasoning requested.
    pub think: bool,
    /// Detailed explanations requested.
    pub verbose: bool,
}

/// Assemble the payload. Section order within the system block is fixed:
/// preamble, combined summary, then skill instructions in match order.
pub fn assemble(
    directives: &Directives,
    combined_summary: &str,
    history: Vec<ConversationTurn>,
    skills: &[MatchedSkill],
    tools: Vec<ToolDescriptor>,
    user_text: &str,
) -> PromptPayload {
    let system = match directives.prompt_mode {
        PromptMode::None => String::new(),
        PromptMode::Minimal => MINIMAL_PREAMBLE.to_string(),
        PromptMode::Full => {
            let mut system = String::from(FULL_PREAMBLE);
            if !combined_summary.is_empty() {
                system.push_str("\n\n## Context\n");
                system.push_str(combined_summary);
            }
            for skill in skills {
                system.push_str("\n\n## Skill: ");
                system.push_str(&skill.descriptor.name);
                system.push('\n');
                system.push_str(&skill.descriptor.instructions);
            }
            system
        }
    };

    PromptPayload {
        system,
        history,
        user_text: user_text.to_string(),
        tools,
        think: directives.think,
        verbose: directives.verbose,
    }
}
