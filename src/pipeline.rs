//! The message processing pipeline.
//!
//! One inbound message flows through a fixed sequence of stages; each stage
//! either advances the message or settles it (rejected, failed, responded).
//! Workers pull from the bus and run the whole sequence under a per-channel
//! lease, so a channel's messages are processed one at a time while distinct
//! channels proceed in parallel.

mod orchestrator;
mod prompt;
mod validate;

pub use orchestrator::{Collaborators, Orchestrator};
pub use prompt::PromptPayload;
pub use validate::validate;

use serde::Serialize;

/// Pipeline stage markers for telemetry.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Validated,
    DirectivesParsed,
    SecurityCleared,
    ContextLoaded,
    Compacted,
    ToolsResolved,
    SkillsMatched,
    PromptAssembled,
    Dispatched,
    Persisted,
    Responded,
    Rejected,
    Failed,
}
