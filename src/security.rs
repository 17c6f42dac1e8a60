//! Security gate: prompt-injection detection and tool allow/deny rules.
//!
//! Inspection runs against a fixed catalogue of pattern categories. Matching
//! is deliberately blunt: any single hit rejects the message, there is no
//! scoring or threshold. The matched category goes to telemetry; the user
//! only ever sees the generic rejection text.

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Category of a detected injection attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    InstructionOverride,
    RoleReassignment,
    PromptExtraction,
    Jailbreak,
    DelimiterInjection,
    EncodingAttack,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationKind::InstructionOverride => write!(f, "instruction_override"),
            ViolationKind::RoleReassignment => write!(f, "role_reassignment"),
            ViolationKind::PromptExtraction => write!(f, "prompt_extraction"),
            ViolationKind::Jailbreak => write!(f, "jailbreak"),
            ViolationKind::DelimiterInjection => write!(f, "delimiter_injection"),
            ViolationKind::EncodingAttack => write!(f, "encoding_attack"),
        }
    }
}

/// Result of inspecting one cleaned message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Reject(ViolationKind),
}

/// Tool-level rule from the explicit allow/deny lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolRule {
    /// Explicitly denied. Always wins.
    Deny,
    /// Explicitly allowed (listed in a non-empty allowlist).
    Allow,
    /// No explicit rule; profile and group rules apply.
    Defer,
}

/// The injection catalogue. Order pairs one-to-one with `KINDS` below.
const PATTERNS: &[&str] = &[
    // Instruction override
    r"(?i)ignore\s+(?:all\s+|any\s+)?(?:previous|prior|above|earlier)\s+(?:instructions|prompts|rules|directions)",
    r"(?i)disregard\s+(?:all\s+|any\s+)?(?:previous|prior|your)\s+(?:instructions|rules|guidelines|programming)",
    r"(?i)forget\s+(?:all\s+|everything\s+)?(?:previous|prior|your)\s+(?:instructions|training|rules)",
    r"(?i)new\s+instructions\s*:",
    // Role reassignment
    r"(?i)you\s+are\s+now\s+(?:a|an|the)\s",
    r"(?i)pretend\s+(?:to\s+be|you\s+are|you're)\s",
    r"(?i)act\s+as\s+(?:if\s+you\s+(?:are|were)|though\s+you\s+are)\s",
    r"(?i)from\s+now\s+on\s+you\s+(?:are|will\s+be)\s",
    // System prompt extraction
    r"(?i)(?:reveal|show|print|repeat|display|output)\s+(?:your|the)\s+(?:system\s+prompt|initial\s+prompt|hidden\s+prompt|instructions)",
    r"(?i)what\s+(?:is|are)\s+your\s+(?:system\s+prompt|initial\s+instructions|hidden\s+instructions)",
    // Jailbreak
    r"(?i)\bDAN\s+mode\b",
    r"(?i)\bjailbreak\b",
    r"(?i)developer\s+mode\s+(?:enabled|activated)",
    r"(?i)do\s+anything\s+now",
    r"(?i)without\s+(?:any\s+)?(?:restrictions|limitations|filters)",
    // Delimiter injection
    r"(?i)<\|?(?:system|im_start|im_end|endoftext)\|?>",
    r"(?i)\[\s*/?(?:INST|SYS)\s*\]",
    r"(?i)```\s*system\b",
    // Encoding attacks
    r"(?i)decode\s+(?:this|the\s+following)\s+(?:base64|hex|rot13)",
    r"(?i)base64\s+encoded\s+instructions?",
    r"(?i)\brot13\b",
];

/// Category for each pattern, index-aligned with `PATTERNS`.
const KINDS: &[ViolationKind] = &[
    ViolationKind::InstructionOverride,
    ViolationKind::InstructionOverride,
    ViolationKind::InstructionOverride,
    ViolationKind::InstructionOverride,
    ViolationKind::RoleReassignment,
    ViolationKind::RoleReassignment,
    ViolationKind::RoleReassignment,
    ViolationKind::RoleReassignment,
    ViolationKind::PromptExtraction,
    ViolationKind::PromptExtraction,
    ViolationKind::Jailbreak,
    ViolationKind::Jailbreak,
    ViolationKind::Jailbreak,
    ViolationKind::Jailbreak,
    ViolationKind::Jailbreak,
    ViolationKind::DelimiterInjection,
    ViolationKind::DelimiterInjection,
    ViolationKind::DelimiterInjection,
    ViolationKind::EncodingAttack,
    ViolationKind::EncodingAttack,
    ViolationKind::EncodingAttack,
];

/// Pattern-based injection detection plus tool allow/deny evaluation.
pub struct SecurityGate {
    catalogue: RegexSet,
    allowlist: HashSet<String>,
    denylist: HashSet<String>,
    rejection_message: String,
}

impl SecurityGate {
    pub fn new(config: &crate::config::SecurityConfig) -> Self {
        debug_assert_eq!(PATTERNS.len(), KINDS.len());
        // The catalogue is a compile-time constant; a malformed pattern is a
        // programming error caught by the catalogue test below.
        let catalogue = RegexSet::new(PATTERNS).unwrap_or_else(|_| RegexSet::empty());

        Self {
            catalogue,
            allowlist: config.tool_allowlist.iter().cloned().collect(),
            denylist: config.tool_denylist.iter().cloned().collect(),
            rejection_message: config.rejection_message.clone(),
        }
    }

    /// Inspect cleaned message text. Any single catalogue match rejects.
    pub fn inspect(&self, cleaned_text: &str) -> Verdict {
        match self.catalogue.matches(cleaned_text).iter().next() {
            Some(index) => Verdict::Reject(KINDS[index]),
            None => Verdict::Allow,
        }
    }

    /// Evaluate the explicit allow/deny lists for a tool name.
    ///
    /// A denylist entry always wins. A non-empty allowlist is exhaustive:
    /// anything unlisted is denied regardless of profile. An empty allowlist
    /// defers to profile/group rules.
    pub fn check_tool(&self, tool_name: &str) -> ToolRule {
        if self.denylist.contains(tool_name) {
            return ToolRule::Deny;
        }
        if !self.allowlist.is_empty() {
            return if self.allowlist.contains(tool_name) {
                ToolRule::Allow
            } else {
                ToolRule::Deny
            };
        }
        ToolRule::Defer
    }

    /// The fixed generic text sent for any rejected message.
    pub fn rejection_message(&self) -> &str {
        &self.rejection_message
    }
}
