//! Directive parsing: message-embedded control tokens.
//!
//! Directives are slash-prefixed tokens at the start of a message that alter
//! orchestration for that message only: `/think`, `/verbose`, `/reasoning`,
//! `/elevated`, the tool-profile overrides (`/minimal`, `/coding`,
//! `/messaging`, `/full`) and the prompt modes (`/quiet`, `/silent`).
//!
//! Only a contiguous leading run of directive tokens is consumed. The first
//! token that is not a recognized directive ends the run; everything from
//! there on (including unknown slash-prefixed tokens) is ordinary content.
//! Within one message, a later directive of the same category wins.

use crate::policy::ToolProfile;
use serde::{Deserialize, Serialize};

/// System prompt verbosity selected per message.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Full system preamble.
    #[default]
    Full,
    /// Minimal preamble (`/quiet`).
    Minimal,
    /// No system preamble at all (`/silent`).
    None,
}

/// Directives parsed out of one message. Transient, scoped to that message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    /// Extended reasoning requested (`/think`).
    pub think: bool,
    /// Detailed explanations requested (`/verbose`).
    pub verbose: bool,
    /// Show the reasoning process (`/reasoning`).
    pub show_reasoning: bool,
    /// Elevated permissions requested (`/elevated`). Raises the effective
    /// tool profile to full for this message only.
    pub elevated: bool,
    /// System prompt mode.
    pub prompt_mode: PromptMode,
    /// Message-level tool profile override.
    pub profile_override: Option<ToolProfile>,
}

/// Parse the leading directive run out of `raw`.
///
/// Returns the directives and the cleaned text (the remainder after the run,
/// with leading whitespace trimmed; interior formatting is preserved).
pub fn parse(raw: &str) -> (Directives, String) {
    let mut directives = Directives::default();
    let mut cursor = 0usize;

    loop {
        let rest = &raw[cursor..];
        let trimmed = rest.trim_start();
        let token_start = cursor + (rest.len() - trimmed.len());

        let token_end = trimmed
            .find(char::is_whitespace)
            .map(|offset| token_start + offset)
            .unwrap_or(raw.len());
        let token = &raw[token_start..token_end];

        if token.is_empty() || !apply_directive(token, &mut directives) {
            // End of the leading run. Unknown tokens (slash-prefixed or not)
            // stay in the cleaned text untouched.
            let cleaned = raw[token_start..].trim().to_string();
            return (directives, cleaned);
        }

        cursor = token_end;
    }
}

/// Apply one token if it is a recognized directive. Last-wins within the same
/// category: a later `/silent` overrides an earlier `/quiet`, a later profile
/// token replaces an earlier one.
fn apply_directive(token: &str, directives: &mut Directives) -> bool {
    match token.to_ascii_lowercase().as_str() {
        "/think" => directives.think = true,
        "/verbose" => directives.verbose = true,
        "/reasoning" => directives.show_reasoning = true,
        "/elevated" => directives.elevated = true,
        "/quiet" => directives.prompt_mode = PromptMode::Minimal,
        "/silent" => directives.prompt_mode = PromptMode::None,
        "/minimal" => directives.profile_override = Some(ToolProfile::Minimal),
        "/coding" => directives.profile_override = Some(ToolProfile::Coding),
        "/messaging" => directives.profile_override = Some(ToolProfile::Messaging),
        "/full" => directives.profile_override = Some(ToolProfile::Full),
        _ => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_directive() {
        let (directives, cleaned) = parse("/think what is the capital of France?");
        assert!(directives.think);
        assert_eq!(cleaned, "what is the capital of France?");
    }

    #[test]
    fn parses_combined_leading_run() {
        let (directives, cleaned) = parse("/think /coding /quiet fix the parser");
        assert!(directives.think);
        assert_eq!(directives.profile_override, Some(ToolProfile::Coding));
        assert_eq!(directives.prompt_mode, PromptMode::Minimal);
        assert_eq!(cleaned, "fix the parser");
    }

    #[test]
    fn stops_at_first_non_directive_token() {
        let (directives, cleaned) = parse("/verbose hello /elevated world");
        assert!(directives.verbose);
        // The /elevated after ordinary content is content, not a directive.
        assert!(!directives.elevated);
        assert_eq!(cleaned, "hello /elevated world");
    }

    #[test]
    fn unknown_slash_token_ends_run_and_stays_in_text() {
        let (directives, cleaned) = parse("/think /frobnicate now");
        assert!(directives.think);
        assert_eq!(cleaned, "/frobnicate now");
    }

    #[test]
    fn later_duplicate_in_same_category_wins() {
        let (directives, cleaned) = parse("/quiet /silent /minimal /full go");
        assert_eq!(directives.prompt_mode, PromptMode::None);
        assert_eq!(directives.profile_override, Some(ToolProfile::Full));
        assert_eq!(cleaned, "go");
    }

    #[test]
    fn directives_are_case_insensitive() {
        let (directives, cleaned) = parse("/THINK /Elevated run it");
        assert!(directives.think);
        assert!(directives.elevated);
        assert_eq!(cleaned, "run it");
    }

    #[test]
    fn empty_and_directive_only_messages() {
        let (directives, cleaned) = parse("");
        assert_eq!(directives, Directives::default());
        assert_eq!(cleaned, "");

        let (directives, cleaned) = parse("/think");
        assert!(directives.think);
        assert_eq!(cleaned, "");
    }

    #[test]
    fn plain_text_passes_through() {
        let (directives, cleaned) = parse("just a normal message");
        assert_eq!(directives, Directives::default());
        assert_eq!(cleaned, "just a normal message");
    }
}
