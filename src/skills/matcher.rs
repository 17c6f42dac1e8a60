//! Per-message skill matching.

use super::types::{CompiledSkill, IneligibleReason, SkillDescriptor, SkillEligibility};
use crate::config::SkillsConfig;
use crate::gateway::ProviderRegistry;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::CorrelationId;

use std::collections::HashSet;

/// One skill selected for a message, with the triggers that fired.
#[derive(Debug, Clone)]
pub struct MatchedSkill {
    pub descriptor: SkillDescriptor,
    pub matched_triggers: usize,
}

pub struct SkillMatcher {
    disabled: HashSet<String>,
    flags: std::collections::BTreeMap<String, bool>,
    max_matches: usize,
}

impl SkillMatcher {
    pub fn new(config: &SkillsConfig) -> Self {
        Self {
            disabled: config.disabled.iter().cloned().collect(),
            flags: config.flags.clone(),
            max_matches: config.max_matches,
        }
    }

    /// Match eligible skills against cleaned message text.
    ///
    /// Ordering is deterministic: source tier descending, matched trigger
    /// count descending, then id ascending; truncated to the configured
    /// maximum. Ineligible skills are recorded to telemetry and skipped,
    /// never surfaced to the requester.
    pub fn match_skills(
        &self,
        skills: &[CompiledSkill],
        cleaned_text: &str,
        providers: &dyn ProviderRegistry,
        correlation_id: CorrelationId,
        telemetry: &TelemetrySink,
    ) -> Vec<MatchedSkill> {
        let lowered = cleaned_text.to_lowercase();

        let mut matched: Vec<MatchedSkill> = Vec::new();
        for skill in skills {
            let triggers = trigger_count(skill, cleaned_text, &lowered);
            if triggers == 0 {
                continue;
            }

            if let Some(reason) = self.ineligible(&skill.descriptor, providers) {
                telemetry.record(TelemetryEvent::SkillIneligible {
                    skill_id: skill.descriptor.id.clone(),
                    reason,
                });
                continue;
            }

            matched.push(MatchedSkill {
                descriptor: skill.descriptor.clone(),
                matched_triggers: triggers,
            });
        }

        matched.sort_by(|a, b| {
            b.descriptor
                .source
                .rank()
                .cmp(&a.descriptor.source.rank())
                .then(b.matched_triggers.cmp(&a.matched_triggers))
                .then(a.descriptor.id.cmp(&b.descriptor.id))
        });
        matched.truncate(self.max_matches);

        telemetry.record(TelemetryEvent::SkillsMatched {
            correlation_id,
            skill_count: matched.len(),
        });
        matched
    }

    fn ineligible(
        &self,
        skill: &SkillDescriptor,
        providers: &dyn ProviderRegistry,
    ) -> Option<IneligibleReason> {
        if self.disabled.contains(&skill.id) {
            return Some(IneligibleReason::ConfigDisabled);
        }
        if !os_compatible(&skill.eligibility) {
            return Some(IneligibleReason::OsIncompatible);
        }
        if skill
            .eligibility
            .binaries
            .iter()
            .any(|binary| !providers.has_binary(binary))
        {
            return Some(IneligibleReason::MissingBinary);
        }
        if skill
            .eligibility
            .config_flags
            .iter()
            .any(|flag| !self.flags.get(flag).copied().unwrap_or(false))
        {
            return Some(IneligibleReason::ConfigDisabled);
        }
        if skill
            .eligibility
            .providers
            .iter()
            .any(|provider| !providers.is_available(provider))
        {
            return Some(IneligibleReason::MissingProvider);
        }
        None
    }
}

fn trigger_count(skill: &CompiledSkill, text: &str, lowered: &str) -> usize {
    let keyword_hits = skill
        .descriptor
        .triggers
        .keywords
        .iter()
        .filter(|keyword| lowered.contains(&keyword.to_lowercase()))
        .count();

    let pattern_hits = skill
        .patterns
        .iter()
        .filter(|regex| regex.is_match(text))
        .count();

    keyword_hits + pattern_hits
}

fn os_compatible(eligibility: &SkillEligibility) -> bool {
    if eligibility.os.is_empty() {
        return true;
    }
    eligibility.os.iter().any(|os| {
        let os = os.to_lowercase();
        // "darwin" and "macos" name the same platform in the wild.
        os == std::env::consts::OS
            || (os == "darwin" && std::env::consts::OS == "macos")
            || (os == "macos" && std::env::consts::OS == "darwin")
    })
}
