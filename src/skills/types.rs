//! Skill data model.

use serde::{Deserialize, Serialize};

/// Where a skill was loaded from. Precedence is by `rank`: when two sources
/// define the same skill id, the higher rank wins.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SkillSource {
    /// Ad-hoc extras dropped next to the config.
    Extra,
    /// Shipped with the binary.
    Bundled,
    /// Installed by an operator through management tooling.
    Managed,
    /// Installed into the running workspace.
    Workspace,
}

impl SkillSource {
    pub fn rank(self) -> u8 {
        match self {
            SkillSource::Extra => 0,
            SkillSource::Bundled => 1,
            SkillSource::Managed => 2,
            SkillSource::Workspace => 3,
        }
    }
}

/// What makes a skill relevant to a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillTriggers {
    /// Case-insensitive substrings matched against the cleaned text.
    pub keywords: Vec<String>,
    /// Regex patterns matched against the cleaned text.
    pub patterns: Vec<String>,
}

/// Host requirements a skill needs satisfied before it may match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillEligibility {
    /// Operating systems the skill runs on. Empty means any.
    pub os: Vec<String>,
    /// Executables that must exist on the host.
    pub binaries: Vec<String>,
    /// Config feature flags that must be enabled.
    pub config_flags: Vec<String>,
    /// External providers that must be available.
    pub providers: Vec<String>,
}

/// Restrictions a skill declares about itself. The core records these; the
/// tool policy enforces the equivalent flags on the tools the skill names.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillSecurity {
    pub approval_required: bool,
    pub admin_only: bool,
}

/// One skill as loaded from its manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub version: String,
    /// Prompt instructions injected when the skill matches. Opaque to the
    /// core.
    pub instructions: String,
    pub source: SkillSource,
    #[serde(default)]
    pub triggers: SkillTriggers,
    #[serde(default)]
    pub eligibility: SkillEligibility,
    /// Tools the skill's instructions assume are in the effective set.
    #[serde(default)]
    pub required_tools: Vec<String>,
    #[serde(default)]
    pub security: SkillSecurity,
}

/// A skill ready for matching: descriptor plus its trigger patterns compiled
/// once at registry merge time, not per message.
#[derive(Debug, Clone)]
pub struct CompiledSkill {
    pub descriptor: SkillDescriptor,
    pub patterns: Vec<regex::Regex>,
}

impl CompiledSkill {
    /// Compile the descriptor's trigger patterns. Invalid patterns are
    /// logged and dropped; the skill keeps matching on its keywords and
    /// remaining patterns.
    pub fn compile(descriptor: SkillDescriptor) -> Self {
        let patterns = descriptor
            .triggers
            .patterns
            .iter()
            .filter_map(|pattern| match regex::Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(error) => {
                    tracing::warn!(skill = %descriptor.id, %error, "invalid trigger pattern");
                    None
                }
            })
            .collect();
        Self {
            descriptor,
            patterns,
        }
    }
}

/// Why an otherwise-matching skill was excluded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    OsIncompatible,
    MissingBinary,
    ConfigDisabled,
    MissingProvider,
}
