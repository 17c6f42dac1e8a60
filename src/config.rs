//! Configuration loading and validation.

use crate::compaction::CompactionStrategy;
use crate::error::{ConfigError, Result};
use crate::policy::{ToolGroup, ToolProfile};

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Switchboard configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory path. Holds the SQLite context database and logs.
    pub data_dir: Option<PathBuf>,

    pub bus: BusConfig,
    pub compaction: CompactionConfig,
    pub security: SecurityConfig,
    pub policy: PolicyConfig,
    pub skills: SkillsConfig,
    pub pipeline: PipelineConfig,
}

/// Message bus queue and retry configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum entries held by the bus (ready + delayed + in-flight).
    pub capacity: usize,

    /// Retry ceiling. A message nacked this many times is dead-lettered.
    pub max_attempts: u32,

    /// Base retry delay in milliseconds; doubles per attempt.
    pub base_backoff_ms: u64,

    /// Upper bound for the exponential backoff delay.
    pub max_backoff_ms: u64,

    /// How long a dequeued entry may stay unacknowledged before the bus
    /// treats it as abandoned and nacks it automatically.
    pub lease_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
            lease_timeout_ms: 120_000,
        }
    }
}

/// Context compaction configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Default strategy when no directive selects one.
    pub strategy: CompactionStrategy,

    /// Model context window in tokens.
    pub max_context_tokens: usize,

    /// Tokens reserved for the model response.
    pub response_reserve_tokens: usize,

    /// Fraction of the context window granted to conversation history.
    pub budget_ratio: f32,

    /// Hard floor of turns the adaptive strategy always retains.
    pub min_turns: usize,

    /// Fraction of the budget progressive compaction keeps as intact
    /// recent turns; the rest of the history is folded into the summary.
    pub recent_ratio: f32,

    /// Token estimate above which the next message triggers progressive
    /// summarization for the channel.
    pub summary_threshold_tokens: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            strategy: CompactionStrategy::Adaptive,
            max_context_tokens: 100_000,
            response_reserve_tokens: 4_096,
            budget_ratio: 0.4,
            min_turns: 4,
            recent_ratio: 0.7,
            summary_threshold_tokens: 30_000,
        }
    }
}

/// Security gate configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// If non-empty, only these tools may ever be used, regardless of profile.
    pub tool_allowlist: Vec<String>,

    /// Tools that are never permitted. Beats the allowlist on conflict.
    pub tool_denylist: Vec<String>,

    /// User ids whose messages are dropped during validation.
    pub blocked_users: Vec<String>,

    /// Fixed text sent for any rejected message. Never includes detail.
    pub rejection_message: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            tool_allowlist: Vec::new(),
            tool_denylist: Vec::new(),
            blocked_users: Vec::new(),
            rejection_message: "I can't help with that request.".into(),
        }
    }
}

/// Tool policy configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Profile used when no directive overrides it.
    pub default_profile: ToolProfile,

    /// Per-group force-enable/disable, applied on top of the profile map.
    pub group_overrides: BTreeMap<ToolGroup, bool>,

    /// User ids granted access to admin-only tools.
    pub admin_users: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_profile: ToolProfile::Full,
            group_overrides: BTreeMap::new(),
            admin_users: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Whether a message from `user_id` carries admin rights. Anonymous
    /// messages never do.
    pub fn is_admin(&self, user_id: Option<&str>) -> bool {
        user_id.is_some_and(|user| self.admin_users.iter().any(|admin| admin == user))
    }
}

/// Skill registry and matcher configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SkillsConfig {
    /// Skill ids disabled outright by configuration.
    pub disabled: Vec<String>,

    /// Feature flags consulted by skill eligibility checks.
    pub flags: BTreeMap<String, bool>,

    /// Maximum matched skills whose full descriptors reach prompt assembly.
    pub max_matches: usize,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            disabled: Vec::new(),
            flags: BTreeMap::new(),
            max_matches: 5,
        }
    }
}

/// Pipeline worker and validation configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of concurrent pipeline workers pulling from the bus.
    pub workers: usize,

    /// Deadline for the external reasoning call, in seconds.
    pub reasoning_timeout_secs: u64,

    /// Maximum inbound text length in characters.
    pub max_text_length: usize,

    /// Maximum attachments per message.
    pub max_attachments: usize,

    /// Maximum size of a single attachment in bytes.
    pub max_attachment_bytes: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            reasoning_timeout_secs: 60,
            max_text_length: 50_000,
            max_attachments: 10,
            max_attachment_bytes: 50 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then an optional TOML file, then
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match default_config_path() {
            Some(path) if path.exists() => Self::load_from_path(&path)?,
            _ => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific TOML config file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.display().to_string(),
            source,
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|error| ConfigError::Parse {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("SWITCHBOARD_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(workers) = std::env::var("SWITCHBOARD_WORKERS")
            && let Ok(workers) = workers.parse()
        {
            self.pipeline.workers = workers;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.bus.capacity == 0 {
            return Err(ConfigError::Invalid("bus.capacity must be at least 1".into()).into());
        }
        if self.pipeline.workers == 0 {
            return Err(ConfigError::Invalid("pipeline.workers must be at least 1".into()).into());
        }
        if !(0.0..=1.0).contains(&self.compaction.budget_ratio) {
            return Err(
                ConfigError::Invalid("compaction.budget_ratio must be within 0..=1".into()).into(),
            );
        }
        if !(0.0..=1.0).contains(&self.compaction.recent_ratio) {
            return Err(
                ConfigError::Invalid("compaction.recent_ratio must be within 0..=1".into()).into(),
            );
        }
        Ok(())
    }

    /// Resolved data directory, defaulting next to the user data dir.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("switchboard"))
                .unwrap_or_else(|| PathBuf::from("./data"))
        })
    }

    /// SQLite context database path.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir().join("switchboard.db")
    }

    /// Log directory path.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("switchboard").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bus.max_attempts, 3);
        assert_eq!(config.compaction.strategy, CompactionStrategy::Adaptive);
    }

    #[test]
    fn parses_partial_toml() {
        let content = indoc! {r#"
            [bus]
            capacity = 32
            max_attempts = 5

            [compaction]
            strategy = "progressive"
            min_turns = 8
        "#};

        let config: Config = toml::from_str(content).unwrap();
        assert_eq!(config.bus.capacity, 32);
        assert_eq!(config.bus.max_attempts, 5);
        assert_eq!(config.compaction.strategy, CompactionStrategy::Progressive);
        assert_eq!(config.compaction.min_turns, 8);
        // Untouched sections keep defaults.
        assert_eq!(config.pipeline.workers, 4);
    }

    #[test]
    fn admin_rights_require_a_listed_user_id() {
        let config = PolicyConfig {
            admin_users: vec!["ops".into()],
            ..PolicyConfig::default()
        };
        assert!(config.is_admin(Some("ops")));
        assert!(!config.is_admin(Some("guest")));
        assert!(!config.is_admin(None));
    }

    #[test]
    fn rejects_zero_capacity() {
        let mut config = Config::default();
        config.bus.capacity = 0;
        assert!(config.validate().is_err());
    }
}
