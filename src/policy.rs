//! Tool policy: profiles, groups, flags, and per-message resolution.
//!
//! The registry holds every tool the process knows about; the policy engine
//! narrows that down to the effective set for one message. Resolution is a
//! strict order: profile map, directive override, elevation, flag exclusions
//! (admin-only, dangerous, approval-required), and finally the security
//! gate's explicit allow/deny lists. A tool dropped by any step is dropped
//! silently; the requester is never told which tools were withheld.

use crate::config::PolicyConfig;
use crate::directives::Directives;
use crate::gateway::ApprovalBroker;
use crate::security::{SecurityGate, ToolRule};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::CorrelationId;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Functional grouping of tools. Profiles grant whole groups at a time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolGroup {
    System,
    Filesystem,
    Web,
    Memory,
    Sessions,
    Ui,
    Automation,
    Messaging,
    Database,
    Storage,
    Scheduler,
}

impl ToolGroup {
    pub const ALL: [ToolGroup; 11] = [
        ToolGroup::System,
        ToolGroup::Filesystem,
        ToolGroup::Web,
        ToolGroup::Memory,
        ToolGroup::Sessions,
        ToolGroup::Ui,
        ToolGroup::Automation,
        ToolGroup::Messaging,
        ToolGroup::Database,
        ToolGroup::Storage,
        ToolGroup::Scheduler,
    ];
}

/// Named tool profile. Maps to a fixed set of groups.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolProfile {
    Minimal,
    Coding,
    Messaging,
    #[default]
    Full,
}

impl ToolProfile {
    /// Groups granted by this profile.
    pub fn groups(self) -> &'static [ToolGroup] {
        match self {
            ToolProfile::Minimal => &[ToolGroup::System],
            ToolProfile::Coding => {
                &[ToolGroup::System, ToolGroup::Filesystem, ToolGroup::Database]
            }
            ToolProfile::Messaging => {
                &[ToolGroup::System, ToolGroup::Messaging, ToolGroup::Web]
            }
            ToolProfile::Full => &ToolGroup::ALL,
        }
    }
}

impl std::fmt::Display for ToolProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolProfile::Minimal => write!(f, "minimal"),
            ToolProfile::Coding => write!(f, "coding"),
            ToolProfile::Messaging => write!(f, "messaging"),
            ToolProfile::Full => write!(f, "full"),
        }
    }
}

/// Restriction flags on one tool.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolFlags {
    /// Each invocation needs prior approval from the approval broker.
    pub approval_required: bool,
    /// Only available when the requester is an admin.
    pub admin_only: bool,
    /// Only available under message-level elevation.
    pub dangerous: bool,
    /// Subject to per-user rate limiting at dispatch time.
    pub rate_limited: bool,
}

/// Static description of one tool, handed to the reasoning component.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub group: ToolGroup,
    pub description: String,
    pub parameters: schemars::Schema,
    pub flags: ToolFlags,
}

/// Executes one tool call. Implementations live with the gateways or the
/// host integration, not in this crate's pipeline.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// A registered tool: descriptor plus handler.
pub struct ToolRegistration {
    pub descriptor: ToolDescriptor,
    pub handler: Arc<dyn ToolHandler>,
}

/// All tools known to the process. Populated once at startup; resolution
/// reads it concurrently without locks.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolRegistration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Last registration wins on a name collision.
    pub fn register(&mut self, registration: ToolRegistration) {
        self.tools
            .insert(registration.descriptor.name.clone(), registration);
    }

    pub fn get(&self, name: &str) -> Option<&ToolRegistration> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolRegistration> {
        self.tools.values()
    }
}

/// Who is asking. Gateways attach this when they enqueue a message.
#[derive(Debug, Clone, Copy, Default)]
pub struct Requester {
    pub admin: bool,
}

/// The tools one message may use, in deterministic name order.
#[derive(Debug, Clone)]
pub struct EffectiveToolSet {
    pub profile: ToolProfile,
    pub elevated: bool,
    pub tools: Vec<ToolDescriptor>,
}

impl EffectiveToolSet {
    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }
}

/// Resolves the effective tool set for one message.
pub struct ToolPolicyEngine {
    default_profile: ToolProfile,
    group_overrides: std::collections::BTreeMap<ToolGroup, bool>,
}

impl ToolPolicyEngine {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            default_profile: config.default_profile,
            group_overrides: config.group_overrides.clone(),
        }
    }

    /// Resolve the tool set for one message.
    ///
    /// Precedence, first to last: the configured default profile, a directive
    /// profile override, `/elevated` (which raises the profile to full for
    /// this message only), then the flag and gate exclusions per tool.
    pub fn resolve(
        &self,
        registry: &ToolRegistry,
        gate: &SecurityGate,
        directives: &Directives,
        requester: Requester,
        approvals: &dyn ApprovalBroker,
        correlation_id: CorrelationId,
        telemetry: &TelemetrySink,
    ) -> EffectiveToolSet {
        let elevated = directives.elevated;
        let profile = if elevated {
            ToolProfile::Full
        } else {
            directives.profile_override.unwrap_or(self.default_profile)
        };

        let groups: BTreeSet<ToolGroup> = profile
            .groups()
            .iter()
            .copied()
            .filter(|group| *self.group_overrides.get(group).unwrap_or(&true))
            .chain(
                self.group_overrides
                    .iter()
                    .filter(|(_, enabled)| **enabled)
                    .map(|(group, _)| *group),
            )
            .collect();

        let mut tools: Vec<ToolDescriptor> = registry
            .iter()
            .filter(|registration| {
                self.permits(
                    &registration.descriptor,
                    &groups,
                    gate,
                    requester,
                    elevated,
                    approvals,
                    correlation_id,
                )
            })
            .map(|registration| registration.descriptor.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));

        telemetry.record(TelemetryEvent::ToolsResolved {
            correlation_id,
            profile,
            elevated,
            tool_count: tools.len(),
        });

        EffectiveToolSet {
            profile,
            elevated,
            tools,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn permits(
        &self,
        descriptor: &ToolDescriptor,
        groups: &BTreeSet<ToolGroup>,
        gate: &SecurityGate,
        requester: Requester,
        elevated: bool,
        approvals: &dyn ApprovalBroker,
        correlation_id: CorrelationId,
    ) -> bool {
        // Gate lists are final: an explicit deny removes the tool no matter
        // what the profile or flags say; an explicit allow admits the tool
        // regardless of profile groups but still passes the flag checks.
        match gate.check_tool(&descriptor.name) {
            ToolRule::Deny => return false,
            ToolRule::Allow => {}
            ToolRule::Defer => {
                if !groups.contains(&descriptor.group) {
                    return false;
                }
            }
        }
        if descriptor.flags.admin_only && !requester.admin {
            return false;
        }
        if descriptor.flags.dangerous && !elevated {
            return false;
        }
        if descriptor.flags.approval_required
            && !approvals.has_approval(correlation_id, &descriptor.name)
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::gateway::NoApprovals;

    struct NullHandler;

    #[async_trait]
    impl ToolHandler for NullHandler {
        async fn call(&self, _arguments: serde_json::Value) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn tool(name: &str, group: ToolGroup, flags: ToolFlags) -> ToolRegistration {
        ToolRegistration {
            descriptor: ToolDescriptor {
                name: name.into(),
                group,
                description: format!("test tool {name}"),
                parameters: schemars::json_schema!({"type": "object"}),
                flags,
            },
            handler: Arc::new(NullHandler),
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(tool("status", ToolGroup::System, ToolFlags::default()));
        registry.register(tool("read_file", ToolGroup::Filesystem, ToolFlags::default()));
        registry.register(tool("send_dm", ToolGroup::Messaging, ToolFlags::default()));
        registry.register(tool(
            "shell",
            ToolGroup::System,
            ToolFlags {
                dangerous: true,
                ..ToolFlags::default()
            },
        ));
        registry.register(tool(
            "manage_users",
            ToolGroup::System,
            ToolFlags {
                admin_only: true,
                ..ToolFlags::default()
            },
        ));
        registry.register(tool(
            "wipe_storage",
            ToolGroup::Storage,
            ToolFlags {
                approval_required: true,
                ..ToolFlags::default()
            },
        ));
        registry
    }

    fn resolve(
        directives: &Directives,
        requester: Requester,
        security: &SecurityConfig,
    ) -> EffectiveToolSet {
        let engine = ToolPolicyEngine::new(&PolicyConfig::default());
        let gate = SecurityGate::new(security);
        engine.resolve(
            &registry(),
            &gate,
            directives,
            requester,
            &NoApprovals,
            uuid::Uuid::new_v4(),
            &TelemetrySink::disabled(),
        )
    }

    #[test]
    fn minimal_profile_grants_system_group_only() {
        let directives = Directives {
            profile_override: Some(ToolProfile::Minimal),
            ..Directives::default()
        };
        let set = resolve(&directives, Requester::default(), &SecurityConfig::default());

        assert_eq!(set.profile, ToolProfile::Minimal);
        assert!(set.contains("status"));
        assert!(!set.contains("read_file"));
        assert!(!set.contains("send_dm"));
    }

    #[test]
    fn dangerous_tools_need_elevation() {
        let set = resolve(
            &Directives::default(),
            Requester::default(),
            &SecurityConfig::default(),
        );
        assert!(!set.contains("shell"));

        let elevated = Directives {
            elevated: true,
            ..Directives::default()
        };
        let set = resolve(&elevated, Requester::default(), &SecurityConfig::default());
        assert!(set.elevated);
        assert_eq!(set.profile, ToolProfile::Full);
        assert!(set.contains("shell"));
    }

    #[test]
    fn admin_only_tools_need_an_admin_requester() {
        let set = resolve(
            &Directives::default(),
            Requester::default(),
            &SecurityConfig::default(),
        );
        assert!(!set.contains("manage_users"));

        let set = resolve(
            &Directives::default(),
            Requester { admin: true },
            &SecurityConfig::default(),
        );
        assert!(set.contains("manage_users"));
    }

    #[test]
    fn approval_required_tools_drop_without_approval() {
        // NoApprovals never approves anything, even under elevation.
        let elevated = Directives {
            elevated: true,
            ..Directives::default()
        };
        let set = resolve(&elevated, Requester { admin: true }, &SecurityConfig::default());
        assert!(!set.contains("wipe_storage"));
    }

    #[test]
    fn gate_denylist_overrides_profile_grant() {
        let security = SecurityConfig {
            tool_denylist: vec!["status".into()],
            ..SecurityConfig::default()
        };
        let set = resolve(&Directives::default(), Requester::default(), &security);
        assert!(!set.contains("status"));
        assert!(set.contains("read_file"));
    }

    #[test]
    fn allowlisted_tool_survives_profile_group_filter() {
        // send_dm is in the messaging group, outside the minimal profile,
        // but a non-empty allowlist admits it regardless of profile.
        let security = SecurityConfig {
            tool_allowlist: vec!["send_dm".into()],
            ..SecurityConfig::default()
        };
        let directives = Directives {
            profile_override: Some(ToolProfile::Minimal),
            ..Directives::default()
        };
        let set = resolve(&directives, Requester::default(), &security);

        assert_eq!(set.profile, ToolProfile::Minimal);
        assert!(set.contains("send_dm"));
        // An allowlist entry does not bypass the flag checks.
        let security = SecurityConfig {
            tool_allowlist: vec!["shell".into()],
            ..SecurityConfig::default()
        };
        let set = resolve(&Directives::default(), Requester::default(), &security);
        assert!(!set.contains("shell"));
    }

    #[test]
    fn gate_allowlist_is_exhaustive() {
        let security = SecurityConfig {
            tool_allowlist: vec!["status".into()],
            ..SecurityConfig::default()
        };
        let set = resolve(&Directives::default(), Requester::default(), &security);
        assert!(set.contains("status"));
        assert!(!set.contains("read_file"));
        assert!(!set.contains("send_dm"));
    }

    #[test]
    fn group_override_disables_a_profile_group() {
        let mut config = PolicyConfig::default();
        config.group_overrides.insert(ToolGroup::Messaging, false);
        let engine = ToolPolicyEngine::new(&config);
        let gate = SecurityGate::new(&SecurityConfig::default());

        let set = engine.resolve(
            &registry(),
            &gate,
            &Directives::default(),
            Requester::default(),
            &NoApprovals,
            uuid::Uuid::new_v4(),
            &TelemetrySink::disabled(),
        );
        assert!(!set.contains("send_dm"));
        assert!(set.contains("status"));
    }

    #[test]
    fn resolved_tools_are_name_sorted() {
        let set = resolve(
            &Directives::default(),
            Requester::default(),
            &SecurityConfig::default(),
        );
        let names: Vec<&str> = set.tools.iter().map(|t| t.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
