//! Skill registry with lock-free read snapshots.
//!
//! Loads are rare (startup, workspace installs); matches happen on every
//! message. The merged skill list therefore lives in an [`ArcSwap`]: readers
//! grab the current snapshot without locking, rebuilds swap in a new one.

use super::types::{CompiledSkill, SkillDescriptor, SkillSource};

use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct SkillRegistry {
    /// Skills per source tier, the rebuild input. Guarded by a plain mutex;
    /// only mutation paths touch it.
    tiers: Mutex<BTreeMap<SkillSource, Vec<SkillDescriptor>>>,
    /// Merged snapshot, id-sorted, trigger patterns precompiled. What the
    /// matcher reads.
    snapshot: ArcSwap<Vec<CompiledSkill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace one tier's skills and rebuild the snapshot.
    pub fn load_tier(&self, source: SkillSource, skills: Vec<SkillDescriptor>) {
        let merged = {
            let mut tiers = match self.tiers.lock() {
                Ok(tiers) => tiers,
                Err(poisoned) => poisoned.into_inner(),
            };
            tiers.insert(source, skills);
            Self::merge(&tiers)
        };
        self.snapshot.store(Arc::new(merged));
    }

    /// Install one skill into the workspace tier. Shadows any same-id skill
    /// from a lower tier.
    pub fn install_workspace(&self, skill: SkillDescriptor) {
        let merged = {
            let mut tiers = match self.tiers.lock() {
                Ok(tiers) => tiers,
                Err(poisoned) => poisoned.into_inner(),
            };
            let workspace = tiers.entry(SkillSource::Workspace).or_default();
            workspace.retain(|existing| existing.id != skill.id);
            let mut skill = skill;
            skill.source = SkillSource::Workspace;
            workspace.push(skill);
            Self::merge(&tiers)
        };
        self.snapshot.store(Arc::new(merged));
    }

    /// Current merged snapshot, id-sorted.
    pub fn snapshot(&self) -> Arc<Vec<CompiledSkill>> {
        self.snapshot.load_full()
    }

    /// Merge tiers in ascending rank; a later (higher) tier overwrites any
    /// same-id entry from an earlier one. Trigger patterns compile here,
    /// once per rebuild, never on the match path.
    fn merge(tiers: &BTreeMap<SkillSource, Vec<SkillDescriptor>>) -> Vec<CompiledSkill> {
        let mut by_id: BTreeMap<String, SkillDescriptor> = BTreeMap::new();
        let mut sources: Vec<&SkillSource> = tiers.keys().collect();
        sources.sort_by_key(|source| source.rank());

        for source in sources {
            for skill in &tiers[source] {
                by_id.insert(skill.id.clone(), skill.clone());
            }
        }
        by_id.into_values().map(CompiledSkill::compile).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::types::{SkillEligibility, SkillSecurity, SkillTriggers};

    fn skill(id: &str, source: SkillSource, description: &str) -> SkillDescriptor {
        SkillDescriptor {
            id: id.into(),
            name: id.into(),
            description: description.into(),
            version: "1.0.0".into(),
            instructions: format!("use {id}"),
            source,
            triggers: SkillTriggers::default(),
            eligibility: SkillEligibility::default(),
            required_tools: Vec::new(),
            security: SkillSecurity::default(),
        }
    }

    #[test]
    fn higher_tier_shadows_same_id() {
        let registry = SkillRegistry::new();
        registry.load_tier(
            SkillSource::Bundled,
            vec![skill("weather", SkillSource::Bundled, "bundled weather")],
        );
        registry.load_tier(
            SkillSource::Managed,
            vec![skill("weather", SkillSource::Managed, "managed weather")],
        );

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].descriptor.description, "managed weather");
    }

    #[test]
    fn lower_tier_never_shadows_higher() {
        let registry = SkillRegistry::new();
        registry.load_tier(
            SkillSource::Workspace,
            vec![skill("deploy", SkillSource::Workspace, "workspace deploy")],
        );
        // Loading a lower tier afterwards must not displace the workspace one.
        registry.load_tier(
            SkillSource::Extra,
            vec![skill("deploy", SkillSource::Extra, "extra deploy")],
        );

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].descriptor.description, "workspace deploy");
    }

    #[test]
    fn install_workspace_replaces_previous_install() {
        let registry = SkillRegistry::new();
        registry.install_workspace(skill("notes", SkillSource::Managed, "v1"));
        registry.install_workspace(skill("notes", SkillSource::Managed, "v2"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].descriptor.description, "v2");
        assert_eq!(snapshot[0].descriptor.source, SkillSource::Workspace);
    }

    #[test]
    fn snapshot_is_id_sorted() {
        let registry = SkillRegistry::new();
        registry.load_tier(
            SkillSource::Bundled,
            vec![
                skill("zeta", SkillSource::Bundled, ""),
                skill("alpha", SkillSource::Bundled, ""),
            ],
        );

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].descriptor.id, "alpha");
        assert_eq!(snapshot[1].descriptor.id, "zeta");
    }
}
