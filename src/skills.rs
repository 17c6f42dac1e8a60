//! Skill registry and matching.
//!
//! Skills are declarative capability packs: trigger terms, eligibility
//! requirements, and prompt instructions. They come from four sources with a
//! fixed precedence; a workspace skill shadows a managed one of the same id,
//! and so on down the tiers. Matching is per message and read-only against
//! an atomically swapped snapshot.

mod matcher;
mod registry;
mod types;

pub use matcher::{MatchedSkill, SkillMatcher};
pub use registry::SkillRegistry;
pub use types::{
    CompiledSkill, IneligibleReason, SkillDescriptor, SkillEligibility, SkillSecurity,
    SkillSource, SkillTriggers,
};
