//! Skill registry and trust-gated resource resolution
//!
//! A skill is a directory on disk carrying a `SKILL.md` manifest. The
//! [`registry`] module discovers and catalogs skills; [`trust`] decides
//! whether a given request to read a resource inside a skill's directory is
//! allowed, based on the trust level assigned to the root it came from.

pub mod registry;
pub mod trust;

pub use registry::{DiscoveryFailure, Skill, SkillMetadata, SkillRegistry};
pub use trust::{resolve_resource, ResourceDecision, TrustLevel, TrustPolicy};
