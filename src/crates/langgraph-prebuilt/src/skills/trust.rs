//! Trust-gated resource resolution for skill directories
//!
//! A skill is a directory on disk; callers ask to resolve a path relative to
//! it (read a doc, run a script). This module decides whether that request
//! is allowed and turns the relative path into a checked absolute one.

use crate::error::{PrebuiltError, Result};
use std::path::{Component, Path, PathBuf};

/// How much a skill's origin is trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustLevel {
    /// Authored within the current workspace
    Workspace,
    /// Vetted and explicitly trusted (e.g. an internal shared registry)
    Trusted,
    /// Unvetted third-party origin
    Untrusted,
}

/// Policy controlling whether `scripts/`-rooted resources may be resolved
/// for untrusted skills.
#[derive(Debug, Clone, Default)]
pub struct TrustPolicy {
    /// Overrides the default deny for `untrusted` skills' `scripts/` resources
    pub allow_untrusted_scripts: bool,
}

/// Outcome of a resource resolution request, for audit logging
#[derive(Debug, Clone)]
pub struct ResourceDecision {
    /// Skill the request was made against
    pub skill_name: String,
    /// Trust level of that skill at the time of the decision
    pub trust_level: TrustLevel,
    /// Path requested, relative to the skill root
    pub requested_path: String,
    /// Whether the request was allowed
    pub allowed: bool,
    /// Human-readable reason for the decision
    pub reason: String,
}

/// Resolve `relative_path` against `skill_root`, enforcing the trust gate
///
/// Rejects absolute paths, `..` segments, and symlink targets that resolve
/// outside `skill_root`. Requests under `scripts/` additionally require the
/// skill to be `workspace` or `trusted`, or `allow_untrusted_scripts` to be
/// set in `policy`.
pub fn resolve_resource(
    skill_name: &str,
    skill_root: &Path,
    trust_level: TrustLevel,
    relative_path: &str,
    policy: &TrustPolicy,
) -> Result<(PathBuf, ResourceDecision)> {
    let requested = Path::new(relative_path);

    if requested.is_absolute() {
        let decision = deny(skill_name, trust_level, relative_path, "absolute paths are not allowed");
        return Err(denial_error(decision));
    }

    if requested
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        let decision = deny(skill_name, trust_level, relative_path, "'..' segments are not allowed");
        return Err(denial_error(decision));
    }

    let under_scripts = requested
        .components()
        .next()
        .map(|c| c.as_os_str().to_str() == Some("scripts"))
        .unwrap_or(false);

    if under_scripts && trust_level == TrustLevel::Untrusted && !policy.allow_untrusted_scripts {
        let decision = deny(
            skill_name,
            trust_level,
            relative_path,
            "untrusted skill's scripts/ resources are denied by default",
        );
        return Err(denial_error(decision));
    }

    let candidate = skill_root.join(requested);

    let canonical_root = skill_root
        .canonicalize()
        .map_err(|e| PrebuiltError::Custom(format!("skill root {} is not accessible: {e}", skill_root.display())))?;

    let canonical_candidate = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| PrebuiltError::Custom(format!("resource {} is not accessible: {e}", candidate.display())))?
    } else {
        candidate.clone()
    };

    if !canonical_candidate.starts_with(&canonical_root) {
        let decision = deny(
            skill_name,
            trust_level,
            relative_path,
            "resolved path escapes the skill root",
        );
        return Err(denial_error(decision));
    }

    let decision = ResourceDecision {
        skill_name: skill_name.to_string(),
        trust_level,
        requested_path: relative_path.to_string(),
        allowed: true,
        reason: "within trust policy and skill root".to_string(),
    };
    tracing::debug!(skill = skill_name, path = relative_path, "resource request allowed");

    Ok((candidate, decision))
}

fn deny(skill_name: &str, trust_level: TrustLevel, relative_path: &str, reason: &str) -> ResourceDecision {
    tracing::warn!(skill = skill_name, path = relative_path, reason, "resource request denied");
    ResourceDecision {
        skill_name: skill_name.to_string(),
        trust_level,
        requested_path: relative_path.to_string(),
        allowed: false,
        reason: reason.to_string(),
    }
}

fn denial_error(decision: ResourceDecision) -> PrebuiltError {
    PrebuiltError::Custom(format!(
        "resource request denied for skill '{}': {}",
        decision.skill_name, decision.reason
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir(root.join("scripts")).unwrap();
        std::fs::write(root.join("scripts/run.sh"), "#!/bin/sh").unwrap();
        std::fs::write(root.join("README.md"), "hello").unwrap();
        (dir, root)
    }

    #[test]
    fn test_workspace_skill_may_access_scripts() {
        let (_dir, root) = setup();
        let result = resolve_resource("demo", &root, TrustLevel::Workspace, "scripts/run.sh", &TrustPolicy::default());
        assert!(result.is_ok());
    }

    #[test]
    fn test_trusted_skill_may_access_scripts() {
        let (_dir, root) = setup();
        let result = resolve_resource("demo", &root, TrustLevel::Trusted, "scripts/run.sh", &TrustPolicy::default());
        assert!(result.is_ok());
    }

    #[test]
    fn test_untrusted_skill_denied_scripts_by_default() {
        let (_dir, root) = setup();
        let result = resolve_resource("demo", &root, TrustLevel::Untrusted, "scripts/run.sh", &TrustPolicy::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_untrusted_skill_allowed_with_override() {
        let (_dir, root) = setup();
        let policy = TrustPolicy {
            allow_untrusted_scripts: true,
        };
        let result = resolve_resource("demo", &root, TrustLevel::Untrusted, "scripts/run.sh", &policy);
        assert!(result.is_ok());
    }

    #[test]
    fn test_untrusted_skill_may_access_non_scripts() {
        let (_dir, root) = setup();
        let result = resolve_resource("demo", &root, TrustLevel::Untrusted, "README.md", &TrustPolicy::default());
        assert!(result.is_ok());
    }

    #[test]
    fn test_absolute_path_rejected() {
        let (_dir, root) = setup();
        let result = resolve_resource("demo", &root, TrustLevel::Workspace, "/etc/passwd", &TrustPolicy::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_parent_dir_rejected() {
        let (_dir, root) = setup();
        let result = resolve_resource("demo", &root, TrustLevel::Workspace, "../outside.txt", &TrustPolicy::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_symlink_escaping_root_rejected() {
        let (dir, root) = setup();
        let outside = dir.path().join("outside.txt");
        std::fs::write(&outside, "secret").unwrap();
        let link = root.join("escape.txt");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&outside, &link).unwrap();
        #[cfg(windows)]
        std::os::windows::fs::symlink_file(&outside, &link).unwrap();

        let result = resolve_resource("demo", &root, TrustLevel::Workspace, "escape.txt", &TrustPolicy::default());
        assert!(result.is_err());
    }
}
