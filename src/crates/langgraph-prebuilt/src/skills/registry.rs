//! Skill discovery and registry
//!
//! A skill is an on-disk directory containing a `SKILL.md` file whose YAML
//! front matter declares a name, a description, and arbitrary metadata.
//! Discovery scans a root directory's immediate subdirectories for this
//! shape; a directory with no or malformed `SKILL.md` fails discovery for
//! itself without aborting the scan of its siblings.

use crate::skills::trust::TrustLevel;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Parsed `SKILL.md` front matter
#[derive(Debug, Clone, Deserialize)]
pub struct SkillMetadata {
    /// Skill name, as declared in front matter
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Everything else in the front matter, keyed by field name
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

/// A discovered skill
#[derive(Debug, Clone)]
pub struct Skill {
    /// Parsed metadata from `SKILL.md`
    pub metadata: SkillMetadata,
    /// Directory the skill lives in
    pub skill_directory: PathBuf,
    /// Trust assigned by the caller that registered this skill's root
    pub trust_level: TrustLevel,
}

/// A directory that failed discovery, with the reason why
#[derive(Debug, Clone)]
pub struct DiscoveryFailure {
    /// Directory that failed to load as a skill
    pub path: PathBuf,
    /// Why it failed
    pub reason: String,
}

/// In-memory registry mapping skill names to their [`Skill`] record
#[derive(Debug, Clone, Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Skill>,
}

impl SkillRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a skill by name
    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.get(name)
    }

    /// Register or replace a single skill
    pub fn register(&mut self, skill: Skill) {
        self.skills.insert(skill.metadata.name.clone(), skill);
    }

    /// Number of registered skills
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    /// Whether the registry has no skills
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Iterate over registered skills
    pub fn iter(&self) -> impl Iterator<Item = &Skill> {
        self.skills.values()
    }

    /// Scan `root`'s immediate subdirectories for `SKILL.md` files and
    /// register every one that parses, assigning `trust_level` to all of
    /// them (trust is supplied by the caller per root, never read from the
    /// skill's own front matter).
    ///
    /// Returns the directories that failed discovery; those are logged and
    /// skipped rather than aborting the rest of the scan.
    pub fn discover_into(&mut self, root: &Path, trust_level: TrustLevel) -> Vec<DiscoveryFailure> {
        let mut failures = Vec::new();

        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                failures.push(DiscoveryFailure {
                    path: root.to_path_buf(),
                    reason: format!("cannot read directory: {e}"),
                });
                return failures;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    failures.push(DiscoveryFailure {
                        path: root.to_path_buf(),
                        reason: format!("cannot read directory entry: {e}"),
                    });
                    continue;
                }
            };

            let dir_path = entry.path();
            if !dir_path.is_dir() {
                continue;
            }

            match load_skill_directory(&dir_path, trust_level) {
                Ok(skill) => {
                    tracing::debug!(skill = %skill.metadata.name, dir = %dir_path.display(), "skill discovered");
                    self.register(skill);
                }
                Err(reason) => {
                    tracing::warn!(dir = %dir_path.display(), %reason, "skill discovery failed for directory");
                    failures.push(DiscoveryFailure {
                        path: dir_path,
                        reason,
                    });
                }
            }
        }

        failures
    }

    /// Scan `root` into a fresh registry
    pub fn discover(root: &Path, trust_level: TrustLevel) -> (Self, Vec<DiscoveryFailure>) {
        let mut registry = Self::new();
        let failures = registry.discover_into(root, trust_level);
        (registry, failures)
    }
}

fn load_skill_directory(dir: &Path, trust_level: TrustLevel) -> Result<Skill, String> {
    let skill_md = dir.join("SKILL.md");
    if !skill_md.is_file() {
        return Err("no SKILL.md file found".to_string());
    }

    let contents = std::fs::read_to_string(&skill_md).map_err(|e| format!("cannot read SKILL.md: {e}"))?;
    let front_matter = extract_front_matter(&contents).ok_or_else(|| "no YAML front matter delimited by '---' found".to_string())?;
    let metadata: SkillMetadata =
        serde_yaml::from_str(front_matter).map_err(|e| format!("malformed front matter: {e}"))?;

    Ok(Skill {
        metadata,
        skill_directory: dir.to_path_buf(),
        trust_level,
    })
}

/// Extract the YAML block between the first pair of `---` lines
fn extract_front_matter(contents: &str) -> Option<&str> {
    let rest = contents.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest.find("\n---")?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_skill(root: &Path, name: &str, front_matter: &str) {
        let dir = root.join(name);
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("SKILL.md"), front_matter).unwrap();
    }

    #[test]
    fn test_discovers_well_formed_skills() {
        let temp = TempDir::new().unwrap();
        write_skill(
            temp.path(),
            "summarizer",
            "---\nname: summarizer\ndescription: Summarizes text\n---\n\nBody content.\n",
        );

        let (registry, failures) = SkillRegistry::discover(temp.path(), TrustLevel::Workspace);
        assert!(failures.is_empty());
        assert_eq!(registry.len(), 1);
        let skill = registry.get("summarizer").unwrap();
        assert_eq!(skill.metadata.description, "Summarizes text");
        assert_eq!(skill.trust_level, TrustLevel::Workspace);
    }

    #[test]
    fn test_missing_skill_md_fails_just_that_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("not-a-skill")).unwrap();
        write_skill(
            temp.path(),
            "good-skill",
            "---\nname: good-skill\ndescription: Works\n---\n",
        );

        let (registry, failures) = SkillRegistry::discover(temp.path(), TrustLevel::Trusted);
        assert_eq!(registry.len(), 1);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].path.ends_with("not-a-skill"));
    }

    #[test]
    fn test_malformed_front_matter_fails_just_that_directory() {
        let temp = TempDir::new().unwrap();
        write_skill(temp.path(), "broken", "---\nname: [unterminated\n---\n");
        write_skill(
            temp.path(),
            "good-skill",
            "---\nname: good-skill\ndescription: Works\n---\n",
        );

        let (registry, failures) = SkillRegistry::discover(temp.path(), TrustLevel::Workspace);
        assert_eq!(registry.len(), 1);
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn test_trust_level_is_caller_supplied_not_from_front_matter() {
        let temp = TempDir::new().unwrap();
        write_skill(
            temp.path(),
            "claims-trusted",
            "---\nname: claims-trusted\ndescription: d\ntrust_level: trusted\n---\n",
        );

        let (registry, _) = SkillRegistry::discover(temp.path(), TrustLevel::Untrusted);
        let skill = registry.get("claims-trusted").unwrap();
        assert_eq!(skill.trust_level, TrustLevel::Untrusted);
    }

    #[test]
    fn test_extra_metadata_is_preserved() {
        let temp = TempDir::new().unwrap();
        write_skill(
            temp.path(),
            "tagged",
            "---\nname: tagged\ndescription: d\ntags:\n  - nlp\n  - summarization\n---\n",
        );

        let (registry, _) = SkillRegistry::discover(temp.path(), TrustLevel::Workspace);
        let skill = registry.get("tagged").unwrap();
        assert!(skill.metadata.extra.contains_key("tags"));
    }
}
