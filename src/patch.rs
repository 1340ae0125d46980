//! Ordered regex patches over the destination tree.
//!
//! Rules run in declaration order and every file is re-read per rule, so a
//! rule always sees the output of the rules before it. Every match of a
//! rule's pattern becomes an [`Edit`] carrying the matched text as its
//! expected before-text; the edits for one file are written in one atomic
//! batch.

use crate::config::PatchRule;
use crate::edit::{self, Edit, EditError};
use crate::glob::{self, Glob, GlobError};
use crate::safety::{DestinationGuard, SafetyError};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("patch '{rule}' has an invalid pattern: {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },

    #[error("patch '{rule}' has an invalid file glob: {source}")]
    InvalidGlob {
        rule: String,
        #[source]
        source: GlobError,
    },

    #[error("{path} is not valid UTF-8")]
    Encoding { path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to edit {path}: {source}")]
    Edit {
        path: PathBuf,
        #[source]
        source: EditError,
    },

    #[error(transparent)]
    Safety(#[from] SafetyError),
}

/// Whether patches are written to disk or only simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    Apply,
    DryRun,
}

/// What one patch rule did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleOutcome {
    pub id: String,
    /// Files matched by the rule's globs, relative to the destination root
    pub matched_files: Vec<PathBuf>,
    /// Files whose contents the rule changed (or would change)
    pub changed_files: Vec<FileChange>,
    /// `false` when the rule was a no-op: no files matched or nothing changed
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: PathBuf,
    pub replacements: usize,
    #[serde(skip)]
    pub before: String,
    #[serde(skip)]
    pub after: String,
}

/// A patch rule with its pattern and globs compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule<'a> {
    rule: &'a PatchRule,
    regex: Regex,
    globs: Vec<Glob>,
}

impl<'a> CompiledRule<'a> {
    pub fn compile(rule: &'a PatchRule) -> Result<Self, PatchError> {
        let regex = rule.regex().map_err(|source| PatchError::InvalidPattern {
            rule: rule.id.clone(),
            source,
        })?;
        let globs = rule
            .files
            .iter()
            .map(|file| Glob::new(file))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| PatchError::InvalidGlob {
                rule: rule.id.clone(),
                source,
            })?;
        Ok(Self { rule, regex, globs })
    }

    pub fn id(&self) -> &str {
        &self.rule.id
    }

    /// One edit per match of the pattern in `content`.
    pub fn plan(&self, path: &Path, content: &str) -> Vec<Edit> {
        let mut edits = Vec::new();
        for caps in self.regex.captures_iter(content) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let mut replacement = String::new();
            caps.expand(&self.rule.replacement, &mut replacement);
            edits.push(Edit::new(
                path,
                whole.start(),
                whole.end(),
                replacement,
                whole.as_str(),
            ));
        }
        edits
    }

    fn matched_files(&self, root: &Path) -> Result<Vec<PathBuf>, PatchError> {
        glob::expand_all(root, &self.globs).map_err(|source| PatchError::InvalidGlob {
            rule: self.rule.id.clone(),
            source,
        })
    }
}

/// Apply `rules` in order to the tree under `guard`.
///
/// In [`PatchMode::DryRun`] nothing is written; later rules still see the
/// simulated output of earlier ones.
pub fn apply_rules(
    rules: &[PatchRule],
    guard: &DestinationGuard,
    mode: PatchMode,
) -> Result<Vec<RuleOutcome>, PatchError> {
    let compiled = rules
        .iter()
        .map(CompiledRule::compile)
        .collect::<Result<Vec<_>, _>>()?;

    info!(rules = compiled.len(), ?mode, root = %guard.root().display(), "Applying patches.");

    let mut tree = PatchTree {
        guard,
        mode,
        overlay: HashMap::new(),
    };
    compiled.iter().map(|rule| tree.apply(rule)).collect()
}

/// The destination as seen by the patch phase, with simulated writes kept
/// in memory during a dry run.
struct PatchTree<'g> {
    guard: &'g DestinationGuard,
    mode: PatchMode,
    overlay: HashMap<PathBuf, String>,
}

impl PatchTree<'_> {
    fn apply(&mut self, rule: &CompiledRule<'_>) -> Result<RuleOutcome, PatchError> {
        let root = self.guard.root();
        let files = rule.matched_files(root)?;

        let mut outcome = RuleOutcome {
            id: rule.id().to_string(),
            matched_files: files
                .iter()
                .map(|file| file.strip_prefix(root).unwrap_or(file).to_path_buf())
                .collect(),
            changed_files: Vec::new(),
            applied: false,
        };

        if files.is_empty() {
            debug!(rule = rule.id(), "Patch matched no files.");
            return Ok(outcome);
        }

        for file in &files {
            let file = self.guard.revalidate(file)?;
            let before = self.read(&file)?;
            let edits = rule.plan(&file, &before);
            if edits.is_empty() {
                continue;
            }

            let (after, results) = edit::splice(&before, &edits).map_err(|source| {
                PatchError::Edit {
                    path: file.clone(),
                    source,
                }
            })?;
            let replacements = results.iter().filter(|r| r.is_applied()).count();
            if replacements == 0 {
                continue;
            }

            if self.mode == PatchMode::Apply {
                Edit::apply_batch(edits).map_err(|source| PatchError::Edit {
                    path: file.clone(),
                    source,
                })?;
            } else {
                self.overlay.insert(file.clone(), after.clone());
            }

            debug!(rule = rule.id(), path = %file.display(), replacements, "Patched file.");
            outcome.changed_files.push(FileChange {
                path: file.strip_prefix(root).unwrap_or(&file).to_path_buf(),
                replacements,
                before,
                after,
            });
        }

        outcome.applied = !outcome.changed_files.is_empty();
        info!(
            rule = rule.id(),
            matched = outcome.matched_files.len(),
            changed = outcome.changed_files.len(),
            "Patch rule finished."
        );
        Ok(outcome)
    }

    fn read(&self, path: &Path) -> Result<String, PatchError> {
        if let Some(content) = self.overlay.get(path) {
            return Ok(content.clone());
        }
        let bytes = fs::read(path).map_err(|source| PatchError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        String::from_utf8(bytes).map_err(|_| PatchError::Encoding {
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, files: &[&str], pattern: &str, replacement: &str) -> PatchRule {
        PatchRule {
            id: id.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            multiline: false,
            reference: None,
        }
    }

    #[test]
    fn plan_expands_capture_groups() {
        let r = rule("r", &["x"], r"(\w+)@(\w+)", "${2} at ${1}");
        let compiled = CompiledRule::compile(&r).unwrap();
        let edits = compiled.plan(Path::new("x"), "a@b c@d");
        let (text, _) = edit::splice("a@b c@d", &edits).unwrap();
        assert_eq!(text, "b at a d at c");
    }

    #[test]
    fn invalid_pattern_fails_before_any_write() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.rb"), "foo").unwrap();
        let guard = DestinationGuard::new(temp.path()).unwrap();
        let rules = vec![
            rule("good", &["a.rb"], "foo", "bar"),
            rule("bad", &["a.rb"], "(", ""),
        ];

        let err = apply_rules(&rules, &guard, PatchMode::Apply).unwrap_err();
        assert!(matches!(err, PatchError::InvalidPattern { ref rule, .. } if rule == "bad"));
        assert_eq!(fs::read_to_string(temp.path().join("a.rb")).unwrap(), "foo");
    }

    #[test]
    fn zero_matches_are_no_ops() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.rb"), "nothing here").unwrap();
        let guard = DestinationGuard::new(temp.path()).unwrap();
        let rules = vec![
            rule("no-files", &["lib/**/*.rb"], "x", "y"),
            rule("no-match", &["a.rb"], "absent", "y"),
        ];

        let outcomes = apply_rules(&rules, &guard, PatchMode::Apply).unwrap();
        assert!(outcomes[0].matched_files.is_empty());
        assert!(!outcomes[0].applied);
        assert_eq!(outcomes[1].matched_files, vec![PathBuf::from("a.rb")]);
        assert!(!outcomes[1].applied);
        assert_eq!(
            fs::read_to_string(temp.path().join("a.rb")).unwrap(),
            "nothing here"
        );
    }

    #[test]
    fn non_utf8_target_is_an_encoding_error() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.rb"), [0xff, 0xfe, 0x00]).unwrap();
        let guard = DestinationGuard::new(temp.path()).unwrap();
        let rules = vec![rule("r", &["a.rb"], "x", "y")];

        assert!(matches!(
            apply_rules(&rules, &guard, PatchMode::Apply),
            Err(PatchError::Encoding { .. })
        ));
    }

    #[test]
    fn dry_run_leaves_files_but_chains_rules() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.rb"), "alpha").unwrap();
        let guard = DestinationGuard::new(temp.path()).unwrap();
        let rules = vec![
            rule("first", &["a.rb"], "alpha", "beta"),
            rule("second", &["a.rb"], "beta", "gamma"),
        ];

        let outcomes = apply_rules(&rules, &guard, PatchMode::DryRun).unwrap();
        assert!(outcomes[0].applied);
        assert!(outcomes[1].applied);
        assert_eq!(outcomes[1].changed_files[0].after, "gamma");
        assert_eq!(fs::read_to_string(temp.path().join("a.rb")).unwrap(), "alpha");
    }

    #[test]
    fn identical_replacement_is_not_a_change() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.gemspec"), "dep \"rubocop\", \"~> 0.64.0\"\n").unwrap();
        let guard = DestinationGuard::new(temp.path()).unwrap();
        let mut pin = rule(
            "pin",
            &["a.gemspec"],
            r#"dep "rubocop".*$"#,
            r#"dep "rubocop", "~> 0.64.0""#,
        );
        pin.multiline = true;

        let outcomes = apply_rules(&[pin], &guard, PatchMode::Apply).unwrap();
        assert!(!outcomes[0].applied);
    }
}
