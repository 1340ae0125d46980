//! Selective copy from the generated tree into the destination.

pub mod merge;

pub use merge::{merge_gemspec, merge_toml, MergeError};

use crate::config::{CopyRule, MergeStrategy};
use crate::edit::{atomic_write, EditError};
use crate::glob::{Glob, GlobError};
use crate::safety::{DestinationGuard, SafetyError};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum CopyError {
    #[error("generated tree has no '{source_path}' (looked in {root})")]
    MissingSource { source_path: String, root: PathBuf },

    #[error("'{source_path}' is a directory and cannot be merged with the {strategy} strategy")]
    MergeDirectory {
        source_path: String,
        strategy: MergeStrategy,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to merge {path}: {source}")]
    Merge {
        path: PathBuf,
        #[source]
        source: MergeError,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: EditError,
    },

    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error(transparent)]
    Safety(#[from] SafetyError),
}

/// What one copy rule did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyOutcome {
    pub source: String,
    pub merge: MergeStrategy,
    /// Destination files written, relative to the destination root
    pub files: Vec<PathBuf>,
    /// Destination files produced by a merge function rather than a copy
    pub merged: Vec<PathBuf>,
}

/// Run every copy rule in order.
pub fn copy_all(
    rules: &[CopyRule],
    generated_root: &Path,
    guard: &DestinationGuard,
) -> Result<Vec<CopyOutcome>, CopyError> {
    info!(
        rules = rules.len(),
        from = %generated_root.display(),
        to = %guard.root().display(),
        "Copying generated files."
    );
    rules
        .iter()
        .map(|rule| copy_rule(rule, generated_root, guard))
        .collect()
}

/// Copy one rule's source path(s) into the destination.
pub fn copy_rule(
    rule: &CopyRule,
    generated_root: &Path,
    guard: &DestinationGuard,
) -> Result<CopyOutcome, CopyError> {
    let glob = Glob::new(&rule.source)?;
    let entries = glob.expand_entries(generated_root)?;
    if entries.is_empty() {
        return Err(CopyError::MissingSource {
            source_path: rule.source.clone(),
            root: generated_root.to_path_buf(),
        });
    }

    let mut outcome = CopyOutcome {
        source: rule.source.clone(),
        merge: rule.merge,
        files: Vec::new(),
        merged: Vec::new(),
    };

    for entry in entries {
        let source_path = generated_root.join(&entry);
        let dest_base = match &rule.dest {
            Some(dest) => PathBuf::from(dest),
            None => entry.clone(),
        };

        if source_path.is_dir() {
            if rule.merge != MergeStrategy::Overwrite {
                return Err(CopyError::MergeDirectory {
                    source_path: rule.source.clone(),
                    strategy: rule.merge,
                });
            }
            for file in WalkDir::new(&source_path).sort_by_file_name() {
                let file = file.map_err(|e| CopyError::Glob(GlobError::Walk {
                    root: source_path.clone(),
                    source: e,
                }))?;
                if !file.file_type().is_file() {
                    if file.file_type().is_symlink() {
                        warn!(path = %file.path().display(), "Skipping symlink in generated tree.");
                    }
                    continue;
                }
                let Ok(relative) = file.path().strip_prefix(&source_path) else {
                    continue;
                };
                let dest = dest_base.join(relative);
                copy_file(file.path(), &dest, guard)?;
                outcome.files.push(dest);
            }
        } else if rule.merge == MergeStrategy::Overwrite {
            copy_file(&source_path, &dest_base, guard)?;
            outcome.files.push(dest_base);
        } else if merge_file(&source_path, &dest_base, rule.merge, guard)? {
            outcome.merged.push(dest_base.clone());
            outcome.files.push(dest_base);
        } else {
            outcome.files.push(dest_base);
        }
    }

    debug!(
        source = %rule.source,
        files = outcome.files.len(),
        merged = outcome.merged.len(),
        "Copy rule finished."
    );
    Ok(outcome)
}

fn copy_file(source: &Path, dest: &Path, guard: &DestinationGuard) -> Result<(), CopyError> {
    let target = guard.resolve(dest)?;
    ensure_parent(&target)?;
    fs::copy(source, &target).map_err(|e| CopyError::Io {
        path: target.clone(),
        source: e,
    })?;
    debug!(from = %source.display(), to = %target.display(), "Copied file.");
    Ok(())
}

/// Returns `true` when an existing destination was merged, `false` when
/// there was nothing to merge with and the source was copied as-is.
fn merge_file(
    source: &Path,
    dest: &Path,
    strategy: MergeStrategy,
    guard: &DestinationGuard,
) -> Result<bool, CopyError> {
    let target = guard.resolve(dest)?;
    if !target.is_file() {
        copy_file(source, dest, guard)?;
        return Ok(false);
    }

    let generated = read_text(source)?;
    let existing = read_text(&target)?;
    let merged = merge::merge(strategy, &generated, &existing).map_err(|e| CopyError::Merge {
        path: target.clone(),
        source: e,
    })?;

    atomic_write(&target, merged.as_bytes()).map_err(|e| CopyError::Write {
        path: target.clone(),
        source: e,
    })?;
    debug!(path = %target.display(), strategy = %strategy, "Merged file.");
    Ok(true)
}

fn read_text(path: &Path) -> Result<String, CopyError> {
    fs::read_to_string(path).map_err(|e| CopyError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn ensure_parent(path: &Path) -> Result<(), CopyError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CopyError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}
