//! The synthesis pipeline: generate, copy, patch.
//!
//! Strictly linear and fail-fast. The first error aborts the run and the
//! destination keeps whatever earlier steps already wrote.

use crate::config::{ConfigError, SynthConfig};
use crate::copy::{self, CopyError, CopyOutcome};
use crate::generator::{GenerationError, Generator};
use crate::patch::{self, PatchError, PatchMode, RuleOutcome};
use crate::safety::{DestinationGuard, SafetyError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SynthError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("copy failed: {0}")]
    Copy(#[from] CopyError),

    #[error("patch failed: {0}")]
    Patch(#[from] PatchError),

    #[error("invalid destination: {0}")]
    Destination(#[from] SafetyError),
}

/// Everything a full run did.
#[derive(Debug, Clone, Serialize)]
pub struct SynthReport {
    pub generated_root: PathBuf,
    pub copies: Vec<CopyOutcome>,
    pub patches: Vec<RuleOutcome>,
}

/// Run the whole pipeline against `destination`.
pub fn synthesize(
    config: &SynthConfig,
    generator: &dyn Generator,
    destination: &Path,
) -> Result<SynthReport, SynthError> {
    let guard = DestinationGuard::new(destination)?;
    let request = &config.generator.request;
    info!(
        service = %request.service,
        version = %request.version,
        destination = %guard.root().display(),
        "Starting synthesis."
    );

    // The tree is dropped at the end of this function, removing any
    // scratch directory the generator wrote into.
    let tree = generator.generate(request)?;
    let copies = copy::copy_all(&config.copy, tree.root(), &guard)?;
    let patches = patch::apply_rules(&config.patches, &guard, PatchMode::Apply)?;

    info!(
        copied = copies.iter().map(|c| c.files.len()).sum::<usize>(),
        patched = patches.iter().filter(|p| p.applied).count(),
        "Synthesis finished."
    );

    Ok(SynthReport {
        generated_root: tree.root().to_path_buf(),
        copies,
        patches,
    })
}

/// Run only the patch phase against an already populated destination.
pub fn patch_destination(
    config: &SynthConfig,
    destination: &Path,
    mode: PatchMode,
) -> Result<Vec<RuleOutcome>, SynthError> {
    let guard = DestinationGuard::new(destination)?;
    Ok(patch::apply_rules(&config.patches, &guard, mode)?)
}

/// Result of re-running the patch rules against their own output.
#[derive(Debug, Clone, Serialize)]
pub struct IdempotenceReport {
    pub outcomes: Vec<RuleOutcome>,
}

impl IdempotenceReport {
    /// Rules that would still change a file.
    pub fn violations(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.applied)
    }

    pub fn is_idempotent(&self) -> bool {
        self.violations().next().is_none()
    }
}

/// Simulate the patch phase on the current destination without writing.
///
/// Run after a synthesis, any rule that still changes a file is one whose
/// pattern matches its own replacement.
pub fn check_idempotence(
    config: &SynthConfig,
    destination: &Path,
) -> Result<IdempotenceReport, SynthError> {
    let outcomes = patch_destination(config, destination, PatchMode::DryRun)?;
    Ok(IdempotenceReport { outcomes })
}
