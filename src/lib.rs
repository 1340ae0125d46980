//! gapic-synth: regenerate a client library and patch generator defects
//!
//! A synthesis run is three strictly ordered phases:
//!
//! 1. **Generate**: an external GAPIC generator turns an API definition into
//!    a directory of client source ([`generator`]).
//! 2. **Copy**: a fixed allowlist of paths is copied from that directory into
//!    the destination repository, merging packaging manifests instead of
//!    overwriting them where asked ([`copy`]).
//! 3. **Patch**: an ordered list of regex find/replace rules rewrites known
//!    bad generator output ([`patch`]).
//!
//! Everything is driven by an immutable [`SynthConfig`] loaded from TOML.
//!
//! # Safety
//!
//! - Every replacement is a verified byte-span [`Edit`]
//! - Atomic file writes (tempfile + fsync + rename)
//! - Copy destinations and patch targets are confined to the destination
//! - Non-UTF-8 patch targets are rejected, never rewritten
//!
//! # Example
//!
//! ```no_run
//! use gapic_synth::{load_builtin, synthesize, PrebuiltGenerator};
//! use std::path::Path;
//!
//! let config = load_builtin()?;
//! let generator = PrebuiltGenerator::new("/tmp/artman-output/google-cloud-dialogflow");
//! let report = synthesize(&config, &generator, Path::new("google-cloud-dialogflow"))?;
//! for rule in &report.patches {
//!     println!("{}: applied={}", rule.id, rule.applied);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod copy;
pub mod edit;
pub mod generator;
pub mod glob;
pub mod patch;
pub mod pipeline;
pub mod safety;

// Re-exports
pub use config::{
    load_builtin, load_from_path, load_from_str, ConfigError, CopyRule, MergeStrategy, PatchRule,
    SynthConfig,
};
pub use copy::{CopyError, CopyOutcome};
pub use edit::{Edit, EditError, EditResult, EditVerification};
pub use generator::{
    CommandGenerator, GeneratedTree, GenerationError, Generator, GeneratorRequest,
    PrebuiltGenerator,
};
pub use glob::{Glob, GlobError};
pub use patch::{FileChange, PatchError, PatchMode, RuleOutcome};
pub use pipeline::{
    check_idempotence, patch_destination, synthesize, IdempotenceReport, SynthError, SynthReport,
};
pub use safety::{DestinationGuard, SafetyError};
