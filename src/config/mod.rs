pub mod loader;
pub mod schema;

pub use loader::{load_builtin, load_from_path, load_from_str, ConfigError};
pub use schema::{
    CopyRule, GeneratorConfig, MergeStrategy, PatchRule, SynthConfig, ValidationError,
    ValidationIssue,
};
