//! Generator invocation.
//!
//! The generator is an external program treated as a black box: it receives
//! a service, a version, a config path and an output name, and leaves a
//! directory of generated source behind. [`Generator`] is the seam that lets
//! the pipeline run against a real generator or against a prebuilt tree.

use crate::config::GeneratorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};

/// What to generate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GeneratorRequest {
    pub service: String,
    pub version: String,
    pub config_path: String,
    pub output_name: String,
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("no generator command configured for {service} {version}; pass a prebuilt tree instead")]
    NotConfigured { service: String, version: String },

    #[error("failed to create generator output directory: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("failed to spawn generator '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("generator '{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("generator produced no output at {0}")]
    NoOutput(PathBuf),
}

/// A directory of generated source.
///
/// When the generator wrote into a scratch directory, the tree owns it and
/// the directory is removed on drop.
#[derive(Debug)]
pub struct GeneratedTree {
    root: PathBuf,
    _scratch: Option<TempDir>,
}

impl GeneratedTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _scratch: None,
        }
    }

    fn scratch(root: PathBuf, scratch: TempDir) -> Self {
        Self {
            root,
            _scratch: Some(scratch),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

pub trait Generator {
    fn generate(&self, request: &GeneratorRequest) -> Result<GeneratedTree, GenerationError>;
}

/// Runs an external generator program.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    output_root: Option<PathBuf>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            output_root: None,
        }
    }

    /// Build the generator described by a synth config.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        let program = config
            .command
            .as_deref()
            .ok_or_else(|| GenerationError::NotConfigured {
                service: config.request.service.clone(),
                version: config.request.version.clone(),
            })?;
        let generator = Self::new(program, config.args.clone());
        Ok(match &config.output_root {
            Some(root) => generator.with_output_root(root),
            None => generator,
        })
    }

    /// Write into `root` instead of a scratch directory.
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = Some(root.into());
        self
    }

    fn expand_args(&self, request: &GeneratorRequest, output_dir: &Path) -> Vec<String> {
        let output_dir = output_dir.display().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{service}", &request.service)
                    .replace("{version}", &request.version)
                    .replace("{config_path}", &request.config_path)
                    .replace("{output_name}", &request.output_name)
                    .replace("{output_dir}", &output_dir)
            })
            .collect()
    }
}

impl Generator for CommandGenerator {
    fn generate(&self, request: &GeneratorRequest) -> Result<GeneratedTree, GenerationError> {
        let (output_dir, scratch) = match &self.output_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(GenerationError::Scratch)?;
                (root.clone(), None)
            }
            None => {
                let scratch = tempfile::tempdir().map_err(GenerationError::Scratch)?;
                (scratch.path().to_path_buf(), Some(scratch))
            }
        };

        let args = self.expand_args(request, &output_dir);
        info!(
            program = %self.program,
            service = %request.service,
            version = %request.version,
            "Running generator."
        );
        debug!(?args, output_dir = %output_dir.display(), "Generator arguments.");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| GenerationError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(GenerationError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let root = output_dir.join(&request.output_name);
        if !root.is_dir() {
            return Err(GenerationError::NoOutput(root));
        }

        Ok(match scratch {
            Some(scratch) => GeneratedTree::scratch(root, scratch),
            None => GeneratedTree::new(root),
        })
    }
}

/// Uses a tree that was generated earlier.
#[derive(Debug, Clone)]
pub struct PrebuiltGenerator {
    root: PathBuf,
}

impl PrebuiltGenerator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Generator for PrebuiltGenerator {
    fn generate(&self, request: &GeneratorRequest) -> Result<GeneratedTree, GenerationError> {
        if !self.root.is_dir() {
            return Err(GenerationError::NoOutput(self.root.clone()));
        }
        info!(
            root = %self.root.display(),
            service = %request.service,
            version = %request.version,
            "Using prebuilt generator output."
        );
        Ok(GeneratedTree::new(self.root.clone()))
    }
}
