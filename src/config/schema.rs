use crate::generator::GeneratorRequest;
use crate::glob::Glob;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

/// Everything one synthesis run needs: what to generate, what to copy out
/// of the generated tree and which patches to apply afterwards.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SynthConfig {
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub copy: Vec<CopyRule>,
    #[serde(default)]
    pub patches: Vec<PatchRule>,
}

impl SynthConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        let request = &self.generator.request;
        for (field, value) in [
            ("generator.service", &request.service),
            ("generator.version", &request.version),
            ("generator.config_path", &request.config_path),
            ("generator.output_name", &request.output_name),
        ] {
            if value.trim().is_empty() {
                issues.push(ValidationIssue::MissingField { rule: None, field });
            }
        }
        if let Some(command) = &self.generator.command {
            if command.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule: None,
                    field: "generator.command",
                });
            }
        }

        if self.copy.is_empty() && self.patches.is_empty() {
            issues.push(ValidationIssue::NothingToDo);
        }

        for (idx, rule) in self.copy.iter().enumerate() {
            let label = format!("copy[{idx}]");
            if rule.source.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule: Some(label.clone()),
                    field: "source",
                });
                continue;
            }
            let literal = match Glob::new(&rule.source) {
                Ok(glob) => glob.is_literal(),
                Err(e) => {
                    issues.push(ValidationIssue::InvalidGlob {
                        rule: label.clone(),
                        message: e.to_string(),
                    });
                    true
                }
            };
            if let Some(dest) = &rule.dest {
                if dest.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        rule: Some(label.clone()),
                        field: "dest",
                    });
                } else if !literal {
                    issues.push(ValidationIssue::InvalidCombo {
                        rule: Some(label.clone()),
                        message: "dest requires a literal source path".to_string(),
                    });
                }
            }
            if rule.merge != MergeStrategy::Overwrite && !literal {
                issues.push(ValidationIssue::InvalidCombo {
                    rule: Some(label),
                    message: "merge strategies require a literal source file".to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        for rule in &self.patches {
            if rule.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule: None,
                    field: "id",
                });
            } else if !seen.insert(rule.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId {
                    id: rule.id.clone(),
                });
            }

            if rule.files.is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule: Some(rule.id.clone()),
                    field: "files",
                });
            }
            for file in &rule.files {
                if let Err(e) = Glob::new(file) {
                    issues.push(ValidationIssue::InvalidGlob {
                        rule: rule.id.clone(),
                        message: e.to_string(),
                    });
                }
            }

            if rule.pattern.is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule: Some(rule.id.clone()),
                    field: "pattern",
                });
            } else if let Err(e) = rule.regex() {
                issues.push(ValidationIssue::InvalidPattern {
                    rule: rule.id.clone(),
                    message: e.to_string(),
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeneratorConfig {
    #[serde(flatten)]
    pub request: GeneratorRequest,
    /// Program that runs the generator. Without one, a prebuilt tree must be
    /// supplied at run time.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments; `{service}`, `{version}`, `{config_path}`,
    /// `{output_name}` and `{output_dir}` are expanded.
    #[serde(default)]
    pub args: Vec<String>,
    /// Where the generator writes. Defaults to a scratch directory.
    #[serde(default)]
    pub output_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct CopyRule {
    /// Path or glob relative to the generated tree
    pub source: String,
    /// Destination relative to the destination root; defaults to `source`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    #[serde(default)]
    pub merge: MergeStrategy,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    Overwrite,
    /// Ruby gemspec: keep version, homepage and hand-added dependencies
    Gemspec,
    /// TOML manifest: union dependency tables
    Toml,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::Overwrite => f.write_str("overwrite"),
            MergeStrategy::Gemspec => f.write_str("gemspec"),
            MergeStrategy::Toml => f.write_str("toml"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PatchRule {
    pub id: String,
    /// One glob or a list of globs, relative to the destination root
    #[serde(deserialize_with = "one_or_many")]
    pub files: Vec<String>,
    /// Regular expression searched for in every matched file
    pub pattern: String,
    /// Replacement template; `$1`, `${1}` and `${name}` refer to captures
    pub replacement: String,
    /// `^` and `$` match at line boundaries
    #[serde(default)]
    pub multiline: bool,
    /// Upstream issue describing the generator defect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl PatchRule {
    pub fn regex(&self) -> Result<regex::Regex, regex::Error> {
        regex::RegexBuilder::new(&self.pattern)
            .multi_line(self.multiline)
            .build()
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(file) => vec![file],
        OneOrMany::Many(files) => files,
    })
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    NothingToDo,
    MissingField {
        rule: Option<String>,
        field: &'static str,
    },
    DuplicateId {
        id: String,
    },
    InvalidGlob {
        rule: String,
        message: String,
    },
    InvalidPattern {
        rule: String,
        message: String,
    },
    InvalidCombo {
        rule: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::NothingToDo => {
                write!(f, "synth config has neither copy rules nor patches")
            }
            ValidationIssue::MissingField { rule, field } => match rule {
                Some(id) => write!(f, "rule '{id}' missing required field '{field}'"),
                None => write!(f, "missing required field '{field}'"),
            },
            ValidationIssue::DuplicateId { id } => write!(f, "duplicate patch id '{id}'"),
            ValidationIssue::InvalidGlob { rule, message } => {
                write!(f, "rule '{rule}' has an invalid path: {message}")
            }
            ValidationIssue::InvalidPattern { rule, message } => {
                write!(f, "patch '{rule}' has an invalid pattern: {message}")
            }
            ValidationIssue::InvalidCombo { rule, message } => match rule {
                Some(id) => write!(f, "rule '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid synth configuration: {message}"),
            },
        }
    }
}
