//! Path globs for copy sources and patch targets.
//!
//! Supported syntax: `*` (any run inside one path segment), `?` (one
//! character), `**` (any number of segments), `[abc]` / `[!abc]` classes and
//! `{a,b}` alternation. Patterns are always relative with `/` separators.
//! A pattern without metacharacters is a literal path and resolves without
//! walking the tree.

use regex::Regex;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum GlobError {
    #[error("invalid glob '{pattern}': {message}")]
    Invalid { pattern: String, message: String },

    #[error("failed to walk {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// A compiled path glob.
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
    literal: bool,
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self, GlobError> {
        let trimmed = pattern.trim().trim_start_matches("./");
        if trimmed.is_empty() {
            return Err(GlobError::Invalid {
                pattern: pattern.to_string(),
                message: "pattern is empty".to_string(),
            });
        }

        let source = translate(trimmed).map_err(|message| GlobError::Invalid {
            pattern: pattern.to_string(),
            message,
        })?;
        let regex = Regex::new(&source).map_err(|e| GlobError::Invalid {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            pattern: trimmed.to_string(),
            regex,
            literal: !trimmed.contains(['*', '?', '[', '{']),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn is_literal(&self) -> bool {
        self.literal
    }

    /// Match a relative path (`/`-separated).
    pub fn matches(&self, relative: &str) -> bool {
        self.regex.is_match(relative)
    }

    /// Match a relative [`Path`], normalising separators.
    pub fn matches_path(&self, relative: &Path) -> bool {
        self.matches(&to_slash(relative))
    }

    /// All regular files under `root` matched by this glob, sorted.
    pub fn expand_files(&self, root: &Path) -> Result<Vec<PathBuf>, GlobError> {
        // Symlinked files are skipped whether they are named literally or
        // reached by walking, matching the walker's `file_type()`.
        if self.literal {
            let path = root.join(&self.pattern);
            let is_file = fs::symlink_metadata(&path).is_ok_and(|meta| meta.is_file());
            return Ok(if is_file { vec![path] } else { Vec::new() });
        }

        let mut files = Vec::new();
        for entry in walk(root) {
            let entry = entry.map_err(|source| GlobError::Walk {
                root: root.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(root) {
                if self.matches_path(relative) {
                    files.push(entry.path().to_path_buf());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Top-most files or directories under `root` matched by this glob, as
    /// paths relative to `root`. Entries nested in an already matched
    /// directory are not repeated.
    pub fn expand_entries(&self, root: &Path) -> Result<Vec<PathBuf>, GlobError> {
        if self.literal {
            let path = root.join(&self.pattern);
            return Ok(if path.exists() {
                vec![PathBuf::from(&self.pattern)]
            } else {
                Vec::new()
            });
        }

        let mut matched: Vec<PathBuf> = Vec::new();
        for entry in walk(root) {
            let entry = entry.map_err(|source| GlobError::Walk {
                root: root.to_path_buf(),
                source,
            })?;
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }
            if matched.iter().any(|parent| relative.starts_with(parent)) {
                continue;
            }
            if self.matches_path(relative) {
                matched.push(relative.to_path_buf());
            }
        }
        Ok(matched)
    }
}

impl fmt::Display for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Expand several globs into one sorted, de-duplicated file list.
pub fn expand_all(root: &Path, globs: &[Glob]) -> Result<Vec<PathBuf>, GlobError> {
    let mut files = Vec::new();
    for glob in globs {
        files.extend(glob.expand_files(root)?);
    }
    files.sort();
    files.dedup();
    Ok(files)
}

pub(crate) fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn walk(root: &Path) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != ".git")
}

fn translate(pattern: &str) -> Result<String, String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut in_braces = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_segment_start = i == 0 || chars[i - 1] == '/';
                if at_segment_start && chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:[^/]+/)*");
                    i += 3;
                    continue;
                }
                if at_segment_start && i + 2 == chars.len() {
                    out.push_str(".*");
                    i += 2;
                    continue;
                }
                return Err("'**' must be a whole path segment".to_string());
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .map(|offset| i + 1 + offset)
                    .ok_or_else(|| "unclosed character class".to_string())?;
                let mut class: String = chars[i + 1..close].iter().collect();
                if class.is_empty() {
                    return Err("empty character class".to_string());
                }
                // A class matches one character inside a segment, never `/`
                if let Some(rest) = class.strip_prefix('!') {
                    class = format!("^/{rest}");
                }
                out.push('[');
                out.push_str(&class.replace('\\', "\\\\"));
                out.push(']');
                i = close + 1;
                continue;
            }
            '{' => {
                if in_braces {
                    return Err("nested '{' is not supported".to_string());
                }
                in_braces = true;
                out.push_str("(?:");
            }
            '}' if in_braces => {
                in_braces = false;
                out.push(')');
            }
            ',' if in_braces => out.push('|'),
            '\\' => out.push_str("\\\\"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    if in_braces {
        return Err("unclosed '{'".to_string());
    }
    out.push('$');
    Ok(out)
}
