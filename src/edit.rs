use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// The fundamental edit primitive: byte-span replacement with verification.
///
/// Every patch replacement compiles down to one of these. A regex match
/// supplies the span and the matched text becomes the expected before-text,
/// so a file that changed between planning and writing is never clobbered.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Edit does nothing until apply_batch() is called"]
pub struct Edit {
    /// Path to the file to edit
    pub file: PathBuf,
    /// Starting byte offset (inclusive)
    pub byte_start: usize,
    /// Ending byte offset (exclusive)
    pub byte_end: usize,
    /// New text to insert at [byte_start, byte_end)
    pub new_text: String,
    /// Verification of what we expect to find before applying
    pub expected_before: EditVerification,
}

/// Verification strategy for edit safety.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditVerification {
    /// Exact text match required
    ExactMatch(String),
    /// xxh3 hash of expected text (cheaper to carry for large spans)
    Hash(u64),
}

impl EditVerification {
    /// Check if the provided text matches the verification criteria.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            EditVerification::ExactMatch(expected) => text == expected,
            EditVerification::Hash(expected_hash) => xxh3_64(text.as_bytes()) == *expected_hash,
        }
    }

    /// Create verification from text, using hash for text over 1KB.
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            EditVerification::Hash(xxh3_64(text.as_bytes()))
        } else {
            EditVerification::ExactMatch(text.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("Before-text verification failed at {file}:{byte_start}")]
    BeforeTextMismatch {
        file: PathBuf,
        byte_start: usize,
        byte_end: usize,
        expected: String,
        found: String,
    },

    #[error("Invalid byte range: [{byte_start}, {byte_end}) in file of length {file_len}")]
    InvalidByteRange {
        byte_start: usize,
        byte_end: usize,
        file_len: usize,
    },

    #[error("Edits for one batch target different files: {first} and {other}")]
    MixedFiles { first: PathBuf, other: PathBuf },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("UTF-8 validation error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Invalid edit would create malformed UTF-8")]
    InvalidUtf8Edit,
}

/// Result of applying an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "EditResult should be checked for success/already-applied"]
pub enum EditResult {
    /// Edit was successfully applied
    Applied { file: PathBuf, bytes_changed: usize },
    /// Edit was already applied (current text matches new_text)
    AlreadyApplied { file: PathBuf },
}

impl EditResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, EditResult::Applied { .. })
    }
}

impl Edit {
    /// Create a new edit with automatic verification generation.
    pub fn new(
        file: impl Into<PathBuf>,
        byte_start: usize,
        byte_end: usize,
        new_text: impl Into<String>,
        expected_before: impl Into<String>,
    ) -> Self {
        let expected = expected_before.into();
        Self {
            file: file.into(),
            byte_start,
            byte_end,
            new_text: new_text.into(),
            expected_before: EditVerification::from_text(&expected),
        }
    }

    /// Validate the edit against the given contents.
    ///
    /// Returns the current text at [byte_start, byte_end) if validation succeeds.
    fn validate<'a>(&self, content: &'a [u8]) -> Result<&'a str, EditError> {
        if self.byte_start > self.byte_end || self.byte_end > content.len() {
            return Err(EditError::InvalidByteRange {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                file_len: content.len(),
            });
        }

        let current_text = std::str::from_utf8(&content[self.byte_start..self.byte_end])?;

        // Already applied
        if current_text == self.new_text {
            return Ok(current_text);
        }

        if !self.expected_before.matches(current_text) {
            return Err(EditError::BeforeTextMismatch {
                file: self.file.clone(),
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                expected: format!("{:?}", self.expected_before),
                found: current_text.to_string(),
            });
        }

        Ok(current_text)
    }

    /// Apply multiple edits to one file in a single atomic write.
    ///
    /// Results come back in the order the edits were given. The file is not
    /// rewritten when every edit is already applied.
    pub fn apply_batch(edits: Vec<Edit>) -> Result<Vec<EditResult>, EditError> {
        let Some(first) = edits.first() else {
            return Ok(Vec::new());
        };
        let file = first.file.clone();
        if let Some(other) = edits.iter().find(|edit| edit.file != file) {
            return Err(EditError::MixedFiles {
                first: file,
                other: other.file.clone(),
            });
        }

        let original = fs::read(&file)?;
        let (new_content, results) = splice_bytes(&original, &edits)?;

        if results.iter().any(EditResult::is_applied) {
            atomic_write(&file, &new_content)?;
            // Refresh mtime so downstream build tools notice the rewrite
            filetime::set_file_mtime(&file, filetime::FileTime::now())?;
        }

        Ok(results)
    }
}

/// Apply edits to an in-memory copy of a file and return the new text.
///
/// Used for dry runs and idempotence checks; the file on disk is untouched.
pub fn splice(content: &str, edits: &[Edit]) -> Result<(String, Vec<EditResult>), EditError> {
    let (bytes, results) = splice_bytes(content.as_bytes(), edits)?;
    let text = String::from_utf8(bytes).map_err(|_| EditError::InvalidUtf8Edit)?;
    Ok((text, results))
}

fn splice_bytes(
    original: &[u8],
    edits: &[Edit],
) -> Result<(Vec<u8>, Vec<EditResult>), EditError> {
    for edit in edits {
        edit.validate(original)?;
    }

    // Indices sorted by byte_start descending so splicing never shifts
    // a span that has not been applied yet.
    let mut order: Vec<usize> = (0..edits.len()).collect();
    order.sort_by(|&a, &b| edits[b].byte_start.cmp(&edits[a].byte_start));

    for pair in order.windows(2) {
        let (later, earlier) = (&edits[pair[0]], &edits[pair[1]]);
        if earlier.byte_end > later.byte_start {
            return Err(EditError::InvalidByteRange {
                byte_start: later.byte_start,
                byte_end: earlier.byte_end,
                file_len: original.len(),
            });
        }
    }

    let mut new_content = original.to_vec();
    let mut results: Vec<Option<EditResult>> = vec![None; edits.len()];

    for idx in order {
        let edit = &edits[idx];
        let current = std::str::from_utf8(&new_content[edit.byte_start..edit.byte_end])?;

        if current == edit.new_text {
            results[idx] = Some(EditResult::AlreadyApplied {
                file: edit.file.clone(),
            });
            continue;
        }

        new_content.splice(
            edit.byte_start..edit.byte_end,
            edit.new_text.as_bytes().iter().copied(),
        );
        results[idx] = Some(EditResult::Applied {
            file: edit.file.clone(),
            bytes_changed: edit.new_text.len(),
        });
    }

    std::str::from_utf8(&new_content).map_err(|_| EditError::InvalidUtf8Edit)?;

    Ok((new_content, results.into_iter().flatten().collect()))
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or the file is left as it was.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), EditError> {
    // Tempfile in the same directory keeps the rename on one filesystem
    let parent = path.parent().ok_or_else(|| {
        EditError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Path has no parent directory",
        ))
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
