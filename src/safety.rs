use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Keeps copy destinations and patch targets inside the destination tree.
///
/// Rule paths come from configuration, so a stray `..` or a symlink in the
/// destination must not let a copy or a patch write outside of it.
#[derive(Debug, Clone)]
pub struct DestinationGuard {
    /// Canonical destination root
    root: PathBuf,
    /// Canonical paths that may never be written
    forbidden_paths: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Path is outside destination: {path} (destination: {root})")]
    OutsideDestination { path: PathBuf, root: PathBuf },

    #[error("Path is in forbidden directory: {path} (forbidden: {forbidden})")]
    ForbiddenPath { path: PathBuf, forbidden: PathBuf },

    #[error("Rule path must be relative: {0}")]
    AbsoluteRulePath(PathBuf),

    #[error("Failed to canonicalize path: {0}")]
    Canonicalize(#[from] std::io::Error),
}

impl DestinationGuard {
    /// Create a guard for the given destination root.
    ///
    /// The root is canonicalized so symlinked checkouts compare correctly.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let root = root.as_ref().canonicalize()?;

        let mut forbidden_paths = Vec::new();
        if let Ok(git_dir) = root.join(".git").canonicalize() {
            forbidden_paths.push(git_dir);
        }

        Ok(Self {
            root,
            forbidden_paths,
        })
    }

    /// Resolve a rule-relative path to an absolute path inside the root.
    ///
    /// The path does not have to exist yet: the deepest existing ancestor is
    /// canonicalized and the remaining components are appended lexically.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            return Err(SafetyError::AbsoluteRulePath(relative.to_path_buf()));
        }

        let mut lexical = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => lexical.push(part),
                Component::ParentDir => {
                    lexical.pop();
                }
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SafetyError::AbsoluteRulePath(relative.to_path_buf()));
                }
            }
        }

        let resolved = canonicalize_existing_prefix(&lexical)?;
        self.check_canonical(&resolved)?;
        Ok(resolved)
    }

    /// Re-check an already resolved path right before writing to it.
    pub fn revalidate(&self, path: &Path) -> Result<PathBuf, SafetyError> {
        let canonical = canonicalize_existing_prefix(path)?;
        self.check_canonical(&canonical)?;
        Ok(canonical)
    }

    fn check_canonical(&self, canonical: &Path) -> Result<(), SafetyError> {
        if !canonical.starts_with(&self.root) {
            return Err(SafetyError::OutsideDestination {
                path: canonical.to_path_buf(),
                root: self.root.clone(),
            });
        }

        for forbidden in &self.forbidden_paths {
            if canonical.starts_with(forbidden) {
                return Err(SafetyError::ForbiddenPath {
                    path: canonical.to_path_buf(),
                    forbidden: forbidden.clone(),
                });
            }
        }

        Ok(())
    }

    /// Get the canonical destination root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a guard with custom forbidden paths (for testing).
    #[cfg(test)]
    pub fn with_forbidden(
        root: impl AsRef<Path>,
        forbidden: Vec<PathBuf>,
    ) -> Result<Self, SafetyError> {
        Ok(Self {
            root: root.as_ref().canonicalize()?,
            forbidden_paths: forbidden,
        })
    }
}

/// Canonicalize the longest existing ancestor of `path` and re-append the rest.
fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf, SafetyError> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();

    while !existing.exists() {
        match existing.file_name() {
            Some(name) => missing.push(name.to_os_string()),
            None => break,
        }
        if !existing.pop() {
            break;
        }
    }

    let mut canonical = existing.canonicalize()?;
    for part in missing.into_iter().rev() {
        canonical.push(part);
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_existing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(root.join("lib/client.rb"), b"").unwrap();

        let guard = DestinationGuard::new(root).unwrap();
        let resolved = guard.resolve("lib/client.rb").unwrap();
        assert!(resolved.ends_with("lib/client.rb"));
        assert!(resolved.starts_with(guard.root()));
    }

    #[test]
    fn test_resolve_missing_file_inside_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = DestinationGuard::new(temp_dir.path()).unwrap();

        let resolved = guard.resolve("test/new/dir/file_test.rb").unwrap();
        assert!(resolved.starts_with(guard.root()));
        assert!(resolved.ends_with("test/new/dir/file_test.rb"));
    }

    #[test]
    fn test_resolve_parent_escape() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("dest");
        fs::create_dir_all(&root).unwrap();
        let guard = DestinationGuard::new(&root).unwrap();

        let result = guard.resolve("../outside.rb");
        assert!(matches!(
            result,
            Err(SafetyError::OutsideDestination { .. })
        ));
    }

    #[test]
    fn test_resolve_absolute_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = DestinationGuard::new(temp_dir.path()).unwrap();
        assert!(matches!(
            guard.resolve("/etc/passwd"),
            Err(SafetyError::AbsoluteRulePath(_))
        ));
    }

    #[test]
    fn test_resolve_forbidden() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let git = root.join(".git");
        fs::create_dir_all(&git).unwrap();

        let guard = DestinationGuard::new(root).unwrap();
        assert!(matches!(
            guard.resolve(".git/config"),
            Err(SafetyError::ForbiddenPath { .. })
        ));

        let custom = root.join("vendor");
        fs::create_dir_all(&custom).unwrap();
        let guard = DestinationGuard::with_forbidden(root, vec![custom.canonicalize().unwrap()])
            .unwrap();
        assert!(matches!(
            guard.resolve("vendor/gem.rb"),
            Err(SafetyError::ForbiddenPath { .. })
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_symlink_escape() {
        use std::os::unix::fs::symlink;

        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("dest");
        fs::create_dir_all(&root).unwrap();

        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        symlink(&outside, root.join("lib")).unwrap();

        let guard = DestinationGuard::new(&root).unwrap();
        assert!(matches!(
            guard.resolve("lib/client.rb"),
            Err(SafetyError::OutsideDestination { .. })
        ));
    }
}
