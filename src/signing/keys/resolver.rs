//! Key file path resolution.
//!
//! A key file named by an attribute is looked up relative to the directory of the source file
//! that declared it, then in each configured search path in order. Absolute paths are used
//! as-is.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result};

/// Reason reported when a key file cannot be located.
pub const FILE_NOT_FOUND: &str = "File not found.";

/// Locates and reads key files.
#[derive(Debug, Clone, Default)]
pub struct KeyFileResolver {
    search_paths: Vec<PathBuf>,
}

impl KeyFileResolver {
    /// A resolver without search paths.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a directory to the search path list.
    #[must_use]
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Configured search paths, in lookup order.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find the file `path` refers to.
    ///
    /// Returns `None` if no candidate exists.
    #[must_use]
    pub fn resolve(&self, path: &str, base_directory: Option<&Path>) -> Option<PathBuf> {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return candidate.is_file().then(|| candidate.to_path_buf());
        }

        base_directory
            .into_iter()
            .chain(self.search_paths.iter().map(PathBuf::as_path))
            .map(|directory| directory.join(candidate))
            .find(|full| full.is_file())
    }

    /// Resolve and read a key file.
    ///
    /// # Errors
    /// Returns [`crate::Error::KeyFile`] naming `path` as configured if the file cannot be
    /// located or read.
    pub fn read(&self, path: &str, base_directory: Option<&Path>) -> Result<Vec<u8>> {
        let Some(full_path) = self.resolve(path, base_directory) else {
            return Err(Error::KeyFile {
                path: path.to_string(),
                reason: FILE_NOT_FOUND.to_string(),
            });
        };

        debug!(path = %path, resolved = %full_path.display(), "reading key file");

        std::fs::read(&full_path).map_err(|e| Error::KeyFile {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file() {
        let resolver = KeyFileResolver::new();
        let result = resolver.read("does-not-exist.snk", None);

        match result {
            Err(Error::KeyFile { path, reason }) => {
                assert_eq!(path, "does-not-exist.snk");
                assert_eq!(reason, FILE_NOT_FOUND);
            }
            _ => panic!("Expected KeyFile error"),
        }
    }

    #[test]
    fn search_path_lookup() {
        let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        let resolver = KeyFileResolver::new()
            .with_search_path("/nonexistent")
            .with_search_path(&fixtures);

        assert_eq!(
            resolver.resolve("keypair_a.snk", None),
            Some(fixtures.join("keypair_a.snk"))
        );
        assert_eq!(resolver.search_paths().len(), 2);
    }

    #[test]
    fn base_directory_first() {
        let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        let resolver = KeyFileResolver::new();

        assert!(resolver.resolve("keypair_a.snk", None).is_none());
        assert_eq!(
            resolver.resolve("keypair_a.snk", Some(&fixtures)),
            Some(fixtures.join("keypair_a.snk"))
        );
    }

    #[test]
    fn absolute_path() {
        let absolute = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/keypair_b.snk");
        let resolver = KeyFileResolver::new();
        let content = resolver.read(absolute.to_str().unwrap(), None).unwrap();
        assert_eq!(content.len(), 596);
    }
}
