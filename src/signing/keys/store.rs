//! Key container capability.
//!
//! Named key containers live in a platform key store. The store is an injected capability:
//! a compilation either carries an implementation of [`KeyContainerStore`] or none at all, in
//! which case every container lookup fails with [`CONTAINERS_NOT_SUPPORTED`].
//!
//! # Key Components
//!
//! - [`KeyContainerStore`] - The capability trait
//! - [`InMemoryKeyStore`] - Containers held in a concurrent map, for hosts and tests
//! - [`DirectoryKeyStore`] - Container `name` backed by `<root>/<name>.snk`

use std::path::PathBuf;

use dashmap::DashMap;

use crate::{Error, Result};

/// Reason reported when a container does not exist.
pub const KEYSET_DOES_NOT_EXIST: &str = "Keyset does not exist";

/// Reason reported when no key store capability is available.
pub const CONTAINERS_NOT_SUPPORTED: &str = "key containers are not supported on this platform";

/// A store of named key containers.
pub trait KeyContainerStore: Send + Sync {
    /// Return the key blob stored in `container`.
    ///
    /// # Errors
    /// Returns [`crate::Error::KeyContainer`] with the store's reason text if the container
    /// cannot be opened.
    fn open(&self, container: &str) -> Result<Vec<u8>>;
}

fn keyset_does_not_exist(container: &str) -> Error {
    Error::KeyContainer {
        name: container.to_string(),
        reason: KEYSET_DOES_NOT_EXIST.to_string(),
    }
}

/// Key containers held in memory.
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    containers: DashMap<String, Vec<u8>>,
}

impl InMemoryKeyStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a container.
    pub fn insert(&self, container: impl Into<String>, key_blob: Vec<u8>) {
        self.containers.insert(container.into(), key_blob);
    }

    /// Delete a container, returning its key blob.
    pub fn remove(&self, container: &str) -> Option<Vec<u8>> {
        self.containers.remove(container).map(|(_, blob)| blob)
    }

    /// Number of containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Returns true if the store holds no containers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

impl KeyContainerStore for InMemoryKeyStore {
    fn open(&self, container: &str) -> Result<Vec<u8>> {
        self.containers
            .get(container)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| keyset_does_not_exist(container))
    }
}

/// Key containers stored as `<root>/<name>.snk`.
#[derive(Debug, Clone)]
pub struct DirectoryKeyStore {
    root: PathBuf,
}

impl DirectoryKeyStore {
    /// A store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryKeyStore { root: root.into() }
    }

    /// Path of the file backing `container`, or `None` if the name is not a plain file name.
    #[must_use]
    pub fn container_path(&self, container: &str) -> Option<PathBuf> {
        if container.is_empty()
            || container.contains(['/', '\\'])
            || container == "."
            || container == ".."
        {
            return None;
        }
        Some(self.root.join(format!("{container}.snk")))
    }
}

impl KeyContainerStore for DirectoryKeyStore {
    fn open(&self, container: &str) -> Result<Vec<u8>> {
        let Some(path) = self.container_path(container) else {
            return Err(keyset_does_not_exist(container));
        };

        match std::fs::read(&path) {
            Ok(blob) => Ok(blob),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(keyset_does_not_exist(container))
            }
            Err(e) => Err(Error::KeyContainer {
                name: container.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::keys::KEYPAIR_A_SNK;

    #[test]
    fn in_memory_store() {
        let store = InMemoryKeyStore::new();
        assert!(store.is_empty());

        store.insert("roslynTestContainer", KEYPAIR_A_SNK.to_vec());
        assert_eq!(store.len(), 1);
        assert_eq!(store.open("roslynTestContainer").unwrap(), KEYPAIR_A_SNK);

        match store.open("bogus") {
            Err(Error::KeyContainer { name, reason }) => {
                assert_eq!(name, "bogus");
                assert_eq!(reason, KEYSET_DOES_NOT_EXIST);
            }
            _ => panic!("Expected KeyContainer error"),
        }

        assert!(store.remove("roslynTestContainer").is_some());
        assert!(store.open("roslynTestContainer").is_err());
    }

    #[test]
    fn directory_store() {
        let fixtures = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        let store = DirectoryKeyStore::new(&fixtures);

        assert_eq!(store.open("keypair_a").unwrap(), KEYPAIR_A_SNK);
        assert!(store.open("missing").is_err());
        assert!(store.open("../fixtures/keypair_a").is_err());
        assert!(store.container_path("..").is_none());
    }
}
