//! Key sources and key material.
//!
//! A [`KeySource`] names where signing keys come from; loading it through a
//! [`crate::signing::provider::StrongNameProvider`] yields [`KeyMaterial`]: the public key blob
//! that becomes part of the assembly identity plus, when available, an opaque handle to the
//! private key.
//!
//! # Key Components
//!
//! - [`snk`] - CryptoAPI key blob codec
//! - [`resolver`] - Key file path resolution
//! - [`store`] - Key container capability and its implementations

pub mod resolver;
pub mod snk;
pub mod store;

use std::{fmt, path::PathBuf, sync::Arc};

use crate::{
    metadata::diagnostics::Location,
    signing::keys::snk::{is_valid_public_key, KeyBlob},
    Result,
};

/// Where signing keys come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeySource {
    /// No key configured
    #[default]
    None,
    /// A `.snk` file, as configured (possibly relative)
    KeyFilePath(String),
    /// A named container in the platform key store
    KeyContainerName(String),
    /// A public key given directly
    InlinePublicKey(Vec<u8>),
}

impl KeySource {
    /// Returns true for [`KeySource::None`].
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, KeySource::None)
    }
}

/// A [`KeySource`] together with where it was configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKeySource {
    /// The key source
    pub source: KeySource,
    /// The option or attribute that configured it
    pub location: Location,
    /// Directory of the declaring source file, for relative key file paths
    pub base_directory: Option<PathBuf>,
}

/// Opaque handle to a private key.
#[derive(Clone)]
pub struct PrivateKeyHandle(Arc<KeyBlob>);

impl PrivateKeyHandle {
    pub(crate) fn new(blob: KeyBlob) -> Self {
        PrivateKeyHandle(Arc::new(blob))
    }

    pub(crate) fn blob(&self) -> &KeyBlob {
        &self.0
    }

    /// Key size in bits.
    #[must_use]
    pub fn bit_len(&self) -> u32 {
        self.0.bit_len()
    }
}

impl fmt::Debug for PrivateKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKeyHandle({} bit)", self.0.bit_len())
    }
}

/// Key bytes loaded from a [`KeySource`].
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    public_key: Vec<u8>,
    private_key: Option<PrivateKeyHandle>,
}

impl KeyMaterial {
    /// Material consisting of a public key only.
    #[must_use]
    pub fn public_only(public_key: Vec<u8>) -> Self {
        KeyMaterial {
            public_key,
            private_key: None,
        }
    }

    /// Decode the content of a key file or key container.
    ///
    /// Content that is already a valid strong-name public key is used verbatim. Anything else
    /// must decode as a key blob; its public half is re-encoded and a private half, if present,
    /// is retained behind a [`PrivateKeyHandle`].
    ///
    /// # Errors
    /// Returns an error if the content is neither a public key nor a key blob.
    pub fn from_key_bytes(content: &[u8]) -> Result<Self> {
        if is_valid_public_key(content) {
            return Ok(Self::public_only(content.to_vec()));
        }

        let blob = KeyBlob::parse(content)?;
        let public_key = blob.public_key_blob();
        let private_key = blob.has_private_key().then(|| PrivateKeyHandle::new(blob));

        Ok(KeyMaterial {
            public_key,
            private_key,
        })
    }

    /// The strong-name public key blob.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// The private key, if one was loaded.
    #[must_use]
    pub fn private_key(&self) -> Option<&PrivateKeyHandle> {
        self.private_key.as_ref()
    }

    /// Returns true if a private key was loaded.
    #[must_use]
    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// The same material with the private key dropped.
    #[must_use]
    pub fn without_private_key(&self) -> Self {
        Self::public_only(self.public_key.clone())
    }

    /// Size in bytes of a signature made with this material's key.
    ///
    /// Falls back to the modulus of the public key when no private key is present, and to
    /// zero when the public key cannot be decoded (e.g. the ECMA key).
    #[must_use]
    pub fn modulus_len(&self) -> usize {
        match &self.private_key {
            Some(handle) => handle.blob().modulus_len(),
            None => KeyBlob::parse(&self.public_key)
                .map(|blob| blob.modulus_len())
                .unwrap_or(0),
        }
    }
}
