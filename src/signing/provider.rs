//! Signing backends and the per-compilation strong-name provider.
//!
//! Strong-name signatures are RSA PKCS#1 v1.5 signatures over a SHA-1 digest. Two
//! interchangeable backends implement [`SignatureBackend`]:
//!
//! - [`PortableSigner`] - Delegates to the RustCrypto `rsa` crate
//! - [`RawRsaSigner`] - Encodes EMSA-PKCS1-v1_5 explicitly and performs the modular
//!   exponentiation itself
//!
//! PKCS#1 v1.5 signing is deterministic, so both backends produce byte-identical signatures for
//! the same key and digest.
//!
//! A [`StrongNameProvider`] bundles everything a compilation needs to turn a key source into key
//! material and a digest into a signature: the key file resolver, the optional key container
//! capability and the backend. It is passed explicitly to each compilation; there is no
//! process-wide provider.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dotsign::signing::{
//!     keys::store::InMemoryKeyStore,
//!     provider::{RawRsaSigner, StrongNameProvider},
//! };
//!
//! let store = InMemoryKeyStore::new();
//! store.insert("build", std::fs::read("key.snk")?);
//!
//! let provider = StrongNameProvider::new()
//!     .with_search_path("/src/keys")
//!     .with_key_store(Arc::new(store))
//!     .with_backend(Arc::new(RawRsaSigner));
//!
//! let material = provider.load_key_container("build")?;
//! assert!(material.has_private_key());
//! # Ok::<(), dotsign::Error>(())
//! ```

use std::{fmt, path::Path, sync::Arc};

use rsa::{
    traits::{PrivateKeyParts, PublicKeyParts},
    BigUint, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
};
use num_traits::ToPrimitive;
use sha1::Sha1;
use tracing::{debug, warn};

use crate::{
    signing::keys::{
        resolver::KeyFileResolver,
        snk::{KeyBlob, PrivateParts},
        store::{KeyContainerStore, CONTAINERS_NOT_SUPPORTED},
        KeyMaterial, PrivateKeyHandle,
    },
    Error, Result,
};

/// Size of a SHA-1 digest.
pub const SHA1_DIGEST_SIZE: usize = 20;

/// DER-encoded `DigestInfo` prefix for SHA-1 (RFC 8017, section 9.2).
const SHA1_DIGEST_INFO_PREFIX: [u8; 15] = [
    0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2B, 0x0E, 0x03, 0x02, 0x1A, 0x05, 0x00, 0x04, 0x14,
];

/// An RSA PKCS#1 v1.5 SHA-1 signature implementation.
///
/// Signatures are big-endian, as defined by PKCS#1. The signing pipeline reverses them when
/// writing them into an image.
pub trait SignatureBackend: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Sign a SHA-1 digest with the private half of `key`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Crypto`] if the key has no private half or signing fails.
    fn sign_sha1(&self, key: &KeyBlob, digest: &[u8]) -> Result<Vec<u8>>;

    /// Check a signature over a SHA-1 digest against the public half of `key`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Crypto`] if the key cannot be used.
    fn verify_sha1(&self, key: &KeyBlob, digest: &[u8], signature: &[u8]) -> Result<bool>;
}

fn crypto_error(e: impl fmt::Display) -> Error {
    Error::Crypto(e.to_string())
}

fn public_components(key: &KeyBlob) -> (BigUint, BigUint) {
    (
        BigUint::from_bytes_le(key.modulus()),
        BigUint::from(key.exponent()),
    )
}

fn private_parts(key: &KeyBlob) -> Result<&PrivateParts> {
    key.private_parts()
        .ok_or_else(|| Error::Crypto("key has no private half".to_string()))
}

fn check_digest(digest: &[u8]) -> Result<()> {
    if digest.len() != SHA1_DIGEST_SIZE {
        return Err(Error::Crypto(format!(
            "expected a {SHA1_DIGEST_SIZE} byte SHA-1 digest, got {} bytes",
            digest.len()
        )));
    }
    Ok(())
}

/// Signing through the RustCrypto `rsa` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortableSigner;

impl PortableSigner {
    fn private_key(key: &KeyBlob) -> Result<RsaPrivateKey> {
        let parts = private_parts(key)?;
        let (n, e) = public_components(key);
        RsaPrivateKey::from_components(
            n,
            e,
            BigUint::from_bytes_le(&parts.private_exponent),
            vec![
                BigUint::from_bytes_le(&parts.prime1),
                BigUint::from_bytes_le(&parts.prime2),
            ],
        )
        .map_err(crypto_error)
    }
}

impl SignatureBackend for PortableSigner {
    fn name(&self) -> &'static str {
        "portable"
    }

    fn sign_sha1(&self, key: &KeyBlob, digest: &[u8]) -> Result<Vec<u8>> {
        check_digest(digest)?;
        Self::private_key(key)?
            .sign(Pkcs1v15Sign::new::<Sha1>(), digest)
            .map_err(crypto_error)
    }

    fn verify_sha1(&self, key: &KeyBlob, digest: &[u8], signature: &[u8]) -> Result<bool> {
        check_digest(digest)?;
        let (n, e) = public_components(key);
        let public_key = RsaPublicKey::new(n, e).map_err(crypto_error)?;
        Ok(public_key
            .verify(Pkcs1v15Sign::new::<Sha1>(), digest, signature)
            .is_ok())
    }
}

/// Signing by explicit EMSA-PKCS1-v1_5 encoding and modular exponentiation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawRsaSigner;

impl RawRsaSigner {
    /// `0x00 || 0x01 || 0xFF.. || 0x00 || DigestInfo || digest`, `k` bytes long.
    fn encode(digest: &[u8], k: usize) -> Result<Vec<u8>> {
        let t_len = SHA1_DIGEST_INFO_PREFIX.len() + digest.len();
        if k < t_len + 11 {
            return Err(Error::Crypto(format!(
                "modulus of {k} bytes is too short for a SHA-1 signature"
            )));
        }

        let mut em = vec![0xFF; k];
        em[0] = 0x00;
        em[1] = 0x01;
        em[k - t_len - 1] = 0x00;
        em[k - t_len..k - digest.len()].copy_from_slice(&SHA1_DIGEST_INFO_PREFIX);
        em[k - digest.len()..].copy_from_slice(digest);
        Ok(em)
    }

    fn left_pad(bytes: Vec<u8>, k: usize) -> Result<Vec<u8>> {
        if bytes.len() > k {
            return Err(Error::Crypto("signature representative too large".to_string()));
        }
        let mut out = vec![0u8; k - bytes.len()];
        out.extend_from_slice(&bytes);
        Ok(out)
    }
}

impl SignatureBackend for RawRsaSigner {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn sign_sha1(&self, key: &KeyBlob, digest: &[u8]) -> Result<Vec<u8>> {
        check_digest(digest)?;
        let parts = private_parts(key)?;
        let k = key.modulus_len();

        let (n, _) = public_components(key);
        let d = BigUint::from_bytes_le(&parts.private_exponent);
        let m = BigUint::from_bytes_be(&Self::encode(digest, k)?);
        if m >= n {
            return Err(Error::Crypto("message representative out of range".to_string()));
        }

        Self::left_pad(m.modpow(&d, &n).to_bytes_be(), k)
    }

    fn verify_sha1(&self, key: &KeyBlob, digest: &[u8], signature: &[u8]) -> Result<bool> {
        check_digest(digest)?;
        let k = key.modulus_len();
        if signature.len() != k {
            return Ok(false);
        }

        let (n, e) = public_components(key);
        let s = BigUint::from_bytes_be(signature);
        if s >= n {
            return Ok(false);
        }

        let recovered = Self::left_pad(s.modpow(&e, &n).to_bytes_be(), k)?;
        Ok(recovered == Self::encode(digest, k)?)
    }
}

/// Convert an `rsa` private key into a key blob.
///
/// # Errors
/// Returns an error if the key does not have exactly two primes or its size is not a multiple
/// of 16 bits.
pub fn key_blob_from_rsa(key: &RsaPrivateKey) -> Result<KeyBlob> {
    let primes = key.primes();
    let [p, q] = primes else {
        return Err(Error::Crypto(format!(
            "expected a two-prime key, got {} primes",
            primes.len()
        )));
    };

    let modulus_len = key.size();
    let half_len = modulus_len / 2;
    let Some(exponent) = key.e().to_u32() else {
        return Err(Error::Crypto("public exponent does not fit in 32 bits".to_string()));
    };

    let one = BigUint::from(1u32);
    let le = |value: &BigUint, len: usize| {
        let mut bytes = value.to_bytes_le();
        bytes.resize(len, 0);
        bytes
    };

    let d = key.d();
    let p_minus_one = p - &one;
    let q_minus_one = q - &one;
    // q^-1 mod p by Fermat, p is prime
    let coefficient = q.modpow(&(p - &one - &one), p);

    let private = PrivateParts {
        prime1: le(p, half_len),
        prime2: le(q, half_len),
        exponent1: le(&(d % &p_minus_one), half_len),
        exponent2: le(&(d % &q_minus_one), half_len),
        coefficient: le(&coefficient, half_len),
        private_exponent: le(d, modulus_len),
    };

    KeyBlob::from_parts(
        (modulus_len * 8) as u32,
        exponent,
        le(key.n(), modulus_len),
        Some(private),
    )
}

/// Key loading and signing capabilities for one compilation.
#[derive(Clone)]
pub struct StrongNameProvider {
    resolver: KeyFileResolver,
    key_store: Option<Arc<dyn KeyContainerStore>>,
    backend: Arc<dyn SignatureBackend>,
}

impl Default for StrongNameProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StrongNameProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrongNameProvider")
            .field("search_paths", &self.resolver.search_paths())
            .field("key_store", &self.key_store.is_some())
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl StrongNameProvider {
    /// A provider with no search paths, no key store and the [`PortableSigner`] backend.
    #[must_use]
    pub fn new() -> Self {
        StrongNameProvider {
            resolver: KeyFileResolver::new(),
            key_store: None,
            backend: Arc::new(PortableSigner),
        }
    }

    /// Add a key file search path.
    #[must_use]
    pub fn with_search_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.resolver = self.resolver.with_search_path(path);
        self
    }

    /// Replace the key file resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: KeyFileResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Install a key container capability.
    #[must_use]
    pub fn with_key_store(mut self, store: Arc<dyn KeyContainerStore>) -> Self {
        self.key_store = Some(store);
        self
    }

    /// Select the signing backend.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn SignatureBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// The key file resolver.
    #[must_use]
    pub fn resolver(&self) -> &KeyFileResolver {
        &self.resolver
    }

    /// The signing backend.
    #[must_use]
    pub fn backend(&self) -> &dyn SignatureBackend {
        self.backend.as_ref()
    }

    /// Load key material from a key file.
    ///
    /// # Errors
    /// Returns [`crate::Error::KeyFile`] if the file cannot be found, read or decoded.
    pub fn load_key_file(&self, path: &str, base_directory: Option<&Path>) -> Result<KeyMaterial> {
        let content = self.resolver.read(path, base_directory)?;
        KeyMaterial::from_key_bytes(&content).map_err(|e| Error::KeyFile {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Load key material from a named container.
    ///
    /// # Errors
    /// Returns [`crate::Error::KeyContainer`] if no key store is installed, the container does
    /// not exist, or its content cannot be decoded.
    pub fn load_key_container(&self, name: &str) -> Result<KeyMaterial> {
        let Some(store) = &self.key_store else {
            warn!(container = %name, "no key container capability installed");
            return Err(Error::KeyContainer {
                name: name.to_string(),
                reason: CONTAINERS_NOT_SUPPORTED.to_string(),
            });
        };

        debug!(container = %name, "opening key container");
        let content = store.open(name)?;
        KeyMaterial::from_key_bytes(&content).map_err(|e| Error::KeyContainer {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Sign a SHA-1 digest, returning the big-endian signature.
    ///
    /// # Errors
    /// Returns [`crate::Error::Crypto`] if the backend fails.
    pub fn sign(&self, key: &PrivateKeyHandle, digest: &[u8]) -> Result<Vec<u8>> {
        self.backend.sign_sha1(key.blob(), digest)
    }

    /// Check a big-endian signature against a strong-name public key blob.
    ///
    /// # Errors
    /// Returns an error if the public key cannot be decoded.
    pub fn verify(&self, public_key: &[u8], digest: &[u8], signature: &[u8]) -> Result<bool> {
        let key = KeyBlob::parse(public_key)?;
        self.backend.verify_sha1(&key, digest, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        signing::keys::store::InMemoryKeyStore,
        test::keys::{key_1024, key_1024_b, key_2048, KEYPAIR_A_SNK, PUBLIC_A_SNK},
    };
    use sha1::Digest;

    fn digest(data: &[u8]) -> Vec<u8> {
        Sha1::digest(data).to_vec()
    }

    #[test]
    fn backends_agree() {
        let digest = digest(b"strong name");
        for key in [key_1024(), key_2048()] {
            let portable = PortableSigner.sign_sha1(key, &digest).unwrap();
            let raw = RawRsaSigner.sign_sha1(key, &digest).unwrap();

            assert_eq!(portable.len(), key.modulus_len());
            assert_eq!(portable, raw);
        }
    }

    #[test]
    fn cross_verification() {
        let digest = digest(b"payload");
        let signature = RawRsaSigner.sign_sha1(key_1024(), &digest).unwrap();

        assert!(PortableSigner
            .verify_sha1(key_1024(), &digest, &signature)
            .unwrap());
        assert!(RawRsaSigner
            .verify_sha1(key_1024(), &digest, &signature)
            .unwrap());
        assert!(!RawRsaSigner
            .verify_sha1(key_1024_b(), &digest, &signature)
            .unwrap());

        let other = self::digest(b"other payload");
        assert!(!PortableSigner
            .verify_sha1(key_1024(), &other, &signature)
            .unwrap());
    }

    #[test]
    fn public_key_cannot_sign() {
        let public = key_1024().to_public();
        let digest = digest(b"x");
        assert!(matches!(
            PortableSigner.sign_sha1(&public, &digest),
            Err(Error::Crypto(_))
        ));
        assert!(matches!(
            RawRsaSigner.sign_sha1(&public, &digest),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn wrong_digest_size() {
        assert!(RawRsaSigner.sign_sha1(key_1024(), &[0u8; 32]).is_err());
    }

    #[test]
    fn rsa_key_conversion() {
        let rsa_key = PortableSigner::private_key(key_1024()).unwrap();
        let blob = key_blob_from_rsa(&rsa_key).unwrap();
        assert_eq!(&blob, key_1024());
    }

    #[test]
    fn provider_container_capability() {
        let provider = StrongNameProvider::new();
        match provider.load_key_container("any") {
            Err(Error::KeyContainer { reason, .. }) => {
                assert_eq!(reason, CONTAINERS_NOT_SUPPORTED)
            }
            _ => panic!("Expected KeyContainer error"),
        }

        let store = InMemoryKeyStore::new();
        store.insert("good", KEYPAIR_A_SNK.to_vec());
        store.insert("corrupt", vec![1, 2, 3]);
        let provider = provider.with_key_store(Arc::new(store));

        let material = provider.load_key_container("good").unwrap();
        assert_eq!(material.public_key(), PUBLIC_A_SNK);
        assert!(matches!(
            provider.load_key_container("corrupt"),
            Err(Error::KeyContainer { .. })
        ));
    }

    #[test]
    fn provider_sign_and_verify() {
        let provider = StrongNameProvider::new().with_backend(Arc::new(RawRsaSigner));
        let material = KeyMaterial::from_key_bytes(KEYPAIR_A_SNK).unwrap();
        let digest = digest(b"image");

        let signature = provider
            .sign(material.private_key().unwrap(), &digest)
            .unwrap();
        assert!(provider
            .verify(material.public_key(), &digest, &signature)
            .unwrap());
        assert_eq!(format!("{provider:?}").contains("raw"), true);
    }
}
