//! Emit-time strong-name signing.
//!
//! The host's image writer lays out the PE file with a signature area of the size the
//! [`SigningDecision`] asks for. [`StrongNameSigner::apply`] then fills that area in place:
//!
//! | Decision         | Signature bytes | `StrongNameSigned` flag |
//! |------------------|-----------------|-------------------------|
//! | `Unsigned`       | none reserved   | clear                   |
//! | `DelaySign`      | zeros           | clear                   |
//! | `PublicSignOnly` | zeros           | set                     |
//! | `FullSign`       | RSA signature   | set                     |
//! | `CounterSign`    | RSA signature   | set                     |
//!
//! The PE checksum is recomputed last. It is excluded from the strong-name hash, so updating it
//! never invalidates the signature.
//!
//! # Hash Coverage
//!
//! [`strong_name_hash`] feeds SHA-1 with the headers up to `SizeOfHeaders` minus the checksum
//! field and the security directory entry, followed by the raw data of every section in file
//! order minus the signature area itself.

use std::{
    ops::Range,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use sha1::{Digest, Sha1};
use tracing::{debug, info};

use crate::{
    file::PeImage,
    metadata::cor20header::CorFlags,
    signing::{
        decision::SigningDecision,
        keys::snk::KeyBlob,
        provider::{PortableSigner, SignatureBackend, StrongNameProvider},
    },
    Error, Result,
};

/// Size of the PE checksum field.
const CHECKSUM_SIZE: usize = 4;
/// Size of a data directory entry.
const DIRECTORY_ENTRY_SIZE: usize = 8;

/// Produces the PE image for a compilation.
pub trait ImageWriter {
    /// Lay out the image with `reserved_signature_size` bytes reserved for the strong-name
    /// signature. Zero means no signature area.
    ///
    /// # Errors
    /// Returns an error if the image cannot be produced.
    fn write_image(&self, reserved_signature_size: u32) -> Result<Vec<u8>>;
}

/// Cooperative cancellation for emit.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// A flag that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`crate::Error::Cancelled`] if cancellation was requested.
    ///
    /// # Errors
    /// Returns [`crate::Error::Cancelled`] after [`CancellationFlag::cancel`].
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

fn update_range(hasher: &mut Sha1, data: &[u8], range: Range<usize>) -> Result<()> {
    let Some(bytes) = data.get(range) else {
        return Err(out_of_bounds_error!());
    };
    hasher.update(bytes);
    Ok(())
}

/// Compute the strong-name SHA-1 hash of an image.
///
/// # Errors
/// Returns an error if the header layout points outside the image.
pub fn strong_name_hash(image: &PeImage, signature: Option<Range<usize>>) -> Result<[u8; 20]> {
    let data = image.data();
    let layout = image.layout();
    let mut hasher = Sha1::new();

    let checksum = layout.checksum_offset;
    let security = layout.security_directory_offset;
    let headers_end = layout.size_of_headers.min(data.len());
    if checksum + CHECKSUM_SIZE > security || security + DIRECTORY_ENTRY_SIZE > headers_end {
        return Err(malformed_error!(
            "Header fields outside of SizeOfHeaders - {} / {}",
            security,
            headers_end
        ));
    }

    update_range(&mut hasher, data, 0..checksum)?;
    update_range(&mut hasher, data, checksum + CHECKSUM_SIZE..security)?;
    update_range(&mut hasher, data, security + DIRECTORY_ENTRY_SIZE..headers_end)?;

    for section in &layout.sections {
        let raw = section.raw_range();
        match &signature {
            Some(excluded) if excluded.start < raw.end && raw.start < excluded.end => {
                update_range(&mut hasher, data, raw.start..excluded.start.max(raw.start))?;
                update_range(&mut hasher, data, excluded.end.min(raw.end)..raw.end)?;
            }
            _ => update_range(&mut hasher, data, raw)?,
        }
    }

    Ok(hasher.finalize().into())
}

/// Fills the strong-name signature area of emitted images.
#[derive(Debug)]
pub struct StrongNameSigner<'a> {
    provider: &'a StrongNameProvider,
}

impl<'a> StrongNameSigner<'a> {
    /// A signer that signs through `provider`.
    #[must_use]
    pub fn new(provider: &'a StrongNameProvider) -> Self {
        StrongNameSigner { provider }
    }

    /// Apply `decision` to an image laid out with
    /// [`SigningDecision::reserved_signature_size`] bytes reserved.
    ///
    /// # Errors
    /// Returns [`crate::Error::Cancelled`] if `cancel` fires before hashing,
    /// [`crate::Error::SignButNoPrivateKey`] if a real signature is requested without a private
    /// key, [`crate::Error::Crypto`] if the backend fails or the signature does not fit, and
    /// parse errors for images without a usable signature area.
    pub fn apply(
        &self,
        image: Vec<u8>,
        decision: &SigningDecision,
        cancel: &CancellationFlag,
    ) -> Result<Vec<u8>> {
        let material = match decision {
            SigningDecision::Unsigned => return Ok(image),
            SigningDecision::FullSign(material)
            | SigningDecision::CounterSign {
                primary: material, ..
            } => Some(material),
            SigningDecision::PublicSignOnly(_) | SigningDecision::DelaySign { .. } => None,
        };

        let mut image = PeImage::from_bytes(image)?;
        let Some(range) = image.strong_name_signature_range()? else {
            return Err(malformed_error!("Image has no strong name signature area"));
        };
        let reserved = decision.reserved_signature_size() as usize;
        if range.len() < reserved {
            return Err(malformed_error!(
                "Strong name signature area too small - {} < {}",
                range.len(),
                reserved
            ));
        }

        image.write_at(range.start, &vec![0u8; range.len()])?;

        let mut flags = image.cor20()?.flags;
        if decision.sets_signed_flag() {
            flags |= CorFlags::STRONG_NAME_SIGNED;
        } else {
            flags -= CorFlags::STRONG_NAME_SIGNED;
        }
        image.set_cor_flags(flags)?;

        if let Some(material) = material {
            let Some(private_key) = material.private_key() else {
                return Err(Error::SignButNoPrivateKey(String::new()));
            };

            cancel.check()?;
            let digest = strong_name_hash(&image, Some(range.clone()))?;
            let mut signature = self.provider.sign(private_key, &digest)?;
            if signature.len() > range.len() {
                return Err(Error::Crypto(format!(
                    "signature of {} bytes does not fit the {} byte signature area",
                    signature.len(),
                    range.len()
                )));
            }

            signature.reverse();
            image.write_at(range.start, &signature)?;
            info!(
                backend = self.provider.backend().name(),
                size = signature.len(),
                "strong-name signed image"
            );
        } else if decision.sets_signed_flag() {
            info!(size = range.len(), "public-signed image");
        } else {
            info!(size = range.len(), "delay-signed image");
        }

        let checksum = image.update_checksum()?;
        debug!(checksum, "updated PE checksum");

        Ok(image.into_bytes())
    }
}

/// Check the strong-name signature of an image against a public key blob.
///
/// Returns `false` for images without the `StrongNameSigned` flag, without a signature area,
/// or whose signature does not verify.
///
/// # Errors
/// Returns an error if the image or the public key cannot be parsed.
pub fn verify_strong_name_signature(image: &[u8], public_key: &[u8]) -> Result<bool> {
    let image = PeImage::from_bytes(image.to_vec())?;
    if !image.cor20()?.flags.contains(CorFlags::STRONG_NAME_SIGNED) {
        return Ok(false);
    }
    let Some(range) = image.strong_name_signature_range()? else {
        return Ok(false);
    };

    let key = KeyBlob::parse(public_key)?;
    let modulus_len = key.modulus_len();
    if modulus_len > range.len() {
        return Ok(false);
    }

    let mut signature = image.data()[range.start..range.start + modulus_len].to_vec();
    signature.reverse();

    let digest = strong_name_hash(&image, Some(range))?;
    PortableSigner.verify_sha1(&key, &digest, &signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file::builder::PeBuilder,
        signing::{
            decision::CounterSignature,
            keys::KeyMaterial,
            provider::RawRsaSigner,
        },
        test::keys::{KEYPAIR_2048_SNK, KEYPAIR_A_SNK, MIGRATION_PUBLIC_KEY_HEX, PUBLIC_A_SNK},
    };

    fn emit(decision: &SigningDecision, provider: &StrongNameProvider) -> Result<Vec<u8>> {
        let image = PeBuilder::new().write_image(decision.reserved_signature_size())?;
        StrongNameSigner::new(provider).apply(image, decision, &CancellationFlag::new())
    }

    fn signed_flag(image: &[u8]) -> bool {
        PeImage::from_bytes(image.to_vec())
            .unwrap()
            .cor20()
            .unwrap()
            .flags
            .contains(CorFlags::STRONG_NAME_SIGNED)
    }

    fn signature_bytes(image: &[u8]) -> Vec<u8> {
        let image = PeImage::from_bytes(image.to_vec()).unwrap();
        let range = image.strong_name_signature_range().unwrap().unwrap();
        image.data()[range].to_vec()
    }

    #[test]
    fn full_sign_verifies() {
        let material = KeyMaterial::from_key_bytes(KEYPAIR_A_SNK).unwrap();
        let image = emit(
            &SigningDecision::FullSign(material),
            &StrongNameProvider::new(),
        )
        .unwrap();

        assert!(signed_flag(&image));
        assert_eq!(signature_bytes(&image).len(), 128);
        assert!(verify_strong_name_signature(&image, PUBLIC_A_SNK).unwrap());
    }

    #[test]
    fn tampering_breaks_signature() {
        let material = KeyMaterial::from_key_bytes(KEYPAIR_A_SNK).unwrap();
        let mut image = emit(
            &SigningDecision::FullSign(material),
            &StrongNameProvider::new(),
        )
        .unwrap();

        let metadata_offset = 0x248;
        image[metadata_offset + 8] ^= 0xFF;
        assert!(!verify_strong_name_signature(&image, PUBLIC_A_SNK).unwrap());
    }

    #[test]
    fn checksum_is_outside_hash() {
        let material = KeyMaterial::from_key_bytes(KEYPAIR_A_SNK).unwrap();
        let mut image = emit(
            &SigningDecision::FullSign(material),
            &StrongNameProvider::new(),
        )
        .unwrap();

        image[0xD8] ^= 0xFF;
        assert!(verify_strong_name_signature(&image, PUBLIC_A_SNK).unwrap());
    }

    #[test]
    fn backends_produce_identical_images() {
        let material = KeyMaterial::from_key_bytes(KEYPAIR_2048_SNK).unwrap();
        let decision = SigningDecision::FullSign(material);

        let portable = emit(&decision, &StrongNameProvider::new()).unwrap();
        let raw = emit(
            &decision,
            &StrongNameProvider::new().with_backend(Arc::new(RawRsaSigner)),
        )
        .unwrap();

        assert_eq!(portable, raw);
        assert_eq!(signature_bytes(&portable).len(), 256);
    }

    #[test]
    fn public_sign_sets_flag_with_zero_signature() {
        let image = emit(
            &SigningDecision::PublicSignOnly(PUBLIC_A_SNK.to_vec()),
            &StrongNameProvider::new(),
        )
        .unwrap();

        assert!(signed_flag(&image));
        let signature = signature_bytes(&image);
        assert_eq!(signature.len(), 128);
        assert!(signature.iter().all(|&b| b == 0));
        assert!(!verify_strong_name_signature(&image, PUBLIC_A_SNK).unwrap());
    }

    #[test]
    fn delay_sign_keeps_flag_clear() {
        let image = emit(
            &SigningDecision::DelaySign {
                public_key: PUBLIC_A_SNK.to_vec(),
                counter: None,
            },
            &StrongNameProvider::new(),
        )
        .unwrap();

        assert!(!signed_flag(&image));
        let signature = signature_bytes(&image);
        assert_eq!(signature.len(), 128);
        assert!(signature.iter().all(|&b| b == 0));
    }

    #[test]
    fn counter_sign_reserves_signature_key_size() {
        let decision = SigningDecision::CounterSign {
            primary: KeyMaterial::from_key_bytes(KEYPAIR_A_SNK).unwrap(),
            counter: CounterSignature::new(Some(MIGRATION_PUBLIC_KEY_HEX), None).unwrap(),
        };
        let image = emit(&decision, &StrongNameProvider::new()).unwrap();

        assert_eq!(signature_bytes(&image).len(), 256);
        assert!(verify_strong_name_signature(&image, PUBLIC_A_SNK).unwrap());
    }

    #[test]
    fn unsigned_is_untouched() {
        let image = PeBuilder::new().write_image(0).unwrap();
        let out = StrongNameSigner::new(&StrongNameProvider::new())
            .apply(image.clone(), &SigningDecision::Unsigned, &CancellationFlag::new())
            .unwrap();
        assert_eq!(image, out);
    }

    #[test]
    fn public_material_cannot_full_sign() {
        let material = KeyMaterial::from_key_bytes(PUBLIC_A_SNK).unwrap();
        assert!(matches!(
            emit(&SigningDecision::FullSign(material), &StrongNameProvider::new()),
            Err(Error::SignButNoPrivateKey(_))
        ));
    }

    #[test]
    fn cancelled_before_hashing() {
        let material = KeyMaterial::from_key_bytes(KEYPAIR_A_SNK).unwrap();
        let decision = SigningDecision::FullSign(material);
        let image = PeBuilder::new()
            .write_image(decision.reserved_signature_size())
            .unwrap();

        let cancel = CancellationFlag::new();
        cancel.cancel();
        let provider = StrongNameProvider::new();
        assert!(matches!(
            StrongNameSigner::new(&provider).apply(image, &decision, &cancel),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn missing_signature_area() {
        let material = KeyMaterial::from_key_bytes(KEYPAIR_A_SNK).unwrap();
        let image = PeBuilder::new().write_image(0).unwrap();
        let provider = StrongNameProvider::new();
        assert!(StrongNameSigner::new(&provider)
            .apply(
                image,
                &SigningDecision::FullSign(material),
                &CancellationFlag::new()
            )
            .is_err());
    }

    #[test]
    fn deterministic_signatures() {
        let material = KeyMaterial::from_key_bytes(KEYPAIR_A_SNK).unwrap();
        let decision = SigningDecision::FullSign(material);
        let provider = StrongNameProvider::new();
        assert_eq!(
            emit(&decision, &provider).unwrap(),
            emit(&decision, &provider).unwrap()
        );
    }
}
