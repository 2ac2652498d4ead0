//! Strong-name key resolution and signing.
//!
//! Signing configuration arrives through two surfaces: the [`options::CompilationOptions`]
//! snapshot and assembly-level [`attributes::SourceAttribute`]s. The
//! [`decision::KeyMaterialResolver`] merges both, loads keys through a
//! [`provider::StrongNameProvider`] and produces a [`decision::SigningDecision`], which the
//! [`pipeline::StrongNameSigner`] applies to the emitted image.
//!
//! # Key Components
//!
//! - [`keys`] - Key sources, key blobs, key files and key containers
//! - [`provider`] - Signing backends and the per-compilation provider value
//! - [`options`] - Signing-related compilation options
//! - [`attributes`] - The attribute surface handed over by the host
//! - [`decision`] - Precedence rules and the signing decision
//! - [`pipeline`] - Signature area sizing and filling, strong-name hashing and verification
//! - [`marker`] - Signing intent persisted in netmodules
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotsign::signing::{
//!     keys::KeyMaterial,
//!     decision::SigningDecision,
//!     pipeline::{verify_strong_name_signature, CancellationFlag, ImageWriter, StrongNameSigner},
//!     provider::StrongNameProvider,
//! };
//! use dotsign::file::builder::PeBuilder;
//!
//! let material = KeyMaterial::from_key_bytes(&std::fs::read("key.snk")?)?;
//! let public_key = material.public_key().to_vec();
//! let decision = SigningDecision::FullSign(material);
//!
//! let image = PeBuilder::new().write_image(decision.reserved_signature_size())?;
//! let provider = StrongNameProvider::new();
//! let signed = StrongNameSigner::new(&provider).apply(image, &decision, &CancellationFlag::new())?;
//!
//! assert!(verify_strong_name_signature(&signed, &public_key)?);
//! # Ok::<(), dotsign::Error>(())
//! ```

pub mod attributes;
pub mod decision;
pub mod keys;
pub mod marker;
pub mod options;
pub mod pipeline;
pub mod provider;
