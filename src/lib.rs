// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # dotsign
//!
//! [![Crates.io](https://img.shields.io/crates/v/dotsign.svg)](https://crates.io/crates/dotsign)
//! [![Documentation](https://docs.rs/dotsign/badge.svg)](https://docs.rs/dotsign)
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/dotsign/blob/main/LICENSE-APACHE)
//!
//! Strong-name identity and friend trust for .NET compilers, in pure Rust. `dotsign` decides
//! which key governs an assembly, reserves and fills the strong-name signature of the emitted
//! PE image, and answers whether one assembly may use the `internal` members of another.
//!
//! ## Features
//!
//! - **🔑 Key resolution** - Key files, key containers and inline public keys, with option and
//!   attribute precedence reported through compiler diagnostics
//! - **✍️ Signing modes** - Full, public, delay and counter signing of IL-only PE images
//! - **🤝 Friend trust** - `InternalsVisibleTo` and `IgnoresAccessChecksTo`, including grants
//!   asked for before the assembly's own key is known
//! - **🧩 Pluggable crypto** - Signing backends and key stores are values, not globals
//! - **🔧 Cross-platform** - No Windows CryptoAPI required
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dotsign::prelude::*;
//!
//! let options = CompilationOptions::new().with_crypto_key_file(Some("/keys/paul.snk"));
//! let paul = Compilation::new("Paul")
//!     .with_options(options)
//!     .with_attribute(SourceAttribute::internals_visible_to("John, PublicKey=0024..."));
//!
//! let diagnostics = paul.analyze();
//! for diagnostic in diagnostics.iter() {
//!     println!("{diagnostic}");
//! }
//!
//! let image = paul.emit(&PeBuilder::new(), &CancellationFlag::new())?;
//! println!("{} ({} bytes)", paul.identity(), image.len());
//! # Ok::<(), dotsign::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`compilation`] - One compilation's keys, identity, friend queries and emit
//! - [`signing`] - Options, attributes, key material, signing decision and the signing pipeline
//! - [`access`] - Friend and access-check bypass resolution, override selection
//! - [`metadata`] - CLI header, diagnostics and assembly identities
//! - [`file`] - PE image access and a minimal image writer
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Error Handling
//!
//! Conditions a compiler reports to its user (conflicting options, unreadable key files,
//! malformed friend declarations) are [`metadata::diagnostics::Diagnostic`]s. Failures that stop
//! an operation are [`Error`]s:
//!
//! ```rust,no_run
//! use dotsign::{prelude::*, Error};
//!
//! let compilation = Compilation::new("John");
//! match compilation.emit(&PeBuilder::new(), &CancellationFlag::new()) {
//!     Ok(image) => println!("{} bytes", image.len()),
//!     Err(Error::EmitFailed(summary)) => println!("{summary}"),
//!     Err(Error::Cancelled) => println!("cancelled"),
//!     Err(e) => println!("Error: {e}"),
//! }
//! ```

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use dotsign::prelude::*;
///
/// let compilation = Compilation::new("John");
/// assert!(!compilation.identity().is_strong_named());
/// ```
pub mod prelude;

/// Cross-assembly access to `internal` members.
pub mod access;

/// Per-compilation signing and friend-trust state.
pub mod compilation;

/// PE image access and writing.
pub mod file;

/// CLI header, diagnostics and assembly identities.
pub mod metadata;

/// Strong-name key resolution and signing.
pub mod signing;

/// `dotsign` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotsign` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust,no_run
/// use dotsign::{Error, signing::keys::KeyMaterial};
///
/// match KeyMaterial::from_key_bytes(&std::fs::read("key.snk")?) {
///     Ok(material) => println!("{} byte public key", material.public_key().len()),
///     Err(Error::Malformed { message, .. }) => println!("Malformed: {message}"),
///     Err(e) => println!("Error: {e}"),
/// }
/// # Ok::<(), std::io::Error>(())
/// ```
pub use error::Error;

/// Bounds-checked binary reader.
pub use file::parser::Parser;
