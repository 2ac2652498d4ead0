//! Assembly identity for strong-named and unsigned assemblies.
//!
//! This module computes and renders the identity of the assembly under compilation and parses
//! the display names found in friend declarations.
//!
//! # Key Components
//!
//! - [`AssemblyIdentity`] - `{name, version, culture, public key}` with a derived token
//! - [`AssemblyIdentityBuilder`] - Finalizes an identity from a resolved public key
//! - [`AssemblyVersion`] - Four-part version numbering
//! - [`PublicKeyToken`] - `reverse(SHA-1(public key))[..8]`
//! - [`parse_display_name`] - Display name parser with part tracking
//!
//! # ECMA-335 References
//!
//! - **Section II.6.2.1.3**: PublicKeyToken - defines public key token computation
//! - **Section II.6.3**: Referencing assemblies - defines assembly reference format
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use dotsign::metadata::identity::AssemblyIdentityBuilder;
//!
//! let public_key = std::fs::read("public.snk")?;
//! let identity = AssemblyIdentityBuilder::new("Paul").public_key(&public_key).build();
//! println!("{}", identity.display_name());
//! # Ok::<(), dotsign::Error>(())
//! ```

pub use assembly::{AssemblyIdentity, AssemblyIdentityBuilder, AssemblyVersion};
pub use display::{parse_display_name, NameParts, ParsedAssemblyName};
pub use token::PublicKeyToken;

mod assembly;
mod display;
mod token;
