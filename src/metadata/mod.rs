//! Metadata-level structures touched by strong-name signing and friend resolution.
//!
//! # Key Components
//!
//! - [`cor20header`] - The CLI header, its flags and its strong-name signature directory
//! - [`diagnostics`] - The diagnostic bag shared with the compiler host
//! - [`identity`] - Assembly identities, public key tokens and display names

pub mod cor20header;
pub mod diagnostics;
pub mod identity;
