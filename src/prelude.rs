//! # dotsign Prelude
//!
//! This module provides a convenient prelude for the most commonly used types from the dotsign
//! library. Import this module to get quick access to the types a compiler host needs to
//! resolve keys, emit signed images and answer friend queries.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotsign operations
pub use crate::Error;

/// The result type used throughout dotsign
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// One compilation's signing and friend-trust state
pub use crate::compilation::{CompiledModule, Compilation};

/// Minimal image writer and patchable PE image
pub use crate::file::{builder::PeBuilder, PeImage};

// ================================================================================================
// Configuration
// ================================================================================================

/// Signing options and source attributes
pub use crate::signing::{
    attributes::{AttributeArgument, SourceAttribute},
    options::{CompilationOptions, OutputKind},
};

/// Key loading and signing backends
pub use crate::signing::provider::{
    PortableSigner, RawRsaSigner, SignatureBackend, StrongNameProvider,
};

/// Key containers
pub use crate::signing::keys::store::{DirectoryKeyStore, InMemoryKeyStore, KeyContainerStore};

/// Key material
pub use crate::signing::keys::{KeyMaterial, KeySource};

// ================================================================================================
// Signing
// ================================================================================================

/// The signing decision and the signing pipeline
pub use crate::signing::{
    decision::SigningDecision,
    pipeline::{verify_strong_name_signature, CancellationFlag, ImageWriter, StrongNameSigner},
};

// ================================================================================================
// Identity and Diagnostics
// ================================================================================================

/// Assembly identities
pub use crate::metadata::identity::{
    AssemblyIdentity, AssemblyIdentityBuilder, AssemblyVersion, PublicKeyToken,
};

/// Compiler diagnostics
pub use crate::metadata::diagnostics::{
    Diagnostic, DiagnosticCode, DiagnosticSeverity, Diagnostics, Location,
};

// ================================================================================================
// Access
// ================================================================================================

/// Friend and access-check bypass resolution
pub use crate::access::{
    friends::{FriendAccessResolver, FriendDeclaration, FriendGrantResult},
    ignores::{IgnoresAccessChecksDeclaration, IgnoresAccessChecksResolver},
    overrides::{MemberAccessibility, OverrideMember},
    ReferencedAssembly,
};
