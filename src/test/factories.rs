//! Builders for test providers, compilations and references.

use std::path::PathBuf;

use crate::{
    access::ReferencedAssembly, metadata::identity::AssemblyIdentityBuilder,
    signing::provider::StrongNameProvider,
};

/// Path of a file in `tests/fixtures`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// A provider that finds key files in `tests/fixtures`.
pub fn fixture_provider() -> StrongNameProvider {
    StrongNameProvider::new().with_search_path(fixture_path(""))
}

/// An unsigned referenced assembly without friends.
pub fn unsigned_reference(name: &str) -> ReferencedAssembly {
    ReferencedAssembly::new(AssemblyIdentityBuilder::new(name).build())
}

/// A strong-named referenced assembly without friends.
pub fn signed_reference(name: &str, public_key: &[u8]) -> ReferencedAssembly {
    ReferencedAssembly::new(AssemblyIdentityBuilder::new(name).public_key(public_key).build())
}
