//! Cross-assembly access to `internal` members.
//!
//! Two mechanisms open a producer's internals to a consumer:
//!
//! - [`friends`] - The producer names the consumer in `InternalsVisibleTo`
//! - [`ignores`] - The consumer names the producer in `IgnoresAccessChecksTo`
//!
//! Either one suffices. [`overrides`] applies the result to virtual dispatch.
//!
//! A producer compiled elsewhere is described by a [`ReferencedAssembly`].

pub mod friends;
pub mod ignores;
pub mod overrides;

use crate::{
    access::friends::{FriendAccessResolver, FriendDeclaration},
    metadata::identity::AssemblyIdentity,
};

/// An assembly referenced by a compilation, with the friend declarations read from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencedAssembly {
    identity: AssemblyIdentity,
    friends: Vec<FriendDeclaration>,
}

impl ReferencedAssembly {
    /// A referenced assembly without friend declarations.
    #[must_use]
    pub fn new(identity: AssemblyIdentity) -> Self {
        ReferencedAssembly {
            identity,
            friends: Vec::new(),
        }
    }

    /// Add an `InternalsVisibleTo` argument as read from metadata.
    ///
    /// Arguments that do not decode are dropped; they were diagnosed when the referenced
    /// assembly was compiled.
    #[must_use]
    pub fn with_internals_visible_to(mut self, value: &str) -> Self {
        if let Ok(declaration) = FriendDeclaration::parse(Some(value)) {
            self.friends.push(declaration);
        }
        self
    }

    /// Add an already decoded friend declaration.
    #[must_use]
    pub fn with_friend(mut self, declaration: FriendDeclaration) -> Self {
        self.friends.push(declaration);
        self
    }

    /// The assembly identity.
    #[must_use]
    pub fn identity(&self) -> &AssemblyIdentity {
        &self.identity
    }

    /// Simple name of the assembly.
    #[must_use]
    pub fn name(&self) -> &str {
        self.identity.name()
    }

    /// The friend declarations.
    #[must_use]
    pub fn friends(&self) -> &[FriendDeclaration] {
        &self.friends
    }

    /// A friend resolver over this assembly's declarations.
    #[must_use]
    pub fn friend_resolver(&self) -> FriendAccessResolver<'_> {
        FriendAccessResolver::new(&self.identity, &self.friends)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::identity::AssemblyIdentityBuilder;

    #[test]
    fn invalid_metadata_declarations_are_dropped() {
        let reference = ReferencedAssembly::new(AssemblyIdentityBuilder::new("Paul").build())
            .with_internals_visible_to("John")
            .with_internals_visible_to("John, Version=1.0.0.0")
            .with_internals_visible_to("");

        assert_eq!(reference.name(), "Paul");
        assert_eq!(reference.friends().len(), 1);
        assert_eq!(reference.friends()[0].assembly_name, "John");
    }
}
