//! Consumer-declared access bypass (`IgnoresAccessChecksTo`).
//!
//! Unlike friend grants, these declarations live in the consumer and need no cooperation from
//! the producer: naming the producer's simple name is enough, whatever either side's keys.

use crate::metadata::identity::AssemblyIdentity;

/// One `IgnoresAccessChecksTo` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoresAccessChecksDeclaration {
    /// Simple name of the assembly whose internals are used
    pub target_assembly_name: String,
}

impl IgnoresAccessChecksDeclaration {
    /// Decode an `IgnoresAccessChecksTo` argument. `null` and empty names yield `None`.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Option<Self> {
        let name = value?.trim();
        (!name.is_empty()).then(|| IgnoresAccessChecksDeclaration {
            target_assembly_name: name.to_string(),
        })
    }
}

/// Evaluates a consumer's `IgnoresAccessChecksTo` declarations.
#[derive(Debug, Clone, Copy)]
pub struct IgnoresAccessChecksResolver<'a> {
    declarations: &'a [IgnoresAccessChecksDeclaration],
}

impl<'a> IgnoresAccessChecksResolver<'a> {
    /// A resolver over the consumer's declarations.
    #[must_use]
    pub fn new(declarations: &'a [IgnoresAccessChecksDeclaration]) -> Self {
        IgnoresAccessChecksResolver { declarations }
    }

    /// Returns true if the consumer bypasses access checks into `producer`.
    #[must_use]
    pub fn grants_access_to(&self, producer: &AssemblyIdentity) -> bool {
        self.declarations
            .iter()
            .any(|d| d.target_assembly_name == producer.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::identity::AssemblyIdentityBuilder, test::keys::PUBLIC_A_SNK};

    #[test]
    fn names_the_producer() {
        let declarations = [IgnoresAccessChecksDeclaration::parse(Some("Paul")).unwrap()];
        let resolver = IgnoresAccessChecksResolver::new(&declarations);

        let paul = AssemblyIdentityBuilder::new("Paul").build();
        let signed_paul = AssemblyIdentityBuilder::new("Paul")
            .public_key(PUBLIC_A_SNK)
            .build();
        let george = AssemblyIdentityBuilder::new("George").build();

        assert!(resolver.grants_access_to(&paul));
        assert!(resolver.grants_access_to(&signed_paul));
        assert!(!resolver.grants_access_to(&george));
    }

    #[test]
    fn null_and_empty_are_ignored() {
        assert!(IgnoresAccessChecksDeclaration::parse(None).is_none());
        assert!(IgnoresAccessChecksDeclaration::parse(Some("  ")).is_none());
        assert!(!IgnoresAccessChecksResolver::new(&[])
            .grants_access_to(&AssemblyIdentityBuilder::new("Paul").build()));
    }
}
