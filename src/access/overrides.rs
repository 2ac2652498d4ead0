//! Override resolution across assemblies.
//!
//! A virtual call binds to the most derived override the caller can access. Friend access
//! widens what "accessible" means for `internal` overrides, but the walk itself is unchanged:
//! an accessible override in a later assembly shadows an inaccessible `internal` override in an
//! intermediate assembly that did not make the caller a friend.

/// Declared accessibility of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAccessibility {
    /// `public`
    Public,
    /// `protected internal`
    ProtectedInternal,
    /// `internal`
    Internal,
    /// `protected`
    Protected,
    /// `private protected`
    PrivateProtected,
    /// `private`
    Private,
}

/// One member of an override chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideMember {
    /// Member name, for diagnostics
    pub name: String,
    /// Simple name of the declaring assembly
    pub declaring_assembly: String,
    /// Declared accessibility
    pub accessibility: MemberAccessibility,
}

impl OverrideMember {
    /// A member declared in `declaring_assembly`.
    pub fn new(
        name: impl Into<String>,
        declaring_assembly: impl Into<String>,
        accessibility: MemberAccessibility,
    ) -> Self {
        OverrideMember {
            name: name.into(),
            declaring_assembly: declaring_assembly.into(),
            accessibility,
        }
    }
}

/// Where an access happens.
#[derive(Debug, Clone, Copy)]
pub struct AccessContext<'a> {
    /// Simple name of the calling assembly
    pub assembly: &'a str,
    /// Whether the caller derives from the member's declaring type
    pub in_derived_type: bool,
}

impl AccessContext<'_> {
    /// Is `member` accessible from this context?
    ///
    /// `has_internal_access` answers whether the caller may use the internals of the named
    /// assembly.
    pub fn can_access<F>(&self, member: &OverrideMember, has_internal_access: F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        let internal = || {
            member.declaring_assembly == self.assembly
                || has_internal_access(&member.declaring_assembly)
        };

        match member.accessibility {
            MemberAccessibility::Public => true,
            MemberAccessibility::ProtectedInternal => self.in_derived_type || internal(),
            MemberAccessibility::Internal => internal(),
            MemberAccessibility::Protected => self.in_derived_type,
            MemberAccessibility::PrivateProtected => self.in_derived_type && internal(),
            MemberAccessibility::Private => false,
        }
    }
}

/// Walk `chain` from most to least derived and return the first accessible override.
pub fn most_derived_accessible_override<'a, F>(
    chain: &'a [OverrideMember],
    context: AccessContext<'_>,
    has_internal_access: F,
) -> Option<&'a OverrideMember>
where
    F: Fn(&str) -> bool,
{
    chain
        .iter()
        .find(|member| context.can_access(member, &has_internal_access))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Vec<OverrideMember> {
        vec![
            OverrideMember::new("C.M", "Third", MemberAccessibility::Public),
            OverrideMember::new("B.M", "Second", MemberAccessibility::Internal),
            OverrideMember::new("A.M", "First", MemberAccessibility::Public),
        ]
    }

    const CALLER: AccessContext<'static> = AccessContext {
        assembly: "Caller",
        in_derived_type: false,
    };

    #[test]
    fn later_public_override_shadows_internal() {
        let chain = chain();
        let found = most_derived_accessible_override(&chain, CALLER, |_| false).unwrap();
        assert_eq!(found.name, "C.M");
    }

    #[test]
    fn inaccessible_internal_is_skipped() {
        let chain = &chain()[1..];
        let found = most_derived_accessible_override(chain, CALLER, |_| false).unwrap();
        assert_eq!(found.name, "A.M");
    }

    #[test]
    fn friend_makes_internal_accessible() {
        let chain = &chain()[1..];
        let found =
            most_derived_accessible_override(chain, CALLER, |name| name == "Second").unwrap();
        assert_eq!(found.name, "B.M");
    }

    #[test]
    fn accessibility_rules() {
        let derived = AccessContext {
            assembly: "Caller",
            in_derived_type: true,
        };
        let member = |accessibility| OverrideMember::new("M", "Other", accessibility);

        assert!(derived.can_access(&member(MemberAccessibility::Protected), |_| false));
        assert!(!CALLER.can_access(&member(MemberAccessibility::Protected), |_| true));
        assert!(derived.can_access(&member(MemberAccessibility::ProtectedInternal), |_| false));
        assert!(!derived.can_access(&member(MemberAccessibility::PrivateProtected), |_| false));
        assert!(derived.can_access(&member(MemberAccessibility::PrivateProtected), |_| true));
        assert!(!derived.can_access(&member(MemberAccessibility::Private), |_| true));

        let own = OverrideMember::new("M", "Caller", MemberAccessibility::Internal);
        assert!(CALLER.can_access(&own, |_| false));
    }
}
