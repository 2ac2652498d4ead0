//! Source attribute surface consumed by signing and friend resolution.
//!
//! Attribute binding belongs to the host compiler. It hands this crate the assembly-level
//! attributes that matter here as [`SourceAttribute`] values whose string arguments are either
//! already known ([`AttributeArgument::Value`]) or still pending ([`AttributeArgument::Bound`]).
//! A pending argument is evaluated against the compilation the first time it is needed, which
//! may happen while that compilation is still computing its own identity.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::compilation::Compilation;

/// `System.Reflection.AssemblyKeyFileAttribute`
pub const ASSEMBLY_KEY_FILE_ATTRIBUTE: &str = "System.Reflection.AssemblyKeyFileAttribute";
/// `System.Reflection.AssemblyKeyNameAttribute`
pub const ASSEMBLY_KEY_NAME_ATTRIBUTE: &str = "System.Reflection.AssemblyKeyNameAttribute";
/// `System.Reflection.AssemblyDelaySignAttribute`
pub const ASSEMBLY_DELAY_SIGN_ATTRIBUTE: &str = "System.Reflection.AssemblyDelaySignAttribute";
/// `System.Reflection.AssemblySignatureKeyAttribute`
pub const ASSEMBLY_SIGNATURE_KEY_ATTRIBUTE: &str =
    "System.Reflection.AssemblySignatureKeyAttribute";
/// `System.Runtime.CompilerServices.InternalsVisibleToAttribute`
pub const INTERNALS_VISIBLE_TO_ATTRIBUTE: &str =
    "System.Runtime.CompilerServices.InternalsVisibleToAttribute";
/// `System.Runtime.CompilerServices.IgnoresAccessChecksToAttribute`
pub const IGNORES_ACCESS_CHECKS_TO_ATTRIBUTE: &str =
    "System.Runtime.CompilerServices.IgnoresAccessChecksToAttribute";

/// Produces an attribute argument value on demand.
///
/// Implementations may query friend access on the compilation they are given. They must not
/// ask for that compilation's identity, which is not available while keys are being computed.
pub trait ArgumentBinder: Send + Sync {
    /// Evaluate the argument. `None` is a `null` string.
    fn bind(&self, compilation: &Compilation) -> Option<String>;
}

impl<F> ArgumentBinder for F
where
    F: Fn(&Compilation) -> Option<String> + Send + Sync,
{
    fn bind(&self, compilation: &Compilation) -> Option<String> {
        self(compilation)
    }
}

/// A string attribute argument.
#[derive(Clone)]
pub enum AttributeArgument {
    /// A constant, `None` for `null`
    Value(Option<String>),
    /// A value that is computed when first needed
    Bound(Arc<dyn ArgumentBinder>),
}

impl AttributeArgument {
    /// The `null` argument.
    #[must_use]
    pub fn null() -> Self {
        AttributeArgument::Value(None)
    }

    /// A deferred argument.
    pub fn bound(binder: impl ArgumentBinder + 'static) -> Self {
        AttributeArgument::Bound(Arc::new(binder))
    }

    pub(crate) fn resolve(&self, compilation: &Compilation) -> Option<String> {
        match self {
            AttributeArgument::Value(value) => value.clone(),
            AttributeArgument::Bound(binder) => binder.bind(compilation),
        }
    }
}

impl fmt::Debug for AttributeArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeArgument::Value(value) => write!(f, "{value:?}"),
            AttributeArgument::Bound(_) => write!(f, "<bound>"),
        }
    }
}

impl From<&str> for AttributeArgument {
    fn from(value: &str) -> Self {
        AttributeArgument::Value(Some(value.to_string()))
    }
}

impl From<String> for AttributeArgument {
    fn from(value: String) -> Self {
        AttributeArgument::Value(Some(value))
    }
}

impl From<Option<&str>> for AttributeArgument {
    fn from(value: Option<&str>) -> Self {
        AttributeArgument::Value(value.map(str::to_string))
    }
}

/// Which assembly-level attribute, with its constructor arguments.
#[derive(Debug, Clone)]
pub enum AttributeKind {
    /// `AssemblyKeyFile(path)`
    KeyFile(AttributeArgument),
    /// `AssemblyKeyName(container)`
    KeyName(AttributeArgument),
    /// `AssemblyDelaySign(bool)`
    DelaySign(bool),
    /// `AssemblySignatureKey(publicKey, countersignature)`
    SignatureKey {
        /// Hex encoded signature public key
        public_key: AttributeArgument,
        /// Hex encoded counter signature
        counter_signature: AttributeArgument,
    },
    /// `InternalsVisibleTo(assemblyName)`
    InternalsVisibleTo(AttributeArgument),
    /// `IgnoresAccessChecksTo(assemblyName)`
    IgnoresAccessChecksTo(AttributeArgument),
}

impl AttributeKind {
    /// Full name of the attribute type.
    #[must_use]
    pub fn full_name(&self) -> &'static str {
        match self {
            AttributeKind::KeyFile(_) => ASSEMBLY_KEY_FILE_ATTRIBUTE,
            AttributeKind::KeyName(_) => ASSEMBLY_KEY_NAME_ATTRIBUTE,
            AttributeKind::DelaySign(_) => ASSEMBLY_DELAY_SIGN_ATTRIBUTE,
            AttributeKind::SignatureKey { .. } => ASSEMBLY_SIGNATURE_KEY_ATTRIBUTE,
            AttributeKind::InternalsVisibleTo(_) => INTERNALS_VISIBLE_TO_ATTRIBUTE,
            AttributeKind::IgnoresAccessChecksTo(_) => IGNORES_ACCESS_CHECKS_TO_ATTRIBUTE,
        }
    }
}

/// Where an attribute was declared.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AttributeOrigin {
    /// Declared in source, optionally with the path of the declaring file
    Source {
        /// Path of the declaring source file
        file: Option<PathBuf>,
    },
    /// Carried in by an added netmodule
    AddedModule {
        /// Name of the module
        module: String,
    },
    /// Declared in source without file information
    #[default]
    Unknown,
}

/// An assembly-level attribute handed over by the host.
#[derive(Debug, Clone)]
pub struct SourceAttribute {
    /// Attribute kind and arguments
    pub kind: AttributeKind,
    /// Declaration site
    pub origin: AttributeOrigin,
}

impl SourceAttribute {
    /// An attribute with no origin information.
    #[must_use]
    pub fn new(kind: AttributeKind) -> Self {
        SourceAttribute {
            kind,
            origin: AttributeOrigin::Unknown,
        }
    }

    /// `[assembly: AssemblyKeyFile(path)]`
    pub fn key_file(path: impl Into<AttributeArgument>) -> Self {
        Self::new(AttributeKind::KeyFile(path.into()))
    }

    /// `[assembly: AssemblyKeyName(container)]`
    pub fn key_name(container: impl Into<AttributeArgument>) -> Self {
        Self::new(AttributeKind::KeyName(container.into()))
    }

    /// `[assembly: AssemblyDelaySign(value)]`
    #[must_use]
    pub fn delay_sign(value: bool) -> Self {
        Self::new(AttributeKind::DelaySign(value))
    }

    /// `[assembly: AssemblySignatureKey(publicKey, countersignature)]`
    pub fn signature_key(
        public_key: impl Into<AttributeArgument>,
        counter_signature: impl Into<AttributeArgument>,
    ) -> Self {
        Self::new(AttributeKind::SignatureKey {
            public_key: public_key.into(),
            counter_signature: counter_signature.into(),
        })
    }

    /// `[assembly: InternalsVisibleTo(name)]`
    pub fn internals_visible_to(name: impl Into<AttributeArgument>) -> Self {
        Self::new(AttributeKind::InternalsVisibleTo(name.into()))
    }

    /// `[assembly: IgnoresAccessChecksTo(name)]`
    pub fn ignores_access_checks_to(name: impl Into<AttributeArgument>) -> Self {
        Self::new(AttributeKind::IgnoresAccessChecksTo(name.into()))
    }

    /// Record the declaring source file.
    #[must_use]
    pub fn declared_in(mut self, file: impl Into<PathBuf>) -> Self {
        self.origin = AttributeOrigin::Source {
            file: Some(file.into()),
        };
        self
    }

    /// Mark the attribute as coming from an added module.
    #[must_use]
    pub fn from_module(mut self, module: impl Into<String>) -> Self {
        self.origin = AttributeOrigin::AddedModule {
            module: module.into(),
        };
        self
    }

    /// Full name of the attribute type.
    #[must_use]
    pub fn full_name(&self) -> &'static str {
        self.kind.full_name()
    }

    /// Directory relative key file paths are resolved against.
    #[must_use]
    pub fn base_directory(&self) -> Option<&Path> {
        match &self.origin {
            AttributeOrigin::Source { file: Some(file) } => file.parent(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_names() {
        assert_eq!(
            SourceAttribute::key_file("k.snk").full_name(),
            "System.Reflection.AssemblyKeyFileAttribute"
        );
        assert_eq!(
            SourceAttribute::internals_visible_to("John").full_name(),
            "System.Runtime.CompilerServices.InternalsVisibleToAttribute"
        );
        assert_eq!(
            SourceAttribute::delay_sign(true).full_name(),
            ASSEMBLY_DELAY_SIGN_ATTRIBUTE
        );
    }

    #[test]
    fn base_directory_from_declaring_file() {
        let attribute = SourceAttribute::key_file("k.snk").declared_in("/src/project/a.cs");
        assert_eq!(attribute.base_directory(), Some(Path::new("/src/project")));

        let attribute = SourceAttribute::key_file("k.snk").from_module("m.netmodule");
        assert_eq!(attribute.base_directory(), None);
        assert_eq!(
            attribute.origin,
            AttributeOrigin::AddedModule {
                module: "m.netmodule".to_string()
            }
        );
    }

    #[test]
    fn argument_conversions() {
        assert!(matches!(
            AttributeArgument::from(None::<&str>),
            AttributeArgument::Value(None)
        ));
        assert_eq!(format!("{:?}", AttributeArgument::from("x")), "Some(\"x\")");
        let bound = AttributeArgument::bound(|_: &Compilation| Some("late".to_string()));
        assert_eq!(format!("{bound:?}"), "<bound>");
    }
}
