//! Friend assembly resolution (`InternalsVisibleTo`).
//!
//! A producer assembly names its friends through `InternalsVisibleTo` declarations. Whether a
//! consumer is one of them depends on the simple name and, when the producer is strong-named,
//! on the consumer's full public key. The consumer's key is not always known when the question
//! is asked: the compilation asking may still be resolving its own signing keys. For that case
//! [`FriendAccessResolver::grants_access_to`] answers [`FriendGrantResult::Deferred`] on a simple
//! name match, and [`FriendAccessResolver::revalidate`] makes the final determination once the
//! consumer's identity is final.
//!
//! # Classification
//!
//! | Producer     | Declaration key | Consumer key     | Result                 |
//! |--------------|-----------------|------------------|------------------------|
//! | unsigned     | any             | none             | `Match`                |
//! | unsigned     | any             | present          | `OneSignedOneNot`      |
//! | strong-named | none            | any              | `MissingKey`           |
//! | strong-named | `K`             | equal to `K`     | `Match`                |
//! | strong-named | `K`             | anything else    | `PublicKeyDoesntMatch` |
//!
//! `OneSignedOneNot` still grants access. A strong-named assembly that depends on the internals
//! of an unsigned one cannot be loaded by the runtime, but outside of a final re-validation the
//! combination is accepted.

use tracing::debug;

use crate::{
    metadata::{
        diagnostics::{DiagnosticCode, Diagnostics, Location},
        identity::{parse_display_name, AssemblyIdentity, NameParts},
    },
};

/// One `InternalsVisibleTo` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendDeclaration {
    /// Simple name of the friend assembly
    pub assembly_name: String,
    /// Full public key the friend must have
    pub public_key: Option<Vec<u8>>,
}

/// Why an `InternalsVisibleTo` argument was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendDeclarationError {
    /// The argument is `null`
    Null,
    /// The argument is not a valid assembly display name
    InvalidName,
    /// The display name carries parts other than name, public key and public key token
    BadArguments,
}

impl FriendDeclarationError {
    /// Diagnostic reported for this rejection.
    #[must_use]
    pub fn code(self) -> DiagnosticCode {
        match self {
            FriendDeclarationError::Null => DiagnosticCode::CannotPassNullForFriendAssembly,
            FriendDeclarationError::InvalidName => DiagnosticCode::InvalidAssemblyName,
            FriendDeclarationError::BadArguments => DiagnosticCode::FriendAssemblyBadArgs,
        }
    }
}

impl FriendDeclaration {
    /// A declaration naming `assembly_name`, optionally with a required public key.
    pub fn new(assembly_name: impl Into<String>, public_key: Option<Vec<u8>>) -> Self {
        FriendDeclaration {
            assembly_name: assembly_name.into(),
            public_key,
        }
    }

    /// Decode an `InternalsVisibleTo` argument.
    ///
    /// # Errors
    /// Returns the [`FriendDeclarationError`] that makes the argument unusable.
    pub fn parse(value: Option<&str>) -> std::result::Result<Self, FriendDeclarationError> {
        let Some(value) = value else {
            return Err(FriendDeclarationError::Null);
        };

        let parsed = parse_display_name(value).map_err(|_| FriendDeclarationError::InvalidName)?;
        let allowed = NameParts::NAME | NameParts::PUBLIC_KEY | NameParts::PUBLIC_KEY_TOKEN;
        if !allowed.contains(parsed.parts) {
            return Err(FriendDeclarationError::BadArguments);
        }

        Ok(FriendDeclaration {
            assembly_name: parsed.name,
            public_key: parsed.public_key,
        })
    }

    /// Decode a source-declared argument, reporting a rejection at `location`.
    ///
    /// `null` reports `CannotPassNullForFriendAssembly`, an unparsable name reports the
    /// `InvalidAssemblyName` warning and a qualified name reports `FriendAssemblyBadArgs`.
    pub fn decode(value: Option<&str>, location: Location, diagnostics: &Diagnostics) -> Option<Self> {
        match Self::parse(value) {
            Ok(declaration) => Some(declaration),
            Err(error) => {
                let arguments: Vec<String> = match error {
                    FriendDeclarationError::Null => Vec::new(),
                    _ => vec![value.unwrap_or_default().to_string()],
                };
                diagnostics.report(error.code(), location, arguments);
                None
            }
        }
    }

    /// Returns true if this declaration names `assembly_name` (exact ordinal comparison).
    #[must_use]
    pub fn names(&self, assembly_name: &str) -> bool {
        self.assembly_name == assembly_name
    }
}

/// How a friend declaration relates to a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FriendClassification {
    /// Access is granted
    Match,
    /// Unsigned producer, strong-named consumer
    OneSignedOneNot,
    /// The declared key differs from the consumer's key
    PublicKeyDoesntMatch,
    /// A strong-named producer declared the friend without a key
    MissingKey,
}

impl FriendClassification {
    /// Classify one declaration that names the consumer.
    #[must_use]
    pub fn of(
        producer_public_key: &[u8],
        declaration: &FriendDeclaration,
        consumer_public_key: &[u8],
    ) -> Self {
        if producer_public_key.is_empty() {
            return if consumer_public_key.is_empty() {
                FriendClassification::Match
            } else {
                FriendClassification::OneSignedOneNot
            };
        }

        match &declaration.public_key {
            None => FriendClassification::MissingKey,
            Some(key) if key.as_slice() == consumer_public_key => FriendClassification::Match,
            Some(_) => FriendClassification::PublicKeyDoesntMatch,
        }
    }

    /// The grant this classification amounts to.
    #[must_use]
    pub fn grant(self) -> FriendGrantResult {
        match self {
            FriendClassification::Match | FriendClassification::OneSignedOneNot => {
                FriendGrantResult::Granted
            }
            FriendClassification::PublicKeyDoesntMatch => FriendGrantResult::DeniedMismatch,
            FriendClassification::MissingKey => FriendGrantResult::DeniedMissingKey,
        }
    }
}

/// Answer to a friend access query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendGrantResult {
    /// The consumer is a friend
    Granted,
    /// The declared key does not match the consumer's key
    DeniedMismatch,
    /// The strong-named producer declared the friend without a key
    DeniedMissingKey,
    /// The simple name matches; the key comparison waits for the consumer's final identity
    Deferred,
}

impl FriendGrantResult {
    /// Returns true if binding may proceed as if access was granted.
    ///
    /// Deferred grants count; they are re-validated before emit.
    #[must_use]
    pub fn is_granted(self) -> bool {
        matches!(self, FriendGrantResult::Granted | FriendGrantResult::Deferred)
    }
}

/// The consumer side of a friend query.
#[derive(Debug, Clone, Copy)]
pub enum ConsumerIdentity<'a> {
    /// The consumer's identity is final
    Final(&'a AssemblyIdentity),
    /// Only the consumer's simple name is known
    Pending {
        /// Simple name of the consumer
        name: &'a str,
    },
}

impl ConsumerIdentity<'_> {
    fn name(&self) -> &str {
        match self {
            ConsumerIdentity::Final(identity) => identity.name(),
            ConsumerIdentity::Pending { name } => name,
        }
    }
}

/// Evaluates a producer's friend declarations.
#[derive(Debug, Clone, Copy)]
pub struct FriendAccessResolver<'a> {
    producer: &'a AssemblyIdentity,
    declarations: &'a [FriendDeclaration],
}

impl<'a> FriendAccessResolver<'a> {
    /// A resolver for `producer` with its `declarations`.
    #[must_use]
    pub fn new(producer: &'a AssemblyIdentity, declarations: &'a [FriendDeclaration]) -> Self {
        FriendAccessResolver {
            producer,
            declarations,
        }
    }

    /// Classify the declarations naming `consumer`, keeping the most favorable outcome.
    ///
    /// Returns `None` if no declaration names the consumer.
    #[must_use]
    pub fn classify(&self, consumer: &AssemblyIdentity) -> Option<FriendClassification> {
        self.declarations
            .iter()
            .filter(|declaration| declaration.names(consumer.name()))
            .map(|declaration| {
                FriendClassification::of(
                    self.producer.public_key(),
                    declaration,
                    consumer.public_key(),
                )
            })
            .min()
    }

    /// Does the producer grant `consumer` access to its internals?
    ///
    /// Returns `None` if no declaration names the consumer, and
    /// [`FriendGrantResult::Deferred`] for a pending consumer whose name matches.
    #[must_use]
    pub fn grants_access_to(&self, consumer: ConsumerIdentity<'_>) -> Option<FriendGrantResult> {
        let result = match consumer {
            ConsumerIdentity::Pending { name } => self
                .declarations
                .iter()
                .any(|declaration| declaration.names(name))
                .then_some(FriendGrantResult::Deferred),
            ConsumerIdentity::Final(identity) => {
                self.classify(identity).map(FriendClassification::grant)
            }
        };

        debug!(
            producer = %self.producer.name(),
            consumer = %consumer.name(),
            result = ?result,
            "friend access query"
        );
        result
    }

    /// Final determination for a grant that was deferred while `consumer` computed its keys.
    ///
    /// A key mismatch or a missing key reports `FriendRefNotEqualToThis` naming both
    /// identities. An unsigned producer granting a strong-named consumer reports
    /// `FriendRefSigningMismatch`.
    pub fn revalidate(
        &self,
        consumer: &AssemblyIdentity,
        diagnostics: &Diagnostics,
    ) -> Option<FriendGrantResult> {
        let classification = self.classify(consumer)?;
        match classification {
            FriendClassification::Match => {}
            FriendClassification::PublicKeyDoesntMatch | FriendClassification::MissingKey => {
                diagnostics.report(
                    DiagnosticCode::FriendRefNotEqualToThis,
                    Location::Compilation,
                    [self.producer.display_name(), consumer.display_name()],
                );
            }
            FriendClassification::OneSignedOneNot => {
                diagnostics.report(
                    DiagnosticCode::FriendRefSigningMismatch,
                    Location::Compilation,
                    [self.producer.display_name()],
                );
                return Some(FriendGrantResult::DeniedMismatch);
            }
        }
        Some(classification.grant())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::identity::AssemblyIdentityBuilder,
        test::keys::{JOHN_PUBLIC_KEY_HEX, PUBLIC_A_SNK},
    };

    fn john_key() -> Vec<u8> {
        hex::decode(JOHN_PUBLIC_KEY_HEX).unwrap()
    }

    fn identity(name: &str, public_key: &[u8]) -> AssemblyIdentity {
        AssemblyIdentityBuilder::new(name).public_key(public_key).build()
    }

    #[test]
    fn parse_declarations() {
        let declaration = FriendDeclaration::parse(Some("  John  ")).unwrap();
        assert_eq!(declaration.assembly_name, "John");
        assert!(declaration.public_key.is_none());

        let value = format!("John, PublicKey={JOHN_PUBLIC_KEY_HEX}");
        let declaration = FriendDeclaration::parse(Some(&value)).unwrap();
        assert_eq!(declaration.public_key, Some(john_key()));

        let declaration =
            FriendDeclaration::parse(Some("John, PublicKeyToken=ce65828c82a341f2")).unwrap();
        assert!(declaration.public_key.is_none());
    }

    #[test]
    fn rejected_declarations() {
        assert_eq!(
            FriendDeclaration::parse(None),
            Err(FriendDeclarationError::Null)
        );
        assert_eq!(
            FriendDeclaration::parse(Some("John, Version=1.0.0.0")),
            Err(FriendDeclarationError::BadArguments)
        );
        assert_eq!(
            FriendDeclaration::parse(Some("John, Culture=neutral")),
            Err(FriendDeclarationError::BadArguments)
        );
        assert_eq!(
            FriendDeclaration::parse(Some("John, PublicKey=0024")),
            Err(FriendDeclarationError::InvalidName)
        );
        assert_eq!(
            FriendDeclaration::parse(Some("")),
            Err(FriendDeclarationError::InvalidName)
        );
    }

    #[test]
    fn decode_reports_diagnostics() {
        let diagnostics = Diagnostics::new();
        let location = Location::attribute("IVT", 0);

        assert!(FriendDeclaration::decode(None, location.clone(), &diagnostics).is_none());
        assert!(FriendDeclaration::decode(Some("x, Version=1.0"), location.clone(), &diagnostics)
            .is_none());
        assert!(FriendDeclaration::decode(Some(",,"), location, &diagnostics).is_none());

        let all: Vec<_> = diagnostics.iter().collect();
        assert!(all[0].is(DiagnosticCode::CannotPassNullForFriendAssembly, &[]));
        assert!(all[1].is(DiagnosticCode::FriendAssemblyBadArgs, &["x, Version=1.0"]));
        assert!(all[2].is(DiagnosticCode::InvalidAssemblyName, &[",,"]));
        assert!(diagnostics.has_warnings());
    }

    #[test]
    fn unsigned_producer_grants_by_name() {
        let producer = identity("Paul", &[]);
        let declarations = [FriendDeclaration::new("C", None)];
        let resolver = FriendAccessResolver::new(&producer, &declarations);

        let unsigned = identity("C", &[]);
        let signed = identity("C", PUBLIC_A_SNK);
        assert_eq!(
            resolver.grants_access_to(ConsumerIdentity::Final(&unsigned)),
            Some(FriendGrantResult::Granted)
        );
        assert_eq!(
            resolver.grants_access_to(ConsumerIdentity::Final(&signed)),
            Some(FriendGrantResult::Granted)
        );
        assert_eq!(
            resolver.classify(&signed),
            Some(FriendClassification::OneSignedOneNot)
        );

        let other = identity("D", &[]);
        assert_eq!(resolver.grants_access_to(ConsumerIdentity::Final(&other)), None);
    }

    #[test]
    fn name_match_is_ordinal() {
        let producer = identity("Paul", &[]);
        let declarations = [FriendDeclaration::new("John", None)];
        let resolver = FriendAccessResolver::new(&producer, &declarations);

        let consumer = identity("john", &[]);
        assert_eq!(resolver.grants_access_to(ConsumerIdentity::Final(&consumer)), None);
    }

    #[test]
    fn strong_named_producer_compares_full_key() {
        let producer = identity("Paul", PUBLIC_A_SNK);
        let declarations = [FriendDeclaration::new("John", Some(john_key()))];
        let resolver = FriendAccessResolver::new(&producer, &declarations);

        let john = identity("John", &john_key());
        assert_eq!(
            resolver.grants_access_to(ConsumerIdentity::Final(&john)),
            Some(FriendGrantResult::Granted)
        );

        let impostor = identity("John", PUBLIC_A_SNK);
        assert_eq!(
            resolver.grants_access_to(ConsumerIdentity::Final(&impostor)),
            Some(FriendGrantResult::DeniedMismatch)
        );
    }

    #[test]
    fn strong_named_producer_requires_key() {
        let producer = identity("Paul", PUBLIC_A_SNK);
        let declarations = [FriendDeclaration::new("John", None)];
        let resolver = FriendAccessResolver::new(&producer, &declarations);

        let john = identity("John", &john_key());
        assert_eq!(
            resolver.grants_access_to(ConsumerIdentity::Final(&john)),
            Some(FriendGrantResult::DeniedMissingKey)
        );
    }

    #[test]
    fn best_declaration_wins() {
        let producer = identity("Paul", PUBLIC_A_SNK);
        let declarations = [
            FriendDeclaration::new("John", None),
            FriendDeclaration::new("John", Some(PUBLIC_A_SNK.to_vec())),
            FriendDeclaration::new("John", Some(john_key())),
        ];
        let resolver = FriendAccessResolver::new(&producer, &declarations);

        let john = identity("John", &john_key());
        assert_eq!(resolver.classify(&john), Some(FriendClassification::Match));
    }

    #[test]
    fn pending_consumer_is_deferred() {
        let producer = identity("Paul", PUBLIC_A_SNK);
        let declarations = [FriendDeclaration::new("John", Some(john_key()))];
        let resolver = FriendAccessResolver::new(&producer, &declarations);

        let result = resolver.grants_access_to(ConsumerIdentity::Pending { name: "John" });
        assert_eq!(result, Some(FriendGrantResult::Deferred));
        assert!(result.unwrap().is_granted());
        assert_eq!(
            resolver.grants_access_to(ConsumerIdentity::Pending { name: "Ringo" }),
            None
        );
    }

    #[test]
    fn revalidation_reports_mismatch() {
        let producer = identity("Paul", PUBLIC_A_SNK);
        let declarations = [FriendDeclaration::new("John", Some(john_key()))];
        let resolver = FriendAccessResolver::new(&producer, &declarations);
        let impostor = identity("John", PUBLIC_A_SNK);

        let diagnostics = Diagnostics::new();
        assert_eq!(
            resolver.revalidate(&impostor, &diagnostics),
            Some(FriendGrantResult::DeniedMismatch)
        );
        let diagnostic = diagnostics.iter().next().unwrap();
        assert_eq!(diagnostic.code, DiagnosticCode::FriendRefNotEqualToThis);
        assert_eq!(diagnostic.arguments[0], producer.display_name());
        assert_eq!(diagnostic.arguments[1], impostor.display_name());
    }

    #[test]
    fn revalidation_reports_signing_mismatch() {
        let producer = identity("Paul", &[]);
        let declarations = [FriendDeclaration::new("John", None)];
        let resolver = FriendAccessResolver::new(&producer, &declarations);
        let john = identity("John", &john_key());

        let diagnostics = Diagnostics::new();
        assert_eq!(
            resolver.revalidate(&john, &diagnostics),
            Some(FriendGrantResult::DeniedMismatch)
        );
        assert!(diagnostics.iter().next().unwrap().is(
            DiagnosticCode::FriendRefSigningMismatch,
            &[producer.display_name().as_str()]
        ));
    }

    #[test]
    fn revalidation_match_is_silent() {
        let producer = identity("Paul", PUBLIC_A_SNK);
        let declarations = [FriendDeclaration::new("John", Some(john_key()))];
        let resolver = FriendAccessResolver::new(&producer, &declarations);

        let diagnostics = Diagnostics::new();
        let john = identity("John", &john_key());
        assert_eq!(
            resolver.revalidate(&john, &diagnostics),
            Some(FriendGrantResult::Granted)
        );
        assert!(!diagnostics.has_any());
    }
}
