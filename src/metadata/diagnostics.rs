//! Diagnostics reported while resolving signing configuration and friend trust.
//!
//! This module provides the diagnostic bag the compiler host hands to every component of this
//! crate. Option conflicts, key-material failures, malformed friend declarations and friend
//! mismatches are not [`crate::Error`]s: they are recorded here so analysis can continue and the
//! host can decide whether emit may proceed.
//!
//! # Architecture
//!
//! Each [`Diagnostic`] carries a stable [`DiagnosticCode`] (rendered in the familiar `CSnnnn`
//! form), the raw message arguments and a [`Location`]. Option-driven conditions are attributed
//! to the whole compilation; conditions caused by a source attribute point at that attribute.
//!
//! The [`Diagnostics`] container uses `boxcar::Vec` for thread-safe, lock-free append operations,
//! so reentrant queries arriving from several binders can report without synchronization.
//!
//! # Key Components
//!
//! - [`Diagnostics`] - Thread-safe container for diagnostic entries
//! - [`Diagnostic`] - Individual diagnostic entry with code, arguments and location
//! - [`DiagnosticCode`] - Every condition this crate can report
//! - [`DiagnosticSeverity`] - Severity level (Info, Warning, Error)
//! - [`Location`] - Where a diagnostic is attributed
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use dotsign::metadata::diagnostics::{Diagnostics, DiagnosticCode, Location};
//!
//! let diagnostics = Diagnostics::new();
//! diagnostics.report(
//!     DiagnosticCode::MutuallyExclusiveOptions,
//!     Location::Compilation,
//!     ["CryptoPublicKey", "CryptoKeyFile"],
//! );
//!
//! if diagnostics.has_errors() {
//!     for entry in diagnostics.iter() {
//!         println!("{entry}");
//!     }
//! }
//! ```
//!
//! # Thread Safety
//!
//! All types in this module are [`Send`] and [`Sync`].

use std::fmt::{self, Write};

use strum::{EnumCount, EnumIter};

/// Severity level of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticSeverity {
    /// Informational message, not indicating a problem.
    Info,

    /// Warning about a configuration that was resolved by precedence.
    ///
    /// Compilation and emit continue.
    Warning,

    /// Error that prevents a usable output from being emitted.
    ///
    /// Analysis continues so that unrelated problems are still reported.
    Error,
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticSeverity::Info => write!(f, "info"),
            DiagnosticSeverity::Warning => write!(f, "warning"),
            DiagnosticSeverity::Error => write!(f, "error"),
        }
    }
}

/// Every condition reported by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount)]
pub enum DiagnosticCode {
    /// A member is not accessible from the consuming assembly
    BadAccess,
    /// Friend grant exists but the consumer's public key does not match the declared one
    FriendRefNotEqualToThis,
    /// A compilation option overrides a source attribute
    CmdOptionConflictsSourceWarning,
    /// An `InternalsVisibleTo` argument is not a valid assembly name
    InvalidAssemblyName,
    /// An `InternalsVisibleTo` argument carries parts other than name and key
    FriendAssemblyBadArgs,
    /// A strong-named assembly declared a friend without a public key
    FriendAssemblySNReq,
    /// A key file could not be read or decoded
    PublicKeyFileFailure,
    /// A key container could not be opened
    PublicKeyContainerFailure,
    /// Friend grant exists but the producer and consumer disagree on being strong-named
    FriendRefSigningMismatch,
    /// `InternalsVisibleTo(null)`
    CannotPassNullForFriendAssembly,
    /// Real signing was requested with a public-only key
    SignButNoPrivateKey,
    /// Delay signing was requested without any key
    DelaySignButNoKey,
    /// An option value could not be decoded
    BadCompilationOptionValue,
    /// A source attribute conflicts with an option in a module compilation
    CmdOptionConflictsSourceError,
    /// Two options cannot be combined
    MutuallyExclusiveOptions,
    /// A key attribute is ignored because public signing is on
    AttributeIgnoredWhenPublicSigning,
    /// `AssemblySignatureKeyAttribute` carries an unusable public key
    InvalidSignaturePublicKey,
    /// Public signing was requested without any key
    PublicSignButNoKey,
    /// An option path must be absolute
    OptionMustBeAbsolutePath,
    /// Public signing was requested for a netmodule
    PublicSignNetModule,
}

impl DiagnosticCode {
    /// The numeric compiler diagnostic number.
    #[must_use]
    pub fn number(self) -> u16 {
        match self {
            DiagnosticCode::BadAccess => 122,
            DiagnosticCode::FriendRefNotEqualToThis => 281,
            DiagnosticCode::CmdOptionConflictsSourceWarning => 1616,
            DiagnosticCode::InvalidAssemblyName => 1700,
            DiagnosticCode::FriendAssemblyBadArgs => 1725,
            DiagnosticCode::FriendAssemblySNReq => 1726,
            DiagnosticCode::PublicKeyFileFailure => 7027,
            DiagnosticCode::PublicKeyContainerFailure => 7028,
            DiagnosticCode::FriendRefSigningMismatch => 7029,
            DiagnosticCode::CannotPassNullForFriendAssembly => 7030,
            DiagnosticCode::SignButNoPrivateKey => 7032,
            DiagnosticCode::DelaySignButNoKey => 7033,
            DiagnosticCode::BadCompilationOptionValue => 7088,
            DiagnosticCode::CmdOptionConflictsSourceError => 7091,
            DiagnosticCode::MutuallyExclusiveOptions => 7102,
            DiagnosticCode::AttributeIgnoredWhenPublicSigning => 7103,
            DiagnosticCode::InvalidSignaturePublicKey => 8003,
            DiagnosticCode::PublicSignButNoKey => 8102,
            DiagnosticCode::OptionMustBeAbsolutePath => 8106,
            DiagnosticCode::PublicSignNetModule => 8201,
        }
    }

    /// Default severity of this code.
    #[must_use]
    pub fn severity(self) -> DiagnosticSeverity {
        match self {
            DiagnosticCode::CmdOptionConflictsSourceWarning
            | DiagnosticCode::InvalidAssemblyName
            | DiagnosticCode::DelaySignButNoKey
            | DiagnosticCode::AttributeIgnoredWhenPublicSigning => DiagnosticSeverity::Warning,
            _ => DiagnosticSeverity::Error,
        }
    }

    /// Message template, with `{0}`, `{1}` placeholders for the arguments.
    #[must_use]
    pub fn template(self) -> &'static str {
        match self {
            DiagnosticCode::BadAccess => "'{0}' is inaccessible due to its protection level",
            DiagnosticCode::FriendRefNotEqualToThis => "Friend access was granted by '{0}', but the public key of the output assembly ('{1}') does not match that specified by the InternalsVisibleTo attribute in the granting assembly.",
            DiagnosticCode::CmdOptionConflictsSourceWarning => "Option '{0}' overrides attribute '{1}' given in a source file or added module",
            DiagnosticCode::InvalidAssemblyName => "Assembly reference '{0}' is invalid and cannot be resolved",
            DiagnosticCode::FriendAssemblyBadArgs => "Friend assembly reference '{0}' is invalid. InternalsVisibleTo declarations cannot have a version, culture, public key token, or processor architecture specified.",
            DiagnosticCode::FriendAssemblySNReq => "Friend assembly reference '{0}' is invalid. Strong-name signed assemblies must specify a public key in their InternalsVisibleTo declarations.",
            DiagnosticCode::PublicKeyFileFailure => "Error signing output with public key from file '{0}' -- {1}",
            DiagnosticCode::PublicKeyContainerFailure => "Error signing output with public key from container '{0}' -- {1}",
            DiagnosticCode::FriendRefSigningMismatch => "Friend access was granted by '{0}', but the strong name signing state of the output assembly does not match that of the granting assembly.",
            DiagnosticCode::CannotPassNullForFriendAssembly => "Cannot pass null for friend assembly name",
            DiagnosticCode::SignButNoPrivateKey => "Key file '{0}' is missing the private key needed for signing",
            DiagnosticCode::DelaySignButNoKey => "Delay signing was specified and requires a public key, but no public key was specified",
            DiagnosticCode::BadCompilationOptionValue => "Invalid '{0}' value: '{1}'.",
            DiagnosticCode::CmdOptionConflictsSourceError => "Attribute '{0}' given in a source file conflicts with option '{1}'.",
            DiagnosticCode::MutuallyExclusiveOptions => "Compilation options '{0}' and '{1}' can't both be specified at the same time.",
            DiagnosticCode::AttributeIgnoredWhenPublicSigning => "Attribute '{0}' is ignored when public signing is specified.",
            DiagnosticCode::InvalidSignaturePublicKey => "Invalid signature public key specified in AssemblySignatureKeyAttribute.",
            DiagnosticCode::PublicSignButNoKey => "Public signing was specified and requires a public key, but no public key was specified.",
            DiagnosticCode::OptionMustBeAbsolutePath => "Option '{0}' must be an absolute path.",
            DiagnosticCode::PublicSignNetModule => "Public signing is not supported for netmodules.",
        }
    }

    /// Substitute `arguments` into the template.
    #[must_use]
    pub fn format(self, arguments: &[String]) -> String {
        let mut message = self.template().to_string();
        for (index, argument) in arguments.iter().enumerate() {
            message = message.replace(&format!("{{{index}}}"), argument);
        }
        message
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CS{:04}", self.number())
    }
}

/// Where a diagnostic is attributed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// The compilation as a whole (option-driven conditions)
    Compilation,
    /// A source attribute, identified by its full type name and its position in declaration order
    Attribute {
        /// Full name of the attribute type
        attribute: String,
        /// Zero-based index among the attributes of the compilation
        index: usize,
    },
}

impl Location {
    /// Location for the `index`th attribute named `attribute`.
    pub fn attribute(attribute: impl Into<String>, index: usize) -> Self {
        Location::Attribute {
            attribute: attribute.into(),
            index,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Compilation => write!(f, "<compilation>"),
            Location::Attribute { attribute, index } => write!(f, "[{attribute}]#{index}"),
        }
    }
}

/// A single diagnostic entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level of this diagnostic.
    pub severity: DiagnosticSeverity,

    /// What was reported.
    pub code: DiagnosticCode,

    /// Human-readable description of the issue.
    pub message: String,

    /// The raw message arguments, in template order.
    pub arguments: Vec<String>,

    /// Where the issue is attributed.
    pub location: Location,
}

impl Diagnostic {
    /// Creates a new diagnostic entry with the code's default severity.
    ///
    /// # Arguments
    ///
    /// * `code` - What is being reported
    /// * `location` - Where it is attributed
    /// * `arguments` - Values substituted into the code's message template
    pub fn new<I, S>(code: DiagnosticCode, location: Location, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let arguments: Vec<String> = arguments.into_iter().map(Into::into).collect();
        Self {
            severity: code.severity(),
            code,
            message: code.format(&arguments),
            arguments,
            location,
        }
    }

    /// Returns true if this entry is `code` with exactly `arguments`.
    pub fn is(&self, code: DiagnosticCode, arguments: &[&str]) -> bool {
        self.code == code && self.arguments.iter().map(String::as_str).eq(arguments.iter().copied())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}: {}",
            self.location, self.severity, self.code, self.message
        )
    }
}

/// Thread-safe container for collecting diagnostic entries.
///
/// Uses `boxcar::Vec` internally for lock-free concurrent append operations.
#[derive(Debug)]
pub struct Diagnostics {
    entries: boxcar::Vec<Diagnostic>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    /// Creates a new empty diagnostics container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: boxcar::Vec::new(),
        }
    }

    /// Records `code` at `location` with the given message arguments.
    pub fn report<I, S>(&self, code: DiagnosticCode, location: Location, arguments: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(Diagnostic::new(code, location, arguments));
    }

    /// Adds a diagnostic entry directly.
    pub fn push(&self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    /// Copies every entry of `other` into this bag.
    pub fn extend_from(&self, other: &Diagnostics) {
        for diagnostic in other.iter() {
            self.push(diagnostic.clone());
        }
    }

    /// Returns true if any diagnostics have been collected.
    pub fn has_any(&self) -> bool {
        self.entries.count() > 0
    }

    /// Returns true if any error-level diagnostics have been collected.
    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, d)| d.severity == DiagnosticSeverity::Error)
    }

    /// Returns true if any warning-level diagnostics have been collected.
    pub fn has_warnings(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, d)| d.severity == DiagnosticSeverity::Warning)
    }

    /// Returns true if an entry with `code` has been collected.
    pub fn contains(&self, code: DiagnosticCode) -> bool {
        self.entries.iter().any(|(_, d)| d.code == code)
    }

    /// Returns the total number of diagnostics.
    pub fn count(&self) -> usize {
        self.entries.count()
    }

    /// Returns the number of error-level diagnostics.
    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, d)| d.severity == DiagnosticSeverity::Error)
            .count()
    }

    /// Returns the number of warning-level diagnostics.
    pub fn warning_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, d)| d.severity == DiagnosticSeverity::Warning)
            .count()
    }

    /// Returns an iterator over all diagnostics.
    ///
    /// Note: Uses boxcar's iterator which yields `(index, &Diagnostic)` tuples.
    /// The index can be ignored in most cases.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().map(|(_, d)| d)
    }

    /// Returns all errors as a vector.
    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.entries
            .iter()
            .filter(|(_, d)| d.severity == DiagnosticSeverity::Error)
            .map(|(_, d)| d)
            .collect()
    }

    /// Returns all warnings as a vector.
    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.entries
            .iter()
            .filter(|(_, d)| d.severity == DiagnosticSeverity::Warning)
            .map(|(_, d)| d)
            .collect()
    }

    /// Returns diagnostics with the given code.
    pub fn by_code(&self, code: DiagnosticCode) -> Vec<&Diagnostic> {
        self.entries
            .iter()
            .filter(|(_, d)| d.code == code)
            .map(|(_, d)| d)
            .collect()
    }

    /// Formats a summary of all diagnostics for display.
    pub fn summary(&self) -> String {
        let mut output = String::new();

        let _ = writeln!(
            output,
            "Diagnostics: {} error(s), {} warning(s)",
            self.error_count(),
            self.warning_count()
        );

        for diag in self.iter() {
            let _ = writeln!(output, "  {diag}");
        }

        output
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use strum::IntoEnumIterator;

    #[test]
    fn codes_are_unique() {
        let numbers: HashSet<u16> = DiagnosticCode::iter().map(DiagnosticCode::number).collect();
        assert_eq!(numbers.len(), DiagnosticCode::COUNT);
    }

    #[test]
    fn code_display() {
        assert_eq!(DiagnosticCode::BadAccess.to_string(), "CS0122");
        assert_eq!(DiagnosticCode::PublicSignNetModule.to_string(), "CS8201");
    }

    #[test]
    fn message_formatting() {
        let diag = Diagnostic::new(
            DiagnosticCode::PublicKeyFileFailure,
            Location::Compilation,
            ["bogus", "File not found"],
        );

        assert_eq!(diag.severity, DiagnosticSeverity::Error);
        assert_eq!(
            diag.message,
            "Error signing output with public key from file 'bogus' -- File not found"
        );
        assert!(diag.is(
            DiagnosticCode::PublicKeyFileFailure,
            &["bogus", "File not found"]
        ));
        assert!(!diag.is(DiagnosticCode::PublicKeyFileFailure, &["bogus"]));
    }

    #[test]
    fn warning_severity() {
        let diag = Diagnostic::new(
            DiagnosticCode::InvalidAssemblyName,
            Location::attribute("System.Runtime.CompilerServices.InternalsVisibleToAttribute", 0),
            ["x,,"],
        );
        assert_eq!(diag.severity, DiagnosticSeverity::Warning);
        assert!(diag.to_string().contains("CS1700"));
        assert!(diag.to_string().contains("InternalsVisibleToAttribute"));
    }

    #[test]
    fn container_counts() {
        let diagnostics = Diagnostics::new();

        diagnostics.report(DiagnosticCode::DelaySignButNoKey, Location::Compilation, [""; 0]);
        diagnostics.report(DiagnosticCode::PublicSignButNoKey, Location::Compilation, [""; 0]);

        assert_eq!(diagnostics.count(), 2);
        assert_eq!(diagnostics.error_count(), 1);
        assert_eq!(diagnostics.warning_count(), 1);
        assert!(diagnostics.contains(DiagnosticCode::PublicSignButNoKey));
        assert!(!diagnostics.contains(DiagnosticCode::BadAccess));
        assert_eq!(diagnostics.by_code(DiagnosticCode::DelaySignButNoKey).len(), 1);
        assert!(diagnostics.summary().contains("1 error(s), 1 warning(s)"));
    }

    #[test]
    fn thread_safety() {
        let diagnostics = Arc::new(Diagnostics::new());
        let mut handles = vec![];

        for i in 0..10 {
            let diag_clone = Arc::clone(&diagnostics);
            handles.push(thread::spawn(move || {
                diag_clone.report(
                    DiagnosticCode::InvalidAssemblyName,
                    Location::Compilation,
                    [format!("Friend{i},,")],
                );
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(diagnostics.count(), 10);
    }
}
