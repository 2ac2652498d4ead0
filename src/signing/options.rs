//! Compilation option snapshot for the signing surface.
//!
//! [`CompilationOptions`] is an immutable value: every `with_*` method returns a new snapshot,
//! and [`CompilationOptions::validate`] only reports problems, never rewrites values. A
//! configuration with conflicting options therefore survives unchanged and can be inspected
//! after diagnostics have been produced.

use std::path::Path;

use crate::{
    metadata::diagnostics::{DiagnosticCode, Diagnostics, Location},
    signing::keys::snk::is_valid_public_key,
};

/// Kind of output a compilation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    /// A `.dll` assembly
    #[default]
    DynamicallyLinkedLibrary,
    /// A console `.exe` assembly
    ConsoleApplication,
    /// A `.netmodule` without an assembly manifest
    NetModule,
}

impl OutputKind {
    /// Returns true for [`OutputKind::NetModule`].
    #[must_use]
    pub fn is_net_module(self) -> bool {
        matches!(self, OutputKind::NetModule)
    }
}

/// Signing-related compilation options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompilationOptions {
    output_kind: OutputKind,
    crypto_key_file: Option<String>,
    crypto_key_container: Option<String>,
    crypto_public_key: Vec<u8>,
    delay_sign: Option<bool>,
    public_sign: bool,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl CompilationOptions {
    /// Options for a library with no signing configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output kind.
    #[must_use]
    pub fn with_output_kind(mut self, output_kind: OutputKind) -> Self {
        self.output_kind = output_kind;
        self
    }

    /// Set or clear the key file.
    #[must_use]
    pub fn with_crypto_key_file(mut self, path: Option<impl Into<String>>) -> Self {
        self.crypto_key_file = path.map(Into::into);
        self
    }

    /// Set or clear the key container.
    #[must_use]
    pub fn with_crypto_key_container(mut self, name: Option<impl Into<String>>) -> Self {
        self.crypto_key_container = name.map(Into::into);
        self
    }

    /// Set the inline public key. An empty key clears it.
    #[must_use]
    pub fn with_crypto_public_key(mut self, public_key: Vec<u8>) -> Self {
        self.crypto_public_key = public_key;
        self
    }

    /// Set or clear the delay-sign option.
    #[must_use]
    pub fn with_delay_sign(mut self, delay_sign: Option<bool>) -> Self {
        self.delay_sign = delay_sign;
        self
    }

    /// Enable or disable public signing.
    #[must_use]
    pub fn with_public_sign(mut self, public_sign: bool) -> Self {
        self.public_sign = public_sign;
        self
    }

    /// The output kind.
    #[must_use]
    pub fn output_kind(&self) -> OutputKind {
        self.output_kind
    }

    /// The key file as configured.
    #[must_use]
    pub fn crypto_key_file(&self) -> Option<&str> {
        self.crypto_key_file.as_deref()
    }

    /// The key container as configured.
    #[must_use]
    pub fn crypto_key_container(&self) -> Option<&str> {
        self.crypto_key_container.as_deref()
    }

    /// The inline public key, empty if not set.
    #[must_use]
    pub fn crypto_public_key(&self) -> &[u8] {
        &self.crypto_public_key
    }

    /// The delay-sign option, `None` if not given.
    #[must_use]
    pub fn delay_sign(&self) -> Option<bool> {
        self.delay_sign
    }

    /// Whether public signing is requested.
    #[must_use]
    pub fn public_sign(&self) -> bool {
        self.public_sign
    }

    /// The key file if set and non-empty.
    pub(crate) fn key_file(&self) -> Option<&str> {
        non_empty(&self.crypto_key_file)
    }

    /// The key container if set and non-empty.
    pub(crate) fn key_container(&self) -> Option<&str> {
        non_empty(&self.crypto_key_container)
    }

    /// Report option-level conflicts.
    ///
    /// Produces:
    /// - `MutuallyExclusiveOptions` for an inline public key combined with a key file or a key
    ///   container, for a key file combined with a key container, and for public signing
    ///   combined with a key container or `DelaySign=true`
    /// - `BadCompilationOptionValue` for an inline public key that is not a valid key blob
    /// - `OptionMustBeAbsolutePath` for a relative key file under public signing
    pub fn validate(&self, diagnostics: &Diagnostics) {
        if !self.crypto_public_key.is_empty() {
            if self.crypto_key_file.is_some() {
                diagnostics.report(
                    DiagnosticCode::MutuallyExclusiveOptions,
                    Location::Compilation,
                    ["CryptoPublicKey", "CryptoKeyFile"],
                );
            }
            if self.crypto_key_container.is_some() {
                diagnostics.report(
                    DiagnosticCode::MutuallyExclusiveOptions,
                    Location::Compilation,
                    ["CryptoPublicKey", "CryptoKeyContainer"],
                );
            }
            if !is_valid_public_key(&self.crypto_public_key) {
                let dashed = self
                    .crypto_public_key
                    .iter()
                    .map(|b| format!("{b:02X}"))
                    .collect::<Vec<_>>()
                    .join("-");
                diagnostics.report(
                    DiagnosticCode::BadCompilationOptionValue,
                    Location::Compilation,
                    ["CryptoPublicKey".to_string(), dashed],
                );
            }
        } else if self.key_file().is_some() && self.key_container().is_some() {
            diagnostics.report(
                DiagnosticCode::MutuallyExclusiveOptions,
                Location::Compilation,
                ["CryptoKeyFile", "CryptoKeyContainer"],
            );
        }

        if self.public_sign {
            if let Some(key_file) = self.key_file() {
                if !Path::new(key_file).is_absolute() {
                    diagnostics.report(
                        DiagnosticCode::OptionMustBeAbsolutePath,
                        Location::Compilation,
                        ["CryptoKeyFile"],
                    );
                }
            }
            if self.crypto_key_container.is_some() {
                diagnostics.report(
                    DiagnosticCode::MutuallyExclusiveOptions,
                    Location::Compilation,
                    ["PublicSign", "CryptoKeyContainer"],
                );
            }
            if self.delay_sign == Some(true) {
                diagnostics.report(
                    DiagnosticCode::MutuallyExclusiveOptions,
                    Location::Compilation,
                    ["PublicSign", "DelaySign"],
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::keys::PUBLIC_A_SNK;

    fn validate(options: &CompilationOptions) -> Diagnostics {
        let diagnostics = Diagnostics::new();
        options.validate(&diagnostics);
        diagnostics
    }

    #[test]
    fn clean_options() {
        let options = CompilationOptions::new().with_crypto_key_file(Some("key.snk"));
        assert!(!validate(&options).has_any());
    }

    #[test]
    fn public_key_with_key_file_and_container() {
        let options = CompilationOptions::new()
            .with_crypto_public_key(PUBLIC_A_SNK.to_vec())
            .with_crypto_key_file(Some("key.snk"))
            .with_crypto_key_container(Some("container"));

        let diagnostics = validate(&options);
        let all: Vec<_> = diagnostics.iter().collect();
        assert_eq!(all.len(), 2);
        assert!(all[0].is(
            DiagnosticCode::MutuallyExclusiveOptions,
            &["CryptoPublicKey", "CryptoKeyFile"]
        ));
        assert!(all[1].is(
            DiagnosticCode::MutuallyExclusiveOptions,
            &["CryptoPublicKey", "CryptoKeyContainer"]
        ));
    }

    #[test]
    fn key_file_and_container() {
        let options = CompilationOptions::new()
            .with_crypto_key_file(Some("key.snk"))
            .with_crypto_key_container(Some("container"));

        let diagnostics = validate(&options);
        assert_eq!(diagnostics.count(), 1);
        assert!(diagnostics.iter().next().unwrap().is(
            DiagnosticCode::MutuallyExclusiveOptions,
            &["CryptoKeyFile", "CryptoKeyContainer"]
        ));
        assert_eq!(options.crypto_key_file(), Some("key.snk"));
        assert_eq!(options.crypto_key_container(), Some("container"));
    }

    #[test]
    fn invalid_public_key() {
        let options = CompilationOptions::new().with_crypto_public_key(vec![0x00, 0x24, 0xAB]);
        let diagnostics = validate(&options);
        assert_eq!(diagnostics.count(), 1);
        assert!(diagnostics.iter().next().unwrap().is(
            DiagnosticCode::BadCompilationOptionValue,
            &["CryptoPublicKey", "00-24-AB"]
        ));
    }

    #[test]
    fn public_sign_with_container_keeps_values() {
        let options = CompilationOptions::new()
            .with_crypto_key_container(Some("roslynTestContainer"))
            .with_public_sign(true);

        let diagnostics = validate(&options);
        assert_eq!(diagnostics.count(), 1);
        assert!(diagnostics.iter().next().unwrap().is(
            DiagnosticCode::MutuallyExclusiveOptions,
            &["PublicSign", "CryptoKeyContainer"]
        ));

        assert_eq!(options.crypto_key_container(), Some("roslynTestContainer"));
        assert!(options.public_sign());
    }

    #[test]
    fn public_sign_with_delay_sign() {
        let diagnostics = validate(
            &CompilationOptions::new()
                .with_public_sign(true)
                .with_delay_sign(Some(true)),
        );
        assert!(diagnostics
            .iter()
            .any(|d| d.is(DiagnosticCode::MutuallyExclusiveOptions, &["PublicSign", "DelaySign"])));

        let diagnostics = validate(
            &CompilationOptions::new()
                .with_public_sign(true)
                .with_delay_sign(Some(false)),
        );
        assert!(!diagnostics.has_any());
    }

    #[test]
    fn public_sign_relative_key_file() {
        let diagnostics = validate(
            &CompilationOptions::new()
                .with_public_sign(true)
                .with_crypto_key_file(Some("relative.snk")),
        );
        assert!(diagnostics
            .iter()
            .any(|d| d.is(DiagnosticCode::OptionMustBeAbsolutePath, &["CryptoKeyFile"])));

        let diagnostics = validate(
            &CompilationOptions::new()
                .with_public_sign(true)
                .with_crypto_key_file(Some("")),
        );
        assert!(!diagnostics.has_any());
    }

    #[test]
    fn empty_strings_are_absent() {
        let options = CompilationOptions::new()
            .with_crypto_key_file(Some(""))
            .with_crypto_key_container(Some(""));
        assert_eq!(options.key_file(), None);
        assert_eq!(options.key_container(), None);
        assert_eq!(options.crypto_key_file(), Some(""));
    }
}
