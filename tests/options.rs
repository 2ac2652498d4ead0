//! Integration tests for option validation and option/attribute precedence.

use std::path::PathBuf;

use dotsign::{prelude::*, signing::attributes::ASSEMBLY_KEY_FILE_ATTRIBUTE, Result};

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn token(compilation: &Compilation) -> Option<String> {
    compilation
        .identity()
        .public_key_token()
        .map(|t| t.to_string())
}

#[test]
fn container_and_public_sign() {
    let options = CompilationOptions::new()
        .with_crypto_key_container(Some("testContainer"))
        .with_public_sign(true);
    let compilation = Compilation::new("Paul").with_options(options);

    let diagnostics = compilation.analyze();
    assert_eq!(diagnostics.count(), 2);
    let all: Vec<_> = diagnostics.iter().collect();
    assert!(all[0].is(
        DiagnosticCode::MutuallyExclusiveOptions,
        &["PublicSign", "CryptoKeyContainer"]
    ));
    assert!(all[1].is(DiagnosticCode::PublicSignButNoKey, &[]));

    assert_eq!(
        compilation.options().crypto_key_container(),
        Some("testContainer")
    );
    assert!(compilation.options().public_sign());
}

#[test]
fn public_key_and_key_file_are_exclusive() -> Result<()> {
    let material = KeyMaterial::from_key_bytes(&std::fs::read(fixture("public_a.snk"))?)?;
    let options = CompilationOptions::new()
        .with_crypto_public_key(material.public_key().to_vec())
        .with_crypto_key_file(Some(fixture("keypair_b.snk")));
    let compilation = Compilation::new("Paul").with_options(options);

    let diagnostics = compilation.analyze();
    assert!(diagnostics.iter().next().unwrap().is(
        DiagnosticCode::MutuallyExclusiveOptions,
        &["CryptoPublicKey", "CryptoKeyFile"]
    ));
    assert_eq!(token(&compilation).as_deref(), Some("da8118bfba24a1d7"));
    assert!(matches!(
        compilation.signing_decision(),
        SigningDecision::FullSign(_)
    ));
    Ok(())
}

#[test]
fn key_file_and_key_container_are_exclusive() {
    let options = CompilationOptions::new()
        .with_crypto_key_file(Some(fixture("keypair_a.snk")))
        .with_crypto_key_container(Some("testContainer"));
    let compilation = Compilation::new("Paul").with_options(options);

    let diagnostics = compilation.analyze();
    assert!(diagnostics.iter().next().unwrap().is(
        DiagnosticCode::MutuallyExclusiveOptions,
        &["CryptoKeyFile", "CryptoKeyContainer"]
    ));
    assert!(diagnostics.has_errors());
    assert!(matches!(
        compilation.emit(&PeBuilder::new(), &CancellationFlag::new()),
        Err(dotsign::Error::EmitFailed(_))
    ));
}

#[test]
fn invalid_public_key_option() {
    let options = CompilationOptions::new().with_crypto_public_key(vec![0x00, 0x24, 0xAB]);
    let compilation = Compilation::new("Paul").with_options(options);

    let diagnostics = compilation.analyze();
    assert!(diagnostics.iter().next().unwrap().is(
        DiagnosticCode::BadCompilationOptionValue,
        &["CryptoPublicKey", "00-24-AB"]
    ));
    assert!(!compilation.identity().is_strong_named());
}

#[test]
fn option_overrides_attribute() {
    let compilation = Compilation::new("Paul")
        .with_options(CompilationOptions::new().with_crypto_key_file(Some(fixture("keypair_a.snk"))))
        .with_attribute(SourceAttribute::key_file(fixture("keypair_b.snk")));

    let diagnostics = compilation.analyze();
    assert_eq!(diagnostics.count(), 1);
    let warning = diagnostics.iter().next().unwrap();
    assert!(warning.is(
        DiagnosticCode::CmdOptionConflictsSourceWarning,
        &["CryptoKeyFile", ASSEMBLY_KEY_FILE_ATTRIBUTE]
    ));
    assert!(matches!(warning.location, Location::Attribute { index: 0, .. }));
    assert_eq!(token(&compilation).as_deref(), Some("da8118bfba24a1d7"));
}

#[test]
fn matching_option_and_attribute_do_not_warn() {
    let path = fixture("keypair_a.snk");
    let compilation = Compilation::new("Paul")
        .with_options(CompilationOptions::new().with_crypto_key_file(Some(path.clone())))
        .with_attribute(SourceAttribute::key_file(path.to_uppercase()));

    assert!(!compilation.analyze().has_any());
}

#[test]
fn key_file_beats_key_container() {
    let compilation = Compilation::new("Paul")
        .with_attribute(SourceAttribute::key_name("testContainer"))
        .with_attribute(SourceAttribute::key_file(fixture("keypair_b.snk")));

    assert!(!compilation.analyze().has_any());
    assert_eq!(token(&compilation).as_deref(), Some("e817f6ef80a13b9c"));
}

#[test]
fn empty_attribute_values_are_absent() {
    let compilation = Compilation::new("Paul")
        .with_attribute(SourceAttribute::key_file(""))
        .with_attribute(SourceAttribute::key_name(""));

    assert!(!compilation.analyze().has_any());
    assert!(matches!(
        compilation.signing_decision(),
        SigningDecision::Unsigned
    ));
}

#[test]
fn public_sign_ignores_key_attributes() {
    let compilation = Compilation::new("Paul")
        .with_options(
            CompilationOptions::new()
                .with_crypto_key_file(Some(fixture("public_a.snk")))
                .with_public_sign(true),
        )
        .with_attribute(SourceAttribute::key_file(fixture("keypair_b.snk")))
        .with_attribute(SourceAttribute::delay_sign(true));

    let diagnostics = compilation.analyze();
    assert!(!diagnostics.has_errors());
    assert!(diagnostics.contains(DiagnosticCode::AttributeIgnoredWhenPublicSigning));
    assert!(diagnostics
        .by_code(DiagnosticCode::CmdOptionConflictsSourceWarning)
        .iter()
        .any(|d| d.arguments[0] == "PublicSign"));

    assert!(!compilation.is_delay_signed());
    assert_eq!(token(&compilation).as_deref(), Some("da8118bfba24a1d7"));
    assert!(matches!(
        compilation.signing_decision(),
        SigningDecision::PublicSignOnly(_)
    ));
}

#[test]
fn public_sign_requires_absolute_key_file() {
    let compilation = Compilation::new("Paul").with_options(
        CompilationOptions::new()
            .with_crypto_key_file(Some("public_a.snk"))
            .with_public_sign(true),
    );

    let diagnostics = compilation.analyze();
    let codes: Vec<_> = diagnostics.iter().map(|d| d.code).collect();
    assert_eq!(
        codes,
        [
            DiagnosticCode::OptionMustBeAbsolutePath,
            DiagnosticCode::PublicSignButNoKey
        ]
    );
}

#[test]
fn delay_sign_option_overrides_attribute() {
    let compilation = Compilation::new("Paul")
        .with_options(
            CompilationOptions::new()
                .with_crypto_key_file(Some(fixture("keypair_a.snk")))
                .with_delay_sign(Some(false)),
        )
        .with_attribute(SourceAttribute::delay_sign(true));

    assert!(compilation
        .analyze()
        .by_code(DiagnosticCode::CmdOptionConflictsSourceWarning)
        .iter()
        .any(|d| d.arguments[0] == "DelaySign"));
    assert!(!compilation.is_delay_signed());
    assert!(matches!(
        compilation.signing_decision(),
        SigningDecision::FullSign(_)
    ));
}
