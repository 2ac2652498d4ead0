//! Integration tests for netmodule signing markers.

use std::{path::PathBuf, sync::Arc};

use dotsign::{
    prelude::*,
    signing::{attributes::ASSEMBLY_KEY_NAME_ATTRIBUTE, marker::MARKER_TYPE_NAME},
    Result,
};

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn module_options() -> CompilationOptions {
    CompilationOptions::new().with_output_kind(OutputKind::NetModule)
}

fn emit_module(compilation: &Compilation) -> Result<CompiledModule> {
    compilation.emit_module(&PeBuilder::new(), &CancellationFlag::new())
}

#[test]
fn no_key_source_no_marker() -> Result<()> {
    let module = emit_module(&Compilation::new("Part").with_options(module_options()))?;
    assert!(module.marker().is_none());
    Ok(())
}

#[test]
fn key_file_option_round_trips() -> Result<()> {
    let module = emit_module(&Compilation::new("Part").with_options(
        module_options().with_crypto_key_file(Some(fixture("keypair_a.snk"))),
    ))?;

    let marker = module.marker().ok_or(dotsign::Error::Empty)?;
    assert_eq!(marker.type_name(), MARKER_TYPE_NAME);
    assert_eq!(marker.records().len(), 1);
    assert!(!verify_strong_name_signature(module.image(), &[])?);

    let assembly = Compilation::new("Whole").with_module(module)?;
    assert!(!assembly.analyze().has_any());
    let token = assembly.identity().public_key_token().map(|t| t.to_string());
    assert_eq!(token.as_deref(), Some("da8118bfba24a1d7"));

    let image = assembly.emit(&PeBuilder::new(), &CancellationFlag::new())?;
    assert!(verify_strong_name_signature(
        &image,
        assembly.identity().public_key()
    )?);
    Ok(())
}

#[test]
fn key_container_attribute_round_trips() -> Result<()> {
    let module = emit_module(
        &Compilation::new("Part")
            .with_options(module_options())
            .with_attribute(SourceAttribute::key_name("testContainer")),
    )?;
    let marker = module.marker().ok_or(dotsign::Error::Empty)?;
    assert_eq!(marker.records()[0].attribute, ASSEMBLY_KEY_NAME_ATTRIBUTE);

    let store = InMemoryKeyStore::new();
    store.insert("testContainer", std::fs::read(fixture("keypair_b.snk"))?);
    let assembly = Compilation::new("Whole")
        .with_provider(StrongNameProvider::new().with_key_store(Arc::new(store)))
        .with_module(module)?;

    let token = assembly.identity().public_key_token().map(|t| t.to_string());
    assert_eq!(token.as_deref(), Some("e817f6ef80a13b9c"));
    Ok(())
}

#[test]
fn assembly_option_overrides_module_marker() -> Result<()> {
    let module = emit_module(&Compilation::new("Part").with_options(
        module_options().with_crypto_key_file(Some(fixture("keypair_a.snk"))),
    ))?;

    let assembly = Compilation::new("Whole")
        .with_options(CompilationOptions::new().with_crypto_key_file(Some(fixture("keypair_b.snk"))))
        .with_module(module)?;

    let diagnostics = assembly.analyze();
    assert!(diagnostics.contains(DiagnosticCode::CmdOptionConflictsSourceWarning));
    let token = assembly.identity().public_key_token().map(|t| t.to_string());
    assert_eq!(token.as_deref(), Some("e817f6ef80a13b9c"));
    Ok(())
}

#[test]
fn module_defers_key_failures() -> Result<()> {
    let part = Compilation::new("Part")
        .with_options(module_options().with_crypto_key_file(Some("missing.snk")));
    assert!(!part.analyze().has_any());
    let module = emit_module(&part)?;

    let assembly = Compilation::new("Whole").with_module(module)?;
    assert!(assembly
        .analyze()
        .contains(DiagnosticCode::PublicKeyFileFailure));
    Ok(())
}

#[test]
fn module_conflict_is_an_error() {
    let part = Compilation::new("Part")
        .with_options(module_options().with_crypto_key_file(Some(fixture("keypair_a.snk"))))
        .with_attribute(SourceAttribute::key_file(fixture("keypair_b.snk")));

    let diagnostics = part.analyze();
    assert!(diagnostics.contains(DiagnosticCode::CmdOptionConflictsSourceError));
    assert!(matches!(
        emit_module(&part),
        Err(dotsign::Error::EmitFailed(_))
    ));
}

#[test]
fn public_sign_module_is_rejected() {
    let part = Compilation::new("Part").with_options(
        module_options()
            .with_crypto_key_file(Some(fixture("public_a.snk")))
            .with_public_sign(true),
    );

    assert!(part.analyze().contains(DiagnosticCode::PublicSignNetModule));
}
