//! Key material resolution and the signing decision.
//!
//! [`KeyMaterialResolver`] combines the option snapshot with the signing attributes of a
//! compilation, loads key material through the compilation's
//! [`StrongNameProvider`](crate::signing::provider::StrongNameProvider) and settles on a
//! [`SigningDecision`]. Conflicts between options and attributes are resolved by fixed
//! precedence and reported as diagnostics; resolution itself never fails.
//!
//! # Precedence
//!
//! 1. A non-empty `CryptoPublicKey` option supplies the identity key directly
//! 2. Under `PublicSign` only an absolute `CryptoKeyFile` option is consulted
//! 3. Otherwise an option beats the matching attribute, and a key file beats a key container
//!
//! Empty option and attribute strings count as absent.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    metadata::diagnostics::{DiagnosticCode, Diagnostics, Location},
    signing::{
        attributes::{
            AttributeArgument, AttributeKind, SourceAttribute, ASSEMBLY_DELAY_SIGN_ATTRIBUTE,
            ASSEMBLY_KEY_FILE_ATTRIBUTE, ASSEMBLY_KEY_NAME_ATTRIBUTE,
        },
        keys::{snk::is_valid_public_key, KeyMaterial, KeySource, ResolvedKeySource},
        options::CompilationOptions,
        provider::StrongNameProvider,
    },
    Error,
};

/// Smallest reserved signature area.
const MIN_SIGNATURE_SIZE: usize = 128;
/// Public key blobs shorter than this reserve [`MIN_SIGNATURE_SIZE`] bytes.
const SIGNATURE_SIZE_THRESHOLD: usize = 160;
/// Public key blob overhead over the modulus (key header plus `RSAPUBKEY`).
const PUBLIC_KEY_BLOB_OVERHEAD: usize = 32;

fn reserved_size_for(input_len: usize) -> u32 {
    let size = if input_len < SIGNATURE_SIZE_THRESHOLD {
        MIN_SIGNATURE_SIZE
    } else {
        input_len - PUBLIC_KEY_BLOB_OVERHEAD
    };
    size as u32
}

/// Returns true if `value` is hex encoding a valid strong-name public key.
#[must_use]
pub fn is_valid_public_key_string(value: &str) -> bool {
    hex::decode(value).is_ok_and(|bytes| is_valid_public_key(&bytes))
}

/// Arguments of `AssemblySignatureKeyAttribute`, with a validated public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSignature {
    public_key_hex: String,
    signature_hex: Option<String>,
}

impl CounterSignature {
    /// Validate the attribute arguments.
    ///
    /// Returns `None` if the public key is `null`, not hex, or not a valid public key blob. The
    /// counter signature is only checked at emit time.
    #[must_use]
    pub fn new(public_key_hex: Option<&str>, signature_hex: Option<String>) -> Option<Self> {
        let public_key_hex = public_key_hex?;
        if !is_valid_public_key_string(public_key_hex) {
            return None;
        }

        Some(CounterSignature {
            public_key_hex: public_key_hex.to_string(),
            signature_hex,
        })
    }

    /// The signature public key as given.
    #[must_use]
    pub fn public_key_hex(&self) -> &str {
        &self.public_key_hex
    }

    /// The decoded signature public key.
    #[must_use]
    pub fn public_key(&self) -> Vec<u8> {
        hex::decode(&self.public_key_hex).unwrap_or_default()
    }

    /// Length in bytes of the signature public key.
    #[must_use]
    pub fn public_key_len(&self) -> usize {
        self.public_key_hex.len() / 2
    }

    /// The counter signature as given.
    #[must_use]
    pub fn signature_hex(&self) -> Option<&str> {
        self.signature_hex.as_deref()
    }

    /// Decode the counter signature made with a key whose modulus is `modulus_len` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidSignaturePublicKey`] if the signature is missing, not hex,
    /// or of the wrong length.
    pub fn decode_signature(&self, modulus_len: usize) -> crate::Result<Vec<u8>> {
        let bytes = self
            .signature_hex
            .as_deref()
            .and_then(|s| hex::decode(s).ok())
            .ok_or(Error::InvalidSignaturePublicKey)?;
        if bytes.len() != modulus_len {
            return Err(Error::InvalidSignaturePublicKey);
        }
        Ok(bytes)
    }
}

/// How the output image is signed.
#[derive(Debug, Clone)]
pub enum SigningDecision {
    /// No strong name
    Unsigned,
    /// Public key in the identity, zeroed signature, signed flag set
    PublicSignOnly(Vec<u8>),
    /// Public key in the identity, zeroed signature, flag clear, space reserved for re-signing
    DelaySign {
        /// Identity public key
        public_key: Vec<u8>,
        /// Counter signature, which only affects the reserved size here
        counter: Option<CounterSignature>,
    },
    /// A real signature made with the identity key
    FullSign(KeyMaterial),
    /// A real signature plus key migration data from `AssemblySignatureKeyAttribute`
    CounterSign {
        /// The identity key that signs the image
        primary: KeyMaterial,
        /// The signature key and its counter signature
        counter: CounterSignature,
    },
}

impl SigningDecision {
    /// The public key that goes into the assembly identity.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        match self {
            SigningDecision::Unsigned => &[],
            SigningDecision::PublicSignOnly(public_key)
            | SigningDecision::DelaySign { public_key, .. } => public_key,
            SigningDecision::FullSign(material)
            | SigningDecision::CounterSign {
                primary: material, ..
            } => material.public_key(),
        }
    }

    /// Returns true if the image will carry the strong-name-signed flag.
    #[must_use]
    pub fn sets_signed_flag(&self) -> bool {
        !matches!(
            self,
            SigningDecision::Unsigned | SigningDecision::DelaySign { .. }
        )
    }

    /// Size of the strong-name signature area to reserve in the image.
    ///
    /// The size derives from the signature public key for counter-signed output and from the
    /// identity key otherwise. Blobs shorter than 160 bytes reserve 128 bytes; longer blobs
    /// reserve their length minus the 32 byte blob overhead.
    #[must_use]
    pub fn reserved_signature_size(&self) -> u32 {
        match self {
            SigningDecision::Unsigned => 0,
            SigningDecision::PublicSignOnly(public_key) => reserved_size_for(public_key.len()),
            SigningDecision::DelaySign {
                public_key,
                counter,
            } => reserved_size_for(
                counter
                    .as_ref()
                    .map_or(public_key.len(), CounterSignature::public_key_len),
            ),
            SigningDecision::FullSign(material) if material.public_key().is_empty() => {
                reserved_size_for(material.modulus_len())
            }
            SigningDecision::FullSign(material) => reserved_size_for(material.public_key().len()),
            SigningDecision::CounterSign { counter, .. } => {
                reserved_size_for(counter.public_key_len())
            }
        }
    }
}

/// An attribute value together with its declaration site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSetting<T> {
    /// The evaluated value
    pub value: T,
    /// Location of the declaring attribute
    pub location: Location,
    /// Directory of the declaring file
    pub base_directory: Option<PathBuf>,
}

impl<T> AttributeSetting<T> {
    fn new(value: T, location: &Location, attribute: &SourceAttribute) -> Self {
        AttributeSetting {
            value,
            location: location.clone(),
            base_directory: attribute.base_directory().map(Path::to_path_buf),
        }
    }
}

/// The evaluated signing attributes of a compilation.
///
/// When an attribute kind appears more than once the first occurrence wins; source attributes
/// precede those carried in by added modules.
#[derive(Debug, Clone, Default)]
pub struct SigningAttributes {
    /// `AssemblyKeyFile`, if non-empty
    pub key_file: Option<AttributeSetting<String>>,
    /// `AssemblyKeyName`, if non-empty
    pub key_name: Option<AttributeSetting<String>>,
    /// `AssemblyDelaySign`
    pub delay_sign: Option<AttributeSetting<bool>>,
    /// `AssemblySignatureKey`, if its public key is valid
    pub signature_key: Option<AttributeSetting<CounterSignature>>,
}

impl SigningAttributes {
    /// Evaluate the signing attributes among `attributes`.
    ///
    /// `bind` evaluates string arguments. An invalid signature public key is reported as
    /// `InvalidSignaturePublicKey` at the attribute. Under public signing of an assembly, key
    /// file and key name attributes report `AttributeIgnoredWhenPublicSigning`.
    pub fn collect<F>(
        attributes: &[SourceAttribute],
        options: &CompilationOptions,
        bind: F,
        diagnostics: &Diagnostics,
    ) -> Self
    where
        F: Fn(&AttributeArgument) -> Option<String>,
    {
        let warn_public_sign = options.public_sign() && !options.output_kind().is_net_module();
        let mut collected = SigningAttributes::default();

        for (index, attribute) in attributes.iter().enumerate() {
            let location = Location::attribute(attribute.full_name(), index);

            match &attribute.kind {
                AttributeKind::KeyFile(argument) | AttributeKind::KeyName(argument) => {
                    let is_file = matches!(attribute.kind, AttributeKind::KeyFile(_));
                    if warn_public_sign {
                        diagnostics.report(
                            DiagnosticCode::AttributeIgnoredWhenPublicSigning,
                            location.clone(),
                            [attribute.full_name()],
                        );
                    }

                    let Some(value) = bind(argument).filter(|v| !v.is_empty()) else {
                        continue;
                    };
                    let slot = if is_file {
                        &mut collected.key_file
                    } else {
                        &mut collected.key_name
                    };
                    if slot.is_none() {
                        *slot = Some(AttributeSetting::new(value, &location, attribute));
                    }
                }
                AttributeKind::DelaySign(value) => {
                    if collected.delay_sign.is_none() {
                        collected.delay_sign =
                            Some(AttributeSetting::new(*value, &location, attribute));
                    }
                }
                AttributeKind::SignatureKey {
                    public_key,
                    counter_signature,
                } => {
                    let public_key = bind(public_key);
                    match CounterSignature::new(public_key.as_deref(), bind(counter_signature)) {
                        Some(counter) => {
                            if collected.signature_key.is_none() {
                                collected.signature_key =
                                    Some(AttributeSetting::new(counter, &location, attribute));
                            }
                        }
                        None => diagnostics.report(
                            DiagnosticCode::InvalidSignaturePublicKey,
                            location.clone(),
                            std::iter::empty::<String>(),
                        ),
                    }
                }
                AttributeKind::InternalsVisibleTo(_) | AttributeKind::IgnoresAccessChecksTo(_) => {}
            }
        }

        collected
    }
}

/// Outcome of key resolution for one compilation.
#[derive(Debug, Clone)]
pub struct KeyResolution {
    /// How the output is signed
    pub decision: SigningDecision,
    /// The public key of the assembly identity, empty if not strong-named
    pub public_key: Vec<u8>,
    /// The key source that supplied the key material, if any
    pub key_source: Option<ResolvedKeySource>,
    /// Effective delay-sign setting
    pub is_delay_signed: bool,
    /// Set when loading key material failed and was reported
    pub load_failed: bool,
}

impl KeyResolution {
    /// The key file path as configured, or an empty string.
    #[must_use]
    pub fn key_file_path(&self) -> &str {
        match self.key_source.as_ref().map(|s| &s.source) {
            Some(KeySource::KeyFilePath(path)) => path,
            _ => "",
        }
    }
}

/// Resolves the signing decision for a compilation.
#[derive(Debug)]
pub struct KeyMaterialResolver<'a> {
    options: &'a CompilationOptions,
    provider: &'a StrongNameProvider,
}

impl<'a> KeyMaterialResolver<'a> {
    /// A resolver for `options` that loads keys through `provider`.
    #[must_use]
    pub fn new(options: &'a CompilationOptions, provider: &'a StrongNameProvider) -> Self {
        KeyMaterialResolver { options, provider }
    }

    /// The key source that applies, before any loading.
    #[must_use]
    pub fn select_source(&self, attributes: &SigningAttributes) -> Option<ResolvedKeySource> {
        let options = self.options;
        let from_option = |source| ResolvedKeySource {
            source,
            location: Location::Compilation,
            base_directory: None,
        };

        if !options.crypto_public_key().is_empty() {
            return Some(from_option(KeySource::InlinePublicKey(
                options.crypto_public_key().to_vec(),
            )));
        }

        if options.public_sign() {
            return options
                .key_file()
                .filter(|path| Path::new(path).is_absolute())
                .map(|path| from_option(KeySource::KeyFilePath(path.to_string())));
        }

        let from_attribute = |setting: &AttributeSetting<String>, source| ResolvedKeySource {
            source,
            location: setting.location.clone(),
            base_directory: setting.base_directory.clone(),
        };

        if let Some(path) = options.key_file() {
            return Some(from_option(KeySource::KeyFilePath(path.to_string())));
        }
        if let Some(setting) = &attributes.key_file {
            return Some(from_attribute(
                setting,
                KeySource::KeyFilePath(setting.value.clone()),
            ));
        }
        if let Some(name) = options.key_container() {
            return Some(from_option(KeySource::KeyContainerName(name.to_string())));
        }
        attributes.key_name.as_ref().map(|setting| {
            from_attribute(setting, KeySource::KeyContainerName(setting.value.clone()))
        })
    }

    fn load(&self, source: &ResolvedKeySource, diagnostics: &Diagnostics) -> Option<KeyMaterial> {
        let report = !self.options.output_kind().is_net_module();
        let (result, code, name) = match &source.source {
            KeySource::None => return None,
            KeySource::InlinePublicKey(public_key) => {
                return is_valid_public_key(public_key)
                    .then(|| KeyMaterial::public_only(public_key.clone()));
            }
            KeySource::KeyFilePath(path) => (
                self.provider
                    .load_key_file(path, source.base_directory.as_deref()),
                DiagnosticCode::PublicKeyFileFailure,
                path,
            ),
            KeySource::KeyContainerName(name) => (
                self.provider.load_key_container(name),
                DiagnosticCode::PublicKeyContainerFailure,
                name,
            ),
        };

        match result {
            Ok(material) => Some(material),
            Err(error) => {
                let reason = match error {
                    Error::KeyFile { reason, .. } | Error::KeyContainer { reason, .. } => reason,
                    other => other.to_string(),
                };
                warn!(key = %name, reason = %reason, "key material could not be loaded");
                if report {
                    diagnostics.report(code, Location::Compilation, [name.clone(), reason]);
                }
                None
            }
        }
    }

    fn report_conflicts(&self, attributes: &SigningAttributes, diagnostics: &Diagnostics) {
        let options = self.options;
        let is_net_module = options.output_kind().is_net_module();

        if let Some(delay_sign) = &attributes.delay_sign {
            if options.public_sign() && delay_sign.value {
                diagnostics.report(
                    DiagnosticCode::CmdOptionConflictsSourceWarning,
                    delay_sign.location.clone(),
                    ["PublicSign", ASSEMBLY_DELAY_SIGN_ATTRIBUTE],
                );
            }
            if options.delay_sign().is_some_and(|o| o != delay_sign.value) {
                diagnostics.report(
                    DiagnosticCode::CmdOptionConflictsSourceWarning,
                    delay_sign.location.clone(),
                    ["DelaySign", ASSEMBLY_DELAY_SIGN_ATTRIBUTE],
                );
            }
        }

        let pairs = [
            (
                options.key_container(),
                &attributes.key_name,
                "CryptoKeyContainer",
                ASSEMBLY_KEY_NAME_ATTRIBUTE,
            ),
            (
                options.key_file(),
                &attributes.key_file,
                "CryptoKeyFile",
                ASSEMBLY_KEY_FILE_ATTRIBUTE,
            ),
        ];
        for (option, attribute, option_name, attribute_name) in pairs {
            let (Some(option), Some(attribute)) = (option, attribute) else {
                continue;
            };
            if option.eq_ignore_ascii_case(&attribute.value) {
                continue;
            }

            if is_net_module {
                diagnostics.report(
                    DiagnosticCode::CmdOptionConflictsSourceError,
                    attribute.location.clone(),
                    [attribute_name, option_name],
                );
            } else {
                diagnostics.report(
                    DiagnosticCode::CmdOptionConflictsSourceWarning,
                    attribute.location.clone(),
                    [option_name, attribute_name],
                );
            }
        }
    }

    /// Resolve keys and settle on a signing decision.
    ///
    /// Key loading failures are reported as `PublicKeyFileFailure` or
    /// `PublicKeyContainerFailure` (except for netmodules, which defer them to the assembly the
    /// module is added to) and leave the output unsigned.
    pub fn resolve(&self, attributes: &SigningAttributes, diagnostics: &Diagnostics) -> KeyResolution {
        let options = self.options;
        let is_net_module = options.output_kind().is_net_module();

        let key_source = self.select_source(attributes);
        let material = key_source
            .as_ref()
            .and_then(|source| self.load(source, diagnostics));
        let load_failed = key_source.is_some() && material.is_none();
        let public_key = material
            .as_ref()
            .map(|m| m.public_key().to_vec())
            .unwrap_or_default();

        debug!(
            source = ?key_source.as_ref().map(|s| &s.source),
            strong_named = !public_key.is_empty(),
            "resolved signing key"
        );

        self.report_conflicts(attributes, diagnostics);

        let is_delay_signed = match options.delay_sign() {
            Some(value) => value,
            None if options.public_sign() => false,
            None => attributes.delay_sign.as_ref().is_some_and(|s| s.value),
        };

        if is_delay_signed && public_key.is_empty() {
            diagnostics.report(
                DiagnosticCode::DelaySignButNoKey,
                Location::Compilation,
                std::iter::empty::<String>(),
            );
        }

        if options.public_sign() {
            if is_net_module {
                diagnostics.report(
                    DiagnosticCode::PublicSignNetModule,
                    Location::Compilation,
                    std::iter::empty::<String>(),
                );
            } else if public_key.is_empty() {
                diagnostics.report(
                    DiagnosticCode::PublicSignButNoKey,
                    Location::Compilation,
                    std::iter::empty::<String>(),
                );
            }
        }

        let counter = attributes.signature_key.as_ref().map(|s| s.value.clone());
        let decision = match material {
            _ if is_net_module => SigningDecision::Unsigned,
            None => SigningDecision::Unsigned,
            Some(material) if options.public_sign() => {
                SigningDecision::PublicSignOnly(material.public_key().to_vec())
            }
            Some(material) if is_delay_signed => {
                SigningDecision::DelaySign {
                    public_key: material.public_key().to_vec(),
                    counter,
                }
            }
            Some(material) => match counter {
                Some(counter) => SigningDecision::CounterSign {
                    primary: material,
                    counter,
                },
                None => SigningDecision::FullSign(material),
            },
        };

        KeyResolution {
            decision,
            public_key,
            key_source,
            is_delay_signed,
            load_failed,
        }
    }
}
