//! Assembly display name parsing.
//!
//! Friend declarations name their target through an assembly display name such as
//! `John, PublicKey=0024...`. [`parse_display_name`] splits such a string into its parts and
//! records which parts were present, so callers can reject qualifiers they do not allow.
//!
//! Whitespace around names, property keys, `=` and values is insignificant. Property keys are
//! matched case-insensitively; values may be enclosed in double quotes.

use bitflags::bitflags;

use crate::{
    metadata::identity::{assembly::AssemblyVersion, token::PublicKeyToken},
    signing::keys::snk::is_valid_public_key,
    Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    /// Parts present in a parsed display name
    pub struct NameParts: u32 {
        /// Simple name
        const NAME = 0x0001;
        /// `Version=`
        const VERSION = 0x0002;
        /// `Culture=`
        const CULTURE = 0x0004;
        /// `PublicKey=`
        const PUBLIC_KEY = 0x0008;
        /// `PublicKeyToken=`
        const PUBLIC_KEY_TOKEN = 0x0010;
        /// `ProcessorArchitecture=`
        const PROCESSOR_ARCHITECTURE = 0x0020;
        /// `Retargetable=`
        const RETARGETABLE = 0x0040;
        /// `ContentType=`
        const CONTENT_TYPE = 0x0080;
        /// Any other property
        const UNKNOWN = 0x8000;
    }
}

/// A parsed assembly display name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedAssemblyName {
    /// Simple name
    pub name: String,
    /// Version, if given
    pub version: Option<AssemblyVersion>,
    /// Culture, if given and not neutral
    pub culture: Option<String>,
    /// Full public key, if given
    pub public_key: Option<Vec<u8>>,
    /// Public key token, if given and not `null`
    pub public_key_token: Option<PublicKeyToken>,
    /// Which parts were present
    pub parts: NameParts,
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .trim()
}

/// Parse an assembly display name.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for an empty name, an empty or duplicated property, a
/// property without `=`, an invalid version or token, or a public key that is not valid hex or
/// not a valid public key blob.
///
/// # Examples
///
/// ```rust
/// use dotsign::metadata::identity::{parse_display_name, NameParts};
///
/// let parsed = parse_display_name("WantsIVTAccess , Culture = neutral")?;
/// assert_eq!(parsed.name, "WantsIVTAccess");
/// assert!(parsed.parts.contains(NameParts::CULTURE));
/// assert!(parsed.culture.is_none());
/// # Ok::<(), dotsign::Error>(())
/// ```
pub fn parse_display_name(display_name: &str) -> Result<ParsedAssemblyName> {
    let mut components = display_name.split(',');

    let name = unquote(components.next().unwrap_or_default().trim());
    if name.is_empty() {
        return Err(malformed_error!("Assembly name cannot be empty"));
    }
    if name.contains('=') {
        return Err(malformed_error!("Invalid assembly name - '{}'", name));
    }

    let mut parsed = ParsedAssemblyName {
        name: name.to_string(),
        parts: NameParts::NAME,
        ..ParsedAssemblyName::default()
    };

    for component in components {
        let Some((key, value)) = component.split_once('=') else {
            return Err(malformed_error!(
                "Invalid display name property - '{}'",
                component.trim()
            ));
        };

        let key = key.trim();
        let value = unquote(value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(malformed_error!(
                "Invalid display name property - '{}'",
                component.trim()
            ));
        }

        let part = match key.to_ascii_lowercase().as_str() {
            "version" => {
                parsed.version = Some(AssemblyVersion::parse(value)?);
                NameParts::VERSION
            }
            "culture" | "language" => {
                if !value.eq_ignore_ascii_case("neutral") {
                    parsed.culture = Some(value.to_string());
                }
                NameParts::CULTURE
            }
            "publickey" => {
                let key_bytes = hex::decode(value)
                    .map_err(|e| malformed_error!("Invalid hex in PublicKey: {}", e))?;
                if !is_valid_public_key(&key_bytes) {
                    return Err(malformed_error!("Invalid public key in display name"));
                }
                parsed.public_key = Some(key_bytes);
                NameParts::PUBLIC_KEY
            }
            "publickeytoken" => {
                if !value.eq_ignore_ascii_case("null") {
                    parsed.public_key_token = Some(PublicKeyToken::parse(value)?);
                }
                NameParts::PUBLIC_KEY_TOKEN
            }
            "processorarchitecture" => NameParts::PROCESSOR_ARCHITECTURE,
            "retargetable" => NameParts::RETARGETABLE,
            "contenttype" => NameParts::CONTENT_TYPE,
            _ => NameParts::UNKNOWN,
        };

        if part != NameParts::UNKNOWN && parsed.parts.contains(part) {
            return Err(malformed_error!("Duplicate display name property - '{}'", key));
        }
        parsed.parts |= part;
    }

    Ok(parsed)
}
