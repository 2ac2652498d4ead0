//! Signing intent carried by netmodules.
//!
//! A netmodule has no assembly manifest, so its signing configuration cannot take effect when it
//! is compiled. Instead the module records it as custom attributes attached to the placeholder
//! type [`MARKER_TYPE_NAME`]. When the module is later added to an assembly compilation, the
//! records decode back into [`SourceAttribute`]s that take part in key resolution exactly like
//! attributes declared in source.
//!
//! Each record is an ECMA-335 custom attribute value blob (II.23.3): the `0x0001` prolog, the
//! fixed constructor argument, and a zero count of named arguments.

use crate::{
    file::parser::Parser,
    signing::{
        attributes::{
            SourceAttribute, ASSEMBLY_DELAY_SIGN_ATTRIBUTE, ASSEMBLY_KEY_FILE_ATTRIBUTE,
            ASSEMBLY_KEY_NAME_ATTRIBUTE,
        },
        decision::SigningAttributes,
        options::CompilationOptions,
    },
    Result,
};

/// Name of the placeholder type that carries assembly-level attributes in a netmodule.
pub const MARKER_TYPE_NAME: &str = "<AssemblyAttributesGoHere>";

/// Custom attribute blob prolog.
const CUSTOM_ATTRIBUTE_PROLOG: u16 = 0x0001;

fn write_compressed_uint(out: &mut Vec<u8>, value: usize) {
    if value < 0x80 {
        out.push(value as u8);
    } else if value < 0x4000 {
        out.extend_from_slice(&(0x8000 | value as u16).to_be_bytes());
    } else {
        out.extend_from_slice(&(0xC000_0000 | value as u32).to_be_bytes());
    }
}

/// One custom attribute on the placeholder type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRecord {
    /// Full name of the attribute type
    pub attribute: String,
    /// Custom attribute value blob
    pub blob: Vec<u8>,
}

impl MarkerRecord {
    /// A record for an attribute with one string argument.
    #[must_use]
    pub fn string(attribute: &str, value: &str) -> Self {
        let mut blob = CUSTOM_ATTRIBUTE_PROLOG.to_le_bytes().to_vec();
        write_compressed_uint(&mut blob, value.len());
        blob.extend_from_slice(value.as_bytes());
        blob.extend_from_slice(&0u16.to_le_bytes());
        MarkerRecord {
            attribute: attribute.to_string(),
            blob,
        }
    }

    /// A record for an attribute with one boolean argument.
    #[must_use]
    pub fn boolean(attribute: &str, value: bool) -> Self {
        let mut blob = CUSTOM_ATTRIBUTE_PROLOG.to_le_bytes().to_vec();
        blob.push(u8::from(value));
        blob.extend_from_slice(&0u16.to_le_bytes());
        MarkerRecord {
            attribute: attribute.to_string(),
            blob,
        }
    }

    /// Decode the record into the attribute it stands for.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an unknown attribute type, a bad prolog or a
    /// truncated blob.
    pub fn decode(&self) -> Result<SourceAttribute> {
        let mut parser = Parser::new(&self.blob);
        let prolog = parser.read_le::<u16>()?;
        if prolog != CUSTOM_ATTRIBUTE_PROLOG {
            return Err(malformed_error!(
                "Invalid custom attribute prolog - 0x{:04X}",
                prolog
            ));
        }

        let attribute = match self.attribute.as_str() {
            ASSEMBLY_KEY_FILE_ATTRIBUTE => {
                SourceAttribute::key_file(parser.read_ser_string()?.as_deref())
            }
            ASSEMBLY_KEY_NAME_ATTRIBUTE => {
                SourceAttribute::key_name(parser.read_ser_string()?.as_deref())
            }
            ASSEMBLY_DELAY_SIGN_ATTRIBUTE => SourceAttribute::delay_sign(parser.read_le::<u8>()? != 0),
            other => {
                return Err(malformed_error!("Unexpected marker attribute - {}", other));
            }
        };

        let named_arguments = parser.read_le::<u16>()?;
        if named_arguments != 0 {
            return Err(malformed_error!(
                "Marker attribute {} carries {} named arguments",
                self.attribute,
                named_arguments
            ));
        }

        Ok(attribute)
    }
}

/// The placeholder type with its signing records.
///
/// The marker travels beside the module image in a
/// [`CompiledModule`](crate::compilation::CompiledModule); it is not written into the image
/// bytes. The host's metadata writer is responsible for persisting [`type_name`] and
/// [`records`] as a type definition with custom attributes, and for decoding each record back
/// with [`MarkerRecord::decode`] when the module is read.
///
/// [`type_name`]: ModuleSigningMarker::type_name
/// [`records`]: ModuleSigningMarker::records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSigningMarker {
    records: Vec<MarkerRecord>,
}

impl ModuleSigningMarker {
    /// Build the marker for a netmodule compilation.
    ///
    /// Returns `None` unless a key source is configured through an option or an attribute. Key
    /// and delay-sign attributes declared in the module are carried over; the key file option
    /// (or, without one, the key container option) adds a record of its own unless an
    /// attribute of the same kind is already carried.
    #[must_use]
    pub fn synthesize(options: &CompilationOptions, attributes: &SigningAttributes) -> Option<Self> {
        let mut records = Vec::new();

        if let Some(setting) = &attributes.key_file {
            records.push(MarkerRecord::string(ASSEMBLY_KEY_FILE_ATTRIBUTE, &setting.value));
        }
        if let Some(setting) = &attributes.key_name {
            records.push(MarkerRecord::string(ASSEMBLY_KEY_NAME_ATTRIBUTE, &setting.value));
        }

        match (options.key_file(), options.key_container()) {
            (Some(path), _) => {
                if attributes.key_file.is_none() {
                    records.push(MarkerRecord::string(ASSEMBLY_KEY_FILE_ATTRIBUTE, path));
                }
            }
            (None, Some(container)) => {
                if attributes.key_name.is_none() {
                    records.push(MarkerRecord::string(ASSEMBLY_KEY_NAME_ATTRIBUTE, container));
                }
            }
            (None, None) => {}
        }

        if records.is_empty() {
            return None;
        }

        if let Some(setting) = &attributes.delay_sign {
            records.push(MarkerRecord::boolean(
                ASSEMBLY_DELAY_SIGN_ATTRIBUTE,
                setting.value,
            ));
        }

        Some(ModuleSigningMarker { records })
    }

    /// Name of the placeholder type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        MARKER_TYPE_NAME
    }

    /// The attribute records.
    #[must_use]
    pub fn records(&self) -> &[MarkerRecord] {
        &self.records
    }

    /// Decode the records into attributes originating from `module`.
    ///
    /// # Errors
    /// Returns an error if a record cannot be decoded.
    pub fn to_attributes(&self, module: &str) -> Result<Vec<SourceAttribute>> {
        self.records
            .iter()
            .map(|record| record.decode().map(|a| a.from_module(module)))
            .collect()
    }
}
