//! CLI (COR20) header access for strong-name signing.
//!
//! The CLI header is located through the `IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR` data directory.
//! Signing reads its `StrongNameSignature` directory to find the reserved blob and flips the
//! `StrongNameSigned` bit in its flags before hashing.
//!
//! # Reference
//! - [ECMA-335 II.25.3.3](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use bitflags::bitflags;

use crate::{
    file::{io::write_le_at, parser::Parser},
    Error::OutOfBounds,
    Result,
};

/// Size of the CLI header in bytes.
pub const COR20_HEADER_SIZE: usize = 72;
/// Offset of the `Flags` field inside the CLI header.
pub const COR20_FLAGS_OFFSET: usize = 16;
/// Offset of the `StrongNameSignature` directory inside the CLI header.
pub const COR20_STRONG_NAME_OFFSET: usize = 32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Runtime flags stored in the CLI header
    pub struct CorFlags: u32 {
        /// Image contains only IL code
        const IL_ONLY = 0x0000_0001;
        /// Image requires a 32-bit process
        const REQUIRED_32BIT = 0x0000_0002;
        /// Image is an IL library
        const IL_LIBRARY = 0x0000_0004;
        /// Image carries a strong-name signature
        const STRONG_NAME_SIGNED = 0x0000_0008;
        /// Entry point is native code
        const NATIVE_ENTRYPOINT = 0x0000_0010;
        /// Debug data is tracked
        const TRACK_DEBUG_DATA = 0x0001_0000;
        /// Image prefers a 32-bit process
        const PREFERS_32BIT = 0x0002_0000;
    }
}

/// The CLI header of a managed PE image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cor20Header {
    /// Size of header in bytes
    pub cb: u32,
    /// The minimum version of runtime required to run this program
    pub major_runtime_version: u16,
    /// The minor portion of the version
    pub minor_runtime_version: u16,
    /// RVA of the `MetaData`
    pub meta_data_rva: u32,
    /// Size of the `MetaData`
    pub meta_data_size: u32,
    /// Flags describing this runtime
    pub flags: CorFlags,
    /// Token for the `MethodDef` or File of the entry point for the image
    pub entry_point_token: u32,
    /// RVA of implementation specific resources
    pub resource_rva: u32,
    /// Size of implementation specific resources
    pub resource_size: u32,
    /// RVA of the strong-name signature blob
    pub strong_name_signature_rva: u32,
    /// Size of the strong-name signature blob
    pub strong_name_signature_size: u32,
    /// RVA of an array of locations in the file that contain an array of functions pointers
    pub vtable_fixups_rva: u32,
    /// Size of an array of locations in the file that contain an array of functions pointers
    pub vtable_fixups_size: u32,
    /// Always 0
    pub managed_native_header_rva: u32,
    /// Always 0
    pub managed_native_header_size: u32,
}

impl Cor20Header {
    /// A header for an IL-only image with the given metadata and signature directories.
    #[must_use]
    pub fn il_only(meta_data: (u32, u32), strong_name_signature: (u32, u32)) -> Cor20Header {
        Cor20Header {
            cb: COR20_HEADER_SIZE as u32,
            major_runtime_version: 2,
            minor_runtime_version: 5,
            meta_data_rva: meta_data.0,
            meta_data_size: meta_data.1,
            flags: CorFlags::IL_ONLY,
            entry_point_token: 0,
            resource_rva: 0,
            resource_size: 0,
            strong_name_signature_rva: strong_name_signature.0,
            strong_name_signature_size: strong_name_signature.1,
            vtable_fixups_rva: 0,
            vtable_fixups_size: 0,
            managed_native_header_rva: 0,
            managed_native_header_size: 0,
        }
    }

    /// Create a `Cor20Header` object from a sequence of bytes
    ///
    /// # Arguments
    /// * `data` - The byte slice from which this object shall be created
    ///
    /// # Errors
    /// Returns an error if the data is too short to contain a valid CLI header, or if the
    /// size field, the metadata directory or the signature directory are inconsistent.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        if data.len() < COR20_HEADER_SIZE {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);

        let cb = parser.read_le::<u32>()?;
        if cb as usize != COR20_HEADER_SIZE {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                cb
            ));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;

        let meta_data_rva = parser.read_le::<u32>()?;
        let meta_data_size = parser.read_le::<u32>()?;
        if meta_data_rva == 0 || meta_data_size == 0 {
            return Err(malformed_error!("Metadata directory cannot be empty"));
        }

        let flags = CorFlags::from_bits_retain(parser.read_le::<u32>()?);
        let entry_point_token = parser.read_le::<u32>()?;
        let resource_rva = parser.read_le::<u32>()?;
        let resource_size = parser.read_le::<u32>()?;

        let strong_name_signature_rva = parser.read_le::<u32>()?;
        let strong_name_signature_size = parser.read_le::<u32>()?;
        if (strong_name_signature_rva == 0) != (strong_name_signature_size == 0) {
            return Err(malformed_error!("Strong name values are invalid"));
        }

        // Code manager table, reserved
        parser.advance_by(8)?;

        let vtable_fixups_rva = parser.read_le::<u32>()?;
        let vtable_fixups_size = parser.read_le::<u32>()?;

        // Export address table jumps, reserved
        parser.advance_by(8)?;

        let managed_native_header_rva = parser.read_le::<u32>()?;
        let managed_native_header_size = parser.read_le::<u32>()?;

        Ok(Cor20Header {
            cb,
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva,
            meta_data_size,
            flags,
            entry_point_token,
            resource_rva,
            resource_size,
            strong_name_signature_rva,
            strong_name_signature_size,
            vtable_fixups_rva,
            vtable_fixups_size,
            managed_native_header_rva,
            managed_native_header_size,
        })
    }

    /// Serialize the header into its 72-byte on-disk form.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `out` is shorter than 72 bytes.
    pub fn write(&self, out: &mut [u8]) -> Result<()> {
        if out.len() < COR20_HEADER_SIZE {
            return Err(OutOfBounds);
        }

        let mut offset = 0;
        write_le_at(out, &mut offset, self.cb)?;
        write_le_at(out, &mut offset, self.major_runtime_version)?;
        write_le_at(out, &mut offset, self.minor_runtime_version)?;
        write_le_at(out, &mut offset, self.meta_data_rva)?;
        write_le_at(out, &mut offset, self.meta_data_size)?;
        write_le_at(out, &mut offset, self.flags.bits())?;
        write_le_at(out, &mut offset, self.entry_point_token)?;
        write_le_at(out, &mut offset, self.resource_rva)?;
        write_le_at(out, &mut offset, self.resource_size)?;
        write_le_at(out, &mut offset, self.strong_name_signature_rva)?;
        write_le_at(out, &mut offset, self.strong_name_signature_size)?;
        write_le_at(out, &mut offset, 0_u64)?;
        write_le_at(out, &mut offset, self.vtable_fixups_rva)?;
        write_le_at(out, &mut offset, self.vtable_fixups_size)?;
        write_le_at(out, &mut offset, 0_u64)?;
        write_le_at(out, &mut offset, self.managed_native_header_rva)?;
        write_le_at(out, &mut offset, self.managed_native_header_size)?;

        Ok(())
    }
}
