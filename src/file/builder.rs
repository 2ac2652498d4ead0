//! Minimal IL-only PE32 image writer.
//!
//! Full PE emission belongs to the host compiler. [`PeBuilder`] produces the smallest image the
//! signing pipeline can operate on: a DOS header, PE32 headers with sixteen data directories, and
//! one `.text` section holding the CLI header, an opaque metadata payload and the reserved
//! strong-name signature area. It implements [`ImageWriter`] so it can stand in for the host's
//! emitter when compiling in-process.
//!
//! # Layout
//!
//! | File offset | RVA      | Content                           |
//! |-------------|----------|-----------------------------------|
//! | `0x000`     |          | DOS header, `e_lfanew = 0x80`     |
//! | `0x080`     |          | PE signature, COFF, optional hdr  |
//! | `0x178`     |          | `.text` section header            |
//! | `0x200`     | `0x2000` | CLI header                        |
//! | `0x248`     | `0x2048` | Metadata payload                  |
//! | aligned 8   |          | Strong-name signature (reserved)  |

use crate::{
    file::io::write_le_at,
    metadata::cor20header::{Cor20Header, COR20_HEADER_SIZE},
    signing::pipeline::ImageWriter,
    Result,
};

const PE_OFFSET: usize = 0x80;
const OPTIONAL_HEADER_OFFSET: usize = PE_OFFSET + 24;
const PE32_OPTIONAL_HEADER_SIZE: u16 = 0xE0;
const SECTION_TABLE_OFFSET: usize = OPTIONAL_HEADER_OFFSET + PE32_OPTIONAL_HEADER_SIZE as usize;
const FILE_ALIGNMENT: u32 = 0x200;
const SECTION_ALIGNMENT: u32 = 0x2000;
const TEXT_RVA: u32 = 0x2000;
const TEXT_FILE_OFFSET: u32 = 0x200;
const CLR_DIRECTORY_INDEX: usize = 14;

fn align_up(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Writer for minimal IL-only PE32 images.
#[derive(Debug, Clone)]
pub struct PeBuilder {
    signature_size: u32,
    metadata: Vec<u8>,
}

impl Default for PeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PeBuilder {
    /// A builder with no signature reservation and a small metadata stub.
    #[must_use]
    pub fn new() -> Self {
        let mut metadata = b"BSJB".to_vec();
        metadata.resize(0x40, 0);
        PeBuilder {
            signature_size: 0,
            metadata,
        }
    }

    /// Reserve `size` bytes for the strong-name signature.
    #[must_use]
    pub fn signature_size(mut self, size: u32) -> Self {
        self.signature_size = size;
        self
    }

    /// Replace the opaque metadata payload.
    #[must_use]
    pub fn metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Lay out and serialize the image.
    ///
    /// # Errors
    /// Returns an error if the metadata payload is empty or too large for a 32-bit image.
    pub fn build(&self) -> Result<Vec<u8>> {
        if self.metadata.is_empty() {
            return Err(malformed_error!("Metadata payload cannot be empty"));
        }
        let Ok(metadata_len) = u32::try_from(self.metadata.len()) else {
            return Err(malformed_error!(
                "Metadata payload too large - {}",
                self.metadata.len()
            ));
        };

        let metadata_rva = TEXT_RVA + COR20_HEADER_SIZE as u32;
        let signature_rva = align_up(metadata_rva + metadata_len, 8);
        let text_virtual_size = signature_rva - TEXT_RVA + self.signature_size;
        let text_raw_size = align_up(text_virtual_size, FILE_ALIGNMENT);
        let size_of_image = TEXT_RVA + align_up(text_virtual_size, SECTION_ALIGNMENT);

        let mut data = vec![0u8; (TEXT_FILE_OFFSET + text_raw_size) as usize];

        // DOS header
        data[0] = b'M';
        data[1] = b'Z';
        let mut offset = 0x3C;
        write_le_at(&mut data, &mut offset, PE_OFFSET as u32)?;

        // PE signature and COFF header
        offset = PE_OFFSET;
        data[offset..offset + 4].copy_from_slice(b"PE\0\0");
        offset += 4;
        write_le_at(&mut data, &mut offset, 0x014C_u16)?; // i386
        write_le_at(&mut data, &mut offset, 1_u16)?;
        write_le_at(&mut data, &mut offset, 0_u32)?;
        write_le_at(&mut data, &mut offset, 0_u32)?;
        write_le_at(&mut data, &mut offset, 0_u32)?;
        write_le_at(&mut data, &mut offset, PE32_OPTIONAL_HEADER_SIZE)?;
        write_le_at(&mut data, &mut offset, 0x2102_u16)?; // DLL | 32BIT | EXECUTABLE

        // Optional header, standard fields
        write_le_at(&mut data, &mut offset, 0x010B_u16)?;
        write_le_at(&mut data, &mut offset, 8_u8)?;
        write_le_at(&mut data, &mut offset, 0_u8)?;
        write_le_at(&mut data, &mut offset, text_raw_size)?;
        write_le_at(&mut data, &mut offset, 0_u32)?;
        write_le_at(&mut data, &mut offset, 0_u32)?;
        write_le_at(&mut data, &mut offset, 0_u32)?;
        write_le_at(&mut data, &mut offset, TEXT_RVA)?;
        write_le_at(&mut data, &mut offset, 0_u32)?;

        // Optional header, windows fields
        write_le_at(&mut data, &mut offset, 0x0040_0000_u32)?;
        write_le_at(&mut data, &mut offset, SECTION_ALIGNMENT)?;
        write_le_at(&mut data, &mut offset, FILE_ALIGNMENT)?;
        write_le_at(&mut data, &mut offset, 4_u16)?;
        write_le_at(&mut data, &mut offset, 0_u16)?;
        write_le_at(&mut data, &mut offset, 0_u16)?;
        write_le_at(&mut data, &mut offset, 0_u16)?;
        write_le_at(&mut data, &mut offset, 4_u16)?;
        write_le_at(&mut data, &mut offset, 0_u16)?;
        write_le_at(&mut data, &mut offset, 0_u32)?;
        write_le_at(&mut data, &mut offset, size_of_image)?;
        write_le_at(&mut data, &mut offset, TEXT_FILE_OFFSET)?;
        write_le_at(&mut data, &mut offset, 0_u32)?; // checksum
        write_le_at(&mut data, &mut offset, 3_u16)?; // console subsystem
        write_le_at(&mut data, &mut offset, 0x8540_u16)?;
        write_le_at(&mut data, &mut offset, 0x0010_0000_u32)?;
        write_le_at(&mut data, &mut offset, 0x1000_u32)?;
        write_le_at(&mut data, &mut offset, 0x0010_0000_u32)?;
        write_le_at(&mut data, &mut offset, 0x1000_u32)?;
        write_le_at(&mut data, &mut offset, 0_u32)?;
        write_le_at(&mut data, &mut offset, 16_u32)?;

        // Data directories, only the CLI header is populated
        offset += CLR_DIRECTORY_INDEX * 8;
        write_le_at(&mut data, &mut offset, TEXT_RVA)?;
        write_le_at(&mut data, &mut offset, COR20_HEADER_SIZE as u32)?;

        // Section table
        offset = SECTION_TABLE_OFFSET;
        data[offset..offset + 5].copy_from_slice(b".text");
        offset += 8;
        write_le_at(&mut data, &mut offset, text_virtual_size)?;
        write_le_at(&mut data, &mut offset, TEXT_RVA)?;
        write_le_at(&mut data, &mut offset, text_raw_size)?;
        write_le_at(&mut data, &mut offset, TEXT_FILE_OFFSET)?;
        write_le_at(&mut data, &mut offset, 0_u32)?;
        write_le_at(&mut data, &mut offset, 0_u32)?;
        write_le_at(&mut data, &mut offset, 0_u16)?;
        write_le_at(&mut data, &mut offset, 0_u16)?;
        write_le_at(&mut data, &mut offset, 0x6000_0020_u32)?; // CODE | EXECUTE | READ

        // .text: CLI header, metadata, signature area
        let signature_directory = if self.signature_size == 0 {
            (0, 0)
        } else {
            (signature_rva, self.signature_size)
        };
        let header = Cor20Header::il_only((metadata_rva, metadata_len), signature_directory);
        let text_start = TEXT_FILE_OFFSET as usize;
        header.write(&mut data[text_start..])?;

        let metadata_start = text_start + COR20_HEADER_SIZE;
        data[metadata_start..metadata_start + self.metadata.len()].copy_from_slice(&self.metadata);

        Ok(data)
    }
}

impl ImageWriter for PeBuilder {
    fn write_image(&self, reserved_signature_size: u32) -> Result<Vec<u8>> {
        self.clone().signature_size(reserved_signature_size).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::io::read_le_at;

    #[test]
    fn image_size_is_file_aligned() {
        let data = PeBuilder::new().signature_size(256).build().unwrap();
        assert_eq!(data.len() % FILE_ALIGNMENT as usize, 0);
        assert_eq!(&data[0..2], b"MZ");
        assert_eq!(&data[PE_OFFSET..PE_OFFSET + 4], b"PE\0\0");
    }

    #[test]
    fn signature_directory_written() {
        let data = PeBuilder::new().signature_size(128).build().unwrap();
        let mut offset = TEXT_FILE_OFFSET as usize + 32;
        let rva = read_le_at::<u32>(&data, &mut offset).unwrap();
        let size = read_le_at::<u32>(&data, &mut offset).unwrap();
        assert_eq!(rva, 0x2088);
        assert_eq!(size, 128);
    }

    #[test]
    fn empty_metadata_rejected() {
        assert!(PeBuilder::new().metadata(Vec::new()).build().is_err());
    }

    #[test]
    fn image_writer_applies_reservation() {
        let data = PeBuilder::new().write_image(256).unwrap();
        let mut offset = TEXT_FILE_OFFSET as usize + 36;
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 256);
    }
}
