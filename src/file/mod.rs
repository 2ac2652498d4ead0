//! PE image access for the strong-name signing pipeline.
//!
//! This module wraps a fully laid-out .NET PE image held in memory and exposes the handful of
//! locations the signing pipeline needs to touch: the CLI (COR20) header, the PE checksum, the
//! security (certificate) directory entry, the header region and the raw data of every section.
//! Parsing is done once through [`goblin`], after which all offsets are kept as plain file
//! offsets so the image can be patched in place.
//!
//! # Key Components
//!
//! - [`PeImage`] - Owned, patchable PE image with a validated CLI header
//! - [`PeLayout`] - File offsets of the structures the signing pipeline reads or writes
//! - [`SectionSpan`] - Raw and virtual extent of one section
//! - [`builder::PeBuilder`] - Minimal IL-only image writer with a reserved signature area
//! - [`parser::Parser`] / [`io`] - Bounds-checked binary readers
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotsign::file::{builder::PeBuilder, PeImage};
//!
//! let bytes = PeBuilder::new().signature_size(128).build()?;
//! let image = PeImage::from_bytes(bytes)?;
//! let range = image.strong_name_signature_range()?;
//! assert_eq!(range.map(|r| r.len()), Some(128));
//! # Ok::<(), dotsign::Error>(())
//! ```

pub mod builder;
pub mod io;
pub mod parser;

use std::ops::Range;

use goblin::pe::PE;

use crate::{
    file::io::{read_le_at, write_le_at},
    metadata::cor20header::{Cor20Header, CorFlags, COR20_FLAGS_OFFSET},
    Error::{Empty, GoblinErr},
    Result,
};

/// Size of the PE signature plus the COFF file header.
const PE_SIGNATURE_AND_COFF_SIZE: usize = 4 + 20;
/// Offset of `CheckSum` inside the optional header (identical for PE32 and PE32+).
const OPTIONAL_HEADER_CHECKSUM_OFFSET: usize = 64;
/// Offset of the data directory array inside a PE32 optional header.
const PE32_DATA_DIRECTORIES_OFFSET: usize = 96;
/// Offset of the data directory array inside a PE32+ optional header.
const PE32_PLUS_DATA_DIRECTORIES_OFFSET: usize = 112;
/// Data directory index of the certificate table.
const SECURITY_DIRECTORY_INDEX: usize = 4;
/// Data directory index of the CLI runtime header.
const CLR_RUNTIME_DIRECTORY_INDEX: usize = 14;
/// Size of a single data directory entry.
const DATA_DIRECTORY_SIZE: usize = 8;

/// Raw and virtual extent of one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSpan {
    /// Section name, e.g. `.text`
    pub name: String,
    /// RVA of the section start
    pub virtual_address: u32,
    /// Size of the section in memory
    pub virtual_size: u32,
    /// File offset of the raw data
    pub raw_offset: u32,
    /// Size of the raw data in the file
    pub raw_size: u32,
}

impl SectionSpan {
    /// File range covered by this section's raw data.
    #[must_use]
    pub fn raw_range(&self) -> Range<usize> {
        let start = self.raw_offset as usize;
        start..start + self.raw_size as usize
    }
}

/// File offsets of the structures touched while strong-name signing.
#[derive(Debug, Clone)]
pub struct PeLayout {
    /// Offset of the `PE\0\0` signature
    pub pe_offset: usize,
    /// True for PE32+ images
    pub is_pe32_plus: bool,
    /// Offset of the 4-byte `CheckSum` field
    pub checksum_offset: usize,
    /// Offset of the 8-byte certificate table directory entry
    pub security_directory_offset: usize,
    /// `SizeOfHeaders` from the optional header
    pub size_of_headers: usize,
    /// Offset of the CLI header
    pub cli_header_offset: usize,
    /// Sections in file order
    pub sections: Vec<SectionSpan>,
}

/// An owned, patchable .NET PE image.
pub struct PeImage {
    data: Vec<u8>,
    layout: PeLayout,
}

impl PeImage {
    /// Parse and validate an in-memory image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for empty input, a goblin error for images that do not
    /// parse, and [`crate::Error::Malformed`] when the CLI runtime header directory is missing
    /// or does not map into a section.
    pub fn from_bytes(data: Vec<u8>) -> Result<PeImage> {
        if data.is_empty() {
            return Err(Empty);
        }

        let layout = {
            let pe = PE::parse(&data).map_err(GoblinErr)?;
            Self::compute_layout(&pe, &data)?
        };

        Ok(PeImage { data, layout })
    }

    fn compute_layout(pe: &PE<'_>, data: &[u8]) -> Result<PeLayout> {
        let Some(optional_header) = pe.header.optional_header else {
            return Err(malformed_error!("File does not have an OptionalHeader"));
        };

        let pe_offset = pe.header.dos_header.pe_pointer as usize;
        let optional_header_offset = pe_offset + PE_SIGNATURE_AND_COFF_SIZE;
        let is_pe32_plus = pe.is_64;
        let data_directories_offset = optional_header_offset
            + if is_pe32_plus {
                PE32_PLUS_DATA_DIRECTORIES_OFFSET
            } else {
                PE32_DATA_DIRECTORIES_OFFSET
            };

        let mut sections: Vec<SectionSpan> = pe
            .sections
            .iter()
            .map(|section| SectionSpan {
                name: section.name().unwrap_or_default().to_string(),
                virtual_address: section.virtual_address,
                virtual_size: section.virtual_size,
                raw_offset: section.pointer_to_raw_data,
                raw_size: section.size_of_raw_data,
            })
            .collect();
        sections.sort_by_key(|section| section.raw_offset);

        for section in &sections {
            if section.raw_range().end > data.len() {
                return Err(malformed_error!(
                    "Section {} raw data exceeds file size - {} > {}",
                    section.name,
                    section.raw_range().end,
                    data.len()
                ));
            }
        }

        let mut clr_offset =
            data_directories_offset + CLR_RUNTIME_DIRECTORY_INDEX * DATA_DIRECTORY_SIZE;
        let clr_rva = read_le_at::<u32>(data, &mut clr_offset)?;
        let clr_size = read_le_at::<u32>(data, &mut clr_offset)?;
        if clr_rva == 0 || clr_size == 0 {
            return Err(malformed_error!(
                "File does not have a CLR runtime header directory"
            ));
        }

        let cli_header_offset = rva_to_offset_in(&sections, clr_rva)?;

        Ok(PeLayout {
            pe_offset,
            is_pe32_plus,
            checksum_offset: optional_header_offset + OPTIONAL_HEADER_CHECKSUM_OFFSET,
            security_directory_offset: data_directories_offset
                + SECURITY_DIRECTORY_INDEX * DATA_DIRECTORY_SIZE,
            size_of_headers: optional_header.windows_fields.size_of_headers as usize,
            cli_header_offset,
            sections,
        })
    }

    /// The raw image bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the image and return its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Offsets computed when the image was loaded.
    #[must_use]
    pub fn layout(&self) -> &PeLayout {
        &self.layout
    }

    /// Parse the CLI header.
    ///
    /// # Errors
    /// Returns an error if the header is truncated or fails validation.
    pub fn cor20(&self) -> Result<Cor20Header> {
        let start = self.layout.cli_header_offset;
        let Some(header) = self.data.get(start..) else {
            return Err(out_of_bounds_error!());
        };
        Cor20Header::read(header)
    }

    /// Translate an RVA into a file offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no section contains `rva`.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        rva_to_offset_in(&self.layout.sections, rva)
    }

    /// File range of the strong-name signature blob, or `None` if no space is reserved.
    ///
    /// # Errors
    /// Returns an error if the directory points outside the image.
    pub fn strong_name_signature_range(&self) -> Result<Option<Range<usize>>> {
        let header = self.cor20()?;
        if header.strong_name_signature_rva == 0 || header.strong_name_signature_size == 0 {
            return Ok(None);
        }

        let start = self.rva_to_offset(header.strong_name_signature_rva)?;
        let end = start + header.strong_name_signature_size as usize;
        if end > self.data.len() {
            return Err(malformed_error!(
                "Strong name signature exceeds file size - {} > {}",
                end,
                self.data.len()
            ));
        }

        Ok(Some(start..end))
    }

    /// Overwrite the CLI header flags.
    ///
    /// # Errors
    /// Returns an error if the CLI header lies outside the image.
    pub fn set_cor_flags(&mut self, flags: CorFlags) -> Result<()> {
        let mut offset = self.layout.cli_header_offset + COR20_FLAGS_OFFSET;
        write_le_at(&mut self.data, &mut offset, flags.bits())
    }

    /// Copy `bytes` into the image at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the write does not fit.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let Some(target) = self.data.get_mut(offset..offset + bytes.len()) else {
            return Err(out_of_bounds_error!());
        };
        target.copy_from_slice(bytes);
        Ok(())
    }

    /// Recompute and store the PE checksum.
    ///
    /// The image is summed as 16-bit little-endian words with end-around carry, skipping the
    /// checksum field itself, and the file length is added to the folded result.
    ///
    /// # Errors
    /// Returns an error if the checksum field lies outside the image.
    pub fn update_checksum(&mut self) -> Result<u32> {
        let checksum = self.compute_checksum();
        let mut offset = self.layout.checksum_offset;
        write_le_at(&mut self.data, &mut offset, checksum)?;
        Ok(checksum)
    }

    fn compute_checksum(&self) -> u32 {
        let checksum_start = self.layout.checksum_offset;
        let checksum_end = checksum_start + 4;
        let file_size = self.data.len();

        let mut checksum: u64 = 0;
        let mut offset = 0;
        while offset < file_size {
            if offset >= checksum_start && offset < checksum_end {
                offset += 2;
                continue;
            }

            let word = if offset + 1 < file_size {
                u64::from(u16::from_le_bytes([self.data[offset], self.data[offset + 1]]))
            } else {
                u64::from(self.data[offset])
            };

            checksum += word;
            if checksum > 0xFFFF {
                checksum = (checksum & 0xFFFF) + (checksum >> 16);
            }

            offset += 2;
        }

        checksum += file_size as u64;
        while checksum > 0xFFFF {
            checksum = (checksum & 0xFFFF) + (checksum >> 16);
        }

        checksum as u32
    }
}

fn rva_to_offset_in(sections: &[SectionSpan], rva: u32) -> Result<usize> {
    for section in sections {
        let Some(section_max) = section.virtual_address.checked_add(section.virtual_size) else {
            return Err(malformed_error!(
                "Section malformed, causing integer overflow - {} + {}",
                section.virtual_address,
                section.virtual_size
            ));
        };

        if section.virtual_address <= rva && rva < section_max {
            let delta = rva - section.virtual_address;
            if delta >= section.raw_size {
                return Err(malformed_error!(
                    "RVA {:#x} lies in uninitialized data of section {}",
                    rva,
                    section.name
                ));
            }
            return Ok(section.raw_offset as usize + delta as usize);
        }
    }

    Err(malformed_error!(
        "RVA could not be converted to offset - {:#x}",
        rva
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::builder::PeBuilder;

    #[test]
    fn layout_of_minimal_image() {
        let image = PeImage::from_bytes(PeBuilder::new().signature_size(128).build().unwrap())
            .unwrap();
        let layout = image.layout();

        assert_eq!(layout.pe_offset, 0x80);
        assert!(!layout.is_pe32_plus);
        assert_eq!(layout.checksum_offset, 0xD8);
        assert_eq!(layout.security_directory_offset, 0x118);
        assert_eq!(layout.size_of_headers, 0x200);
        assert_eq!(layout.cli_header_offset, 0x200);
        assert_eq!(layout.sections.len(), 1);
        assert_eq!(layout.sections[0].name, ".text");
    }

    #[test]
    fn signature_range_matches_reservation() {
        let image = PeImage::from_bytes(PeBuilder::new().signature_size(256).build().unwrap())
            .unwrap();
        let range = image.strong_name_signature_range().unwrap().unwrap();
        assert_eq!(range.len(), 256);
        assert!(image.data()[range].iter().all(|b| *b == 0));
    }

    #[test]
    fn no_reservation() {
        let image = PeImage::from_bytes(PeBuilder::new().build().unwrap()).unwrap();
        assert!(image.strong_name_signature_range().unwrap().is_none());
    }

    #[test]
    fn rva_translation() {
        let image = PeImage::from_bytes(PeBuilder::new().build().unwrap()).unwrap();
        assert_eq!(image.rva_to_offset(0x2000).unwrap(), 0x200);
        assert_eq!(image.rva_to_offset(0x2010).unwrap(), 0x210);
        assert!(image.rva_to_offset(0x1000).is_err());
    }

    #[test]
    fn set_flags_roundtrip() {
        let mut image = PeImage::from_bytes(PeBuilder::new().build().unwrap()).unwrap();
        image
            .set_cor_flags(CorFlags::IL_ONLY | CorFlags::STRONG_NAME_SIGNED)
            .unwrap();
        let header = image.cor20().unwrap();
        assert!(header.flags.contains(CorFlags::STRONG_NAME_SIGNED));
    }

    #[test]
    fn checksum_is_stable_and_self_excluding() {
        let mut image = PeImage::from_bytes(PeBuilder::new().build().unwrap()).unwrap();
        let first = image.update_checksum().unwrap();
        let second = image.update_checksum().unwrap();
        assert_ne!(first, 0);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_input() {
        assert!(matches!(PeImage::from_bytes(Vec::new()), Err(Empty)));
    }

    #[test]
    fn not_a_pe() {
        assert!(PeImage::from_bytes(vec![0u8; 512]).is_err());
    }
}
