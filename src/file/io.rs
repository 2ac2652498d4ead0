//! Bounds-checked little-endian reading and writing for PE and key blob structures.
//!
//! Every structure this crate touches (the CLI header, PE optional header fields, CryptoAPI key
//! blobs, custom attribute blobs) is little-endian. The helpers in this module read and write
//! primitive values at explicit offsets and refuse any access that would leave the buffer,
//! returning [`crate::Error::OutOfBounds`] instead of panicking.
//!
//! # Key Components
//!
//! - [`CilIO`] - Trait describing how a primitive converts to and from its byte representation
//! - [`read_le`] / [`read_le_at`] - Read a value from the buffer start or at a tracked offset
//! - [`write_le`] / [`write_le_at`] - Write a value to the buffer start or at a tracked offset
//!
//! # Examples
//!
//! ```rust,ignore
//! use dotsign::file::io::{read_le_at, write_le_at};
//!
//! let mut data = [0u8; 6];
//! let mut offset = 0;
//! write_le_at(&mut data, &mut offset, 0x0002_u16)?;
//! write_le_at(&mut data, &mut offset, 0x0000_2400_u32)?;
//!
//! offset = 0;
//! assert_eq!(read_le_at::<u16>(&data, &mut offset)?, 2);
//! assert_eq!(read_le_at::<u32>(&data, &mut offset)?, 0x2400);
//! # Ok::<(), dotsign::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Conversion between a primitive value and its little-endian byte array.
pub trait CilIO: Sized {
    /// Fixed-size byte array holding the encoded value
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decode from little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode to little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io!(u8 => 1, u16 => 2, u32 => 4, u64 => 8);

/// Reads a value from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Reads a value at `offset` and advances the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would run past the end of `data`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Writes a value to the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn write_le<T: CilIO>(data: &mut [u8], value: T) -> Result<()> {
    let mut offset = 0_usize;
    write_le_at(data, &mut offset, value)
}

/// Writes a value at `offset` and advances the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the write would run past the end of `data`.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let bytes = value.to_le_bytes();
    data[*offset..end].copy_from_slice(bytes.as_ref());
    *offset = end;

    Ok(())
}
