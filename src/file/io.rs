//! Low-level byte order and safe reading/writing utilities.
//!
//! This module provides bounds-checked little-endian reads of primitive values and the
//! matching writers used when type images and method bodies are serialized. It also hosts
//! the ECMA-335 II.23.2 compressed unsigned integer encoder, the counterpart of
//! [`crate::file::parser::Parser::read_compressed_uint`].
//!
//! # Key Components
//!
//! - [`crate::file::io::CilIO`] - Trait defining little-endian conversion for primitive types
//! - [`crate::file::io::read_le`] / [`crate::file::io::read_le_at`] - Bounds-checked reads
//! - [`crate::file::io::write_le`] - Append a value to a growing buffer
//! - [`crate::file::io::write_compressed_uint`] - Compressed integer encoding
//! - [`crate::file::io::write_compressed_string`] - Length-prefixed UTF-8 strings
//!
//! # Usage Examples
//!
//! ```rust,ignore
//! use cilplant::file::io::{read_le_at, write_le};
//!
//! let mut data = Vec::new();
//! write_le(&mut data, 1u16);
//! write_le(&mut data, 3u32);
//!
//! let mut offset = 0;
//! let first: u16 = read_le_at(&data, &mut offset)?;
//! let second: u32 = read_le_at(&data, &mut offset)?;
//! assert_eq!((first, second, offset), (1, 3, 6));
//! # Ok::<(), cilplant::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Trait for implementing type-specific safe little-endian conversion.
///
/// Implemented for all fixed-size integer and floating point types that appear in CIL
/// operands and image headers.
pub trait CilIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $len:literal),* $(,)?) => {
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

impl_cil_io! {
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4,
    u64 => 8, i64 => 8,
    f32 => 4, f64 => 8,
}

/// Safely reads a value of type `T` in little-endian byte order from the start of a buffer.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at a specific offset.
///
/// The offset is advanced by the number of bytes read.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
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

/// Appends `value` to `out` in little-endian byte order.
pub fn write_le<T: CilIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_le_bytes().as_ref());
}

/// Overwrites `data[offset..]` with `value` in little-endian byte order.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit at `offset`.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();
    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[offset..end].copy_from_slice(bytes);
    Ok(())
}

/// Appends an ECMA-335 II.23.2 compressed unsigned integer.
///
/// | Range | Encoding |
/// |-------|----------|
/// | `0x00..=0x7F` | `0xxxxxxx` |
/// | `0x80..=0x3FFF` | `10xxxxxx xxxxxxxx` |
/// | `0x4000..=0x1FFF_FFFF` | `110xxxxx xxxxxxxx xxxxxxxx xxxxxxxx` |
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for values above `0x1FFF_FFFF`.
pub fn write_compressed_uint(out: &mut Vec<u8>, value: u32) -> Result<()> {
    match value {
        0..=0x7F => out.push(value as u8),
        0x80..=0x3FFF => {
            out.push(0x80 | (value >> 8) as u8);
            out.push(value as u8);
        }
        0x4000..=0x1FFF_FFFF => {
            out.push(0xC0 | (value >> 24) as u8);
            out.push((value >> 16) as u8);
            out.push((value >> 8) as u8);
            out.push(value as u8);
        }
        _ => return Err(malformed_error!("Value {} is too large to compress", value)),
    }
    Ok(())
}

/// Appends a compressed length followed by the UTF-8 bytes of `value`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the string is too long to encode.
pub fn write_compressed_string(out: &mut Vec<u8>, value: &str) -> Result<()> {
    let len = u32::try_from(value.len())
        .map_err(|_| malformed_error!("String of {} bytes is too long", value.len()))?;
    write_compressed_uint(out, len)?;
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Converts a collection length into a compressed count.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the length exceeds the compressed range.
pub fn write_compressed_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| malformed_error!("Length {} too large", len))?;
    write_compressed_uint(out, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::parser::Parser;

    #[test]
    fn read_le_types() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

        assert_eq!(read_le::<u8>(&data).unwrap(), 0x01);
        assert_eq!(read_le::<u16>(&data).unwrap(), 0x0201);
        assert_eq!(read_le::<u32>(&data).unwrap(), 0x0403_0201);
        assert_eq!(read_le::<u64>(&data).unwrap(), 0x0807_0605_0403_0201);
        assert_eq!(read_le::<i8>(&[0xFF]).unwrap(), -1);
    }

    #[test]
    fn read_le_at_advances() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00, 0x00];
        let mut offset = 0;

        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 1);
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 2);
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 3);
        assert_eq!(offset, 8);

        assert!(matches!(
            read_le_at::<u8>(&data, &mut offset),
            Err(crate::Error::OutOfBounds)
        ));
    }

    #[test]
    fn write_le_roundtrip_floats() {
        let mut out = Vec::new();
        write_le(&mut out, 1.5f32);
        write_le(&mut out, -2.25f64);

        let mut offset = 0;
        assert_eq!(read_le_at::<f32>(&out, &mut offset).unwrap(), 1.5);
        assert_eq!(read_le_at::<f64>(&out, &mut offset).unwrap(), -2.25);
    }

    #[test]
    fn write_le_at_bounds() {
        let mut data = [0u8; 4];
        write_le_at(&mut data, 0, 0x1122_3344u32).unwrap();
        assert_eq!(data, [0x44, 0x33, 0x22, 0x11]);
        assert!(write_le_at(&mut data, 2, 0u32).is_err());
    }

    #[test]
    fn compressed_uint_boundaries() {
        let cases: [(u32, &[u8]); 6] = [
            (0x03, &[0x03]),
            (0x7F, &[0x7F]),
            (0x80, &[0x80, 0x80]),
            (0x3FFF, &[0xBF, 0xFF]),
            (0x4000, &[0xC0, 0x00, 0x40, 0x00]),
            (0x1FFF_FFFF, &[0xDF, 0xFF, 0xFF, 0xFF]),
        ];

        for (value, expected) in cases {
            let mut out = Vec::new();
            write_compressed_uint(&mut out, value).unwrap();
            assert_eq!(out, expected, "encoding of {value:#x}");

            let mut parser = Parser::new(&out);
            assert_eq!(parser.read_compressed_uint().unwrap(), value);
        }

        assert!(write_compressed_uint(&mut Vec::new(), 0x2000_0000).is_err());
    }

    #[test]
    fn compressed_string() {
        let mut out = Vec::new();
        write_compressed_string(&mut out, "Demo.Calculator").unwrap();
        assert_eq!(out[0], 15);

        let mut parser = Parser::new(&out);
        assert_eq!(
            parser.read_compressed_string_utf8().unwrap(),
            "Demo.Calculator"
        );
    }
}
