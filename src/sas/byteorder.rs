use std::borrow::Cow;

use crate::error::{Error, Result, Section};

/// Byte order of the file, fixed by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

#[inline]
pub fn read_u16(endian: Endianness, bytes: &[u8]) -> u16 {
    match endian {
        Endianness::Little => u16::from_le_bytes([bytes[0], bytes[1]]),
        Endianness::Big => u16::from_be_bytes([bytes[0], bytes[1]]),
    }
}

/// Reads a signed integer of width 1, 2, 4 or 8 bytes, widened to `i64`.
///
/// # Errors
///
/// Returns `Unsupported` for widths outside the set and `Format` when
/// `bytes` is shorter than `width`.
pub fn read_int(endian: Endianness, bytes: &[u8], width: usize) -> Result<i64> {
    if !matches!(width, 1 | 2 | 4 | 8) {
        return Err(Error::Unsupported {
            feature: Cow::from(format!("integer width {width}")),
        });
    }
    let Some(bytes) = bytes.get(..width) else {
        return Err(Error::format(
            Section::Header,
            "integer field extends past the end of its buffer",
        ));
    };

    let mut buf = [0u8; 8];
    let raw = match endian {
        Endianness::Little => {
            buf[..width].copy_from_slice(bytes);
            u64::from_le_bytes(buf)
        }
        Endianness::Big => {
            buf[8 - width..].copy_from_slice(bytes);
            u64::from_be_bytes(buf)
        }
    };

    // Sign-extend from the declared width.
    let shift = 64 - 8 * u32::try_from(width).unwrap_or(8);
    #[allow(clippy::cast_possible_wrap)]
    let value = ((raw << shift) as i64) >> shift;
    Ok(value)
}

/// Reads a signed integer and converts it to `usize`, rejecting negatives.
pub fn read_offset(endian: Endianness, bytes: &[u8], width: usize, section: Section) -> Result<usize> {
    let value = read_int(endian, bytes, width)?;
    usize::try_from(value)
        .map_err(|_| Error::format(section, format!("negative or oversized offset {value}")))
}

/// Reads an IEEE 754 double. Only width 8 is supported.
pub fn read_f64(endian: Endianness, bytes: &[u8]) -> Result<f64> {
    let Some(bytes) = bytes.get(..8) else {
        return Err(Error::format(
            Section::Header,
            "floating point field extends past the end of its buffer",
        ));
    };
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    let bits = match endian {
        Endianness::Little => u64::from_le_bytes(buf),
        Endianness::Big => u64::from_be_bytes(buf),
    };
    Ok(f64::from_bits(bits))
}

/// Widens a truncated numeric column value to a full 8-byte double.
///
/// Numeric columns narrower than 8 bytes store the most significant bytes
/// of the double: on little-endian files the raw bytes land at the top of
/// the destination, on big-endian files at the bottom.
#[inline]
pub fn pad_double(endian: Endianness, raw: &[u8], dest: &mut [u8]) {
    let width = raw.len().min(8);
    match endian {
        Endianness::Little => dest[8 - width..8].copy_from_slice(&raw[..width]),
        Endianness::Big => dest[..width].copy_from_slice(&raw[..width]),
    }
}
