use std::io::{self, Read};

use crate::error::{Error, Result, Section};

use super::byteorder::read_int;
use super::header::FileHeader;

pub(crate) const PAGE_META: i64 = 0;
pub(crate) const PAGE_DATA: i64 = 256;
pub(crate) const PAGE_MIX_A: i64 = 512;
pub(crate) const PAGE_MIX_B: i64 = 640;
pub(crate) const PAGE_AMD: i64 = 1024;

/// Offset of the subheader pointer array relative to the page bit offset.
pub(crate) const SUBHEADER_POINTERS_OFFSET: usize = 8;

pub(crate) const TRUNCATED_SUBHEADER_ID: u8 = 1;
pub(crate) const COMPRESSED_SUBHEADER_ID: u8 = 4;
pub(crate) const COMPRESSED_SUBHEADER_TYPE: u8 = 1;

pub(crate) const fn is_mix(page_type: i64) -> bool {
    matches!(page_type, PAGE_MIX_A | PAGE_MIX_B)
}

/// Pages that can carry row data.
pub(crate) const fn yields_rows(page_type: i64) -> bool {
    matches!(page_type, PAGE_DATA | PAGE_MIX_A | PAGE_MIX_B)
}

/// Pages whose subheaders contribute metadata.
pub(crate) const fn holds_metadata(page_type: i64) -> bool {
    matches!(page_type, PAGE_META | PAGE_MIX_A | PAGE_MIX_B | PAGE_AMD)
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PageHeader {
    pub page_type: i64,
    pub block_count: usize,
    pub subheader_count: usize,
}

/// Reads the small page header located at the page bit offset.
pub(crate) fn read_page_header(
    page: &[u8],
    header: &FileHeader,
    page_index: u64,
) -> Result<PageHeader> {
    let section = Section::Page { index: page_index };
    let base = header.page_bit_offset;
    let bytes = page
        .get(base..base + 6)
        .ok_or_else(|| Error::format(section, "page too small for its header"))?;

    let page_type = read_int(header.endianness, &bytes[0..2], 2)?;
    let block_count = unsigned(read_int(header.endianness, &bytes[2..4], 2)?, section)?;
    let subheader_count = unsigned(read_int(header.endianness, &bytes[4..6], 2)?, section)?;

    Ok(PageHeader {
        page_type,
        block_count,
        subheader_count,
    })
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SubheaderPointer {
    pub offset: usize,
    pub length: usize,
    pub compression: u8,
    pub ptype: u8,
}

/// Reads the `index`-th subheader pointer of the current page.
pub(crate) fn read_subheader_pointer(
    page: &[u8],
    header: &FileHeader,
    index: usize,
    page_index: u64,
) -> Result<SubheaderPointer> {
    let section = Section::Subheader { page_index };
    let int_len = header.int_len;
    let base =
        header.page_bit_offset + SUBHEADER_POINTERS_OFFSET + index * header.subheader_pointer_len;
    let bytes = page
        .get(base..base + 2 * int_len + 2)
        .ok_or_else(|| Error::format(section, "subheader pointer extends past the page"))?;

    let offset = unsigned(read_int(header.endianness, &bytes[..int_len], int_len)?, section)?;
    let length = unsigned(
        read_int(header.endianness, &bytes[int_len..2 * int_len], int_len)?,
        section,
    )?;

    Ok(SubheaderPointer {
        offset,
        length,
        compression: bytes[2 * int_len],
        ptype: bytes[2 * int_len + 1],
    })
}

fn unsigned(value: i64, section: Section) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::format(section, format!("negative field value {value}")))
}

/// Reads the next page into `buf`, which is resized to the page length.
/// Returns `false` on a clean end of input before any byte was read.
pub(crate) fn fill_page<R: Read>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    page_length: usize,
    page_index: u64,
) -> Result<bool> {
    buf.resize(page_length, 0);
    let filled = read_full(reader, buf)?;
    if filled == 0 {
        return Ok(false);
    }
    if filled < page_length {
        return Err(Error::format(
            Section::Page { index: page_index },
            format!("partial page: read {filled} of {page_length} bytes"),
        ));
    }
    Ok(true)
}

/// Extends the cached page with the next page from the stream, for rows
/// that run past the end of the current page.
pub(crate) fn append_page<R: Read>(
    reader: &mut R,
    cache: &mut Vec<u8>,
    page_length: usize,
    page_index: u64,
) -> Result<bool> {
    let start = cache.len();
    cache.resize(start + page_length, 0);
    let filled = read_full(reader, &mut cache[start..])?;
    if filled == 0 {
        cache.truncate(start);
        return Ok(false);
    }
    if filled < page_length {
        return Err(Error::format(
            Section::Page { index: page_index },
            format!("partial page: read {filled} of {page_length} bytes"),
        ));
    }
    Ok(true)
}

fn read_full<R: Read>(reader: &mut R, mut buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0usize;
    while !buf.is_empty() {
        match reader.read(buf) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                buf = &mut buf[n..];
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}
