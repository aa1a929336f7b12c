use std::fmt;

use crate::error::{Error, Result, Section};
use crate::logger::log_warn;
use crate::reader::ColumnType;

use super::byteorder::{Endianness, read_int};
use super::header::FileHeader;
use super::page::{COMPRESSED_SUBHEADER_ID, COMPRESSED_SUBHEADER_TYPE, SubheaderPointer};

/// Row compression declared by the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Rle,
    Rdc,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Rle => write!(f, "RLE"),
            Self::Rdc => write!(f, "RDC"),
        }
    }
}

const RLE_LITERAL: &[u8] = b"SASYZCRL";
const RDC_LITERAL: &[u8] = b"SASYZCR2";

/// One column of the dataset, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub index: usize,
    pub name: String,
    pub label: String,
    pub format: String,
    pub ctype: ColumnType,
    /// Offset of this column's slice within a decoded row.
    pub offset: usize,
    /// Fixed width of the column slice; 1..8 for numeric columns.
    pub length: usize,
}

/// Metadata fixed once the metadata pages have been walked.
#[derive(Debug, Clone, Default)]
pub(crate) struct MetaInfo {
    pub row_length: usize,
    pub row_count: u64,
    pub mix_page_row_count: u64,
    pub column_count: usize,
    pub compression: Compression,
    pub creator_proc: Option<String>,
    pub lcs: usize,
    pub lcp: usize,
}

/// The kinds of metadata subheaders, selected by byte signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubheaderKind {
    RowSize,
    ColumnSize,
    SubheaderCounts,
    ColumnText,
    ColumnName,
    ColumnAttributes,
    FormatAndLabel,
    ColumnList,
    Data,
}

/// Maps a subheader signature to its kind. The table carries 4- and 8-byte
/// patterns in both endian variants.
pub(crate) fn signature_kind(signature: &[u8]) -> Option<SubheaderKind> {
    use SubheaderKind as K;
    Some(match signature {
        [0xF7, 0xF7, 0xF7, 0xF7]
        | [0x00, 0x00, 0x00, 0x00, 0xF7, 0xF7, 0xF7, 0xF7]
        | [0xF7, 0xF7, 0xF7, 0xF7, 0x00, 0x00, 0x00, 0x00]
        | [0xF7, 0xF7, 0xF7, 0xF7, 0xFF, 0xFF, 0xFB, 0xFE] => K::RowSize,
        [0xF6, 0xF6, 0xF6, 0xF6]
        | [0x00, 0x00, 0x00, 0x00, 0xF6, 0xF6, 0xF6, 0xF6]
        | [0xF6, 0xF6, 0xF6, 0xF6, 0x00, 0x00, 0x00, 0x00]
        | [0xF6, 0xF6, 0xF6, 0xF6, 0xFF, 0xFF, 0xFB, 0xFE] => K::ColumnSize,
        [0x00, 0xFC, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFC, 0x00]
        | [0x00, 0xFC, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFC, 0x00] => K::SubheaderCounts,
        [0xFD, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFD]
        | [0xFD, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFD] => K::ColumnText,
        [0xFF, 0xFF, 0xFF, 0xFF] | [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF] => {
            K::ColumnName
        }
        [0xFC, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFC]
        | [0xFC, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFC] => K::ColumnAttributes,
        [0xFE, 0xFB, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFB, 0xFE]
        | [0xFE, 0xFB, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFB, 0xFE] => K::FormatAndLabel,
        [0xFE, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFE]
        | [0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE] => K::ColumnList,
        _ => return None,
    })
}

/// Resolves a subheader's kind, falling back to row data for unmatched
/// signatures on files that declare a compression.
pub(crate) fn resolve_kind(
    signature: &[u8],
    compression_declared: bool,
    pointer: SubheaderPointer,
) -> Option<SubheaderKind> {
    signature_kind(signature).or_else(|| {
        let flagged = pointer.compression == COMPRESSED_SUBHEADER_ID || pointer.compression == 0;
        (compression_declared && flagged && pointer.ptype == COMPRESSED_SUBHEADER_TYPE)
            .then_some(SubheaderKind::Data)
    })
}

/// Accumulates metadata while walking the metadata pages.
#[derive(Debug, Default)]
pub(crate) struct MetadataBuilder {
    row_length: usize,
    row_count: u64,
    col_count_p1: i64,
    col_count_p2: i64,
    mix_page_row_count: u64,
    lcs: usize,
    lcp: usize,
    column_count: Option<usize>,
    compression: Compression,
    creator_proc: Option<String>,
    text_blocks: Vec<Vec<u8>>,
    names: Vec<String>,
    data_offsets: Vec<usize>,
    data_lengths: Vec<usize>,
    types: Vec<ColumnType>,
    formats: Vec<String>,
    labels: Vec<String>,
}

impl MetadataBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn compression_declared(&self) -> bool {
        self.compression != Compression::None
    }

    pub(crate) fn process(
        &mut self,
        kind: SubheaderKind,
        page: &[u8],
        pointer: SubheaderPointer,
        header: &FileHeader,
        page_index: u64,
    ) -> Result<()> {
        let section = Section::Subheader { page_index };
        match kind {
            SubheaderKind::RowSize => self.process_row_size(page, pointer, header, section),
            SubheaderKind::ColumnSize => self.process_column_size(page, pointer, header, section),
            SubheaderKind::ColumnText => self.process_column_text(page, pointer, header, section),
            SubheaderKind::ColumnName => self.process_column_name(page, pointer, header, section),
            SubheaderKind::ColumnAttributes => {
                self.process_column_attributes(page, pointer, header, section)
            }
            SubheaderKind::FormatAndLabel => {
                self.process_format_and_label(page, pointer, header, section)
            }
            // Counts are redundant with the pointer walk; the list subheader
            // has no known consumer.
            SubheaderKind::SubheaderCounts | SubheaderKind::ColumnList | SubheaderKind::Data => {
                Ok(())
            }
        }
    }

    fn process_row_size(
        &mut self,
        page: &[u8],
        pointer: SubheaderPointer,
        header: &FileHeader,
        section: Section,
    ) -> Result<()> {
        let il = header.int_len;
        let endian = header.endianness;
        let at = pointer.offset;

        self.row_length = usize_at(page, at + 5 * il, il, endian, section)?;
        self.row_count = u64_at(page, at + 6 * il, il, endian, section)?;
        self.col_count_p1 = int_at(page, at + 9 * il, il, endian, section)?;
        self.col_count_p2 = int_at(page, at + 10 * il, il, endian, section)?;
        self.mix_page_row_count = u64_at(page, at + 15 * il, il, endian, section)?;

        let (lcs_offset, lcp_offset) = if header.u64_file {
            (at + 682, at + 706)
        } else {
            (at + 354, at + 378)
        };
        self.lcs = usize_at(page, lcs_offset, 2, endian, section)?;
        self.lcp = usize_at(page, lcp_offset, 2, endian, section)?;
        Ok(())
    }

    fn process_column_size(
        &mut self,
        page: &[u8],
        pointer: SubheaderPointer,
        header: &FileHeader,
        section: Section,
    ) -> Result<()> {
        let il = header.int_len;
        let count = usize_at(page, pointer.offset + il, il, header.endianness, section)?;
        self.column_count = Some(count);

        let declared = self.col_count_p1 + self.col_count_p2;
        if declared != i64::try_from(count).unwrap_or(-1) {
            log_warn(&format!(
                "column count mismatch ({} + {} != {count})",
                self.col_count_p1, self.col_count_p2
            ));
        }
        Ok(())
    }

    fn process_column_text(
        &mut self,
        page: &[u8],
        pointer: SubheaderPointer,
        header: &FileHeader,
        section: Section,
    ) -> Result<()> {
        let base = pointer.offset + header.int_len;
        let size = usize_at(page, base, 2, header.endianness, section)?;
        let block = page
            .get(base..base + size)
            .ok_or_else(|| Error::format(section, "column text block extends past the page"))?
            .to_vec();
        self.text_blocks.push(block);

        if self.text_blocks.len() == 1 {
            self.detect_compression(page, pointer, header);
        }
        Ok(())
    }

    /// The first text block identifies the compression codec and, a little
    /// further in, the name of the procedure that created the dataset.
    fn detect_compression(&mut self, page: &[u8], pointer: SubheaderPointer, header: &FileHeader) {
        let (has_rle, has_rdc) = {
            let block = &self.text_blocks[0];
            (contains(block, RLE_LITERAL), contains(block, RDC_LITERAL))
        };
        if has_rle {
            self.compression = Compression::Rle;
        } else if has_rdc {
            self.compression = Compression::Rdc;
        }

        let pad = if header.u64_file { 4 } else { 0 };
        let literal = page
            .get(pointer.offset + 16 + pad..)
            .map(|tail| trim_sentinel(&tail[..tail.len().min(8)]))
            .unwrap_or_default();

        if literal.is_empty() {
            self.lcs = 0;
            self.creator_proc = read_text(page, pointer.offset + 32 + pad, self.lcp);
        } else if literal == RLE_LITERAL {
            self.creator_proc = read_text(page, pointer.offset + 40 + pad, self.lcp);
        } else if self.lcs > 0 {
            self.lcp = 0;
            self.creator_proc = read_text(page, pointer.offset + 16 + pad, self.lcs);
        }
    }

    fn process_column_name(
        &mut self,
        page: &[u8],
        pointer: SubheaderPointer,
        header: &FileHeader,
        section: Section,
    ) -> Result<()> {
        let il = header.int_len;
        let endian = header.endianness;
        let count = pointer.length.saturating_sub(2 * il + 12) / 8;

        for i in 0..count {
            let entry = pointer.offset + il + 8 * (i + 1);
            let text_index = usize_at(page, entry, 2, endian, section)?;
            let offset = usize_at(page, entry + 2, 2, endian, section)?;
            let length = usize_at(page, entry + 4, 2, endian, section)?;
            let name = carve_text(&self.text_blocks, text_index, offset, length, false)
                .ok_or_else(|| {
                    Error::format(section, "column name points outside its text block")
                })?;
            self.names.push(name);
        }
        Ok(())
    }

    fn process_column_attributes(
        &mut self,
        page: &[u8],
        pointer: SubheaderPointer,
        header: &FileHeader,
        section: Section,
    ) -> Result<()> {
        let il = header.int_len;
        let endian = header.endianness;
        let count = pointer.length.saturating_sub(2 * il + 12) / (il + 8);

        for i in 0..count {
            let stride = i * (il + 8);
            let offset = usize_at(page, pointer.offset + il + 8 + stride, il, endian, section)?;
            let length = usize_at(page, pointer.offset + 2 * il + 8 + stride, 4, endian, section)?;
            let type_byte = *page
                .get(pointer.offset + 2 * il + 14 + stride)
                .ok_or_else(|| {
                    Error::format(section, "column attribute entry extends past the page")
                })?;

            self.data_offsets.push(offset);
            self.data_lengths.push(length);
            self.types.push(if type_byte == 1 {
                ColumnType::Numeric
            } else {
                ColumnType::String
            });
        }
        Ok(())
    }

    fn process_format_and_label(
        &mut self,
        page: &[u8],
        pointer: SubheaderPointer,
        header: &FileHeader,
        section: Section,
    ) -> Result<()> {
        let base = pointer.offset + 3 * header.int_len;
        let endian = header.endianness;

        let format_index = usize_at(page, base + 22, 2, endian, section)?;
        let format_offset = usize_at(page, base + 24, 2, endian, section)?;
        let format_length = usize_at(page, base + 26, 2, endian, section)?;
        let label_index = usize_at(page, base + 28, 2, endian, section)?;
        let label_offset = usize_at(page, base + 30, 2, endian, section)?;
        let label_length = usize_at(page, base + 32, 2, endian, section)?;

        // Some writers emit text indices past the final block; they are
        // clamped rather than rejected.
        let format =
            carve_text(&self.text_blocks, format_index, format_offset, format_length, true)
                .ok_or_else(|| {
                    Error::format(section, "column format points outside its text block")
                })?;
        let label = carve_text(&self.text_blocks, label_index, label_offset, label_length, true)
            .ok_or_else(|| Error::format(section, "column label points outside its text block"))?;

        self.formats.push(format);
        self.labels.push(label);
        Ok(())
    }

    pub(crate) fn finalize(self) -> Result<(MetaInfo, Vec<Column>)> {
        let column_count = self.column_count.ok_or_else(|| {
            Error::format(Section::Header, "column size subheader missing from metadata")
        })?;
        if self.row_length == 0 && column_count > 0 {
            return Err(Error::format(
                Section::Header,
                "row size subheader missing from metadata",
            ));
        }
        for (what, have) in [
            ("names", self.names.len()),
            ("offsets", self.data_offsets.len()),
            ("lengths", self.data_lengths.len()),
            ("types", self.types.len()),
        ] {
            if have < column_count {
                return Err(Error::format(
                    Section::Header,
                    format!("metadata declares {column_count} columns but carries {have} {what}"),
                ));
            }
        }

        let columns = (0..column_count)
            .map(|index| Column {
                index,
                name: self.names[index].clone(),
                label: self.labels.get(index).cloned().unwrap_or_default(),
                format: self.formats.get(index).cloned().unwrap_or_default(),
                ctype: self.types[index],
                offset: self.data_offsets[index],
                length: self.data_lengths[index],
            })
            .collect();

        let info = MetaInfo {
            row_length: self.row_length,
            row_count: self.row_count,
            mix_page_row_count: self.mix_page_row_count,
            column_count,
            compression: self.compression,
            creator_proc: self.creator_proc,
            lcs: self.lcs,
            lcp: self.lcp,
        };
        Ok((info, columns))
    }
}

/// Resolves a `(block, offset, length)` text reference. `clamp` selects the
/// forgiving behaviour used for formats and labels.
fn carve_text(
    blocks: &[Vec<u8>],
    index: usize,
    offset: usize,
    length: usize,
    clamp: bool,
) -> Option<String> {
    let index = if clamp && !blocks.is_empty() {
        index.min(blocks.len() - 1)
    } else {
        index
    };
    let block = blocks.get(index)?;
    let bytes = block.get(offset..offset + length)?;
    Some(String::from_utf8_lossy(bytes).into_owned())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn trim_sentinel(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| *b != 0).map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn read_text(page: &[u8], offset: usize, length: usize) -> Option<String> {
    if length == 0 {
        return None;
    }
    let bytes = page.get(offset..offset + length)?;
    let text = String::from_utf8_lossy(trim_blank(bytes)).into_owned();
    (!text.is_empty()).then_some(text)
}

fn trim_blank(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0 && *b != b' ')
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

fn int_at(
    page: &[u8],
    offset: usize,
    width: usize,
    endian: Endianness,
    section: Section,
) -> Result<i64> {
    let bytes = page
        .get(offset..offset + width)
        .ok_or_else(|| Error::format(section, "subheader field extends past the page"))?;
    read_int(endian, bytes, width)
}

fn usize_at(
    page: &[u8],
    offset: usize,
    width: usize,
    endian: Endianness,
    section: Section,
) -> Result<usize> {
    let value = int_at(page, offset, width, endian, section)?;
    usize::try_from(value)
        .map_err(|_| Error::format(section, format!("negative subheader field value {value}")))
}

fn u64_at(
    page: &[u8],
    offset: usize,
    width: usize,
    endian: Endianness,
    section: Section,
) -> Result<u64> {
    let value = int_at(page, offset, width, endian, section)?;
    u64::try_from(value)
        .map_err(|_| Error::format(section, format!("negative subheader field value {value}")))
}

/// Reads the first `int_len` bytes of a subheader, which hold its signature.
pub(crate) fn read_signature<'a>(
    page: &'a [u8],
    pointer: SubheaderPointer,
    header: &FileHeader,
    page_index: u64,
) -> Result<&'a [u8]> {
    page.get(pointer.offset..pointer.offset + header.int_len)
        .ok_or_else(|| {
            Error::format(
                Section::Subheader { page_index },
                "subheader signature extends past the page",
            )
        })
}
