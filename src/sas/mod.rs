//! Reader for the SAS7BDAT binary dataset format.
//!
//! Construction parses the header and walks the metadata pages eagerly;
//! rows are decoded on demand in column-oriented batches via
//! [`Sas7bdatReader::read`].

mod byteorder;
mod compression;
mod header;
mod page;
mod pool;
mod rows;
mod subheaders;

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use encoding_rs::Encoding;
use time::OffsetDateTime;

use crate::error::{Error, Result, Section};
use crate::reader::{ColumnType, StatFileReader};
use crate::series::Series;

pub use byteorder::Endianness;
pub use header::Platform;
pub use pool::StringPool;
pub use subheaders::{Column, Compression};

use compression::{decompress_rdc, decompress_rle};
use header::{FileHeader, parse_header};
use page::{
    PAGE_AMD, PAGE_DATA, PAGE_META, SUBHEADER_POINTERS_OFFSET, SubheaderPointer,
    TRUNCATED_SUBHEADER_ID, append_page, fill_page, holds_metadata, is_mix, read_page_header,
    read_subheader_pointer, yields_rows,
};
use rows::{BatchOptions, ColumnChunk, TextOptions, allocate_chunks, chunks_to_series, decode_row};
use subheaders::{MetaInfo, MetadataBuilder, SubheaderKind, read_signature, resolve_kind};

/// Streaming reader for SAS7BDAT files.
///
/// The reader owns a page-sized cache that is refilled as pages are
/// consumed; each [`read`](Self::read) call returns independently owned
/// column batches, so callers may retain earlier batches while reading
/// further. The reader is single-threaded; share batches, not the reader.
pub struct Sas7bdatReader<R: Read + Seek> {
    source: R,
    header: FileHeader,
    meta: MetaInfo,
    columns: Vec<Column>,

    cached_page: Vec<u8>,
    page_type: i64,
    block_count: usize,
    subheader_count: usize,
    data_pointers: Vec<SubheaderPointer>,
    row_on_page: usize,
    row_in_file: u64,
    pages_read: u64,
    pool: StringPool,

    trim_strings: bool,
    convert_dates: bool,
    factorize_strings: bool,
    align_correction: bool,
    text_decoder: Option<&'static Encoding>,
}

impl Sas7bdatReader<File> {
    /// Opens a SAS7BDAT file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> Sas7bdatReader<R> {
    /// Builds a reader over a seekable byte source, parsing the header and
    /// all metadata pages up to the first page that carries row data.
    pub fn new(mut source: R) -> Result<Self> {
        let header = parse_header(&mut source)?;

        let mut builder = MetadataBuilder::new();
        let mut cached_page = Vec::with_capacity(header.page_length);
        let mut data_pointers = Vec::new();
        let mut pages_read = 0u64;
        let mut page_type = PAGE_META;
        let mut block_count = 0usize;
        let mut subheader_count = 0usize;

        loop {
            if !fill_page(&mut source, &mut cached_page, header.page_length, pages_read)? {
                break;
            }
            let parsed = read_page_header(&cached_page, &header, pages_read)?;
            data_pointers.clear();
            if holds_metadata(parsed.page_type) {
                walk_subheaders(
                    &cached_page,
                    &header,
                    parsed.subheader_count,
                    Some(&mut builder),
                    false,
                    &mut data_pointers,
                    pages_read,
                )?;
            }
            pages_read += 1;
            page_type = parsed.page_type;
            block_count = parsed.block_count;
            subheader_count = parsed.subheader_count;

            if yields_rows(parsed.page_type) || !data_pointers.is_empty() {
                break;
            }
        }

        let (meta, columns) = builder.finalize()?;

        Ok(Self {
            source,
            header,
            meta,
            columns,
            cached_page,
            page_type,
            block_count,
            subheader_count,
            data_pointers,
            row_on_page: 0,
            row_in_file: 0,
            pages_read,
            pool: StringPool::new(),
            trim_strings: false,
            convert_dates: false,
            factorize_strings: false,
            align_correction: true,
            text_decoder: None,
        })
    }

    /// Right-trim NUL and space bytes from decoded strings.
    pub fn set_trim_strings(&mut self, on: bool) {
        self.trim_strings = on;
    }

    /// Return `MMDDYY`/`DATE`/`DATETIME`-formatted numeric columns as
    /// timestamps.
    pub fn set_convert_dates(&mut self, on: bool) {
        self.convert_dates = on;
    }

    /// Return string columns as pool ids; recover the text through
    /// [`string_factor_map`](Self::string_factor_map).
    pub fn set_factorize_strings(&mut self, on: bool) {
        self.factorize_strings = on;
    }

    /// Toggles the row alignment correction on mix pages. On by default;
    /// the escape hatch keeps bug-for-bug compatibility with files written
    /// for readers that never applied it.
    pub fn set_align_correction(&mut self, on: bool) {
        self.align_correction = on;
    }

    /// Installs a decoder applied to string values before trimming and
    /// interning. Without one, bytes are read as UTF-8, lossily. The header
    /// encoding is only a hint, so mislabeled files are overridden here.
    pub fn set_text_decoder(&mut self, decoder: Option<&'static Encoding>) {
        self.text_decoder = decoder;
    }

    /// Total number of rows in the dataset.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.meta.row_count
    }

    /// Column descriptors, in file order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    #[must_use]
    pub fn column_labels(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.label.clone()).collect()
    }

    #[must_use]
    pub fn column_formats(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.format.clone()).collect()
    }

    #[must_use]
    pub fn column_types(&self) -> Vec<ColumnType> {
        self.columns.iter().map(|c| c.ctype).collect()
    }

    #[must_use]
    pub fn date_created(&self) -> Option<OffsetDateTime> {
        self.header.date_created
    }

    #[must_use]
    pub fn date_modified(&self) -> Option<OffsetDateTime> {
        self.header.date_modified
    }

    #[must_use]
    pub fn compression(&self) -> Compression {
        self.meta.compression
    }

    #[must_use]
    pub fn platform(&self) -> Platform {
        self.header.platform
    }

    #[must_use]
    pub fn os_name(&self) -> &str {
        &self.header.os_name
    }

    #[must_use]
    pub fn os_type(&self) -> &str {
        &self.header.os_type
    }

    #[must_use]
    pub fn file_encoding(&self) -> &str {
        &self.header.encoding
    }

    #[must_use]
    pub fn server_type(&self) -> &str {
        &self.header.server_type
    }

    #[must_use]
    pub fn sas_release(&self) -> &str {
        &self.header.sas_release
    }

    #[must_use]
    pub fn file_type(&self) -> &str {
        &self.header.file_type
    }

    /// Name of the dataset, from the header.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.header.name
    }

    /// Procedure that created the dataset, when the file records one.
    #[must_use]
    pub fn creator_proc(&self) -> Option<&str> {
        self.meta.creator_proc.as_deref()
    }

    /// 32 or 64, from the header alignment probe.
    #[must_use]
    pub fn bitness(&self) -> u32 {
        if self.header.u64_file { 64 } else { 32 }
    }

    #[must_use]
    pub fn byte_order(&self) -> Endianness {
        self.header.endianness
    }

    /// The string pool backing the most recent batch. Only meaningful
    /// together with [`set_factorize_strings`](Self::set_factorize_strings);
    /// the pool is rebuilt on every `read` call.
    #[must_use]
    pub fn string_factor_map(&self) -> &StringPool {
        &self.pool
    }

    /// Reads up to `rows` rows as per-column [`Series`]; negative means the
    /// remainder of the file. Returns `Ok(None)` once all rows have been
    /// yielded; later calls keep returning `Ok(None)` without further I/O.
    pub fn read(&mut self, rows: i64) -> Result<Option<Vec<Series>>> {
        if self.row_in_file >= self.meta.row_count {
            return Ok(None);
        }

        let remaining = self.meta.row_count - self.row_in_file;
        let want = if rows < 0 {
            remaining
        } else {
            u64::try_from(rows).unwrap_or(0).min(remaining)
        };
        let want = usize::try_from(want).map_err(|_| Error::Unsupported {
            feature: "batch larger than the address space".into(),
        })?;

        self.pool.clear();
        let mut chunks = allocate_chunks(&self.columns, want);
        let mut decoded = 0usize;
        while decoded < want {
            if !self.read_row(&mut chunks, decoded)? {
                break;
            }
            decoded += 1;
        }

        // A file that runs out of pages before the declared row count would
        // otherwise hand back empty batches forever.
        if decoded == 0 && want > 0 {
            self.row_in_file = self.meta.row_count;
            return Ok(None);
        }

        let batch = chunks_to_series(
            chunks,
            &self.columns,
            decoded,
            self.header.endianness,
            BatchOptions {
                convert_dates: self.convert_dates,
                factorize: self.factorize_strings,
            },
            &self.pool,
        )?;
        Ok(Some(batch))
    }

    /// Decodes the next row into `chunks`. Returns `false` when the file
    /// runs out of pages before the declared row count is reached.
    fn read_row(&mut self, chunks: &mut [ColumnChunk], row_in_chunk: usize) -> Result<bool> {
        loop {
            match self.page_type {
                PAGE_META => {
                    if self.row_on_page >= self.data_pointers.len() {
                        if !self.advance_page()? {
                            return Ok(false);
                        }
                        continue;
                    }
                    let pointer = self.data_pointers[self.row_on_page];
                    self.process_row_bytes(pointer.offset, pointer.length, chunks, row_in_chunk)?;
                    return Ok(true);
                }
                page_type if is_mix(page_type) => {
                    let budget = usize::try_from(self.meta.row_count.min(self.meta.mix_page_row_count))
                        .unwrap_or(usize::MAX);
                    if self.row_on_page >= budget {
                        if !self.advance_page()? {
                            return Ok(false);
                        }
                        continue;
                    }
                    let base = self.header.page_bit_offset
                        + SUBHEADER_POINTERS_OFFSET
                        + self.subheader_count * self.header.subheader_pointer_len;
                    // Rows on mix pages start at the next 8-byte boundary
                    // after the pointer array, unless the escape hatch is on.
                    let align = if self.align_correction { base % 8 } else { 0 };
                    let offset = base + align + self.row_on_page * self.meta.row_length;
                    self.process_row_bytes(offset, self.meta.row_length, chunks, row_in_chunk)?;
                    return Ok(true);
                }
                PAGE_DATA => {
                    if self.row_on_page >= self.block_count {
                        if !self.advance_page()? {
                            return Ok(false);
                        }
                        continue;
                    }
                    let offset = self.header.page_bit_offset
                        + SUBHEADER_POINTERS_OFFSET
                        + self.row_on_page * self.meta.row_length;
                    self.process_row_bytes(offset, self.meta.row_length, chunks, row_in_chunk)?;
                    return Ok(true);
                }
                other => {
                    return Err(Error::format(
                        Section::Page {
                            index: self.pages_read.saturating_sub(1),
                        },
                        format!("no processing path for page type {other}"),
                    ));
                }
            }
        }
    }

    /// Advances to the next page that can carry rows. Pages that hold only
    /// auxiliary metadata are skipped; page types without a processing path
    /// are rejected rather than guessed at.
    fn advance_page(&mut self) -> Result<bool> {
        loop {
            if !fill_page(
                &mut self.source,
                &mut self.cached_page,
                self.header.page_length,
                self.pages_read,
            )? {
                return Ok(false);
            }
            let parsed = read_page_header(&self.cached_page, &self.header, self.pages_read)?;
            let page_index = self.pages_read;
            self.pages_read += 1;
            self.page_type = parsed.page_type;
            self.block_count = parsed.block_count;
            self.subheader_count = parsed.subheader_count;
            self.row_on_page = 0;
            self.data_pointers.clear();

            match parsed.page_type {
                PAGE_META => {
                    walk_subheaders(
                        &self.cached_page,
                        &self.header,
                        parsed.subheader_count,
                        None,
                        self.meta.compression != Compression::None,
                        &mut self.data_pointers,
                        page_index,
                    )?;
                    return Ok(true);
                }
                page_type if yields_rows(page_type) => return Ok(true),
                PAGE_AMD => {}
                other => {
                    return Err(Error::format(
                        Section::Page { index: page_index },
                        format!("no processing path for page type {other}"),
                    ));
                }
            }
        }
    }

    /// Decodes the row stored at `offset`/`length` in the cached page,
    /// decompressing when the stored length is shorter than the row length.
    fn process_row_bytes(
        &mut self,
        offset: usize,
        length: usize,
        chunks: &mut [ColumnChunk],
        row_in_chunk: usize,
    ) -> Result<()> {
        let row_length = self.meta.row_length;
        let end = offset + length;

        // Some mix pages let the final row run past the page end; the next
        // page is spliced onto the cache exactly once.
        if end > self.cached_page.len() {
            if !append_page(
                &mut self.source,
                &mut self.cached_page,
                self.header.page_length,
                self.pages_read,
            )? {
                return Err(Error::format(
                    Section::Row {
                        index: self.row_in_file,
                    },
                    "row extends past the end of the file",
                ));
            }
            self.pages_read += 1;
            if end > self.cached_page.len() {
                return Err(Error::format(
                    Section::Row {
                        index: self.row_in_file,
                    },
                    "row spans more than two pages",
                ));
            }
        }

        let text = TextOptions {
            trim: self.trim_strings,
            decoder: self.text_decoder,
        };
        let compressed = self.meta.compression != Compression::None && length < row_length;
        if compressed {
            let input = &self.cached_page[offset..end];
            let mut expanded = Vec::new();
            match self.meta.compression {
                Compression::Rle => decompress_rle(input, row_length, &mut expanded)?,
                Compression::Rdc => decompress_rdc(input, row_length, &mut expanded)?,
                Compression::None => unreachable!("guarded by `compressed`"),
            }
            decode_row(
                &expanded,
                &self.columns,
                chunks,
                row_in_chunk,
                self.header.endianness,
                text,
                &mut self.pool,
                self.row_in_file,
            )?;
        } else {
            decode_row(
                &self.cached_page[offset..end],
                &self.columns,
                chunks,
                row_in_chunk,
                self.header.endianness,
                text,
                &mut self.pool,
                self.row_in_file,
            )?;
        }

        self.row_on_page += 1;
        self.row_in_file += 1;
        Ok(())
    }
}

impl<R: Read + Seek> StatFileReader for Sas7bdatReader<R> {
    fn row_count(&self) -> u64 {
        Self::row_count(self)
    }

    fn column_names(&self) -> Vec<String> {
        Self::column_names(self)
    }

    fn column_types(&self) -> Vec<ColumnType> {
        Self::column_types(self)
    }

    fn read(&mut self, rows: i64) -> Result<Option<Vec<Series>>> {
        Self::read(self, rows)
    }
}

/// Walks the subheader pointers of one page. With a builder, metadata
/// subheaders are processed; without one (row phase), known kinds are
/// skipped since the metadata was finalized at construction. Row-data
/// pointers are collected either way.
fn walk_subheaders(
    page: &[u8],
    header: &FileHeader,
    subheader_count: usize,
    mut builder: Option<&mut MetadataBuilder>,
    compression_declared: bool,
    data_pointers: &mut Vec<SubheaderPointer>,
    page_index: u64,
) -> Result<()> {
    for index in 0..subheader_count {
        let pointer = read_subheader_pointer(page, header, index, page_index)?;
        if pointer.length == 0 || pointer.compression == TRUNCATED_SUBHEADER_ID {
            continue;
        }

        let declared = match builder.as_ref() {
            Some(builder) => builder.compression_declared(),
            None => compression_declared,
        };
        let signature = read_signature(page, pointer, header, page_index)?;
        let kind = resolve_kind(signature, declared, pointer).ok_or_else(|| {
            Error::format(Section::Subheader { page_index }, "unknown subheader signature")
        })?;

        if kind == SubheaderKind::Data {
            data_pointers.push(pointer);
        } else if let Some(builder) = builder.as_mut() {
            builder.process(kind, page, pointer, header, page_index)?;
        }
    }
    Ok(())
}
