//! Builders for synthetic SAS7BDAT files used by the integration suites.
//!
//! All fixtures describe the same little-endian 32-bit dataset: ten rows
//! of four columns (a double, a 12-byte string, an `MMDDYY` date and a
//! `DATETIME` stamp), stored uncompressed on data pages, on a mix page,
//! or RLE/RDC-compressed in row subheaders.

#![allow(clippy::pedantic, dead_code)]

pub const HEADER_SIZE: usize = 1024;
pub const PAGE_SIZE: usize = 4096;
pub const ROW_LENGTH: usize = 36;
pub const NAME_WIDTH: usize = 12;
pub const UTF8_CODE: u8 = 20;
pub const LATIN1_CODE: u8 = 29;

/// Seconds from 1960-01-01 to 2020-01-02, used as the creation stamp.
pub const CREATED_SAS_SECONDS: f64 = 1_893_542_400.0;

const MAGIC: [u8; 32] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC2, 0xEA, 0x81, 0x60,
    0xB3, 0x14, 0x11, 0xCF, 0xBD, 0x92, 0x08, 0x00, 0x09, 0xC7, 0x31, 0x8C, 0x18, 0x1F, 0x10, 0x11,
];

const PAGE_META: u16 = 0;
const PAGE_DATA: u16 = 256;
const PAGE_MIX: u16 = 512;

const SIG_ROW_SIZE: [u8; 4] = [0xF7; 4];
const SIG_COLUMN_SIZE: [u8; 4] = [0xF6; 4];
const SIG_COLUMN_TEXT: [u8; 4] = [0xFD, 0xFF, 0xFF, 0xFF];
const SIG_COLUMN_NAME: [u8; 4] = [0xFF; 4];
const SIG_COLUMN_ATTRS: [u8; 4] = [0xFC, 0xFF, 0xFF, 0xFF];
const SIG_FORMAT_LABEL: [u8; 4] = [0xFE, 0xFB, 0xFF, 0xFF];

#[derive(Debug, Clone, Copy)]
pub struct TestRow {
    pub speed: f64,
    pub name: &'static str,
    pub day: f64,
    pub stamp: f64,
}

/// The reference dataset. Row 4 carries a missing (NaN) speed.
pub fn test_rows() -> Vec<TestRow> {
    vec![
        TestRow { speed: 0.572, name: "apple", day: 0.0, stamp: 0.0 },
        TestRow { speed: 3.0, name: "dog", day: 1.0, stamp: 86_400.0 },
        TestRow { speed: -98.25, name: "pear", day: 31.0, stamp: 3_600.0 },
        TestRow { speed: 0.0, name: "crocodile", day: 59.0, stamp: 59.0 },
        TestRow { speed: f64::NAN, name: "banana", day: 366.0, stamp: 366.0 * 86_400.0 },
        TestRow { speed: 15.5, name: "apple", day: 1_000.0, stamp: 12_345.0 },
        TestRow { speed: 2.25, name: "dog", day: 2_000.0, stamp: 98_765.0 },
        TestRow { speed: 100.0, name: "pear", day: 5_000.0, stamp: 54_321.0 },
        TestRow { speed: 7.125, name: "banana", day: 10_000.0, stamp: 424_242.0 },
        TestRow { speed: -0.5, name: "apple", day: 21_916.0, stamp: 777_777.0 },
    ]
}

pub fn encode_row(row: &TestRow) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ROW_LENGTH);
    bytes.extend_from_slice(&row.speed.to_le_bytes());
    let mut name = row.name.as_bytes().to_vec();
    name.resize(NAME_WIDTH, b' ');
    bytes.extend_from_slice(&name);
    bytes.extend_from_slice(&row.day.to_le_bytes());
    bytes.extend_from_slice(&row.stamp.to_le_bytes());
    assert_eq!(bytes.len(), ROW_LENGTH);
    bytes
}

fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn header_bytes(page_count: u32, encoding: u8) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_SIZE];
    buf[..32].copy_from_slice(&MAGIC);
    buf[37] = 0x01; // little-endian
    buf[39] = b'1'; // unix
    buf[70] = encoding;
    buf[92..100].copy_from_slice(b"TESTDATA");
    buf[156..164].copy_from_slice(b"DATA    ");
    buf[164..172].copy_from_slice(&CREATED_SAS_SECONDS.to_le_bytes());
    buf[172..180].copy_from_slice(&CREATED_SAS_SECONDS.to_le_bytes());
    put_u32(&mut buf, 196, u32::try_from(HEADER_SIZE).unwrap());
    put_u32(&mut buf, 200, u32::try_from(PAGE_SIZE).unwrap());
    put_u32(&mut buf, 204, page_count);
    buf[216..224].copy_from_slice(b"9.0401M1");
    buf[224..230].copy_from_slice(b"SERVER");
    buf[240..244].copy_from_slice(b"10.0");
    buf[272..277].copy_from_slice(b"Linux");
    buf
}

/// Accumulates subheaders and rows into one page image.
pub struct PageBuilder {
    page: Vec<u8>,
    pointers: Vec<(usize, usize, u8, u8)>,
    cursor: usize,
    page_type: u16,
}

impl PageBuilder {
    pub fn new(page_type: u16) -> Self {
        Self {
            page: vec![0u8; PAGE_SIZE],
            pointers: Vec::new(),
            cursor: 1024,
            page_type,
        }
    }

    /// Places a metadata subheader in the page body and records its pointer.
    pub fn add_subheader(&mut self, content: &[u8]) {
        self.add_pointer(content, 0, 0);
    }

    /// Places a compressed-row subheader (compression flag 4, type 1).
    pub fn add_data_subheader(&mut self, content: &[u8]) {
        self.add_pointer(content, 4, 1);
    }

    fn add_pointer(&mut self, content: &[u8], compression: u8, ptype: u8) {
        let offset = self.cursor;
        self.page[offset..offset + content.len()].copy_from_slice(content);
        self.pointers.push((offset, content.len(), compression, ptype));
        // Keep subheaders 8-aligned like real writers do.
        self.cursor = (offset + content.len() + 7) & !7;
    }

    /// Offset where row `index` of a mix page lands, with the alignment
    /// correction applied.
    pub fn mix_row_offset(&self, index: usize) -> usize {
        let base = 16 + 8 + self.pointers.len() * 12;
        base + base % 8 + index * ROW_LENGTH
    }

    /// Writes rows for a mix page at the aligned offset after the pointers.
    pub fn add_mix_rows(&mut self, rows: &[TestRow]) {
        for (index, row) in rows.iter().enumerate() {
            let at = self.mix_row_offset(index);
            assert!(at + ROW_LENGTH <= 1024, "mix rows must stay below the subheader area");
            self.page[at..at + ROW_LENGTH].copy_from_slice(&encode_row(row));
        }
    }

    pub fn finish(mut self, block_count: u16) -> Vec<u8> {
        put_u16(&mut self.page, 16, self.page_type);
        put_u16(&mut self.page, 18, block_count);
        put_u16(&mut self.page, 20, u16::try_from(self.pointers.len()).unwrap());
        for (index, (offset, length, compression, ptype)) in self.pointers.iter().enumerate() {
            let at = 24 + 12 * index;
            put_u32(&mut self.page, at, u32::try_from(*offset).unwrap());
            put_u32(&mut self.page, at + 4, u32::try_from(*length).unwrap());
            self.page[at + 8] = *compression;
            self.page[at + 9] = *ptype;
        }
        self.page
    }
}

/// A column text block plus the references carved from it.
pub struct TextBlock {
    bytes: Vec<u8>,
}

impl TextBlock {
    pub fn new() -> Self {
        // The first bytes hold the block size; writers pad to eight.
        Self { bytes: vec![0u8; 8] }
    }

    pub fn add(&mut self, text: &str) -> (u16, u16, u16) {
        let offset = u16::try_from(self.bytes.len()).unwrap();
        self.bytes.extend_from_slice(text.as_bytes());
        (0, offset, u16::try_from(text.len()).unwrap())
    }

    pub fn into_subheader(mut self) -> Vec<u8> {
        let size = u16::try_from(self.bytes.len()).unwrap();
        self.bytes[..2].copy_from_slice(&size.to_le_bytes());
        let mut subheader = SIG_COLUMN_TEXT.to_vec();
        subheader.extend_from_slice(&self.bytes);
        subheader
    }
}

pub fn row_size_subheader(row_count: u32, mix_page_row_count: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 480];
    buf[..4].copy_from_slice(&SIG_ROW_SIZE);
    put_u32(&mut buf, 20, u32::try_from(ROW_LENGTH).unwrap());
    put_u32(&mut buf, 24, row_count);
    put_u32(&mut buf, 36, 4); // column count, part 1
    put_u32(&mut buf, 40, 0); // column count, part 2
    put_u32(&mut buf, 60, mix_page_row_count);
    // lcs (354) and lcp (378) stay zero.
    buf
}

pub fn column_size_subheader(count: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 12];
    buf[..4].copy_from_slice(&SIG_COLUMN_SIZE);
    put_u32(&mut buf, 4, count);
    buf
}

pub fn column_name_subheader(refs: &[(u16, u16, u16)]) -> Vec<u8> {
    let mut buf = vec![0u8; 20 + 8 * refs.len()];
    buf[..4].copy_from_slice(&SIG_COLUMN_NAME);
    for (index, (block, offset, length)) in refs.iter().enumerate() {
        let at = 4 + 8 * (index + 1);
        put_u16(&mut buf, at, *block);
        put_u16(&mut buf, at + 2, *offset);
        put_u16(&mut buf, at + 4, *length);
    }
    buf
}

pub fn column_attributes_subheader(attrs: &[(u32, u32, u8)]) -> Vec<u8> {
    let mut buf = vec![0u8; 20 + 12 * attrs.len()];
    buf[..4].copy_from_slice(&SIG_COLUMN_ATTRS);
    for (index, (offset, length, ctype)) in attrs.iter().enumerate() {
        let at = 12 * index;
        put_u32(&mut buf, 12 + at, *offset);
        put_u32(&mut buf, 16 + at, *length);
        buf[22 + at] = *ctype;
    }
    buf
}

pub fn format_label_subheader(format: (u16, u16, u16), label: (u16, u16, u16)) -> Vec<u8> {
    let mut buf = vec![0u8; 48];
    buf[..4].copy_from_slice(&SIG_FORMAT_LABEL);
    put_u16(&mut buf, 34, format.0);
    put_u16(&mut buf, 36, format.1);
    put_u16(&mut buf, 38, format.2);
    put_u16(&mut buf, 40, label.0);
    put_u16(&mut buf, 42, label.1);
    put_u16(&mut buf, 44, label.2);
    buf
}

/// Adds the full metadata subheader set for the reference dataset to a
/// page. `compression_literal` lands in the first text block.
pub fn add_metadata(
    builder: &mut PageBuilder,
    row_count: u32,
    mix_page_row_count: u32,
    compression_literal: Option<&str>,
) {
    let mut text = TextBlock::new();
    if let Some(literal) = compression_literal {
        text.add(literal);
    }
    let name_refs = [
        text.add("speed"),
        text.add("name"),
        text.add("day"),
        text.add("stamp"),
    ];
    let empty = (0, 0, 0);
    let format_refs = [empty, empty, text.add("MMDDYY"), text.add("DATETIME")];
    let label_refs = [
        text.add("Speed"),
        text.add("Animal"),
        text.add("Day"),
        text.add("Stamp"),
    ];

    builder.add_subheader(&row_size_subheader(row_count, mix_page_row_count));
    builder.add_subheader(&column_size_subheader(4));
    builder.add_subheader(&text.into_subheader());
    builder.add_subheader(&column_name_subheader(&name_refs));
    builder.add_subheader(&column_attributes_subheader(&[
        (0, 8, 1),
        (8, u32::try_from(NAME_WIDTH).unwrap(), 2),
        (20, 8, 1),
        (28, 8, 1),
    ]));
    for index in 0..4 {
        builder.add_subheader(&format_label_subheader(format_refs[index], label_refs[index]));
    }
}

pub fn data_page(rows: &[TestRow]) -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    put_u16(&mut page, 16, PAGE_DATA);
    put_u16(&mut page, 18, u16::try_from(rows.len()).unwrap());
    put_u16(&mut page, 20, 0);
    for (index, row) in rows.iter().enumerate() {
        let at = 16 + 8 + index * ROW_LENGTH;
        page[at..at + ROW_LENGTH].copy_from_slice(&encode_row(row));
    }
    page
}

/// Uncompressed file: one meta page, then the rows split over two data
/// pages so batch reads cross a page boundary.
pub fn build_plain_file(encoding: u8) -> Vec<u8> {
    let rows = test_rows();
    let mut file = header_bytes(3, encoding);

    let mut meta = PageBuilder::new(PAGE_META);
    add_metadata(&mut meta, u32::try_from(rows.len()).unwrap(), 0, None);
    file.extend_from_slice(&meta.finish(0));

    file.extend_from_slice(&data_page(&rows[..6]));
    file.extend_from_slice(&data_page(&rows[6..]));
    file
}

/// All metadata and all rows on a single mix page.
pub fn build_mix_file() -> Vec<u8> {
    let rows = test_rows();
    let mut file = header_bytes(1, UTF8_CODE);

    let mut page = PageBuilder::new(PAGE_MIX);
    add_metadata(
        &mut page,
        u32::try_from(rows.len()).unwrap(),
        u32::try_from(rows.len()).unwrap(),
        None,
    );
    page.add_mix_rows(&rows);
    file.extend_from_slice(&page.finish(0));
    file
}

/// Compressed file: metadata (with the codec sentinel) on the first meta
/// page, compressed rows as data subheaders on a second meta page.
pub fn build_compressed_file(literal: &str, compress: fn(&[u8]) -> Vec<u8>) -> Vec<u8> {
    let rows = test_rows();
    let mut file = header_bytes(2, UTF8_CODE);

    let mut meta = PageBuilder::new(PAGE_META);
    add_metadata(&mut meta, u32::try_from(rows.len()).unwrap(), 0, Some(literal));
    file.extend_from_slice(&meta.finish(0));

    let mut data = PageBuilder::new(PAGE_META);
    for row in &rows {
        let compressed = compress(&encode_row(row));
        assert!(
            compressed.len() < ROW_LENGTH,
            "fixture row failed to compress: {} >= {ROW_LENGTH}",
            compressed.len()
        );
        data.add_data_subheader(&compressed);
    }
    file.extend_from_slice(&data.finish(0));
    file
}

/// Minimal RLE encoder: literal copies plus runs of repeated bytes.
pub fn rle_compress(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut literals: Vec<u8> = Vec::new();
    let mut i = 0usize;

    let flush = |literals: &mut Vec<u8>, out: &mut Vec<u8>| {
        while !literals.is_empty() {
            let take = literals.len().min(64);
            let control = match take {
                1..=16 => 0x80 | u8::try_from(take - 1).unwrap(),
                17..=32 => 0x90 | u8::try_from(take - 17).unwrap(),
                33..=48 => 0xA0 | u8::try_from(take - 33).unwrap(),
                _ => 0xB0 | u8::try_from(take - 49).unwrap(),
            };
            out.push(control);
            out.extend_from_slice(&literals[..take]);
            literals.drain(..take);
        }
    };

    while i < row.len() {
        let byte = row[i];
        let mut run = 1usize;
        while i + run < row.len() && row[i + run] == byte {
            run += 1;
        }
        if run >= 3 {
            flush(&mut literals, &mut out);
            let take = run.min(17);
            match byte {
                0x40 => out.push(0xD0 | u8::try_from(take - 2).unwrap()),
                0x20 => out.push(0xE0 | u8::try_from(take - 2).unwrap()),
                0x00 => out.push(0xF0 | u8::try_from(take - 2).unwrap()),
                other => {
                    let take = run.min(18);
                    out.push(0xC0 | u8::try_from(take - 3).unwrap());
                    out.push(other);
                    i += take;
                    continue;
                }
            }
            i += take;
        } else {
            literals.extend_from_slice(&row[i..i + run]);
            i += run;
        }
    }
    flush(&mut literals, &mut out);
    out
}

/// Minimal RDC encoder: literal tokens plus short single-byte runs.
pub fn rdc_compress(row: &[u8]) -> Vec<u8> {
    let mut tokens: Vec<(bool, Vec<u8>)> = Vec::new();
    let mut i = 0usize;
    while i < row.len() {
        let byte = row[i];
        let mut run = 1usize;
        while i + run < row.len() && row[i + run] == byte {
            run += 1;
        }
        if run >= 3 {
            let take = run.min(18);
            tokens.push((true, vec![u8::try_from(take - 3).unwrap(), byte]));
            i += take;
        } else {
            tokens.push((false, vec![byte]));
            i += 1;
        }
    }

    let mut out = Vec::new();
    for group in tokens.chunks(16) {
        let mut word = 0u16;
        for (position, (is_command, _)) in group.iter().enumerate() {
            if *is_command {
                word |= 1 << (15 - position);
            }
        }
        out.extend_from_slice(&word.to_be_bytes());
        for (_, bytes) in group {
            out.extend_from_slice(bytes);
        }
    }
    out
}
