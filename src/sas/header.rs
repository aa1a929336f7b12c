use std::fmt;
use std::io::Read;

use time::{Duration, OffsetDateTime};

use crate::error::{Error, Result, Section};
use crate::logger::log_warn;

use super::byteorder::{Endianness, read_f64, read_offset};

const MAGIC: [u8; 32] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC2, 0xEA, 0x81, 0x60,
    0xB3, 0x14, 0x11, 0xCF, 0xBD, 0x92, 0x08, 0x00, 0x09, 0xC7, 0x31, 0x8C, 0x18, 0x1F, 0x10, 0x11,
];

/// Size of the fixed probe read before the header length is known.
pub(crate) const HEADER_PROBE_SIZE: usize = 288;

const ALIGNMENT_MARKER: u8 = b'3';
const ALIGNMENT_PAD: usize = 4;

const U64_PROBE_OFFSET: usize = 32;
const ALIGN_PROBE_OFFSET: usize = 35;
const ENDIANNESS_OFFSET: usize = 37;
const PLATFORM_OFFSET: usize = 39;
const ENCODING_OFFSET: usize = 70;
const DATASET_NAME_OFFSET: usize = 92;
const DATASET_NAME_LEN: usize = 64;
const FILE_TYPE_OFFSET: usize = 156;
const FILE_TYPE_LEN: usize = 8;
const DATE_CREATED_OFFSET: usize = 164;
const DATE_MODIFIED_OFFSET: usize = 172;
const HEADER_SIZE_OFFSET: usize = 196;
const PAGE_SIZE_OFFSET: usize = 200;
const PAGE_COUNT_OFFSET: usize = 204;
const SAS_RELEASE_OFFSET: usize = 216;
const SAS_RELEASE_LEN: usize = 8;
const SERVER_TYPE_OFFSET: usize = 224;
const SERVER_TYPE_LEN: usize = 16;
const OS_VERSION_OFFSET: usize = 240;
const OS_VERSION_LEN: usize = 16;
const OS_MAKER_OFFSET: usize = 256;
const OS_MAKER_LEN: usize = 16;
const OS_NAME_OFFSET: usize = 272;
const OS_NAME_LEN: usize = 16;

const PAGE_BIT_OFFSET_32: usize = 16;
const PAGE_BIT_OFFSET_64: usize = 32;
const SUBHEADER_POINTER_LEN_32: usize = 12;
const SUBHEADER_POINTER_LEN_64: usize = 24;

const EXPECTED_U64_HEADER_LENGTH: usize = 8192;

/// Seconds from the SAS epoch (1960-01-01) to the Unix epoch.
pub(crate) const SAS_EPOCH_OFFSET_SECONDS: i64 = -3653 * 86_400;

/// Platform that produced the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
    Unknown,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix => write!(f, "unix"),
            Self::Windows => write!(f, "windows"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// File-level properties fixed by the header parse.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub endianness: Endianness,
    pub u64_file: bool,
    pub int_len: usize,
    pub page_bit_offset: usize,
    pub subheader_pointer_len: usize,
    pub header_length: usize,
    pub page_length: usize,
    pub page_count: usize,
    pub name: String,
    pub file_type: String,
    pub platform: Platform,
    pub encoding: String,
    pub date_created: Option<OffsetDateTime>,
    pub date_modified: Option<OffsetDateTime>,
    pub sas_release: String,
    pub server_type: String,
    pub os_type: String,
    pub os_name: String,
}

/// Parses the fixed SAS7BDAT header and consumes exactly `header_length`
/// bytes from the reader, leaving it positioned at the first page.
pub fn parse_header<R: Read>(reader: &mut R) -> Result<FileHeader> {
    let mut probe = [0u8; HEADER_PROBE_SIZE];
    reader.read_exact(&mut probe).map_err(Error::from)?;

    if probe[..32] != MAGIC {
        return Err(Error::NotSas {
            details: "magic number mismatch".into(),
        });
    }

    let u64_file = probe[U64_PROBE_OFFSET] == ALIGNMENT_MARKER;
    let align2 = if u64_file { ALIGNMENT_PAD } else { 0 };
    let align1 = if probe[ALIGN_PROBE_OFFSET] == ALIGNMENT_MARKER {
        ALIGNMENT_PAD
    } else {
        0
    };
    let total_align = align1 + align2;

    let endianness = if probe[ENDIANNESS_OFFSET] == 0x01 {
        Endianness::Little
    } else {
        Endianness::Big
    };

    let platform = match probe[PLATFORM_OFFSET] {
        b'1' => Platform::Unix,
        b'2' => Platform::Windows,
        _ => Platform::Unknown,
    };

    let encoding = encoding_name(probe[ENCODING_OFFSET])
        .map_or_else(|| format!("code {}", probe[ENCODING_OFFSET]), str::to_owned);

    let name = trim_padded(&probe[DATASET_NAME_OFFSET..DATASET_NAME_OFFSET + DATASET_NAME_LEN]);
    let file_type = trim_padded(&probe[FILE_TYPE_OFFSET..FILE_TYPE_OFFSET + FILE_TYPE_LEN]);

    let date_created = convert_sas_seconds(read_f64(
        endianness,
        &probe[DATE_CREATED_OFFSET + align1..],
    )?);
    let date_modified = convert_sas_seconds(read_f64(
        endianness,
        &probe[DATE_MODIFIED_OFFSET + align1..],
    )?);

    let header_length = read_offset(
        endianness,
        &probe[HEADER_SIZE_OFFSET + align1..],
        4,
        Section::Header,
    )?;
    if header_length < HEADER_PROBE_SIZE {
        return Err(Error::format(
            Section::Header,
            format!("declared header length {header_length} is too small"),
        ));
    }
    if u64_file && header_length != EXPECTED_U64_HEADER_LENGTH {
        log_warn(&format!(
            "64-bit file declares header length {header_length}, expected {EXPECTED_U64_HEADER_LENGTH}"
        ));
    }

    // Consume the remainder of the header so offset-based reads below can
    // operate over the full buffer and the stream ends up at the first page.
    let mut header = vec![0u8; header_length];
    header[..HEADER_PROBE_SIZE].copy_from_slice(&probe);
    reader
        .read_exact(&mut header[HEADER_PROBE_SIZE..])
        .map_err(Error::from)?;

    let page_length = read_offset(
        endianness,
        field(&header, PAGE_SIZE_OFFSET + align1, 4)?,
        4,
        Section::Header,
    )?;
    let page_count = read_offset(
        endianness,
        field(&header, PAGE_COUNT_OFFSET + align1, 4)?,
        4,
        Section::Header,
    )?;

    let sas_release = trim_padded(field(&header, SAS_RELEASE_OFFSET + total_align, SAS_RELEASE_LEN)?);
    let server_type = trim_padded(field(&header, SERVER_TYPE_OFFSET + total_align, SERVER_TYPE_LEN)?);
    let os_type = trim_padded(field(&header, OS_VERSION_OFFSET + total_align, OS_VERSION_LEN)?);

    let os_name_field = field(&header, OS_NAME_OFFSET + total_align, OS_NAME_LEN)?;
    let os_name = if os_name_field.first().copied().unwrap_or(0) != 0 {
        trim_padded(os_name_field)
    } else {
        trim_padded(field(&header, OS_MAKER_OFFSET + total_align, OS_MAKER_LEN)?)
    };

    Ok(FileHeader {
        endianness,
        u64_file,
        int_len: if u64_file { 8 } else { 4 },
        page_bit_offset: if u64_file {
            PAGE_BIT_OFFSET_64
        } else {
            PAGE_BIT_OFFSET_32
        },
        subheader_pointer_len: if u64_file {
            SUBHEADER_POINTER_LEN_64
        } else {
            SUBHEADER_POINTER_LEN_32
        },
        header_length,
        page_length,
        page_count,
        name,
        file_type,
        platform,
        encoding,
        date_created,
        date_modified,
        sas_release,
        server_type,
        os_type,
        os_name,
    })
}

fn field(header: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    header.get(offset..offset + len).ok_or_else(|| {
        Error::format(
            Section::Header,
            "header field extends past the declared header length",
        )
    })
}

/// Decodes a fixed-width header field, dropping trailing NULs and spaces.
fn trim_padded(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0 && *b != b' ')
        .map_or(0, |idx| idx + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

pub(crate) fn convert_sas_seconds(seconds: f64) -> Option<OffsetDateTime> {
    let delta = Duration::checked_seconds_f64(seconds)?;
    let offset = Duration::seconds(SAS_EPOCH_OFFSET_SECONDS);
    OffsetDateTime::UNIX_EPOCH.checked_add(offset.checked_add(delta)?)
}

/// Known header encoding codes, reported as lowercase names (ISO-8859-1
/// under its conventional `latin1` name). The on-disk byte is only a hint
/// and the table has gaps; unknown codes keep a sentinel and callers may
/// inject their own decoder.
const fn encoding_name(code: u8) -> Option<&'static str> {
    Some(match code {
        0 => "windows-1252",
        20 => "utf-8",
        28 => "us-ascii",
        29 => "latin1",
        30 => "iso-8859-2",
        31 => "iso-8859-3",
        32 => "iso-8859-4",
        33 => "iso-8859-5",
        34 => "iso-8859-6",
        35 => "iso-8859-7",
        36 => "iso-8859-8",
        37 => "iso-8859-9",
        39 => "iso-8859-11",
        40 => "iso-8859-15",
        41 => "cp437",
        42 => "cp850",
        43 => "cp852",
        44 => "cp857",
        45 => "cp858",
        46 => "cp862",
        47 => "cp864",
        48 => "cp865",
        49 => "cp866",
        50 => "cp869",
        51 => "cp874",
        52 => "cp921",
        53 => "cp922",
        54 => "cp1129",
        55 => "cp720",
        56 => "cp737",
        57 => "cp775",
        58 => "cp860",
        59 => "cp863",
        60 => "windows-1250",
        61 => "windows-1251",
        62 => "windows-1252",
        63 => "windows-1253",
        64 => "windows-1254",
        65 => "windows-1255",
        66 => "windows-1256",
        67 => "windows-1257",
        68 => "windows-1258",
        69 => "macroman",
        70 => "macarabic",
        71 => "machebrew",
        72 => "macgreek",
        73 => "macthai",
        75 => "macturkish",
        76 => "macukraine",
        118 => "cp950",
        119 => "euc-tw",
        123 => "big-5",
        125 => "gb18030",
        126 => "windows-936",
        128 => "cp1381",
        134 => "euc-jp",
        136 => "cp949",
        137 => "cp942",
        138 => "cp932",
        140 => "euc-kr",
        141 => "cp949",
        142 => "cp949",
        163 => "maciceland",
        167 => "iso-2022-jp",
        168 => "iso-2022-kr",
        169 => "iso-2022-cn",
        172 => "iso-2022-cn-ext",
        204 => "windows-1252",
        205 => "gb18030",
        227 => "iso-8859-14",
        242 => "iso-8859-13",
        245 => "maccroatian",
        246 => "maccyrillic",
        247 => "macromania",
        248 => "shift_jisx0213",
        _ => return None,
    })
}
