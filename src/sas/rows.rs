use std::borrow::Cow;

use encoding_rs::Encoding;
use time::{Duration, OffsetDateTime};

use crate::error::{Error, Result, Section};
use crate::reader::ColumnType;
use crate::series::{ColumnData, Series};

use super::byteorder::{Endianness, pad_double, read_f64};
use super::header::{SAS_EPOCH_OFFSET_SECONDS, convert_sas_seconds};
use super::pool::StringPool;
use super::subheaders::Column;

/// SAS format names interpreted as day counts when date conversion is on.
const DATE_FORMATS: [&str; 2] = ["MMDDYY", "DATE"];
/// SAS format names interpreted as second counts.
const DATETIME_FORMATS: [&str; 1] = ["DATETIME"];

/// Per-column staging buffer for one `read` call. Numeric columns stage
/// widened doubles as raw bytes; string columns stage pool ids.
#[derive(Debug)]
pub(crate) enum ColumnChunk {
    Numeric(Vec<u8>),
    Text(Vec<u64>),
}

pub(crate) fn allocate_chunks(columns: &[Column], rows: usize) -> Vec<ColumnChunk> {
    columns
        .iter()
        .map(|column| match column.ctype {
            ColumnType::Numeric => ColumnChunk::Numeric(vec![0u8; 8 * rows]),
            ColumnType::String => ColumnChunk::Text(Vec::with_capacity(rows)),
        })
        .collect()
}

/// How decoded string values are treated before interning.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TextOptions {
    pub trim: bool,
    pub decoder: Option<&'static Encoding>,
}

/// Decodes one row's bytes into the per-column chunks.
///
/// A column of length zero ends the walk; later columns keep their
/// zero/empty defaults so every chunk stays one entry per row.
pub(crate) fn decode_row(
    source: &[u8],
    columns: &[Column],
    chunks: &mut [ColumnChunk],
    row_in_chunk: usize,
    endian: Endianness,
    text: TextOptions,
    pool: &mut StringPool,
    row_index: u64,
) -> Result<()> {
    let mut stopped = false;
    for (column, chunk) in columns.iter().zip(chunks.iter_mut()) {
        if stopped || column.length == 0 {
            stopped = true;
            if let ColumnChunk::Text(ids) = chunk {
                ids.push(pool.intern(""));
            }
            continue;
        }

        let bytes = source
            .get(column.offset..column.offset + column.length)
            .ok_or_else(|| {
                Error::format(
                    Section::Row { index: row_index },
                    format!("column {} extends past the row data", column.index),
                )
            })?;

        match chunk {
            ColumnChunk::Numeric(buf) => {
                let at = 8 * row_in_chunk;
                pad_double(endian, bytes, &mut buf[at..at + 8]);
            }
            ColumnChunk::Text(ids) => {
                let decoded: Cow<'_, str> = match text.decoder {
                    Some(encoding) => {
                        let (decoded, _, _) = encoding.decode(bytes);
                        decoded
                    }
                    None => String::from_utf8_lossy(bytes),
                };
                let value = if text.trim {
                    decoded.trim_end_matches(['\0', ' '])
                } else {
                    decoded.as_ref()
                };
                ids.push(pool.intern(value));
            }
        }
    }
    Ok(())
}

/// How staged chunks become typed series.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchOptions {
    pub convert_dates: bool,
    pub factorize: bool,
}

/// Converts the staged chunks of one batch into per-column series.
pub(crate) fn chunks_to_series(
    chunks: Vec<ColumnChunk>,
    columns: &[Column],
    rows: usize,
    endian: Endianness,
    options: BatchOptions,
    pool: &StringPool,
) -> Result<Vec<Series>> {
    columns
        .iter()
        .zip(chunks)
        .map(|(column, chunk)| match chunk {
            ColumnChunk::Numeric(buf) => numeric_series(column, &buf, rows, endian, options),
            ColumnChunk::Text(ids) => text_series(column, ids, rows, options, pool),
        })
        .collect()
}

fn numeric_series(
    column: &Column,
    buf: &[u8],
    rows: usize,
    endian: Endianness,
    options: BatchOptions,
) -> Result<Series> {
    let mut values = Vec::with_capacity(rows);
    let mut missing = Vec::with_capacity(rows);
    for i in 0..rows {
        let value = read_f64(endian, &buf[8 * i..8 * i + 8])?;
        missing.push(value.is_nan());
        values.push(value);
    }

    let format = column.format.as_str();
    let data = if options.convert_dates && DATE_FORMATS.contains(&format) {
        ColumnData::Date(to_timestamps(&values, &mut missing, days_to_datetime))
    } else if options.convert_dates && DATETIME_FORMATS.contains(&format) {
        ColumnData::DateTime(to_timestamps(&values, &mut missing, convert_sas_seconds))
    } else {
        ColumnData::Numeric(values)
    };

    Series::new(column.name.clone(), data, missing)
}

fn text_series(
    column: &Column,
    ids: Vec<u64>,
    rows: usize,
    options: BatchOptions,
    pool: &StringPool,
) -> Result<Series> {
    debug_assert_eq!(ids.len(), rows);
    let missing = vec![false; ids.len()];
    let data = if options.factorize {
        ColumnData::FactorizedString(ids)
    } else {
        ColumnData::String(
            ids.iter()
                .map(|&id| pool.get(id).unwrap_or_default().to_owned())
                .collect(),
        )
    };
    Series::new(column.name.clone(), data, missing)
}

/// Converts raw SAS date/datetime numbers, marking unconvertible entries
/// missing. Masked slots keep the epoch as a placeholder.
fn to_timestamps(
    values: &[f64],
    missing: &mut [bool],
    convert: fn(f64) -> Option<OffsetDateTime>,
) -> Vec<OffsetDateTime> {
    values
        .iter()
        .zip(missing.iter_mut())
        .map(|(&value, missing)| {
            if *missing {
                return sas_epoch();
            }
            convert(value).unwrap_or_else(|| {
                *missing = true;
                sas_epoch()
            })
        })
        .collect()
}

fn days_to_datetime(days: f64) -> Option<OffsetDateTime> {
    convert_sas_seconds(days * 86_400.0)
}

fn sas_epoch() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + Duration::seconds(SAS_EPOCH_OFFSET_SECONDS)
}
