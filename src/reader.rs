use std::fmt;

use crate::error::Result;
use crate::series::Series;

/// Data type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Numeric,
    String,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric => write!(f, "numeric"),
            Self::String => write!(f, "string"),
        }
    }
}

/// Capability shared by statistical file readers.
///
/// Batch readers yield rows in file order as column-oriented [`Series`]
/// chunks; `Ok(None)` signals the end of the stream. The command-line
/// tools consume this trait rather than a concrete reader so additional
/// formats can slot in behind it.
pub trait StatFileReader {
    /// Total number of rows in the dataset.
    fn row_count(&self) -> u64;

    /// Column names, in file order.
    fn column_names(&self) -> Vec<String>;

    /// Column data types, in file order.
    fn column_types(&self) -> Vec<ColumnType>;

    /// Reads up to `rows` further rows; negative means the remainder of
    /// the file.
    ///
    /// # Errors
    ///
    /// Returns an error when decoding fails; the batch is then discarded.
    fn read(&mut self, rows: i64) -> Result<Option<Vec<Series>>>;
}
