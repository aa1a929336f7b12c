use std::borrow::Cow;
use std::fmt;
use std::io;

/// Result type used across the reader implementation.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the SAS7BDAT reader.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure while reading from the underlying data source.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The file does not carry the SAS7BDAT magic number.
    #[error("not a SAS7BDAT file: {details}")]
    NotSas { details: Cow<'static, str> },

    /// Structural violation while processing a section of the file.
    #[error("malformed SAS file while processing {section}: {details}")]
    Format {
        section: Section,
        details: Cow<'static, str>,
    },

    /// Widths or layouts outside the supported set.
    #[error("unsupported SAS feature: {feature}")]
    Unsupported { feature: Cow<'static, str> },
}

impl Error {
    pub(crate) fn format(section: Section, details: impl Into<Cow<'static, str>>) -> Self {
        Self::Format {
            section,
            details: details.into(),
        }
    }
}

/// Logical section of the file used for diagnostic reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Header,
    Page { index: u64 },
    Subheader { page_index: u64 },
    Row { index: u64 },
    Column { index: usize },
    Decompression,
    Series,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header => write!(f, "file header"),
            Self::Page { index } => write!(f, "page {index}"),
            Self::Subheader { page_index } => write!(f, "subheader on page {page_index}"),
            Self::Row { index } => write!(f, "row {index}"),
            Self::Column { index } => write!(f, "column {index}"),
            Self::Decompression => write!(f, "row decompression"),
            Self::Series => write!(f, "series construction"),
        }
    }
}
