use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::Parser;

use datareader::{Sas7bdatReader, Series, StatFileReader};

/// Rows fetched per batch while streaming the file.
const CHUNK_ROWS: i64 = 1000;

#[derive(Parser)]
#[command(
    name = "stattocsv",
    version,
    about = "Convert a SAS7BDAT dataset to CSV on standard output"
)]
struct Cli {
    /// Input file (.sas7bdat).
    input: PathBuf,

    /// Right-trim whitespace from string values.
    #[arg(long)]
    trim_strings: bool,

    /// Emit MMDDYY/DATE/DATETIME columns as timestamps instead of raw
    /// numbers.
    #[arg(long)]
    convert_dates: bool,
}

type AnyError = Box<dyn std::error::Error + Send + Sync>;

fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();

    if !is_sas7bdat(&cli.input) {
        return Err(format!("{} is not a .sas7bdat file", cli.input.display()).into());
    }

    let mut reader = Sas7bdatReader::open(&cli.input)?;
    reader.set_trim_strings(cli.trim_strings);
    reader.set_convert_dates(cli.convert_dates);

    let stdout = io::stdout().lock();
    convert(&mut reader, stdout)
}

fn convert<R, W>(reader: &mut R, out: W) -> Result<(), AnyError>
where
    R: StatFileReader,
    W: Write,
{
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(reader.column_names())?;

    while let Some(chunk) = reader.read(CHUNK_ROWS)? {
        let rows = chunk.first().map_or(0, Series::len);
        for row in 0..rows {
            writer.write_record(
                chunk
                    .iter()
                    .map(|series| series.display_value(row).unwrap_or_default()),
            )?;
        }
    }

    writer.flush()?;
    Ok(())
}

fn is_sas7bdat(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("sas7bdat"))
}
