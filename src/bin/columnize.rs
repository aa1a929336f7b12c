use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

use datareader::{ColumnData, Sas7bdatReader, StatFileReader};

/// Rows fetched per batch while streaming the file.
const CHUNK_ROWS: i64 = 10_000;

#[derive(Parser)]
#[command(
    name = "columnize",
    version,
    about = "Split a SAS7BDAT dataset into one file per column"
)]
struct Cli {
    /// Input file (.sas7bdat).
    #[arg(long = "in")]
    input: PathBuf,

    /// Directory for the column files; created when absent.
    #[arg(long = "out")]
    out_dir: PathBuf,

    /// Write numeric data as text lines or little-endian binary doubles.
    #[arg(long, value_enum, default_value_t = Mode::Text)]
    mode: Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Text,
    Binary,
}

type AnyError = Box<dyn std::error::Error + Send + Sync>;

fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();

    if !is_sas7bdat(&cli.input) {
        return Err(format!("{} is not a .sas7bdat file", cli.input.display()).into());
    }

    let mut reader = Sas7bdatReader::open(&cli.input)?;
    split(&mut reader, &cli.out_dir, cli.mode)
}

fn split<R: StatFileReader>(reader: &mut R, out_dir: &Path, mode: Mode) -> Result<(), AnyError> {
    fs::create_dir_all(out_dir)?;

    let names = reader.column_names();
    let mut index_file = File::create(out_dir.join("columns.txt"))?;
    for (position, name) in names.iter().enumerate() {
        writeln!(index_file, "{position},{name}")?;
    }

    let mut columns: Vec<BufWriter<File>> = names
        .iter()
        .enumerate()
        .map(|(position, _)| {
            File::create(out_dir.join(position.to_string())).map(BufWriter::new)
        })
        .collect::<Result<_, _>>()?;

    while let Some(chunk) = reader.read(CHUNK_ROWS)? {
        for (series, out) in chunk.iter().zip(columns.iter_mut()) {
            match (series.data(), mode) {
                (ColumnData::Numeric(values), Mode::Binary) => {
                    for (row, &value) in values.iter().enumerate() {
                        let value = if series.missing()[row] { f64::NAN } else { value };
                        out.write_all(&value.to_le_bytes())?;
                    }
                }
                _ => {
                    for row in 0..series.len() {
                        match series.display_value(row) {
                            Some(value) => writeln!(out, "{value}")?,
                            None => writeln!(out)?,
                        }
                    }
                }
            }
        }
    }

    for mut out in columns {
        out.flush()?;
    }
    Ok(())
}

fn is_sas7bdat(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("sas7bdat"))
}
