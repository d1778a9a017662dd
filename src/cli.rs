use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Clean retail transaction exports and run the standard sales analytics",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the full pipeline: clean the input, materialize it and run every query
    Run(RunArgs),
    /// Clean the input into the canonical table and print the quality report
    Clean(CleanArgs),
}

/// Options shared by every command that reads a source file.
#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Input CSV file (use '-' for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// YAML pipeline configuration; command-line flags take precedence
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (auto-detected when omitted)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Accepted date format (chrono syntax); repeat to try several in order
    #[arg(long = "date-format", action = clap::ArgAction::Append)]
    pub date_formats: Vec<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Directory receiving sales.csv, quality_report.json and one CSV per query
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: PathBuf,
    /// Run the queries one after another instead of in parallel
    #[arg(long)]
    pub sequential: bool,
    /// Print every query result as a table on stdout
    #[arg(long)]
    pub preview: bool,
}

#[derive(Debug, Args)]
pub struct CleanArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Destination for the canonical table CSV (`-` for stdout)
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
    /// Optional destination for the quality report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
