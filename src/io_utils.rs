//! File I/O for the pipeline: source decoding, CSV reading and writing.
//!
//! - **Encoding**: an explicit label wins; otherwise the encoding is sniffed
//!   from a BOM, then UTF-8 validity, falling back to Windows-1252. Decoding
//!   never fails: undecodable bytes become U+FFFD.
//! - **Delimiter resolution**: `.tsv` means tab, anything else comma, unless
//!   overridden.
//! - **stdin/stdout**: the `-` path convention routes through standard streams.

use std::{
    fs::{self, File},
    io::{BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use log::{debug, warn};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<Option<&'static Encoding>> {
    label
        .map(|value| {
            Encoding::for_label(value.trim().as_bytes())
                .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
        })
        .transpose()
}

/// BOM first, then strict UTF-8, then Windows-1252 (a superset of Latin-1).
pub fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding;
    }
    if std::str::from_utf8(bytes).is_ok() {
        UTF_8
    } else {
        WINDOWS_1252
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

/// Decoded source text along with how it was decoded.
#[derive(Debug, Clone)]
pub struct SourceText {
    pub text: String,
    pub encoding: &'static Encoding,
    pub had_replacements: bool,
}

pub fn decode_lossy(bytes: &[u8], encoding: &'static Encoding) -> SourceText {
    let (text, used, had_replacements) = encoding.decode(bytes);
    SourceText {
        text: text.into_owned(),
        encoding: used,
        had_replacements,
    }
}

pub fn read_source(path: &Path, encoding: Option<&'static Encoding>) -> Result<SourceText> {
    let bytes = if is_dash(path) {
        let mut buffer = Vec::new();
        std::io::stdin()
            .lock()
            .read_to_end(&mut buffer)
            .context("Reading input from stdin")?;
        buffer
    } else {
        fs::read(path).with_context(|| format!("Opening input file {path:?}"))?
    };
    let encoding = encoding.unwrap_or_else(|| detect_encoding(&bytes));
    let source = decode_lossy(&bytes, encoding);
    debug!("Decoded {path:?} as {}", source.encoding.name());
    if source.had_replacements {
        warn!(
            "Input {path:?} contained bytes invalid for {}; they were replaced with U+FFFD",
            source.encoding.name()
        );
    }
    Ok(source)
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

/// One source row as read: values aligned with the source header row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawRecord {
    pub line: usize,
    pub fields: Vec<String>,
}

impl RawRecord {
    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub records: Vec<RawRecord>,
}

impl RawTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn parse_raw_table(text: &str, delimiter: u8) -> Result<RawTable> {
    let mut reader = open_csv_reader(text.as_bytes(), delimiter);
    let headers = reader
        .headers()
        .context("Reading header row")?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let mut records = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Reading row {}", row_idx + 2))?;
        let line = record
            .position()
            .map(|pos| pos.line() as usize)
            .unwrap_or(row_idx + 2);
        records.push(RawRecord {
            line,
            fields: record.iter().map(str::to_string).collect(),
        });
    }
    Ok(RawTable { headers, records })
}

pub fn read_raw_table(
    path: &Path,
    delimiter: u8,
    encoding: Option<&'static Encoding>,
) -> Result<RawTable> {
    let source = read_source(path, encoding)?;
    parse_raw_table(&source.text, delimiter).with_context(|| format!("Parsing CSV {path:?}"))
}

/// Opens `path` for CSV output; `-` writes to stdout.
pub fn open_csv_writer(path: &Path) -> Result<csv::Writer<Box<dyn Write>>> {
    let base: Box<dyn Write> = if is_dash(path) {
        Box::new(std::io::stdout())
    } else {
        Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Creating output file {path:?}"))?,
        ))
    };
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(DEFAULT_CSV_DELIMITER)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(base))
}

pub fn write_csv<I, R, S>(path: &Path, headers: &[&str], rows: I) -> Result<()>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut writer = open_csv_writer(path)?;
    writer
        .write_record(headers)
        .with_context(|| format!("Writing header to {path:?}"))?;
    for row in rows {
        writer
            .write_record(row)
            .with_context(|| format!("Writing row to {path:?}"))?;
    }
    writer
        .flush()
        .with_context(|| format!("Flushing {path:?}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_encoding_falls_back_to_windows_1252() {
        assert_eq!(detect_encoding(b"plain ascii"), UTF_8);
        assert_eq!(detect_encoding("caf\u{e9}".as_bytes()), UTF_8);
        assert_eq!(detect_encoding(b"caf\xe9"), WINDOWS_1252);
        assert_eq!(detect_encoding(b"\xef\xbb\xbfid"), UTF_8);
    }

    #[test]
    fn decode_lossy_replaces_invalid_bytes() {
        let source = decode_lossy(b"ok\xff", UTF_8);
        assert!(source.had_replacements);
        assert_eq!(source.text, "ok\u{fffd}");
    }

    #[test]
    fn parse_raw_table_tolerates_short_rows() {
        let table = parse_raw_table("a,b,c\n1,2,3\n4,5\n", b',').expect("parse");
        assert_eq!(table.headers, vec!["a", "b", "c"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[1].get(1), Some("5"));
        assert_eq!(table.records[1].get(2), None);
        assert_eq!(table.records[1].line, 3);
    }

    #[test]
    fn resolve_input_delimiter_uses_extension() {
        assert_eq!(resolve_input_delimiter(Path::new("x.tsv"), None), b'\t');
        assert_eq!(resolve_input_delimiter(Path::new("x.csv"), None), b',');
        assert_eq!(resolve_input_delimiter(Path::new("x.tsv"), Some(b';')), b';');
    }

    #[test]
    fn resolve_encoding_rejects_unknown_labels() {
        assert_eq!(resolve_encoding(Some("latin1")).unwrap(), Some(WINDOWS_1252));
        assert_eq!(resolve_encoding(None).unwrap(), None);
        assert!(resolve_encoding(Some("klingon")).is_err());
    }
}
