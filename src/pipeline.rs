//! Extract-Clean-Transform orchestration and the command bodies built on it.
//!
//! The stages run strictly in order: normalize headers, coerce types, derive
//! features, validate. Only header normalization can abort the run; every
//! later stage records its problems in the quality report and keeps going.
//! Once the canonical table exists it is written out, then the queries run
//! against the in-memory copy.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use itertools::Itertools;
use log::{debug, info, warn};

use crate::{
    cli::{CleanArgs, RunArgs, SourceArgs},
    coerce::coerce_table,
    config::PipelineConfig,
    data::{CANONICAL_TABLE_NAME, CanonicalTable},
    features::derive_features,
    io_utils::{self, RawTable},
    normalize::{HeaderMapping, build_mapping},
    quality::{QualityReport, validate},
    query::{self, Query, ResultTable},
    table,
};

pub const QUALITY_REPORT_FILE: &str = "quality_report.json";

/// Everything the ECT stage hands to the rest of the run.
#[derive(Debug)]
pub struct EctOutput {
    pub mapping: HeaderMapping,
    pub table: CanonicalTable,
    pub report: QualityReport,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub canonical_path: PathBuf,
    pub report_path: PathBuf,
    pub written: Vec<(Query, PathBuf)>,
    pub failed: Vec<(Query, String)>,
    pub report_passed: bool,
}

/// Loads the configuration file (if any) and layers command-line overrides on top.
pub fn resolve_config(args: &SourceArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(delimiter) = args.delimiter {
        config.delimiter = Some(delimiter as char);
    }
    if let Some(encoding) = &args.input_encoding {
        config.input_encoding = Some(encoding.clone());
    }
    if !args.date_formats.is_empty() {
        config.date_formats = args.date_formats.clone();
    }
    config.validate()?;
    debug!("Resolved configuration: {config:?}");
    Ok(config)
}

pub fn load_source(path: &Path, config: &PipelineConfig) -> Result<RawTable> {
    let delimiter = io_utils::resolve_input_delimiter(path, config.delimiter_byte());
    let encoding = io_utils::resolve_encoding(config.input_encoding.as_deref())?;
    info!(
        "Reading '{}' with delimiter '{}'",
        path.display(),
        crate::printable_delimiter(delimiter)
    );
    let raw = io_utils::read_raw_table(path, delimiter, encoding)?;
    info!("Read {} raw record(s)", raw.len());
    Ok(raw)
}

/// Runs the four ECT stages over an already-parsed source.
pub fn run_ect(raw: &RawTable, config: &PipelineConfig) -> Result<EctOutput> {
    let mapping = build_mapping(&raw.headers, &config.header_aliases)
        .context("Normalizing source headers")?;
    if !mapping.ignored().is_empty() {
        debug!("Ignored source columns: {:?}", mapping.ignored());
    }

    let (records, coercion) = coerce_table(raw, &mapping, config);
    let (table, features) = derive_features(&records, config.sample_limit);
    let report = validate(&table, &coercion, &features);
    info!(
        "Canonical table holds {} record(s) (quality {})",
        table.len(),
        if report.passed { "pass" } else { "FAIL" }
    );
    Ok(EctOutput {
        mapping,
        table,
        report,
    })
}

/// Overwrites `path` with the full canonical table.
pub fn write_canonical_table(table: &CanonicalTable, path: &Path) -> Result<()> {
    io_utils::write_csv(
        path,
        CanonicalTable::headers(),
        table.rows().iter().map(|row| row.to_record()),
    )
    .with_context(|| format!("Materializing table '{CANONICAL_TABLE_NAME}' to {path:?}"))?;
    info!(
        "Materialized '{CANONICAL_TABLE_NAME}' ({} row(s)) to {path:?}",
        table.len()
    );
    Ok(())
}

pub fn write_report(report: &QualityReport, path: &Path) -> Result<()> {
    let json = report.to_json().context("Serializing quality report")?;
    fs::write(path, json).with_context(|| format!("Writing quality report to {path:?}"))?;
    Ok(())
}

pub fn write_result(result: &ResultTable, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(format!("{}.csv", result.name()));
    io_utils::write_csv(&path, result.columns(), result.render_rows())
        .with_context(|| format!("Writing {} result", result.name()))?;
    Ok(path)
}

/// Full pipeline into `output_dir`. A failing query is reported in the
/// summary and does not stop the others.
pub fn run_pipeline(
    input: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
    preview: bool,
) -> Result<RunSummary> {
    let raw = load_source(input, config)?;
    let ect = run_ect(&raw, config).with_context(|| format!("Cleaning {input:?}"))?;

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Creating output directory {output_dir:?}"))?;
    let canonical_path = output_dir.join(format!("{CANONICAL_TABLE_NAME}.csv"));
    write_canonical_table(&ect.table, &canonical_path)?;
    let report_path = output_dir.join(QUALITY_REPORT_FILE);
    write_report(&ect.report, &report_path)?;

    let mut summary = RunSummary {
        canonical_path,
        report_path,
        report_passed: ect.report.passed,
        ..RunSummary::default()
    };
    for outcome in query::run_all(&ect.table, config.parallel_queries) {
        match outcome.result {
            Ok(result) => {
                let path = write_result(&result, output_dir)?;
                info!(
                    "{}: {} row(s) written to {path:?}",
                    result.name(),
                    result.len()
                );
                if preview {
                    println!("== {} ==", result.name());
                    table::print_table(result.columns(), &result.render_rows());
                    println!();
                }
                summary.written.push((outcome.query, path));
            }
            Err(err) => {
                warn!("{} failed: {err}", outcome.query);
                summary.failed.push((outcome.query, err.to_string()));
            }
        }
    }
    Ok(summary)
}

pub fn execute_run(args: &RunArgs) -> Result<()> {
    let mut config = resolve_config(&args.source)?;
    if args.sequential {
        config.parallel_queries = false;
    }
    let summary = run_pipeline(&args.source.input, &args.output_dir, &config, args.preview)?;
    info!(
        "Wrote {} of {} query result(s) to {:?}",
        summary.written.len(),
        Query::ALL.len(),
        args.output_dir
    );
    if !summary.failed.is_empty() {
        let names = summary.failed.iter().map(|(query, _)| query.name()).join(", ");
        warn!("Failed queries: {names}");
    }
    Ok(())
}

pub fn execute_clean(args: &CleanArgs) -> Result<()> {
    let config = resolve_config(&args.source)?;
    let raw = load_source(&args.source.input, &config)?;
    let ect = run_ect(&raw, &config).with_context(|| format!("Cleaning {:?}", args.source.input))?;
    write_canonical_table(&ect.table, &args.output)?;
    if let Some(path) = &args.report {
        write_report(&ect.report, path)?;
        info!("Quality report written to {path:?}");
    }
    print!("{}", ect.report.render());
    Ok(())
}
