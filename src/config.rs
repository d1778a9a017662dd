//! Pipeline configuration loaded from YAML, with command-line overrides
//! layered on top by the caller.

use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];
pub const DEFAULT_NULL_TOKENS: &[&str] = &["NaN", "N/A", ""];
pub const DEFAULT_SAMPLE_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// chrono format strings, tried in order.
    pub date_formats: Vec<String>,
    /// Tokens treated as null in numeric and date fields (case-insensitive, trimmed).
    pub null_tokens: Vec<String>,
    /// WHATWG encoding label; auto-detected when absent.
    pub input_encoding: Option<String>,
    pub delimiter: Option<char>,
    /// Normalized source header -> canonical column name.
    pub header_aliases: BTreeMap<String, String>,
    pub parallel_queries: bool,
    /// Maximum parse/validation error samples kept in the quality report.
    pub sample_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            date_formats: DEFAULT_DATE_FORMATS.iter().map(|s| s.to_string()).collect(),
            null_tokens: DEFAULT_NULL_TOKENS.iter().map(|s| s.to_string()).collect(),
            input_encoding: None,
            delimiter: None,
            header_aliases: BTreeMap::new(),
            parallel_queries: true,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: PipelineConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config YAML {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.date_formats.is_empty(),
            "At least one date format must be configured"
        );
        if let Some(delimiter) = self.delimiter {
            ensure!(delimiter.is_ascii(), "Delimiter must be ASCII");
        }
        Ok(())
    }

    pub fn delimiter_byte(&self) -> Option<u8> {
        self.delimiter.map(|c| c as u8)
    }

    pub fn is_null_token(&self, value: &str) -> bool {
        let trimmed = value.trim();
        self.null_tokens
            .iter()
            .any(|token| token.trim().eq_ignore_ascii_case(trimmed))
    }
}
