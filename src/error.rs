//! Error taxonomy for the pipeline stages.
//!
//! Only [`SchemaError`] aborts a run. [`ParseError`] and [`ValidationError`]
//! are recorded into the quality report and never halt processing, while a
//! [`QueryError`] fails the one query that raised it.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("source headers '{first}' and '{second}' both normalize to '{target}'")]
    AmbiguousHeader {
        first: String,
        second: String,
        target: String,
    },
    #[error("required column(s) missing after normalization: {}", .0.join(", "))]
    MissingRequired(Vec<String>),
    #[error("input has no header row")]
    EmptyHeader,
}

/// A single field that could not be coerced to its semantic type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("line {line}: could not parse '{value}' as {field}")]
pub struct ParseError {
    pub line: usize,
    pub field: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationKind {
    NegativeDeliverySpan { days: i64 },
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationKind::NegativeDeliverySpan { days } => {
                write!(f, "ship date precedes order date by {} day(s)", -days)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("line {line} (order {order_id}): {kind}")]
pub struct ValidationError {
    pub line: usize,
    pub order_id: String,
    pub kind: ValidationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("query '{query}' cannot run: grouping column '{column}' is entirely null")]
    GroupingColumnNull {
        query: &'static str,
        column: &'static str,
    },
    #[error("query '{query}' overflowed while summing '{column}'")]
    AggregateOverflow {
        query: &'static str,
        column: &'static str,
    },
    #[error("query '{query}' aborted unexpectedly")]
    WorkerPanicked { query: &'static str },
}
