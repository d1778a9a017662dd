//! Post-transform data quality report.
//!
//! The validator only observes: it reads the canonical table plus the stage
//! reports and summarizes what happened. A failed check never halts the run.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use itertools::Itertools;
use log::warn;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    coerce::CoercionReport,
    data::{CanonicalTable, format_date, format_decimal, round_half_up},
    error::{ParseError, ValidationError},
    features::FeatureReport,
    table,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub min: NaiveDate,
    pub max: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusinessSummary {
    pub unique_orders: usize,
    pub unique_customers: usize,
    /// Null when the running total leaves the decimal range.
    pub total_revenue: Option<Decimal>,
    pub total_profit: Option<Decimal>,
    pub avg_profit_margin: Option<Decimal>,
    pub loss_making_transactions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    pub raw_records: usize,
    pub total_records: usize,
    pub dropped_records: usize,
    pub duplicates_removed: usize,
    pub dropped_missing_required: usize,
    pub date_range: Option<DateRange>,
    pub required_nulls: BTreeMap<&'static str, usize>,
    pub retained_nulls: BTreeMap<&'static str, usize>,
    pub parse_failures: BTreeMap<&'static str, usize>,
    pub discount_defaulted: usize,
    pub negative_delivery_days: usize,
    pub summary: BusinessSummary,
    pub checks: Vec<QualityCheck>,
    pub passed: bool,
    pub parse_samples: Vec<ParseError>,
    pub validation_samples: Vec<ValidationError>,
}

pub fn validate(
    table: &CanonicalTable,
    coercion: &CoercionReport,
    features: &FeatureReport,
) -> QualityReport {
    let rows = table.rows();
    let date_range = rows
        .iter()
        .map(|row| row.order_date)
        .min()
        .zip(rows.iter().map(|row| row.order_date).max())
        .map(|(min, max)| DateRange { min, max });

    let dropped_records = coercion.rows_dropped();
    let parse_failures = coercion.parse_failure_total();
    let checks = vec![
        QualityCheck {
            name: "non_empty",
            passed: !table.is_empty(),
            detail: format!("{} canonical record(s)", table.len()),
        },
        QualityCheck {
            name: "no_dropped_records",
            passed: dropped_records == 0,
            detail: format!(
                "{} duplicate(s), {} missing a required value",
                coercion.duplicates_removed, coercion.dropped_missing_required
            ),
        },
        QualityCheck {
            name: "no_parse_failures",
            passed: parse_failures == 0,
            detail: format!("{parse_failures} field value(s) nulled"),
        },
        QualityCheck {
            name: "no_negative_delivery_spans",
            passed: features.negative_delivery_days == 0,
            detail: format!("{} row(s) flagged", features.negative_delivery_days),
        },
    ];
    let passed = checks.iter().all(|check| check.passed);

    QualityReport {
        raw_records: coercion.rows_read,
        total_records: table.len(),
        dropped_records,
        duplicates_removed: coercion.duplicates_removed,
        dropped_missing_required: coercion.dropped_missing_required,
        date_range,
        required_nulls: coercion.required_nulls.clone(),
        retained_nulls: coercion.retained_nulls.clone(),
        parse_failures: coercion.parse_failures.clone(),
        discount_defaulted: coercion.discount_defaulted,
        negative_delivery_days: features.negative_delivery_days,
        summary: summarize(table),
        checks,
        passed,
        parse_samples: coercion.parse_samples.clone(),
        validation_samples: features.validation_samples.clone(),
    }
}

fn summarize(table: &CanonicalTable) -> BusinessSummary {
    let rows = table.rows();
    let unique_orders = rows.iter().map(|row| row.order_id.as_str()).unique().count();
    let unique_customers = rows
        .iter()
        .filter_map(|row| row.customer_id.as_deref())
        .unique()
        .count();
    let total_revenue = checked_sum(rows.iter().map(|row| row.sales), "total_revenue");
    let total_profit = checked_sum(rows.iter().filter_map(|row| row.profit), "total_profit");
    let margins = rows
        .iter()
        .filter_map(|row| row.profit_margin_pct)
        .collect::<Vec<_>>();
    let avg_profit_margin = if margins.is_empty() {
        None
    } else {
        checked_sum(margins.iter().copied(), "avg_profit_margin")
            .map(|sum| round_half_up(sum / Decimal::from(margins.len()), 2))
    };
    let loss_making_transactions = rows
        .iter()
        .filter(|row| row.profit.is_some_and(|p| p < Decimal::ZERO))
        .count();

    BusinessSummary {
        unique_orders,
        unique_customers,
        total_revenue: total_revenue.map(|v| round_half_up(v, 2)),
        total_profit: total_profit.map(|v| round_half_up(v, 2)),
        avg_profit_margin,
        loss_making_transactions,
    }
}

fn checked_sum(mut values: impl Iterator<Item = Decimal>, metric: &str) -> Option<Decimal> {
    let total = values.try_fold(Decimal::ZERO, |acc, value| acc.checked_add(value));
    if total.is_none() {
        warn!("{metric} overflowed the decimal range; reporting it as null");
    }
    total
}

impl QualityReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Two-column `metric | value` rows for operator display.
    pub fn render_rows(&self) -> Vec<Vec<String>> {
        let mut rows = vec![
            metric("raw_records", self.raw_records),
            metric("total_records", self.total_records),
            metric("dropped_records", self.dropped_records),
            metric("duplicates_removed", self.duplicates_removed),
            metric("dropped_missing_required", self.dropped_missing_required),
        ];
        let range = self
            .date_range
            .map(|r| format!("{} -> {}", format_date(&r.min), format_date(&r.max)))
            .unwrap_or_else(|| "n/a".to_string());
        rows.push(vec!["date_range".to_string(), range]);
        for (field, count) in &self.required_nulls {
            rows.push(metric(&format!("null.{field}"), *count));
        }
        for (field, count) in &self.retained_nulls {
            rows.push(metric(&format!("retained_null.{field}"), *count));
        }
        for (field, count) in &self.parse_failures {
            rows.push(metric(&format!("parse_failure.{field}"), *count));
        }
        rows.push(metric("discount_defaulted", self.discount_defaulted));
        rows.push(metric("negative_delivery_days", self.negative_delivery_days));
        rows.push(metric("unique_orders", self.summary.unique_orders));
        rows.push(metric("unique_customers", self.summary.unique_customers));
        rows.push(vec![
            "total_revenue".to_string(),
            self.summary.total_revenue.map(format_decimal).unwrap_or_default(),
        ]);
        rows.push(vec![
            "total_profit".to_string(),
            self.summary.total_profit.map(format_decimal).unwrap_or_default(),
        ]);
        rows.push(vec![
            "avg_profit_margin".to_string(),
            self.summary
                .avg_profit_margin
                .map(format_decimal)
                .unwrap_or_default(),
        ]);
        rows.push(metric(
            "loss_making_transactions",
            self.summary.loss_making_transactions,
        ));
        for check in &self.checks {
            let status = if check.passed { "pass" } else { "FAIL" };
            rows.push(vec![
                format!("check.{}", check.name),
                format!("{status} ({})", check.detail),
            ]);
        }
        rows.push(vec![
            "verdict".to_string(),
            if self.passed { "pass" } else { "FAIL" }.to_string(),
        ]);
        rows
    }

    pub fn render(&self) -> String {
        table::render_table(&["metric", "value"], &self.render_rows())
    }
}

fn metric(name: &str, value: usize) -> Vec<String> {
    vec![name.to_string(), value.to_string()]
}
