//! Canonical transaction model and the value helpers shared by every stage.
//!
//! A [`Transaction`] is the cleaned, typed and feature-enriched form of one
//! source row. The [`CanonicalTable`] holding them is built once per run and
//! only read afterwards; its column order ([`CANONICAL_COLUMNS`]) is the
//! contract the query layer and the materialized `sales` table rely on.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

pub const CANONICAL_TABLE_NAME: &str = "sales";

pub const CANONICAL_COLUMNS: [&str; 23] = [
    "order_id",
    "customer_id",
    "category",
    "sub_category",
    "product_name",
    "region",
    "state",
    "segment",
    "ship_mode",
    "order_date",
    "ship_date",
    "sales",
    "quantity",
    "discount",
    "profit",
    "delivery_days",
    "profit_margin_pct",
    "revenue_per_unit",
    "order_year",
    "order_month",
    "order_quarter",
    "is_profitable",
    "discount_bucket",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountBucket {
    None,
    Low,
    Medium,
    High,
}

impl DiscountBucket {
    pub const ALL: [DiscountBucket; 4] = [
        DiscountBucket::None,
        DiscountBucket::Low,
        DiscountBucket::Medium,
        DiscountBucket::High,
    ];

    /// Upper edges are inclusive: 0.1 is `Low`, 0.2 is `Medium`.
    pub fn from_discount(discount: Decimal) -> Self {
        if discount <= Decimal::ZERO {
            DiscountBucket::None
        } else if discount <= Decimal::new(1, 1) {
            DiscountBucket::Low
        } else if discount <= Decimal::new(2, 1) {
            DiscountBucket::Medium
        } else {
            DiscountBucket::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountBucket::None => "none",
            DiscountBucket::Low => "low",
            DiscountBucket::Medium => "medium",
            DiscountBucket::High => "high",
        }
    }
}

impl fmt::Display for DiscountBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    /// Physical line in the source file, kept for diagnostics only.
    #[serde(skip)]
    pub line: usize,
    pub order_id: String,
    pub customer_id: Option<String>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub product_name: Option<String>,
    pub region: Option<String>,
    pub state: Option<String>,
    pub segment: Option<String>,
    pub ship_mode: Option<String>,
    pub order_date: NaiveDate,
    pub ship_date: Option<NaiveDate>,
    pub sales: Decimal,
    pub quantity: i64,
    pub discount: Decimal,
    pub profit: Option<Decimal>,
    pub delivery_days: Option<i64>,
    pub profit_margin_pct: Option<Decimal>,
    pub revenue_per_unit: Option<Decimal>,
    pub order_year: i32,
    pub order_month: u32,
    pub order_quarter: u32,
    pub is_profitable: bool,
    pub discount_bucket: DiscountBucket,
}

impl Transaction {
    /// Renders the row in [`CANONICAL_COLUMNS`] order; nulls become empty fields.
    pub fn to_record(&self) -> Vec<String> {
        vec![
            self.order_id.clone(),
            text_or_empty(&self.customer_id),
            text_or_empty(&self.category),
            text_or_empty(&self.sub_category),
            text_or_empty(&self.product_name),
            text_or_empty(&self.region),
            text_or_empty(&self.state),
            text_or_empty(&self.segment),
            text_or_empty(&self.ship_mode),
            format_date(&self.order_date),
            self.ship_date.as_ref().map(format_date).unwrap_or_default(),
            format_decimal(self.sales),
            self.quantity.to_string(),
            format_decimal(self.discount),
            self.profit.map(format_decimal).unwrap_or_default(),
            self.delivery_days.map(|d| d.to_string()).unwrap_or_default(),
            self.profit_margin_pct.map(format_decimal).unwrap_or_default(),
            self.revenue_per_unit.map(format_decimal).unwrap_or_default(),
            self.order_year.to_string(),
            self.order_month.to_string(),
            self.order_quarter.to_string(),
            self.is_profitable.to_string(),
            self.discount_bucket.to_string(),
        ]
    }
}

fn text_or_empty(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// Write-once table of canonical transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalTable {
    rows: Vec<Transaction>,
}

impl CanonicalTable {
    pub fn new(rows: Vec<Transaction>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Transaction] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers() -> &'static [&'static str] {
        &CANONICAL_COLUMNS
    }
}

pub fn parse_decimal(value: &str) -> Result<Decimal> {
    let trimmed = value.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| anyhow!("Failed to parse '{value}' as decimal"))
}

/// Accepts plain integers as well as decimals with no fractional part (`3.0`).
pub fn parse_integer(value: &str) -> Result<i64> {
    let trimmed = value.trim();
    if let Ok(parsed) = trimmed.parse::<i64>() {
        return Ok(parsed);
    }
    let decimal = parse_decimal(trimmed)?;
    if !decimal.fract().is_zero() {
        return Err(anyhow!("Failed to parse '{value}' as integer"));
    }
    decimal
        .to_i64()
        .ok_or_else(|| anyhow!("Integer '{value}' is out of range"))
}

pub fn parse_date_with_formats(value: &str, formats: &[String]) -> Result<NaiveDate> {
    const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
    let trimmed = value.trim();
    for fmt in formats {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(parsed);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(parsed.date());
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

/// Half-up rounding (midpoints move away from zero), matching SQL `ROUND`.
pub fn round_half_up(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
}

pub fn format_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

pub fn format_date(value: &NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    #[test]
    fn discount_bucket_edges_are_inclusive_on_the_upper_side() {
        assert_eq!(DiscountBucket::from_discount(dec("0")), DiscountBucket::None);
        assert_eq!(DiscountBucket::from_discount(dec("0.01")), DiscountBucket::Low);
        assert_eq!(DiscountBucket::from_discount(dec("0.1")), DiscountBucket::Low);
        assert_eq!(
            DiscountBucket::from_discount(dec("0.10001")),
            DiscountBucket::Medium
        );
        assert_eq!(DiscountBucket::from_discount(dec("0.2")), DiscountBucket::Medium);
        assert_eq!(DiscountBucket::from_discount(dec("0.8")), DiscountBucket::High);
        assert_eq!(DiscountBucket::from_discount(dec("1.0")), DiscountBucket::High);
    }

    #[test]
    fn discount_buckets_sort_in_natural_order() {
        let mut buckets = vec![
            DiscountBucket::High,
            DiscountBucket::None,
            DiscountBucket::Medium,
            DiscountBucket::Low,
        ];
        buckets.sort();
        assert_eq!(buckets, DiscountBucket::ALL.to_vec());
    }

    #[test]
    fn round_half_up_moves_midpoints_away_from_zero() {
        assert_eq!(round_half_up(dec("2.345"), 2), dec("2.35"));
        assert_eq!(round_half_up(dec("-2.345"), 2), dec("-2.35"));
        assert_eq!(round_half_up(dec("2.344"), 2), dec("2.34"));
    }

    #[test]
    fn parse_integer_accepts_whole_decimals_only() {
        assert_eq!(parse_integer("3").unwrap(), 3);
        assert_eq!(parse_integer(" 4.0 ").unwrap(), 4);
        assert!(parse_integer("2.5").is_err());
        assert!(parse_integer("two").is_err());
    }

    #[test]
    fn parse_date_tries_formats_in_order() {
        let formats = vec!["%Y-%m-%d".to_string(), "%m/%d/%Y".to_string()];
        let expected = NaiveDate::from_ymd_opt(2016, 11, 8).unwrap();
        assert_eq!(parse_date_with_formats("2016-11-08", &formats).unwrap(), expected);
        assert_eq!(parse_date_with_formats("11/8/2016", &formats).unwrap(), expected);
        assert_eq!(
            parse_date_with_formats("2016-11-08 00:00:00", &formats).unwrap(),
            expected
        );
        assert!(parse_date_with_formats("2016/13/45", &formats).is_err());
    }

    #[test]
    fn format_decimal_drops_trailing_zeros() {
        assert_eq!(format_decimal(dec("50.00")), "50");
        assert_eq!(format_decimal(dec("-20.50")), "-20.5");
    }
}
