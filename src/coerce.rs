//! Type and null coercion of raw records.
//!
//! Every canonical field is parsed to its semantic type. Parse failures are
//! never fatal: the field becomes null and the failure is counted. Rows with a
//! null in any of `order_id`, `order_date`, `sales` or `quantity` are dropped
//! and counted; other nulls are kept as-is, except `discount`, which defaults
//! to zero.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    config::PipelineConfig,
    data::{parse_date_with_formats, parse_decimal, parse_integer},
    error::ParseError,
    io_utils::{RawRecord, RawTable},
    normalize::{CanonicalField, HeaderMapping},
};

/// A row whose base fields are typed and whose required fields are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoercedRecord {
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
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoercionReport {
    pub rows_read: usize,
    pub duplicates_removed: usize,
    pub dropped_missing_required: usize,
    /// Nulls seen in required fields; each one explains a dropped row.
    pub required_nulls: BTreeMap<&'static str, usize>,
    /// Nulls preserved in optional fields of retained rows.
    pub retained_nulls: BTreeMap<&'static str, usize>,
    pub parse_failures: BTreeMap<&'static str, usize>,
    pub parse_samples: Vec<ParseError>,
    pub discount_defaulted: usize,
}

impl CoercionReport {
    pub fn rows_dropped(&self) -> usize {
        self.duplicates_removed + self.dropped_missing_required
    }

    pub fn parse_failure_total(&self) -> usize {
        self.parse_failures.values().sum()
    }
}

pub fn coerce_table(
    raw: &RawTable,
    mapping: &HeaderMapping,
    config: &PipelineConfig,
) -> (Vec<CoercedRecord>, CoercionReport) {
    let mut report = CoercionReport {
        rows_read: raw.len(),
        ..CoercionReport::default()
    };
    for field in CanonicalField::REQUIRED_VALUES {
        report.required_nulls.insert(field.name(), 0);
    }

    let mut seen: HashSet<&[String]> = HashSet::with_capacity(raw.len());
    let mut records = Vec::with_capacity(raw.len());
    for record in &raw.records {
        if !seen.insert(record.fields.as_slice()) {
            debug!("Line {} duplicates an earlier row; skipping", record.line);
            report.duplicates_removed += 1;
            continue;
        }
        let mut row = RowCoercer {
            mapping,
            config,
            record,
            report: &mut report,
        };
        if let Some(coerced) = row.coerce() {
            records.push(coerced);
        }
    }

    if report.duplicates_removed > 0 {
        info!("Removed {} duplicate row(s)", report.duplicates_removed);
    }
    if report.dropped_missing_required > 0 {
        warn!(
            "Dropped {} row(s) missing a required value",
            report.dropped_missing_required
        );
    }
    let failures = report.parse_failure_total();
    if failures > 0 {
        warn!("{failures} field value(s) could not be parsed and were nulled");
    }
    (records, report)
}

struct RowCoercer<'a> {
    mapping: &'a HeaderMapping,
    config: &'a PipelineConfig,
    record: &'a RawRecord,
    report: &'a mut CoercionReport,
}

impl<'a> RowCoercer<'a> {
    fn coerce(&mut self) -> Option<CoercedRecord> {
        let order_id = self.text(CanonicalField::OrderId);
        let customer_id = self.text(CanonicalField::CustomerId);
        let category = self.text(CanonicalField::Category);
        let sub_category = self.text(CanonicalField::SubCategory);
        let product_name = self.text(CanonicalField::ProductName);
        let region = self.text(CanonicalField::Region);
        let state = self.text(CanonicalField::State);
        let segment = self.text(CanonicalField::Segment);
        let ship_mode = self.text(CanonicalField::ShipMode);
        let order_date = self.date(CanonicalField::OrderDate);
        let ship_date = self.date(CanonicalField::ShipDate);
        let sales = self.decimal(CanonicalField::Sales);
        let quantity = self.integer(CanonicalField::Quantity);
        let discount = self.discount();
        let profit = self.decimal(CanonicalField::Profit);

        let missing = [
            (CanonicalField::OrderId, order_id.is_none()),
            (CanonicalField::OrderDate, order_date.is_none()),
            (CanonicalField::Sales, sales.is_none()),
            (CanonicalField::Quantity, quantity.is_none()),
        ];
        let (Some(order_id), Some(order_date), Some(sales), Some(quantity)) =
            (order_id, order_date, sales, quantity)
        else {
            for (field, is_null) in missing {
                if is_null {
                    *self.report.required_nulls.entry(field.name()).or_insert(0) += 1;
                }
            }
            self.report.dropped_missing_required += 1;
            debug!("Dropping line {}: required value missing", self.record.line);
            return None;
        };

        let optional = [
            (CanonicalField::CustomerId, customer_id.is_none()),
            (CanonicalField::Category, category.is_none()),
            (CanonicalField::SubCategory, sub_category.is_none()),
            (CanonicalField::ProductName, product_name.is_none()),
            (CanonicalField::Region, region.is_none()),
            (CanonicalField::State, state.is_none()),
            (CanonicalField::Segment, segment.is_none()),
            (CanonicalField::ShipMode, ship_mode.is_none()),
            (CanonicalField::ShipDate, ship_date.is_none()),
            (CanonicalField::Profit, profit.is_none()),
        ];
        for (field, is_null) in optional {
            if is_null {
                *self.report.retained_nulls.entry(field.name()).or_insert(0) += 1;
            }
        }
        let discount = discount.unwrap_or_else(|| {
            self.report.discount_defaulted += 1;
            Decimal::ZERO
        });

        Some(CoercedRecord {
            line: self.record.line,
            order_id,
            customer_id,
            category,
            sub_category,
            product_name,
            region,
            state,
            segment,
            ship_mode,
            order_date,
            ship_date,
            sales,
            quantity,
            discount,
            profit,
        })
    }

    fn raw(&self, field: CanonicalField) -> Option<&'a str> {
        let record: &'a RawRecord = self.record;
        self.mapping
            .position(field)
            .and_then(|idx| record.get(idx))
            .map(str::trim)
    }

    /// Raw value for a typed field, or `None` when empty or a null token.
    fn typed_raw(&self, field: CanonicalField) -> Option<&'a str> {
        self.raw(field)
            .filter(|value| !value.is_empty() && !self.config.is_null_token(value))
    }

    fn text(&mut self, field: CanonicalField) -> Option<String> {
        self.raw(field)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    fn date(&mut self, field: CanonicalField) -> Option<NaiveDate> {
        let value = self.typed_raw(field)?;
        match parse_date_with_formats(value, &self.config.date_formats) {
            Ok(parsed) => Some(parsed),
            Err(_) => self.fail(field, value),
        }
    }

    fn decimal(&mut self, field: CanonicalField) -> Option<Decimal> {
        let value = self.typed_raw(field)?;
        match parse_decimal(value) {
            Ok(parsed) => Some(parsed),
            Err(_) => self.fail(field, value),
        }
    }

    fn integer(&mut self, field: CanonicalField) -> Option<i64> {
        let value = self.typed_raw(field)?;
        match parse_integer(value) {
            Ok(parsed) => Some(parsed),
            Err(_) => self.fail(field, value),
        }
    }

    /// Discounts are fractions; anything outside `[0, 1]` counts as unparsable.
    fn discount(&mut self) -> Option<Decimal> {
        let field = CanonicalField::Discount;
        let value = self.typed_raw(field)?;
        match parse_decimal(value) {
            Ok(parsed) if parsed >= Decimal::ZERO && parsed <= Decimal::ONE => Some(parsed),
            _ => self.fail(field, value),
        }
    }

    fn fail<T>(&mut self, field: CanonicalField, value: &str) -> Option<T> {
        *self.report.parse_failures.entry(field.name()).or_insert(0) += 1;
        if self.report.parse_samples.len() < self.config.sample_limit {
            self.report.parse_samples.push(ParseError {
                line: self.record.line,
                field: field.name(),
                value: value.to_string(),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{io_utils::parse_raw_table, normalize::build_mapping};
    use std::str::FromStr;

    const HEADER: &str = "Order ID,Order Date,Ship Date,Customer ID,Region,Sales,Quantity,Discount,Profit";

    fn coerce(body: &str) -> (Vec<CoercedRecord>, CoercionReport) {
        let raw = parse_raw_table(&format!("{HEADER}\n{body}"), b',').expect("parse");
        let mapping = build_mapping(&raw.headers, &BTreeMap::new()).expect("mapping");
        coerce_table(&raw, &mapping, &PipelineConfig::default())
    }

    #[test]
    fn coerces_iso_and_us_dates() {
        let (rows, report) = coerce(
            "A-1,2016-11-08,11/11/2016,C1,South,261.96,2,0,41.9136\n",
        );
        assert_eq!(report.rows_dropped(), 0);
        let row = &rows[0];
        assert_eq!(row.order_date, NaiveDate::from_ymd_opt(2016, 11, 8).unwrap());
        assert_eq!(row.ship_date, NaiveDate::from_ymd_opt(2016, 11, 11));
        assert_eq!(row.sales, Decimal::from_str("261.96").unwrap());
        assert_eq!(row.quantity, 2);
        assert_eq!(row.profit, Some(Decimal::from_str("41.9136").unwrap()));
    }

    #[test]
    fn invalid_order_date_drops_row_and_counts_once() {
        let (rows, report) = coerce(
            "A-1,2016/13/45,,C1,South,10,1,0,1\nA-2,2016-01-01,,C1,South,10,1,0,1\n",
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(report.dropped_missing_required, 1);
        assert_eq!(report.required_nulls["order_date"], 1);
        assert_eq!(report.parse_failures["order_date"], 1);
        assert_eq!(report.parse_samples[0].value, "2016/13/45");
    }

    #[test]
    fn null_tokens_are_nulls_not_failures() {
        let (rows, report) = coerce("A-1,2016-01-01,,C1,South,10,1,N/A,NaN\n");
        assert_eq!(rows[0].profit, None);
        assert_eq!(rows[0].discount, Decimal::ZERO);
        assert_eq!(report.discount_defaulted, 1);
        assert_eq!(report.parse_failure_total(), 0);
        assert_eq!(report.retained_nulls["profit"], 1);
        assert_eq!(report.retained_nulls["ship_date"], 1);
    }

    #[test]
    fn categorical_values_are_trimmed_and_empty_becomes_null() {
        let (rows, report) = coerce("A-1,2016-01-01,,  C7  ,   ,10,1,0,1\n");
        assert_eq!(rows[0].customer_id.as_deref(), Some("C7"));
        assert_eq!(rows[0].region, None);
        assert_eq!(report.retained_nulls["region"], 1);
    }

    #[test]
    fn out_of_range_discount_is_a_counted_failure() {
        let (rows, report) = coerce("A-1,2016-01-01,,C1,South,10,1,1.5,1\n");
        assert_eq!(rows[0].discount, Decimal::ZERO);
        assert_eq!(report.parse_failures["discount"], 1);
        assert_eq!(report.discount_defaulted, 1);
    }

    #[test]
    fn fractional_quantity_drops_the_row() {
        let (rows, report) = coerce("A-1,2016-01-01,,C1,South,10,1.5,0,1\n");
        assert!(rows.is_empty());
        assert_eq!(report.required_nulls["quantity"], 1);
        assert_eq!(report.parse_failures["quantity"], 1);
    }

    #[test]
    fn exact_duplicates_are_removed_and_counted() {
        let line = "A-1,2016-01-01,,C1,South,10,1,0,1\n";
        let (rows, report) = coerce(&format!("{line}{line}"));
        assert_eq!(rows.len(), 1);
        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(report.rows_dropped(), 1);
    }

    #[test]
    fn missing_order_id_column_drops_every_row() {
        let raw = parse_raw_table("Order Date,Sales,Quantity,Profit\n2016-01-01,1,1,1\n", b',')
            .expect("parse");
        let mapping = build_mapping(&raw.headers, &BTreeMap::new()).expect("mapping");
        let (rows, report) = coerce_table(&raw, &mapping, &PipelineConfig::default());
        assert!(rows.is_empty());
        assert_eq!(report.required_nulls["order_id"], 1);
    }

    #[test]
    fn row_missing_several_required_values_is_dropped_once() {
        let (rows, report) = coerce(",2016-01-01,,C1,South,N/A,1,0,1
A-2,2016-01-01,,C1,South,10,1,0,1
");
        assert_eq!(rows.len(), 1);
        assert_eq!(report.dropped_missing_required, 1);
        assert_eq!(report.required_nulls["order_id"], 1);
        assert_eq!(report.required_nulls["sales"], 1);
        assert_eq!(report.required_nulls["order_date"], 0);
        assert_eq!(report.rows_dropped(), report.rows_read - rows.len());
    }
}
