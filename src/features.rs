//! Row-local derivation of the computed columns.
//!
//! Each derived value depends only on the base fields of its own row.
//! Divisions are guarded and yield null instead of failing; a ship date
//! before the order date is flagged, never dropped.

use chrono::{Datelike, NaiveDate};
use log::warn;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    coerce::CoercedRecord,
    data::{CanonicalTable, DiscountBucket, Transaction, round_half_up},
    error::{ValidationError, ValidationKind},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeatureReport {
    pub negative_delivery_days: usize,
    pub validation_samples: Vec<ValidationError>,
}

pub fn derive_features(
    records: &[CoercedRecord],
    sample_limit: usize,
) -> (CanonicalTable, FeatureReport) {
    let mut report = FeatureReport::default();
    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let (transaction, flag) = enrich(record);
        if let Some(flag) = flag {
            report.negative_delivery_days += 1;
            if report.validation_samples.len() < sample_limit {
                report.validation_samples.push(flag);
            }
        }
        rows.push(transaction);
    }
    if report.negative_delivery_days > 0 {
        warn!(
            "{} row(s) ship before they were ordered",
            report.negative_delivery_days
        );
    }
    (CanonicalTable::new(rows), report)
}

/// Derives every computed column for one row. The second element is set when
/// the row fails a validation rule.
pub fn enrich(record: &CoercedRecord) -> (Transaction, Option<ValidationError>) {
    let delivery_days = delivery_days(record.order_date, record.ship_date);
    let flag = delivery_days
        .filter(|days| *days < 0)
        .map(|days| ValidationError {
            line: record.line,
            order_id: record.order_id.clone(),
            kind: ValidationKind::NegativeDeliverySpan { days },
        });
    let month = record.order_date.month();

    let transaction = Transaction {
        line: record.line,
        order_id: record.order_id.clone(),
        customer_id: record.customer_id.clone(),
        category: record.category.clone(),
        sub_category: record.sub_category.clone(),
        product_name: record.product_name.clone(),
        region: record.region.clone(),
        state: record.state.clone(),
        segment: record.segment.clone(),
        ship_mode: record.ship_mode.clone(),
        order_date: record.order_date,
        ship_date: record.ship_date,
        sales: record.sales,
        quantity: record.quantity,
        discount: record.discount,
        profit: record.profit,
        delivery_days,
        profit_margin_pct: profit_margin_pct(record.profit, record.sales),
        revenue_per_unit: revenue_per_unit(record.sales, record.quantity),
        order_year: record.order_date.year(),
        order_month: month,
        order_quarter: quarter(month),
        is_profitable: is_profitable(record.profit),
        discount_bucket: DiscountBucket::from_discount(record.discount),
    };
    (transaction, flag)
}

pub fn delivery_days(order_date: NaiveDate, ship_date: Option<NaiveDate>) -> Option<i64> {
    ship_date.map(|ship| (ship - order_date).num_days())
}

/// `profit / sales * 100` to two places; null when sales is zero or profit is null.
pub fn profit_margin_pct(profit: Option<Decimal>, sales: Decimal) -> Option<Decimal> {
    let ratio = profit?.checked_div(sales)?;
    ratio
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|pct| round_half_up(pct, 2))
}

pub fn revenue_per_unit(sales: Decimal, quantity: i64) -> Option<Decimal> {
    sales
        .checked_div(Decimal::from(quantity))
        .map(|value| round_half_up(value, 2))
}

pub fn quarter(month: u32) -> u32 {
    (month - 1) / 3 + 1
}

pub fn is_profitable(profit: Option<Decimal>) -> bool {
    profit.is_some_and(|p| p > Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn record(order: (i32, u32, u32), ship: Option<(i32, u32, u32)>) -> CoercedRecord {
        let date = |(y, m, d): (i32, u32, u32)| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        CoercedRecord {
            line: 2,
            order_id: "CA-2016-152156".into(),
            customer_id: Some("CG-12520".into()),
            category: Some("Furniture".into()),
            sub_category: Some("Bookcases".into()),
            product_name: Some("Bush Somerset Collection Bookcase".into()),
            region: Some("South".into()),
            state: Some("Kentucky".into()),
            segment: Some("Consumer".into()),
            ship_mode: Some("Second Class".into()),
            order_date: date(order),
            ship_date: ship.map(date),
            sales: dec("261.96"),
            quantity: 2,
            discount: dec("0"),
            profit: Some(dec("41.9136")),
        }
    }

    #[test]
    fn enrich_derives_all_columns() {
        let (row, flag) = enrich(&record((2016, 11, 8), Some((2016, 11, 11))));
        assert!(flag.is_none());
        assert_eq!(row.delivery_days, Some(3));
        assert_eq!(row.profit_margin_pct, Some(dec("16.00")));
        assert_eq!(row.revenue_per_unit, Some(dec("130.98")));
        assert_eq!(row.order_year, 2016);
        assert_eq!(row.order_month, 11);
        assert_eq!(row.order_quarter, 4);
        assert!(row.is_profitable);
        assert_eq!(row.discount_bucket, DiscountBucket::None);
    }

    #[test]
    fn negative_delivery_span_is_flagged_but_kept() {
        let records = vec![record((2016, 11, 8), Some((2016, 11, 5)))];
        let (table, report) = derive_features(&records, 10);
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].delivery_days, Some(-3));
        assert_eq!(report.negative_delivery_days, 1);
        assert_eq!(
            report.validation_samples[0].kind,
            ValidationKind::NegativeDeliverySpan { days: -3 }
        );
    }

    #[test]
    fn missing_ship_date_leaves_delivery_days_null() {
        let (row, flag) = enrich(&record((2016, 1, 1), None));
        assert_eq!(row.delivery_days, None);
        assert!(flag.is_none());
    }

    #[test]
    fn zero_denominators_yield_null() {
        assert_eq!(profit_margin_pct(Some(dec("5")), Decimal::ZERO), None);
        assert_eq!(profit_margin_pct(None, dec("5")), None);
        assert_eq!(revenue_per_unit(dec("5"), 0), None);
    }

    #[test]
    fn quarter_boundaries() {
        let quarters = (1..=12).map(quarter).collect::<Vec<_>>();
        assert_eq!(quarters, vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]);
    }

    #[test]
    fn zero_profit_is_not_profitable() {
        assert!(!is_profitable(Some(Decimal::ZERO)));
        assert!(!is_profitable(None));
        assert!(is_profitable(Some(dec("0.01"))));
        assert!(!is_profitable(Some(dec("-3"))));
    }
}
