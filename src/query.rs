//! The ten aggregate queries over the canonical table.
//!
//! Every query is a pure function of the table. Grouping preserves the order
//! in which groups are first seen and all sorts are stable, so ties resolve
//! the same way on every run. The bottom product ranking is the top ranking
//! reversed. A running total that leaves the decimal range fails the query
//! instead of the process. Aggregates follow SQL semantics: sums and
//! averages skip nulls, distinct counts ignore nulls, and null group keys form
//! their own group that sorts before any value.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    hash::Hash,
    thread,
};

use log::{debug, error, info};
use rust_decimal::Decimal;

use crate::{
    data::{CanonicalTable, DiscountBucket, Transaction, format_decimal, round_half_up},
    error::QueryError,
};

const TOP_PRODUCTS_LIMIT: usize = 15;
const TOP_STATES_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
}

impl Cell {
    pub fn render(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Text(value) => value.clone(),
            Cell::Integer(value) => value.to_string(),
            Cell::Decimal(value) => format_decimal(*value),
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Cell::Decimal(value) => Some(*value),
            Cell::Integer(value) => Some(Decimal::from(*value)),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<Option<&str>> for Cell {
    fn from(value: Option<&str>) -> Self {
        value.map_or(Cell::Null, |v| Cell::Text(v.to_string()))
    }
}

impl From<Option<Decimal>> for Cell {
    fn from(value: Option<Decimal>) -> Self {
        value.map_or(Cell::Null, Cell::Decimal)
    }
}

impl From<Decimal> for Cell {
    fn from(value: Decimal) -> Self {
        Cell::Decimal(value)
    }
}

impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Cell::Integer(value as i64)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Integer(value)
    }
}

/// Materialized, ordered output of one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultTable {
    pub query: Query,
    pub rows: Vec<Vec<Cell>>,
}

impl ResultTable {
    pub fn name(&self) -> &'static str {
        self.query.name()
    }

    pub fn columns(&self) -> &'static [&'static str] {
        self.query.columns()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.columns().iter().position(|c| *c == column)?;
        self.rows.get(row)?.get(idx)
    }

    pub fn render_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(Cell::render).collect())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Query {
    MonthlyTrend,
    TopProducts,
    WorstProducts,
    RegionalPerformance,
    CategoryAnalysis,
    SegmentAnalysis,
    ShippingAnalysis,
    DiscountImpact,
    TopStates,
    YoyGrowth,
}

const PRODUCT_COLUMNS: &[&str] = &[
    "product_name",
    "category",
    "sub_category",
    "total_sales",
    "total_profit",
    "units_sold",
    "avg_discount",
];

impl Query {
    pub const ALL: [Query; 10] = [
        Query::MonthlyTrend,
        Query::TopProducts,
        Query::WorstProducts,
        Query::RegionalPerformance,
        Query::CategoryAnalysis,
        Query::SegmentAnalysis,
        Query::ShippingAnalysis,
        Query::DiscountImpact,
        Query::TopStates,
        Query::YoyGrowth,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Query::MonthlyTrend => "monthly_trend",
            Query::TopProducts => "top_products",
            Query::WorstProducts => "worst_products",
            Query::RegionalPerformance => "regional_performance",
            Query::CategoryAnalysis => "category_analysis",
            Query::SegmentAnalysis => "segment_analysis",
            Query::ShippingAnalysis => "shipping_analysis",
            Query::DiscountImpact => "discount_impact",
            Query::TopStates => "top_states",
            Query::YoyGrowth => "yoy_growth",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|query| query.name() == name)
    }

    /// Output column names, in order. Part of the downstream contract.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Query::MonthlyTrend => &[
                "month",
                "total_revenue",
                "total_profit",
                "total_orders",
                "unique_customers",
                "avg_profit_margin",
            ],
            Query::TopProducts | Query::WorstProducts => PRODUCT_COLUMNS,
            Query::RegionalPerformance => &[
                "region",
                "unique_customers",
                "total_orders",
                "total_revenue",
                "total_profit",
                "avg_profit_margin",
                "avg_delivery_days",
            ],
            Query::CategoryAnalysis => &[
                "category",
                "sub_category",
                "total_revenue",
                "total_profit",
                "avg_profit_margin",
                "total_units",
                "avg_discount",
            ],
            Query::SegmentAnalysis => &[
                "segment",
                "unique_customers",
                "total_revenue",
                "total_profit",
                "avg_profit_margin",
                "revenue_per_customer",
            ],
            Query::ShippingAnalysis => &[
                "ship_mode",
                "order_count",
                "avg_delivery_days",
                "total_revenue",
                "total_profit",
                "avg_discount",
            ],
            Query::DiscountImpact => &[
                "discount_bucket",
                "transaction_count",
                "total_revenue",
                "total_profit",
                "avg_profit_margin",
                "loss_count",
            ],
            Query::TopStates => &[
                "state",
                "region",
                "unique_customers",
                "total_revenue",
                "total_profit",
                "avg_profit_margin",
            ],
            Query::YoyGrowth => &[
                "order_year",
                "revenue",
                "profit",
                "orders",
                "revenue_growth_pct",
                "profit_growth_pct",
            ],
        }
    }

    pub fn execute(&self, table: &CanonicalTable) -> Result<ResultTable, QueryError> {
        let rows = table.rows();
        let result = match self {
            Query::MonthlyTrend => monthly_trend(rows),
            Query::TopProducts => {
                self.require(rows, PRODUCT_KEYS)?;
                products(rows, SortOrder::Descending)
            }
            Query::WorstProducts => {
                self.require(rows, PRODUCT_KEYS)?;
                products(rows, SortOrder::Ascending)
            }
            Query::RegionalPerformance => {
                self.require(rows, &[("region", |r: &Transaction| r.region.is_some())])?;
                regional_performance(rows)
            }
            Query::CategoryAnalysis => {
                self.require(
                    rows,
                    &[
                        ("category", |r: &Transaction| r.category.is_some()),
                        ("sub_category", |r: &Transaction| r.sub_category.is_some()),
                    ],
                )?;
                category_analysis(rows)
            }
            Query::SegmentAnalysis => {
                self.require(rows, &[("segment", |r: &Transaction| r.segment.is_some())])?;
                segment_analysis(rows)
            }
            Query::ShippingAnalysis => {
                self.require(rows, &[("ship_mode", |r: &Transaction| r.ship_mode.is_some())])?;
                shipping_analysis(rows)
            }
            Query::DiscountImpact => discount_impact(rows),
            Query::TopStates => {
                self.require(
                    rows,
                    &[
                        ("state", |r: &Transaction| r.state.is_some()),
                        ("region", |r: &Transaction| r.region.is_some()),
                    ],
                )?;
                top_states(rows)
            }
            Query::YoyGrowth => yoy_growth(rows),
        }
        .map_err(|Overflow(column)| QueryError::AggregateOverflow {
            query: self.name(),
            column,
        })?;
        debug_assert!(result.iter().all(|row| row.len() == self.columns().len()));
        Ok(ResultTable {
            query: *self,
            rows: result,
        })
    }

    /// A grouping column with no value in any row makes the query meaningless.
    fn require(&self, rows: &[Transaction], keys: &[GroupingKey]) -> Result<(), QueryError> {
        if rows.is_empty() {
            return Ok(());
        }
        for &(column, has_value) in keys {
            if !rows.iter().any(has_value) {
                return Err(QueryError::GroupingColumnNull {
                    query: self.name(),
                    column,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

type GroupingKey = (&'static str, fn(&Transaction) -> bool);

const PRODUCT_KEYS: &[GroupingKey] = &[
    ("product_name", |r: &Transaction| r.product_name.is_some()),
    ("category", |r: &Transaction| r.category.is_some()),
    ("sub_category", |r: &Transaction| r.sub_category.is_some()),
];

#[derive(Debug)]
pub struct QueryOutcome {
    pub query: Query,
    pub result: Result<ResultTable, QueryError>,
}

/// Runs all ten queries, on one scoped thread each when `parallel` is set.
/// Outcomes are always returned in [`Query::ALL`] order.
pub fn run_all(table: &CanonicalTable, parallel: bool) -> Vec<QueryOutcome> {
    let outcomes: Vec<QueryOutcome> = if parallel {
        thread::scope(|scope| {
            let handles = Query::ALL.map(|query| {
                scope.spawn(move || QueryOutcome {
                    query,
                    result: query.execute(table),
                })
            });
            handles
                .into_iter()
                .zip(Query::ALL)
                .map(|(handle, query)| {
                    handle.join().unwrap_or_else(|_| {
                        error!("{query} worker panicked");
                        QueryOutcome {
                            query,
                            result: Err(QueryError::WorkerPanicked {
                                query: query.name(),
                            }),
                        }
                    })
                })
                .collect()
        })
    } else {
        Query::ALL
            .into_iter()
            .map(|query| QueryOutcome {
                query,
                result: query.execute(table),
            })
            .collect()
    };
    for outcome in &outcomes {
        match &outcome.result {
            Ok(result) => debug!("{} produced {} row(s)", outcome.query, result.len()),
            Err(err) => debug!("{} failed: {err}", outcome.query),
        }
    }
    info!(
        "Ran {} queries ({} succeeded)",
        outcomes.len(),
        outcomes.iter().filter(|o| o.result.is_ok()).count()
    );
    outcomes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortOrder {
    Ascending,
    Descending,
}

/// Column whose running total left the representable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Overflow(&'static str);

type Rows = Result<Vec<Vec<Cell>>, Overflow>;

fn checked(value: Option<Decimal>, column: &'static str) -> Result<Decimal, Overflow> {
    value.ok_or(Overflow(column))
}

#[derive(Debug, Default)]
struct Mean {
    sum: Decimal,
    count: usize,
}

impl Mean {
    fn push(&mut self, value: Decimal, column: &'static str) -> Result<(), Overflow> {
        self.sum = checked(self.sum.checked_add(value), column)?;
        self.count += 1;
        Ok(())
    }

    fn value(&self, places: u32) -> Option<Decimal> {
        (self.count > 0).then(|| round_half_up(self.sum / Decimal::from(self.count), places))
    }
}

#[derive(Debug, Default)]
struct Aggregate<'a> {
    rows: usize,
    sales: Decimal,
    profit: Option<Decimal>,
    margin: Mean,
    delivery: Mean,
    discount: Mean,
    units: i64,
    losses: usize,
    orders: HashSet<&'a str>,
    customers: HashSet<&'a str>,
}

impl<'a> Aggregate<'a> {
    fn add(&mut self, row: &'a Transaction) -> Result<(), Overflow> {
        self.rows += 1;
        self.sales = checked(self.sales.checked_add(row.sales), "sales")?;
        if let Some(profit) = row.profit {
            let total = self.profit.unwrap_or_default().checked_add(profit);
            self.profit = Some(checked(total, "profit")?);
            if profit < Decimal::ZERO {
                self.losses += 1;
            }
        }
        if let Some(margin) = row.profit_margin_pct {
            self.margin.push(margin, "profit_margin_pct")?;
        }
        if let Some(days) = row.delivery_days {
            self.delivery.push(Decimal::from(days), "delivery_days")?;
        }
        self.discount.push(row.discount, "discount")?;
        self.units = self
            .units
            .checked_add(row.quantity)
            .ok_or(Overflow("quantity"))?;
        self.orders.insert(row.order_id.as_str());
        if let Some(customer) = row.customer_id.as_deref() {
            self.customers.insert(customer);
        }
        Ok(())
    }

    fn total_sales(&self) -> Decimal {
        round_half_up(self.sales, 2)
    }

    fn total_profit(&self) -> Option<Decimal> {
        self.profit.map(|p| round_half_up(p, 2))
    }

    fn avg_margin(&self) -> Option<Decimal> {
        self.margin.value(2)
    }

    fn revenue_per_customer(&self) -> Option<Decimal> {
        if self.customers.is_empty() {
            return None;
        }
        let per_customer = self.sales / Decimal::from(self.customers.len());
        Some(round_half_up(per_customer, 2))
    }
}

fn group_by<'a, K, F>(rows: &'a [Transaction], key: F) -> Result<Vec<(K, Aggregate<'a>)>, Overflow>
where
    K: Eq + Hash + Clone,
    F: Fn(&'a Transaction) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Aggregate<'a>)> = Vec::new();
    for row in rows {
        let k = key(row);
        let slot = match index.get(&k) {
            Some(slot) => *slot,
            None => {
                index.insert(k.clone(), groups.len());
                groups.push((k, Aggregate::default()));
                groups.len() - 1
            }
        };
        groups[slot].1.add(row)?;
    }
    Ok(groups)
}

fn monthly_trend(rows: &[Transaction]) -> Rows {
    let mut groups = group_by(rows, |r| (r.order_year, r.order_month))?;
    groups.sort_by_key(|(key, _)| *key);
    Ok(groups
        .into_iter()
        .map(|((year, month), agg)| {
            vec![
                Cell::Text(format!("{year:04}-{month:02}")),
                agg.total_sales().into(),
                agg.total_profit().into(),
                agg.orders.len().into(),
                agg.customers.len().into(),
                agg.avg_margin().into(),
            ]
        })
        .collect())
}

fn products(rows: &[Transaction], order: SortOrder) -> Rows {
    let groups = group_by(rows, |r| {
        (
            r.product_name.as_deref(),
            r.category.as_deref(),
            r.sub_category.as_deref(),
        )
    })?;
    let mut ranked = groups
        .into_iter()
        .map(|(key, agg)| (key, agg.total_profit(), agg))
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    // The bottom ranking is the top ranking reversed, so tied groups are
    // split between the two ends instead of landing in both.
    if order == SortOrder::Ascending {
        ranked.reverse();
    }
    ranked.truncate(TOP_PRODUCTS_LIMIT);
    Ok(ranked
        .into_iter()
        .map(|((product, category, sub_category), profit, agg)| {
            vec![
                product.into(),
                category.into(),
                sub_category.into(),
                agg.total_sales().into(),
                profit.into(),
                agg.units.into(),
                agg.discount.value(2).into(),
            ]
        })
        .collect())
}

fn regional_performance(rows: &[Transaction]) -> Rows {
    let mut groups = group_by(rows, |r| r.region.as_deref())?;
    groups.sort_by(|a, b| b.1.total_sales().cmp(&a.1.total_sales()));
    Ok(groups
        .into_iter()
        .map(|(region, agg)| {
            vec![
                region.into(),
                agg.customers.len().into(),
                agg.orders.len().into(),
                agg.total_sales().into(),
                agg.total_profit().into(),
                agg.avg_margin().into(),
                agg.delivery.value(1).into(),
            ]
        })
        .collect())
}

fn category_analysis(rows: &[Transaction]) -> Rows {
    let mut groups = group_by(rows, |r| (r.category.as_deref(), r.sub_category.as_deref()))?;
    groups.sort_by(|a, b| {
        a.0.0
            .cmp(&b.0.0)
            .then_with(|| b.1.total_sales().cmp(&a.1.total_sales()))
    });
    Ok(groups
        .into_iter()
        .map(|((category, sub_category), agg)| {
            vec![
                category.into(),
                sub_category.into(),
                agg.total_sales().into(),
                agg.total_profit().into(),
                agg.avg_margin().into(),
                agg.units.into(),
                agg.discount.value(2).into(),
            ]
        })
        .collect())
}

fn segment_analysis(rows: &[Transaction]) -> Rows {
    let mut groups = group_by(rows, |r| r.segment.as_deref())?;
    groups.sort_by(|a, b| b.1.total_sales().cmp(&a.1.total_sales()));
    Ok(groups
        .into_iter()
        .map(|(segment, agg)| {
            vec![
                segment.into(),
                agg.customers.len().into(),
                agg.total_sales().into(),
                agg.total_profit().into(),
                agg.avg_margin().into(),
                agg.revenue_per_customer().into(),
            ]
        })
        .collect())
}

fn shipping_analysis(rows: &[Transaction]) -> Rows {
    let mut groups = group_by(rows, |r| r.ship_mode.as_deref())?;
    groups.sort_by(|a, b| b.1.rows.cmp(&a.1.rows));
    Ok(groups
        .into_iter()
        .map(|(ship_mode, agg)| {
            vec![
                ship_mode.into(),
                agg.rows.into(),
                agg.delivery.value(1).into(),
                agg.total_sales().into(),
                agg.total_profit().into(),
                agg.discount.value(3).into(),
            ]
        })
        .collect())
}

fn discount_impact(rows: &[Transaction]) -> Rows {
    let mut groups = group_by(rows, |r| r.discount_bucket)?;
    groups.sort_by_key(|(bucket, _)| *bucket);
    Ok(groups
        .into_iter()
        .map(|(bucket, agg): (DiscountBucket, Aggregate<'_>)| {
            vec![
                Cell::Text(bucket.to_string()),
                agg.rows.into(),
                agg.total_sales().into(),
                agg.total_profit().into(),
                agg.avg_margin().into(),
                agg.losses.into(),
            ]
        })
        .collect())
}

fn top_states(rows: &[Transaction]) -> Rows {
    let mut groups = group_by(rows, |r| (r.state.as_deref(), r.region.as_deref()))?;
    groups.sort_by(|a, b| b.1.total_sales().cmp(&a.1.total_sales()));
    groups.truncate(TOP_STATES_LIMIT);
    Ok(groups
        .into_iter()
        .map(|((state, region), agg)| {
            vec![
                state.into(),
                region.into(),
                agg.customers.len().into(),
                agg.total_sales().into(),
                agg.total_profit().into(),
                agg.avg_margin().into(),
            ]
        })
        .collect())
}

/// Growth is measured against the calendar year immediately before
/// (`year - 1`), not against the previous year present in the data.
fn yoy_growth(rows: &[Transaction]) -> Rows {
    let mut groups = group_by(rows, |r| r.order_year)?;
    groups.sort_by_key(|(year, _)| *year);
    let yearly = groups
        .iter()
        .map(|(year, agg)| (*year, (agg.total_sales(), agg.total_profit())))
        .collect::<HashMap<_, _>>();
    Ok(groups
        .iter()
        .map(|(year, agg)| {
            let revenue = agg.total_sales();
            let profit = agg.total_profit();
            let previous = year.checked_sub(1).and_then(|prev| yearly.get(&prev));
            vec![
                Cell::Integer(i64::from(*year)),
                revenue.into(),
                profit.into(),
                agg.orders.len().into(),
                previous
                    .and_then(|(prev_revenue, _)| growth_pct(Some(revenue), Some(*prev_revenue)))
                    .into(),
                previous
                    .and_then(|(_, prev_profit)| growth_pct(profit, *prev_profit))
                    .into(),
            ]
        })
        .collect())
}

/// `(current - previous) / previous * 100` to two places; null without a
/// usable previous value.
pub fn growth_pct(current: Option<Decimal>, previous: Option<Decimal>) -> Option<Decimal> {
    let current = current?;
    let previous = previous?;
    let ratio = current.checked_sub(previous)?.checked_div(previous)?;
    ratio
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|pct| round_half_up(pct, 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    #[test]
    fn growth_pct_guards_missing_and_zero_previous() {
        assert_eq!(growth_pct(Some(dec("150")), Some(dec("100"))), Some(dec("50")));
        assert_eq!(growth_pct(Some(dec("120")), Some(dec("150"))), Some(dec("-20")));
        assert_eq!(growth_pct(Some(dec("120")), Some(Decimal::ZERO)), None);
        assert_eq!(growth_pct(Some(dec("120")), None), None);
        assert_eq!(growth_pct(None, Some(dec("1"))), None);
        assert_eq!(growth_pct(Some(Decimal::MAX), Some(Decimal::MIN)), None);
    }

    #[test]
    fn mean_reports_the_column_that_overflowed() {
        let mut mean = Mean::default();
        mean.push(Decimal::MAX, "profit_margin_pct").unwrap();
        assert_eq!(
            mean.push(Decimal::MAX, "profit_margin_pct"),
            Err(Overflow("profit_margin_pct"))
        );
        assert_eq!(mean.count, 1);
    }

    #[test]
    fn every_query_has_a_unique_name() {
        let names = Query::ALL.iter().map(Query::name).collect::<HashSet<_>>();
        assert_eq!(names.len(), Query::ALL.len());
        assert_eq!(Query::from_name("yoy_growth"), Some(Query::YoyGrowth));
    }

    #[test]
    fn mean_rounds_once_at_the_end() {
        let mut mean = Mean::default();
        mean.push(dec("0.125"), "discount").unwrap();
        mean.push(dec("0.125"), "discount").unwrap();
        mean.push(dec("0.126"), "discount").unwrap();
        assert_eq!(mean.value(2), Some(dec("0.13")));
        assert_eq!(Mean::default().value(2), None);
    }

    #[test]
    fn cell_rendering_normalizes_decimals_and_nulls() {
        assert_eq!(Cell::Decimal(dec("12.50")).render(), "12.5");
        assert_eq!(Cell::Null.render(), "");
        assert_eq!(Cell::from(Some("West")).render(), "West");
    }
}
