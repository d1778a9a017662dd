//! Header normalization: maps arbitrary source headers onto the canonical
//! snake_case schema.
//!
//! The mapping is resolved once per run into a [`HeaderMapping`], which the
//! coercer then uses for positional lookups instead of matching strings on
//! every row.

use std::collections::{BTreeMap, HashMap};

use heck::ToSnakeCase;
use log::debug;

use crate::error::SchemaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKind {
    Identifier,
    Categorical,
    Date,
    Decimal,
    Integer,
}

const FIELD_COUNT: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CanonicalField {
    OrderId,
    CustomerId,
    Category,
    SubCategory,
    ProductName,
    Region,
    State,
    Segment,
    ShipMode,
    OrderDate,
    ShipDate,
    Sales,
    Quantity,
    Discount,
    Profit,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; FIELD_COUNT] = [
        CanonicalField::OrderId,
        CanonicalField::CustomerId,
        CanonicalField::Category,
        CanonicalField::SubCategory,
        CanonicalField::ProductName,
        CanonicalField::Region,
        CanonicalField::State,
        CanonicalField::Segment,
        CanonicalField::ShipMode,
        CanonicalField::OrderDate,
        CanonicalField::ShipDate,
        CanonicalField::Sales,
        CanonicalField::Quantity,
        CanonicalField::Discount,
        CanonicalField::Profit,
    ];

    /// Headers that must be present before any row is processed.
    pub const REQUIRED_HEADERS: [CanonicalField; 4] = [
        CanonicalField::OrderDate,
        CanonicalField::Sales,
        CanonicalField::Quantity,
        CanonicalField::Profit,
    ];

    /// Fields whose null value causes the row to be dropped.
    pub const REQUIRED_VALUES: [CanonicalField; 4] = [
        CanonicalField::OrderId,
        CanonicalField::OrderDate,
        CanonicalField::Sales,
        CanonicalField::Quantity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CanonicalField::OrderId => "order_id",
            CanonicalField::CustomerId => "customer_id",
            CanonicalField::Category => "category",
            CanonicalField::SubCategory => "sub_category",
            CanonicalField::ProductName => "product_name",
            CanonicalField::Region => "region",
            CanonicalField::State => "state",
            CanonicalField::Segment => "segment",
            CanonicalField::ShipMode => "ship_mode",
            CanonicalField::OrderDate => "order_date",
            CanonicalField::ShipDate => "ship_date",
            CanonicalField::Sales => "sales",
            CanonicalField::Quantity => "quantity",
            CanonicalField::Discount => "discount",
            CanonicalField::Profit => "profit",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            CanonicalField::OrderId | CanonicalField::CustomerId => FieldKind::Identifier,
            CanonicalField::OrderDate | CanonicalField::ShipDate => FieldKind::Date,
            CanonicalField::Sales | CanonicalField::Discount | CanonicalField::Profit => {
                FieldKind::Decimal
            }
            CanonicalField::Quantity => FieldKind::Integer,
            _ => FieldKind::Categorical,
        }
    }

    pub fn is_required_value(&self) -> bool {
        Self::REQUIRED_VALUES.contains(self)
    }
}

/// Lowercase snake_case form of a raw header. Returns `None` when nothing
/// alphanumeric survives.
pub fn normalize_header(raw: &str) -> Option<String> {
    let cleaned = raw.trim().trim_start_matches('\u{feff}').trim();
    let normalized = cleaned.to_snake_case();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Resolved position of each canonical field within the source header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMapping {
    positions: [Option<usize>; FIELD_COUNT],
    normalized: Vec<String>,
    ignored: Vec<String>,
}

impl HeaderMapping {
    pub fn position(&self, field: CanonicalField) -> Option<usize> {
        self.positions[field as usize]
    }

    pub fn contains(&self, field: CanonicalField) -> bool {
        self.position(field).is_some()
    }

    /// Normalized name for every source column, in source order.
    pub fn normalized_headers(&self) -> &[String] {
        &self.normalized
    }

    /// Source columns with no canonical counterpart.
    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    pub fn source_width(&self) -> usize {
        self.normalized.len()
    }
}

/// Builds the header mapping, failing fast when two headers collide or a
/// required header is absent.
pub fn build_mapping(
    headers: &[String],
    aliases: &BTreeMap<String, String>,
) -> Result<HeaderMapping, SchemaError> {
    if headers.is_empty() {
        return Err(SchemaError::EmptyHeader);
    }

    let mut positions = [None; FIELD_COUNT];
    let mut normalized = Vec::with_capacity(headers.len());
    let mut ignored = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(headers.len());

    for (idx, raw) in headers.iter().enumerate() {
        let base = normalize_header(raw).unwrap_or_else(|| format!("column_{idx}"));
        let target = resolve_alias(&base, aliases);
        if let Some(previous) = seen.insert(target.clone(), idx) {
            return Err(SchemaError::AmbiguousHeader {
                first: headers[previous].clone(),
                second: raw.clone(),
                target,
            });
        }
        match CanonicalField::from_name(&target) {
            Some(field) => positions[field as usize] = Some(idx),
            None => {
                debug!("Ignoring source column '{raw}' (normalized '{target}')");
                ignored.push(raw.clone());
            }
        }
        normalized.push(target);
    }

    let missing = CanonicalField::REQUIRED_HEADERS
        .iter()
        .filter(|field| positions[**field as usize].is_none())
        .map(|field| field.name().to_string())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(SchemaError::MissingRequired(missing));
    }

    Ok(HeaderMapping {
        positions,
        normalized,
        ignored,
    })
}

fn resolve_alias(name: &str, aliases: &BTreeMap<String, String>) -> String {
    match aliases.get(name) {
        Some(target) => normalize_header(target).unwrap_or_else(|| name.to_string()),
        None => name.to_string(),
    }
}
