// ==============================================================================
// schema/field.rs - Field Definitions and Type Lattice
// ==============================================================================
// Description: INFO/FORMAT field definitions, scalar type lattice, cardinality
// Author: Matt Barham
// Created: 2026-09-03
// Modified: 2026-10-17
// Version: 0.3.0
// ==============================================================================
// Lattice:
//   Flag < Integer < Float < String
//   join(a, b) = max(a, b); String is top, every unparsable value lands there
//   Cardinality: Fixed(0) < everything; unequal non-flag counts join to Variable
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{RawValue, MISSING_VALUE};

/// Which part of the record a field lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldCategory {
    /// Per-variant annotation
    Info,
    /// Per-sample annotation
    Format,
}

impl fmt::Display for FieldCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldCategory::Info => write!(f, "INFO"),
            FieldCategory::Format => write!(f, "FORMAT"),
        }
    }
}

/// Scalar type of a field; declaration order is lattice order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Flag,
    Integer,
    Float,
    String,
}

impl FieldType {
    /// Least upper bound
    pub fn join(self, other: FieldType) -> FieldType {
        self.max(other)
    }

    /// Type of a single list item; `None` for the missing marker
    pub fn of_item(item: &str) -> Option<FieldType> {
        if item == MISSING_VALUE {
            None
        } else if item.parse::<i64>().is_ok() {
            Some(FieldType::Integer)
        } else if item.parse::<f64>().is_ok() {
            Some(FieldType::Float)
        } else {
            Some(FieldType::String)
        }
    }

    /// Type of a whole raw value; `None` when every item is missing
    pub fn of_raw(value: &RawValue) -> Option<FieldType> {
        match value {
            RawValue::Flag => Some(FieldType::Flag),
            RawValue::Values(items) => items
                .iter()
                .filter_map(|item| FieldType::of_item(item))
                .reduce(FieldType::join),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Flag => "Flag",
            FieldType::Integer => "Integer",
            FieldType::Float => "Float",
            FieldType::String => "String",
        };
        write!(f, "{}", name)
    }
}

/// How many values a field carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Cardinality {
    /// Exactly N values (0 for flags)
    Fixed(usize),
    /// Any number of values
    Variable,
    /// One value per alternate allele (Number=A)
    PerAlternate,
    /// One value per possible genotype (Number=G)
    PerGenotype,
}

impl Cardinality {
    /// Equal cardinalities stay; anything else widens to `Variable`
    ///
    /// `Fixed(0)` (a bare flag) is the identity: presence alone does not
    /// turn a scalar field into a list.
    pub fn join(self, other: Cardinality) -> Cardinality {
        match (self, other) {
            (a, b) if a == b => a,
            (Cardinality::Fixed(0), other) => other,
            (this, Cardinality::Fixed(0)) => this,
            _ => Cardinality::Variable,
        }
    }

    /// Cardinality observed from one raw value
    pub fn of_raw(value: &RawValue) -> Cardinality {
        match value {
            RawValue::Flag => Cardinality::Fixed(0),
            RawValue::Values(items) => Cardinality::Fixed(items.len()),
        }
    }

    /// Whether values are written as a list column
    pub fn is_repeated(&self) -> bool {
        !matches!(self, Cardinality::Fixed(0) | Cardinality::Fixed(1))
    }
}

/// Where a definition came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Declared by an input header
    Declared,
    /// Inferred by scanning values
    Inferred,
}

/// A field declaration read from an input header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredField {
    pub name: String,
    pub category: FieldCategory,
    pub field_type: FieldType,
    pub cardinality: Cardinality,
    pub description: Option<String>,
}

/// Frozen definition of one output field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub category: FieldCategory,
    pub field_type: FieldType,
    pub cardinality: Cardinality,
    pub provenance: Provenance,
    pub description: Option<String>,
}

impl FieldDefinition {
    /// Column name for this field in the output store
    pub fn column_name(&self) -> String {
        column_name(&self.name)
    }
}

/// Sanitize a field name into a column name
///
/// Characters outside `[A-Za-z0-9_]` become `_`; a leading digit gets a
/// `field_` prefix.
pub fn column_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    match sanitized.chars().next() {
        Some(c) if c.is_ascii_digit() => format!("field_{}", sanitized),
        None => "field_".to_string(),
        _ => sanitized,
    }
}

/// The frozen schema: the output of the inference barrier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: BTreeMap<(FieldCategory, String), FieldDefinition>,
}

impl Schema {
    pub(crate) fn from_definitions(definitions: Vec<FieldDefinition>) -> Self {
        let fields = definitions
            .into_iter()
            .map(|d| ((d.category, d.name.clone()), d))
            .collect();
        Self { fields }
    }

    pub fn get(&self, category: FieldCategory, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(&(category, name.to_string()))
    }

    /// INFO definitions ordered by name
    pub fn info_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields
            .values()
            .filter(|d| d.category == FieldCategory::Info)
    }

    /// FORMAT definitions ordered by name
    pub fn format_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields
            .values()
            .filter(|d| d.category == FieldCategory::Format)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_typing() {
        assert_eq!(FieldType::of_item("14"), Some(FieldType::Integer));
        assert_eq!(FieldType::of_item("-3"), Some(FieldType::Integer));
        assert_eq!(FieldType::of_item("0.017"), Some(FieldType::Float));
        assert_eq!(FieldType::of_item("1e-5"), Some(FieldType::Float));
        assert_eq!(FieldType::of_item("G"), Some(FieldType::String));
        assert_eq!(FieldType::of_item("."), None);
    }

    #[test]
    fn test_raw_value_typing_takes_lub() {
        assert_eq!(FieldType::of_raw(&RawValue::parse("1,2.5")), Some(FieldType::Float));
        assert_eq!(FieldType::of_raw(&RawValue::parse("1,.,x")), Some(FieldType::String));
        assert_eq!(FieldType::of_raw(&RawValue::parse(".,.")), None);
        assert_eq!(FieldType::of_raw(&RawValue::Flag), Some(FieldType::Flag));
    }

    #[test]
    fn test_type_join_is_max() {
        assert_eq!(FieldType::Flag.join(FieldType::Integer), FieldType::Integer);
        assert_eq!(FieldType::Float.join(FieldType::Integer), FieldType::Float);
        assert_eq!(FieldType::String.join(FieldType::Flag), FieldType::String);
    }

    #[test]
    fn test_cardinality_join() {
        assert_eq!(Cardinality::Fixed(1).join(Cardinality::Fixed(1)), Cardinality::Fixed(1));
        assert_eq!(Cardinality::Fixed(1).join(Cardinality::Fixed(2)), Cardinality::Variable);
        assert_eq!(Cardinality::Variable.join(Cardinality::Fixed(0)), Cardinality::Variable);
        assert_eq!(Cardinality::Fixed(0).join(Cardinality::Fixed(1)), Cardinality::Fixed(1));
        assert_eq!(Cardinality::Fixed(2).join(Cardinality::Fixed(0)), Cardinality::Fixed(2));
        assert_eq!(
            Cardinality::PerAlternate.join(Cardinality::PerAlternate),
            Cardinality::PerAlternate
        );
    }

    #[test]
    fn test_column_name_sanitization() {
        assert_eq!(column_name("AF"), "AF");
        assert_eq!(column_name("CSQ.Allele"), "CSQ_Allele");
        assert_eq!(column_name("1000G"), "field_1000G");
    }
}
