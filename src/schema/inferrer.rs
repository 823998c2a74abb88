// ==============================================================================
// schema/inferrer.rs - Distributed Field Type Inference
// ==============================================================================
// Description: Associative/commutative accumulator that infers INFO and FORMAT
//              field definitions from raw values and header declarations
// Author: Matt Barham
// Created: 2026-09-03
// Modified: 2026-10-17
// Version: 0.3.0
// ==============================================================================
// Algorithm:
//   observe  - fold one raw value into the per-field running state
//   declare  - fold one header declaration into the per-field running state
//   combine  - join two partial accumulators field by field
//   finalize - freeze into a Schema; fails on conflicting declared types
//
//   Every per-field operation is a lattice join (max for types, equal-or-
//   Variable for cardinality with flags as identity, set union for
//   declarations), so the result does not depend on how input was
//   partitioned or in which order partials meet.
// ==============================================================================

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::field::{
    Cardinality, DeclaredField, FieldCategory, FieldDefinition, FieldType, Provenance, Schema,
};
use crate::models::{RawValue, RawVariantRecord};

/// FORMAT key carrying the genotype; written as dedicated call columns
pub const GENOTYPE_KEY: &str = "GT";

/// Columns every variant row carries regardless of schema
pub const FIXED_VARIANT_COLUMNS: &[&str] = &[
    "reference_name",
    "start_position",
    "end_position",
    "reference_bases",
    "alternate_bases",
    "names",
    "call",
    "merge_conflicts",
];

/// Columns every call entry carries regardless of schema
pub const FIXED_CALL_COLUMNS: &[&str] = &["sample_id", "name", "genotype", "phased"];

/// Schema finalization errors (always fatal)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Conflicting declared types for {category} field '{name}': {types:?}")]
    ConflictingDeclarations {
        category: FieldCategory,
        name: String,
        types: Vec<FieldType>,
    },

    #[error("{category} field '{name}' maps to reserved column '{column}'")]
    ColumnCollision {
        category: FieldCategory,
        name: String,
        column: String,
    },

    #[error("{category} fields '{first}' and '{second}' both map to column '{column}'")]
    DuplicateColumn {
        category: FieldCategory,
        first: String,
        second: String,
        column: String,
    },
}

/// Running state for one field
#[derive(Debug, Clone, Default, PartialEq)]
struct FieldState {
    observed_type: Option<FieldType>,
    observed_cardinality: Option<Cardinality>,
    declared_types: BTreeSet<FieldType>,
    declared_cardinality: Option<Cardinality>,
    description: Option<String>,
}

impl FieldState {
    fn observe(&mut self, value: &RawValue) {
        if let Some(ty) = FieldType::of_raw(value) {
            self.observed_type = Some(join_option(self.observed_type, ty, FieldType::join));
        }
        if value.is_missing() {
            return;
        }
        let cardinality = Cardinality::of_raw(value);
        self.observed_cardinality = Some(join_option(
            self.observed_cardinality,
            cardinality,
            Cardinality::join,
        ));
    }

    fn declare(&mut self, declared: &DeclaredField) {
        self.declared_types.insert(declared.field_type);
        self.declared_cardinality = Some(join_option(
            self.declared_cardinality,
            declared.cardinality,
            Cardinality::join,
        ));
        self.description = min_description(self.description.take(), declared.description.clone());
    }

    fn combine(mut self, other: FieldState) -> FieldState {
        if let Some(ty) = other.observed_type {
            self.observed_type = Some(join_option(self.observed_type, ty, FieldType::join));
        }
        if let Some(c) = other.observed_cardinality {
            self.observed_cardinality =
                Some(join_option(self.observed_cardinality, c, Cardinality::join));
        }
        if let Some(c) = other.declared_cardinality {
            self.declared_cardinality =
                Some(join_option(self.declared_cardinality, c, Cardinality::join));
        }
        self.declared_types.extend(other.declared_types);
        self.description = min_description(self.description, other.description);
        self
    }

    fn finalize(
        self,
        category: FieldCategory,
        name: String,
    ) -> Result<FieldDefinition, SchemaError> {
        if self.declared_types.len() > 1 {
            return Err(SchemaError::ConflictingDeclarations {
                category,
                name,
                types: self.declared_types.into_iter().collect(),
            });
        }

        let definition = match self.declared_types.into_iter().next() {
            Some(field_type) => FieldDefinition {
                name,
                category,
                field_type,
                cardinality: self.declared_cardinality.unwrap_or(Cardinality::Variable),
                provenance: Provenance::Declared,
                description: self.description,
            },
            None => FieldDefinition {
                name,
                category,
                field_type: self.observed_type.unwrap_or(FieldType::String),
                cardinality: self.observed_cardinality.unwrap_or(Cardinality::Fixed(1)),
                provenance: Provenance::Inferred,
                description: None,
            },
        };
        Ok(definition)
    }
}

fn join_option<T: Copy>(current: Option<T>, next: T, join: fn(T, T) -> T) -> T {
    match current {
        Some(current) => join(current, next),
        None => next,
    }
}

fn min_description(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Partial schema built by one worker; combine partials, then finalize once
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaAccumulator {
    fields: BTreeMap<(FieldCategory, String), FieldState>,
}

impl SchemaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one raw value into the field's running definition
    pub fn observe(&mut self, name: &str, category: FieldCategory, value: &RawValue) {
        if is_reserved(name, category) {
            return;
        }
        self.fields
            .entry((category, name.to_string()))
            .or_default()
            .observe(value);
    }

    /// Fold one header declaration into the field's running definition
    pub fn declare(&mut self, declared: &DeclaredField) {
        if is_reserved(&declared.name, declared.category) {
            return;
        }
        self.fields
            .entry((declared.category, declared.name.clone()))
            .or_default()
            .declare(declared);
    }

    /// Observe every INFO and FORMAT value of a record
    ///
    /// `info_category` decides which category an INFO key is typed under; keys
    /// the merge strategy moves into calls are typed as FORMAT fields.
    pub fn observe_record<F>(&mut self, record: &RawVariantRecord, info_category: F)
    where
        F: Fn(&str) -> FieldCategory,
    {
        for (key, value) in &record.info {
            self.observe(key, info_category(key), value);
        }
        for call in &record.calls {
            for (key, value) in &call.fields {
                self.observe(key, FieldCategory::Format, value);
            }
        }
    }

    /// Join two partial accumulators
    pub fn combine(mut self, other: SchemaAccumulator) -> SchemaAccumulator {
        for (key, state) in other.fields {
            let merged = match self.fields.remove(&key) {
                Some(existing) => existing.combine(state),
                None => state,
            };
            self.fields.insert(key, merged);
        }
        self
    }

    /// Number of distinct fields seen so far
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Freeze into a schema
    pub fn finalize(self) -> Result<Schema, SchemaError> {
        let mut definitions = Vec::with_capacity(self.fields.len());
        for ((category, name), state) in self.fields {
            definitions.push(state.finalize(category, name)?);
        }
        check_columns(&definitions)?;
        Ok(Schema::from_definitions(definitions))
    }
}

fn is_reserved(name: &str, category: FieldCategory) -> bool {
    category == FieldCategory::Format && name == GENOTYPE_KEY
}

/// Column names must be unique per category and avoid the fixed columns
fn check_columns(definitions: &[FieldDefinition]) -> Result<(), SchemaError> {
    let mut seen: BTreeMap<(FieldCategory, String), &str> = BTreeMap::new();

    for definition in definitions {
        let column = definition.column_name();
        let reserved = match definition.category {
            FieldCategory::Info => FIXED_VARIANT_COLUMNS,
            FieldCategory::Format => FIXED_CALL_COLUMNS,
        };
        if reserved.iter().any(|r| r.eq_ignore_ascii_case(&column)) {
            return Err(SchemaError::ColumnCollision {
                category: definition.category,
                name: definition.name.clone(),
                column,
            });
        }

        let key = (definition.category, column.to_ascii_lowercase());
        if let Some(first) = seen.insert(key, &definition.name) {
            return Err(SchemaError::DuplicateColumn {
                category: definition.category,
                first: first.to_string(),
                second: definition.name.clone(),
                column,
            });
        }
    }
    Ok(())
}
