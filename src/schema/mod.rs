// ==============================================================================
// schema/mod.rs - Output Schema Inference
// ==============================================================================
// Description: Field definitions and the distributed type inferrer
// Author: Matt Barham
// Created: 2026-09-03
// Modified: 2026-10-09
// Version: 0.3.0
// ==============================================================================

pub mod field;
pub mod inferrer;

pub use field::{
    column_name, Cardinality, DeclaredField, FieldCategory, FieldDefinition, FieldType,
    Provenance, Schema,
};
pub use inferrer::{SchemaAccumulator, SchemaError, GENOTYPE_KEY};
