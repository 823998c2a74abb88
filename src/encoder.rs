// ==============================================================================
// encoder.rs - Typed Row Encoding
// ==============================================================================
// Description: Turns merged variants into typed output rows using the frozen
//              schema; values that do not fit their type widen to strings
// Author: Matt Barham
// Created: 2026-09-10
// Modified: 2026-10-17
// Version: 0.3.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::models::{CallRecord, MergedVariant, RawValue, MISSING_VALUE};
use crate::schema::{FieldDefinition, FieldType, Schema, GENOTYPE_KEY};

/// Missing allele in an encoded genotype
pub const MISSING_GENOTYPE: i64 = -1;

/// A raw value that does not fit its field's frozen type
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Value '{value}' of field '{field}' is not a valid {expected}")]
pub struct UnparsableFieldValueError {
    pub field: String,
    pub value: String,
    pub expected: FieldType,
}

/// A position too large for the signed 64-bit position columns
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Position {position} of variant on {contig} does not fit a 64-bit signed column")]
pub struct PositionOutOfRangeError {
    pub contig: String,
    pub position: u64,
}

/// Text written for a bare flag in a field typed as a value
pub const WIDENED_FLAG: &str = "true";

/// One typed output cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<CellValue>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Numeric sum of the cell (lists summed element-wise, nulls skipped)
    pub fn numeric_sum(&self) -> f64 {
        match self {
            CellValue::Integer(v) => *v as f64,
            CellValue::Float(v) => *v,
            CellValue::List(items) => items.iter().map(CellValue::numeric_sum).sum(),
            _ => 0.0,
        }
    }
}

/// One entry of the repeated `call` column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRow {
    pub sample_id: i64,
    pub name: String,
    pub genotype: Vec<i64>,
    pub phased: bool,
    #[serde(flatten)]
    pub fields: BTreeMap<String, CellValue>,
}

/// One typed output row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRow {
    pub reference_name: String,
    pub start_position: i64,
    pub end_position: i64,
    pub reference_bases: String,
    pub alternate_bases: Vec<String>,
    pub names: Vec<String>,
    /// INFO column -> value, one entry per schema INFO field
    pub info: BTreeMap<String, CellValue>,
    pub calls: Vec<CallRow>,
    /// Present only when conflict annotation is enabled
    pub merge_conflicts: Option<u32>,
}

/// Encodes merged variants against a frozen schema
#[derive(Debug, Clone)]
pub struct RowEncoder {
    schema: Arc<Schema>,
    annotate_merge_conflicts: bool,
}

impl RowEncoder {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            annotate_merge_conflicts: false,
        }
    }

    pub fn with_merge_conflict_annotation(mut self, annotate: bool) -> Self {
        self.annotate_merge_conflicts = annotate;
        self
    }

    /// Encode one merged variant; returns the row and the number of values
    /// that had to be widened to string
    pub fn encode(
        &self,
        variant: &MergedVariant,
    ) -> Result<(VariantRow, u64), PositionOutOfRangeError> {
        let start_position = signed_position(&variant.contig, variant.start)?;
        let end_position = signed_position(&variant.contig, variant.end)?;
        let mut widened = 0u64;

        let mut info = BTreeMap::new();
        for definition in self.schema.info_fields() {
            let value = encode_field(definition, variant.info.get(&definition.name), &mut widened);
            info.insert(definition.column_name(), value);
        }

        let calls = variant
            .calls
            .iter()
            .map(|call| self.encode_call(call, &mut widened))
            .collect();

        let row = VariantRow {
            reference_name: variant.contig.clone(),
            start_position,
            end_position,
            reference_bases: variant.reference_bases.clone(),
            alternate_bases: variant.alternate_bases.clone(),
            names: variant.names.clone(),
            info,
            calls,
            merge_conflicts: self
                .annotate_merge_conflicts
                .then_some(variant.merge_conflicts),
        };
        Ok((row, widened))
    }

    fn encode_call(&self, call: &CallRecord, widened: &mut u64) -> CallRow {
        let (genotype, phased) = call
            .fields
            .get(GENOTYPE_KEY)
            .map(parse_genotype)
            .unwrap_or_default();

        let fields = self
            .schema
            .format_fields()
            .map(|definition| {
                let value = encode_field(definition, call.fields.get(&definition.name), widened);
                (definition.column_name(), value)
            })
            .collect();

        CallRow {
            sample_id: call.sample_id,
            name: call.sample_name.clone(),
            genotype,
            phased,
            fields,
        }
    }
}

fn signed_position(contig: &str, position: u64) -> Result<i64, PositionOutOfRangeError> {
    i64::try_from(position).map_err(|_| PositionOutOfRangeError {
        contig: contig.to_string(),
        position,
    })
}

fn encode_field(
    definition: &FieldDefinition,
    raw: Option<&RawValue>,
    widened: &mut u64,
) -> CellValue {
    let Some(raw) = raw else {
        return CellValue::Null;
    };

    let items = match raw {
        RawValue::Flag if definition.field_type == FieldType::Flag => {
            return CellValue::Bool(true)
        }
        RawValue::Flag => {
            *widened += 1;
            debug!(
                "Field '{}' is a bare flag but typed {}; widening to string",
                definition.name, definition.field_type
            );
            return CellValue::String(WIDENED_FLAG.to_string());
        }
        RawValue::Values(items) => items,
    };

    if definition.field_type == FieldType::Flag || (!definition.cardinality.is_repeated() && items.len() > 1) {
        // flag with a value, or several values for a scalar field
        *widened += 1;
        debug!(
            "Field '{}' has shape mismatch for value '{}'; widening to string",
            definition.name,
            items.join(",")
        );
        return CellValue::String(items.join(","));
    }

    if definition.cardinality.is_repeated() {
        CellValue::List(
            items
                .iter()
                .map(|item| coerce_or_widen(definition, item, widened))
                .collect(),
        )
    } else {
        match items.first() {
            Some(item) => coerce_or_widen(definition, item, widened),
            None => CellValue::Null,
        }
    }
}

fn coerce_or_widen(definition: &FieldDefinition, item: &str, widened: &mut u64) -> CellValue {
    match coerce(definition, item) {
        Ok(value) => value,
        Err(e) => {
            debug!("{}; widening to string", e);
            *widened += 1;
            CellValue::String(item.to_string())
        }
    }
}

/// Coerce one item to the field's frozen type
pub fn coerce(
    definition: &FieldDefinition,
    item: &str,
) -> Result<CellValue, UnparsableFieldValueError> {
    if item == MISSING_VALUE {
        return Ok(CellValue::Null);
    }
    let unparsable = || UnparsableFieldValueError {
        field: definition.name.clone(),
        value: item.to_string(),
        expected: definition.field_type,
    };

    match definition.field_type {
        FieldType::Integer => item
            .parse::<i64>()
            .map(CellValue::Integer)
            .map_err(|_| unparsable()),
        FieldType::Float => item
            .parse::<f64>()
            .map(CellValue::Float)
            .map_err(|_| unparsable()),
        FieldType::String => Ok(CellValue::String(item.to_string())),
        FieldType::Flag => Err(unparsable()),
    }
}

/// Split a GT value into allele indices and phasing
pub fn parse_genotype(raw: &RawValue) -> (Vec<i64>, bool) {
    let text = match raw {
        RawValue::Values(items) if !items.is_empty() => items.join(","),
        _ => return (Vec::new(), false),
    };

    let phased = text.contains('|');
    let alleles = text
        .split(['|', '/'])
        .map(|allele| allele.parse::<i64>().unwrap_or(MISSING_GENOTYPE))
        .collect();
    (alleles, phased)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawVariantRecord, RecordOrigin};
    use crate::schema::{Cardinality, FieldCategory, SchemaAccumulator};

    fn schema() -> Arc<Schema> {
        let mut acc = SchemaAccumulator::new();
        acc.observe("DP", FieldCategory::Info, &RawValue::parse("14"));
        acc.observe("AF", FieldCategory::Info, &RawValue::parse("0.5,0.5"));
        acc.observe("AF", FieldCategory::Info, &RawValue::parse("0.1"));
        acc.observe("DB", FieldCategory::Info, &RawValue::Flag);
        acc.observe("H2", FieldCategory::Info, &RawValue::Flag);
        acc.observe("HQ", FieldCategory::Format, &RawValue::parse("51,51"));
        acc.observe("DP", FieldCategory::Format, &RawValue::parse("3.2"));
        Arc::new(acc.finalize().unwrap())
    }

    fn variant() -> MergedVariant {
        let record = RawVariantRecord::new("chr20", 14_369, "G", RecordOrigin::new(0, 0))
            .with_alternates(["A"])
            .with_info("DP", RawValue::parse("14"))
            .with_info("AF", RawValue::parse("0.5"))
            .with_info("DB", RawValue::Flag)
            .with_call(
                CallRecord::new("NA00001", 7)
                    .with_field("GT", RawValue::parse("1|0"))
                    .with_field("HQ", RawValue::parse("51,."))
                    .with_field("DP", RawValue::parse("8")),
            )
            .with_call(CallRecord::new("NA00002", 8).with_field("GT", RawValue::parse("./1")));
        MergedVariant::from_record(record)
    }

    #[test]
    fn test_encode_row() {
        let encoder = RowEncoder::new(schema());
        let (row, widened) = encoder.encode(&variant()).unwrap();
        assert_eq!(widened, 0);

        assert_eq!(row.start_position, 14_369);
        assert_eq!(row.end_position, 14_370);
        assert_eq!(row.info["DP"], CellValue::Integer(14));
        assert_eq!(row.info["AF"], CellValue::List(vec![CellValue::Float(0.5)]));
        assert_eq!(row.info["DB"], CellValue::Bool(true));
        assert_eq!(row.info["H2"], CellValue::Null);
        assert_eq!(row.merge_conflicts, None);

        let first = &row.calls[0];
        assert_eq!(first.genotype, vec![1, 0]);
        assert!(first.phased);
        assert_eq!(
            first.fields["HQ"],
            CellValue::List(vec![CellValue::Integer(51), CellValue::Null])
        );
        assert_eq!(first.fields["DP"], CellValue::Float(8.0));

        let second = &row.calls[1];
        assert_eq!(second.genotype, vec![MISSING_GENOTYPE, 1]);
        assert!(!second.phased);
        assert_eq!(second.fields["HQ"], CellValue::Null);
    }

    #[test]
    fn test_unfit_values_widen_to_string() {
        let encoder = RowEncoder::new(schema());
        let mut variant = variant();
        variant.info.insert("DP".to_string(), RawValue::parse("deep"));
        variant.info.insert("AF".to_string(), RawValue::parse("0.5,x"));

        let (row, widened) = encoder.encode(&variant).unwrap();
        assert_eq!(widened, 2);
        assert_eq!(row.info["DP"], CellValue::String("deep".to_string()));
        assert_eq!(
            row.info["AF"],
            CellValue::List(vec![CellValue::Float(0.5), CellValue::String("x".to_string())])
        );
    }

    #[test]
    fn test_flag_in_valued_field_is_widened() {
        let mut acc = SchemaAccumulator::new();
        acc.observe("XF", FieldCategory::Info, &RawValue::Flag);
        acc.observe("XF", FieldCategory::Info, &RawValue::parse("3"));
        let schema = Arc::new(acc.finalize().unwrap());
        let xf = schema.get(FieldCategory::Info, "XF").unwrap();
        assert_eq!(xf.field_type, FieldType::Integer);
        assert!(!xf.cardinality.is_repeated());

        let encoder = RowEncoder::new(schema);
        let record = RawVariantRecord::new("chr1", 10, "A", RecordOrigin::new(0, 0))
            .with_info("XF", RawValue::Flag);
        let (row, widened) = encoder.encode(&MergedVariant::from_record(record)).unwrap();
        assert_eq!(widened, 1);
        assert_eq!(row.info["XF"], CellValue::String(WIDENED_FLAG.to_string()));

        let record = RawVariantRecord::new("chr1", 11, "A", RecordOrigin::new(0, 1))
            .with_info("XF", RawValue::parse("3"));
        let (row, widened) = encoder.encode(&MergedVariant::from_record(record)).unwrap();
        assert_eq!(widened, 0);
        assert_eq!(row.info["XF"], CellValue::Integer(3));
    }

    #[test]
    fn test_position_out_of_range() {
        let encoder = RowEncoder::new(schema());
        let mut variant = variant();
        variant.end = u64::MAX;
        let err = encoder.encode(&variant).unwrap_err();
        assert_eq!(err.position, u64::MAX);
        assert_eq!(err.contig, "chr20");
    }

    #[test]
    fn test_coerce_reports_unparsable() {
        let definition = FieldDefinition {
            name: "GQ".to_string(),
            category: FieldCategory::Format,
            field_type: FieldType::Integer,
            cardinality: Cardinality::Fixed(1),
            provenance: crate::schema::Provenance::Declared,
            description: None,
        };
        assert_eq!(coerce(&definition, "48").unwrap(), CellValue::Integer(48));
        assert_eq!(coerce(&definition, ".").unwrap(), CellValue::Null);
        let err = coerce(&definition, "4.5").unwrap_err();
        assert_eq!(err.expected, FieldType::Integer);
    }

    #[test]
    fn test_call_row_serializes_flat() {
        let encoder = RowEncoder::new(schema()).with_merge_conflict_annotation(true);
        let (row, _) = encoder.encode(&variant()).unwrap();
        assert_eq!(row.merge_conflicts, Some(0));

        let json = serde_json::to_value(&row.calls[0]).unwrap();
        assert_eq!(json["name"], "NA00001");
        assert_eq!(json["HQ"][0], 51);
        assert!(json["HQ"][1].is_null());
        assert_eq!(json["genotype"][0], 1);
    }

    #[test]
    fn test_numeric_sum() {
        let cell = CellValue::List(vec![CellValue::Integer(51), CellValue::Null, CellValue::Float(0.5)]);
        assert_eq!(cell.numeric_sum(), 51.5);
    }
}
