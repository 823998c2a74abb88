// ==============================================================================
// models.rs - Variant Data Models
// ==============================================================================
// Description: Raw and merged variant records flowing through the pipeline
// Author: Matt Barham
// Created: 2026-09-02
// Modified: 2026-10-09
// Version: 0.3.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Missing-value marker used by VCF for absent values and list items
pub const MISSING_VALUE: &str = ".";

/// Raw (untyped) value of an INFO or FORMAT field
///
/// Values arrive as text exactly as the tokenizer split them; typing happens
/// only after the schema is frozen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawValue {
    /// Key present without `=value` (INFO flags)
    Flag,
    /// Comma-separated items, `.` for missing items
    Values(Vec<String>),
}

impl RawValue {
    /// Split a raw `a,b,c` string into items
    pub fn parse(raw: &str) -> Self {
        RawValue::Values(raw.split(',').map(str::to_string).collect())
    }

    pub fn single(value: impl Into<String>) -> Self {
        RawValue::Values(vec![value.into()])
    }

    /// True when every item is the missing marker
    pub fn is_missing(&self) -> bool {
        match self {
            RawValue::Flag => false,
            RawValue::Values(items) => items.iter().all(|item| item == MISSING_VALUE),
        }
    }
}

/// Stable identity of a record: which source it came from and where
///
/// Ordering is input enumeration order (source first, then position within
/// the source). The merger uses it both to order group members and to drop
/// replayed duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordOrigin {
    pub source_index: usize,
    pub record_index: u64,
}

impl RecordOrigin {
    pub fn new(source_index: usize, record_index: u64) -> Self {
        Self {
            source_index,
            record_index,
        }
    }
}

/// Per-sample data attached to a raw variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Sample name as it appears in the source header
    pub sample_name: String,

    /// Stable sample id (see `sample_info::sample_id`)
    pub sample_id: i64,

    /// FORMAT key -> raw value, in FORMAT column order
    pub fields: BTreeMap<String, RawValue>,
}

impl CallRecord {
    pub fn new(sample_name: impl Into<String>, sample_id: i64) -> Self {
        Self {
            sample_name: sample_name.into(),
            sample_id,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: RawValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// One tokenized variant line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawVariantRecord {
    /// Reference sequence name (e.g., "chr20")
    pub contig: String,

    /// 0-based start position
    pub start: u64,

    /// 0-based exclusive end, when the source supplied one (INFO END)
    pub end: Option<u64>,

    /// Reference allele(s)
    pub reference_bases: String,

    /// Alternate alleles in source order
    pub alternate_bases: Vec<String>,

    /// Variant identifiers (ID column)
    pub names: Vec<String>,

    /// INFO key -> raw value
    pub info: BTreeMap<String, RawValue>,

    /// Calls in sample column order
    pub calls: Vec<CallRecord>,

    /// Where this record was read from
    pub origin: RecordOrigin,
}

impl RawVariantRecord {
    pub fn new(
        contig: impl Into<String>,
        start: u64,
        reference_bases: impl Into<String>,
        origin: RecordOrigin,
    ) -> Self {
        Self {
            contig: contig.into(),
            start,
            end: None,
            reference_bases: reference_bases.into(),
            alternate_bases: Vec::new(),
            names: Vec::new(),
            info: BTreeMap::new(),
            calls: Vec::new(),
            origin,
        }
    }

    pub fn with_alternates<I, S>(mut self, alternates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternate_bases = alternates.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_info(mut self, key: impl Into<String>, value: RawValue) -> Self {
        self.info.insert(key.into(), value);
        self
    }

    pub fn with_call(mut self, call: CallRecord) -> Self {
        self.calls.push(call);
        self
    }

    /// End position: explicit END, else start + reference length
    pub fn resolved_end(&self) -> u64 {
        self.end
            .unwrap_or(self.start + self.reference_bases.len() as u64)
    }
}

/// The unified row produced by the merger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedVariant {
    pub contig: String,
    pub start: u64,
    pub end: u64,
    pub reference_bases: String,

    /// Union of alternates, first-seen order, no duplicates
    pub alternate_bases: Vec<String>,

    /// Union of identifiers, first-seen order, no duplicates
    pub names: Vec<String>,

    /// Reconciled INFO values
    pub info: BTreeMap<String, RawValue>,

    /// One call per sample identity
    pub calls: Vec<CallRecord>,

    /// Number of tolerated incompatibilities folded into this row
    pub merge_conflicts: u32,
}

impl MergedVariant {
    /// Passthrough of a single raw record
    pub fn from_record(record: RawVariantRecord) -> Self {
        let end = record.resolved_end();
        Self {
            contig: record.contig,
            start: record.start,
            end,
            reference_bases: record.reference_bases,
            alternate_bases: record.alternate_bases,
            names: record.names,
            info: record.info,
            calls: record.calls,
            merge_conflicts: 0,
        }
    }
}
