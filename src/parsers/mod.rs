// ==============================================================================
// parsers/mod.rs - Variant sources
// ==============================================================================
// Description: The source seam of the pipeline plus its VCF and in-memory
//              implementations
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2026-10-06
// Version: 0.3.0
// ==============================================================================

pub mod header;
pub mod vcf;

pub use header::HeaderSummary;
pub use vcf::{parse_info_column, parse_sample_columns, VcfParseError, VcfSource};

use crate::models::{RawVariantRecord, RecordOrigin};
use crate::region::RegionFilter;
use crate::sample_info::{sample_id, SampleNameEncoding};
use crate::schema::DeclaredField;

/// Default ceiling on malformed records per source
pub const DEFAULT_MAX_RECORD_ERRORS: u64 = 1000;

/// Per-run reading options shared by every source
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub regions: RegionFilter,
    pub sample_name_encoding: SampleNameEncoding,
    /// Malformed records tolerated per source before the read fails
    pub max_record_errors: u64,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            regions: RegionFilter::default(),
            sample_name_encoding: SampleNameEncoding::default(),
            max_record_errors: DEFAULT_MAX_RECORD_ERRORS,
        }
    }
}

/// Everything one source produced in a single read
#[derive(Debug, Clone, Default)]
pub struct SourceRead {
    pub records: Vec<RawVariantRecord>,
    /// Records outside the region filter
    pub filtered_records: u64,
    /// Records dropped as malformed
    pub malformed_records: u64,
}

/// A provider of raw variant records
///
/// Record origins must be assigned as `(source_index, position in source)`
/// so that re-reading a source yields the same origins.
pub trait VariantSource: Send + Sync {
    /// Human-readable identity, also used as the sample info `file_path`
    fn label(&self) -> &str;

    /// Field definitions declared by the source header
    fn declared_fields(&self) -> &[DeclaredField];

    /// Sample names in column order
    fn sample_names(&self) -> &[String];

    fn read_records(
        &self,
        source_index: usize,
        options: &ReadOptions,
    ) -> Result<SourceRead, VcfParseError>;
}

/// A source backed by records held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    label: String,
    declared_fields: Vec<DeclaredField>,
    sample_names: Vec<String>,
    records: Vec<RawVariantRecord>,
}

impl InMemorySource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_declared_field(mut self, field: DeclaredField) -> Self {
        self.declared_fields.push(field);
        self
    }

    pub fn with_samples<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sample_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Add a record; its origin and sample ids are assigned when read
    pub fn with_record(mut self, record: RawVariantRecord) -> Self {
        self.records.push(record);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl VariantSource for InMemorySource {
    fn label(&self) -> &str {
        &self.label
    }

    fn declared_fields(&self) -> &[DeclaredField] {
        &self.declared_fields
    }

    fn sample_names(&self) -> &[String] {
        &self.sample_names
    }

    fn read_records(
        &self,
        source_index: usize,
        options: &ReadOptions,
    ) -> Result<SourceRead, VcfParseError> {
        let mut read = SourceRead::default();

        for (record_index, record) in self.records.iter().enumerate() {
            let mut record = record.clone();
            record.origin = RecordOrigin::new(source_index, record_index as u64);
            for call in &mut record.calls {
                call.sample_id =
                    sample_id(&call.sample_name, &self.label, options.sample_name_encoding);
            }

            if options.regions.accepts(&record) {
                read.records.push(record);
            } else {
                read.filtered_records += 1;
            }
        }

        Ok(read)
    }
}
