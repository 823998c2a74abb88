// ==============================================================================
// parsers/vcf.rs - VCF variant source
// ==============================================================================
// Description: Reads VCF records with noodles-vcf and tokenizes them into raw
//              (untyped) variant records
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2026-10-17
// Version: 0.3.0
// ==============================================================================
// References:
// - VCF 4.2 Spec: https://samtools.github.io/hts-specs/VCFv4.2.pdf
// - noodles-vcf: https://docs.rs/noodles-vcf/0.81.0/noodles_vcf/
// ==============================================================================

use noodles_vcf as vcf;
use noodles_vcf::variant::record::{AlternateBases, Ids};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use super::header::HeaderSummary;
use super::{ReadOptions, SourceRead, VariantSource};
use crate::models::{CallRecord, RawValue, RawVariantRecord, RecordOrigin, MISSING_VALUE};
use crate::sample_info::sample_id;
use crate::schema::DeclaredField;

/// INFO key carrying an explicit end position
pub const END_KEY: &str = "END";

/// VCF parsing errors
#[derive(Error, Debug)]
pub enum VcfParseError {
    #[error("Failed to open VCF file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read VCF header: {reason}")]
    Header { reason: String },

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Too many malformed records in {path} ({count} > {max})")]
    TooManyErrors {
        path: String,
        count: u64,
        max: u64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A VCF file on disk (`.vcf`, `.vcf.gz` or `.vcf.bgz`)
#[derive(Debug, Clone)]
pub struct VcfSource {
    path: PathBuf,
    label: String,
    header: HeaderSummary,
}

impl VcfSource {
    /// Open a VCF file and summarize its header
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VcfParseError> {
        let path = path.as_ref().to_path_buf();
        let label = path.display().to_string();
        let (_, header) = open_reader(&path, &label)?;
        let header = HeaderSummary::from_header(&header);
        debug!(
            "Opened {} ({} declared fields, {} samples)",
            label,
            header.declared_fields.len(),
            header.sample_names.len()
        );

        Ok(Self {
            label,
            path,
            header,
        })
    }

    fn convert_record(
        &self,
        record: &vcf::Record,
        sample_ids: &[i64],
        origin: RecordOrigin,
    ) -> Result<RawVariantRecord, VcfParseError> {
        let contig = record.reference_sequence_name().to_string();

        // noodles positions are 1-based
        let start = match record.variant_start() {
            Some(Ok(position)) => usize::from(position) as u64 - 1,
            Some(Err(e)) => {
                return Err(VcfParseError::MalformedRecord(format!(
                    "invalid position: {}",
                    e
                )))
            }
            None => return Err(VcfParseError::MalformedRecord("missing position".to_string())),
        };

        let names: Vec<String> = record
            .ids()
            .iter()
            .filter(|id| *id != MISSING_VALUE)
            .map(str::to_string)
            .collect();

        let alternate_bases: Vec<String> = record
            .alternate_bases()
            .iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VcfParseError::MalformedRecord(format!("invalid ALT: {}", e)))?
            .into_iter()
            .filter(|alt| *alt != MISSING_VALUE)
            .map(str::to_string)
            .collect();

        let mut raw = RawVariantRecord::new(contig, start, record.reference_bases(), origin)
            .with_names(names)
            .with_alternates(alternate_bases);

        let (info, end) = parse_info_column(record.info().as_ref())?;
        raw.info = info;
        raw.end = end;
        raw.calls = parse_sample_columns(
            record.samples().as_ref(),
            &self.header.sample_names,
            sample_ids,
        )?;

        Ok(raw)
    }
}

impl VariantSource for VcfSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn declared_fields(&self) -> &[DeclaredField] {
        &self.header.declared_fields
    }

    fn sample_names(&self) -> &[String] {
        &self.header.sample_names
    }

    fn read_records(
        &self,
        source_index: usize,
        options: &ReadOptions,
    ) -> Result<SourceRead, VcfParseError> {
        let (mut reader, header) = open_reader(&self.path, &self.label)?;
        if HeaderSummary::from_header(&header) != self.header {
            return Err(VcfParseError::Header {
                reason: format!("{}: header changed since the source was opened", self.label),
            });
        }

        let sample_ids: Vec<i64> = self
            .header
            .sample_names
            .iter()
            .map(|name| sample_id(name, &self.label, options.sample_name_encoding))
            .collect();

        let mut read = SourceRead::default();

        for (record_index, result) in reader.records().enumerate() {
            let origin = RecordOrigin::new(source_index, record_index as u64);
            let converted = result
                .map_err(VcfParseError::from)
                .and_then(|record| self.convert_record(&record, &sample_ids, origin));

            match converted {
                Ok(record) if options.regions.accepts(&record) => read.records.push(record),
                Ok(_) => read.filtered_records += 1,
                Err(e) => {
                    warn!("{}: record {}: {}", self.label, record_index + 1, e);
                    read.malformed_records += 1;

                    if read.malformed_records > options.max_record_errors {
                        return Err(VcfParseError::TooManyErrors {
                            path: self.label.clone(),
                            count: read.malformed_records,
                            max: options.max_record_errors,
                        });
                    }
                }
            }
        }

        Ok(read)
    }
}

type FileReader = vcf::io::Reader<Box<dyn std::io::BufRead>>;

/// Open a reader positioned at the first record; `.gz`/`.bgz` are read as BGZF
fn open_reader(path: &Path, label: &str) -> Result<(FileReader, vcf::Header), VcfParseError> {
    let mut reader = vcf::io::reader::Builder::default()
        .build_from_path(path)
        .map_err(|source| VcfParseError::Open {
            path: label.to_string(),
            source,
        })?;
    let header = reader.read_header().map_err(|e| VcfParseError::Header {
        reason: format!("{}: {}", label, e),
    })?;
    Ok((reader, header))
}

/// Tokenize the INFO column; `END` is lifted out as the explicit end
pub fn parse_info_column(
    info: &str,
) -> Result<(BTreeMap<String, RawValue>, Option<u64>), VcfParseError> {
    let mut fields = BTreeMap::new();
    let mut end = None;

    if info.is_empty() || info == MISSING_VALUE {
        return Ok((fields, end));
    }

    for entry in info.split(';').filter(|entry| !entry.is_empty()) {
        match entry.split_once('=') {
            Some((END_KEY, value)) => {
                // 1-based inclusive END is the 0-based exclusive end
                let value = value.parse::<u64>().map_err(|_| {
                    VcfParseError::MalformedRecord(format!("invalid END '{}'", value))
                })?;
                end = Some(value);
            }
            Some((key, value)) => {
                fields.insert(key.to_string(), RawValue::parse(value));
            }
            None => {
                fields.insert(entry.to_string(), RawValue::Flag);
            }
        }
    }

    Ok((fields, end))
}

/// Tokenize `FORMAT\tsample\tsample...` into calls
///
/// Trailing FORMAT keys may be dropped by a sample; they are simply absent.
pub fn parse_sample_columns(
    samples: &str,
    sample_names: &[String],
    sample_ids: &[i64],
) -> Result<Vec<CallRecord>, VcfParseError> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let mut columns = samples.split('\t');
    let keys: Vec<&str> = match columns.next() {
        Some(format) if format != MISSING_VALUE => format.split(':').collect(),
        _ => Vec::new(),
    };

    let mut calls = Vec::with_capacity(sample_names.len());
    for (index, column) in columns.enumerate() {
        let (name, id) = match (sample_names.get(index), sample_ids.get(index)) {
            (Some(name), Some(id)) => (name, *id),
            _ => {
                return Err(VcfParseError::MalformedRecord(format!(
                    "{} sample columns but {} samples in header",
                    index + 1,
                    sample_names.len()
                )))
            }
        };

        let values: Vec<&str> = column.split(':').collect();
        if values.len() > keys.len() {
            return Err(VcfParseError::MalformedRecord(format!(
                "sample {} has {} values for {} FORMAT keys",
                name,
                values.len(),
                keys.len()
            )));
        }

        let mut call = CallRecord::new(name.clone(), id);
        for (key, value) in keys.iter().zip(values) {
            call.fields.insert(key.to_string(), RawValue::parse(value));
        }
        calls.push(call);
    }

    Ok(calls)
}
