// ==============================================================================
// config.rs - Pipeline Configuration
// ==============================================================================
// Description: Run-level settings consumed by the pipeline coordinator
// Author: Matt Barham
// Created: 2026-09-26
// Modified: 2026-10-11
// Version: 0.3.0
// ==============================================================================

use crate::merger::{MergeStrategy, VariantMerger};
use crate::parsers::{ReadOptions, DEFAULT_MAX_RECORD_ERRORS};
use crate::region::RegionFilter;
use crate::sample_info::{SampleNameEncoding, SAMPLE_INFO_TABLE_SUFFIX};
use crate::sharding::{destination_name, ShardingPolicy};

/// Default base name of the output tables
pub const DEFAULT_BASE_TABLE_ID: &str = "variants";

/// Everything a run needs besides its sources and writer
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Destinations are named `{base_table_id}__{suffix}`
    pub base_table_id: String,

    pub merge_strategy: MergeStrategy,

    /// Tolerate incompatible records in a merge group (best-effort + count)
    pub allow_incompatible_records: bool,

    /// Add a `merge_conflicts` column to every destination
    pub annotate_merge_conflicts: bool,

    pub sharding_policy: ShardingPolicy,

    pub sample_name_encoding: SampleNameEncoding,

    /// Only records overlapping these regions are read
    pub regions: RegionFilter,

    /// Malformed records tolerated per source
    pub max_record_errors: u64,

    /// Inference partitions and merge buckets
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_table_id: DEFAULT_BASE_TABLE_ID.to_string(),
            merge_strategy: MergeStrategy::None,
            allow_incompatible_records: false,
            annotate_merge_conflicts: false,
            sharding_policy: ShardingPolicy::default_human(),
            sample_name_encoding: SampleNameEncoding::default(),
            regions: RegionFilter::default(),
            max_record_errors: DEFAULT_MAX_RECORD_ERRORS,
            workers: default_workers(),
        }
    }
}

impl PipelineConfig {
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            regions: self.regions.clone(),
            sample_name_encoding: self.sample_name_encoding,
            max_record_errors: self.max_record_errors,
        }
    }

    pub fn merger(&self) -> VariantMerger {
        VariantMerger::new(self.merge_strategy.clone())
            .with_allow_incompatible_records(self.allow_incompatible_records)
    }

    pub fn sample_info_table(&self) -> String {
        destination_name(&self.base_table_id, SAMPLE_INFO_TABLE_SUFFIX)
    }

    /// Worker count, never zero
    pub fn effective_workers(&self) -> usize {
        self.workers.max(1)
    }
}

/// One worker per available core
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
