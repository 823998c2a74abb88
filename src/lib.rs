// ==============================================================================
// lib.rs - Variant ETL Library
// ==============================================================================
// Description: Library interface for the variant ETL core: schema inference,
//              variant merging and contig sharding
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2026-10-14
// Version: 0.3.0
// ==============================================================================

pub mod config;
pub mod diagnostics;
pub mod encoder;
pub mod key;
pub mod merger;
pub mod models;
pub mod output;
pub mod parsers;
pub mod processor;
pub mod region;
pub mod sample_info;
pub mod schema;
pub mod sharding;

pub use config::PipelineConfig;
pub use diagnostics::{Diagnostics, RunFailedError, RunReport};
pub use merger::{MergeStrategy, VariantMerger};
pub use output::{MemoryWriter, RowWriter, SqliteWriter};
pub use parsers::{InMemorySource, VariantSource, VcfSource};
pub use processor::PipelineCoordinator;
pub use schema::{Schema, SchemaAccumulator};
pub use sharding::{ShardRouter, ShardingPolicy};
