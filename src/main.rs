// ==============================================================================
// main.rs - Variant ETL Entry Point
// ==============================================================================
// Description: Command line entry point: VCF inputs -> sharded SQLite tables
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-10-17
// Version: 0.3.0
// ==============================================================================

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walkdir::WalkDir;

use variant_etl::config::{default_workers, DEFAULT_BASE_TABLE_ID};
use variant_etl::merger::MergeStrategy;
use variant_etl::parsers::{VcfSource, DEFAULT_MAX_RECORD_ERRORS};
use variant_etl::region::RegionFilter;
use variant_etl::sample_info::SampleNameEncoding;
use variant_etl::sharding::ShardingPolicy;
use variant_etl::diagnostics::RunFailedError;
use variant_etl::{PipelineConfig, PipelineCoordinator, SqliteWriter};

const VCF_EXTENSIONS: &[&str] = &[".vcf", ".vcf.gz", ".vcf.bgz"];

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MergeStrategyArg {
    /// No merging; duplicate keys are incompatible
    None,
    /// Union alternates and concatenate calls
    MoveToCalls,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SampleEncodingArg {
    WithoutFilePath,
    WithFilePath,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// VCF files or directories containing them
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// SQLite database to write
    #[arg(short, long, env = "VARIANT_ETL_OUTPUT")]
    output: PathBuf,

    /// Base name of the output tables
    #[arg(short, long, default_value = DEFAULT_BASE_TABLE_ID)]
    base_table_id: String,

    /// Sharding configuration (JSON); defaults to one table per human chromosome
    #[arg(short, long, env = "VARIANT_ETL_SHARDING_CONFIG")]
    sharding_config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "none")]
    merge_strategy: MergeStrategyArg,

    /// Regex of INFO keys copied into each call (MOVE_TO_CALLS only)
    #[arg(long)]
    info_keys_to_move_to_calls: Option<String>,

    /// Tolerate incompatible records in a merge group instead of failing
    #[arg(long)]
    allow_incompatible_records: bool,

    /// Add a merge_conflicts column to every output table
    #[arg(long)]
    annotate_merge_conflicts: bool,

    #[arg(long, value_enum, default_value = "without-file-path")]
    sample_name_encoding: SampleEncodingArg,

    /// Only load records overlapping these regions (contig[:start-end])
    #[arg(short, long = "region")]
    regions: Vec<String>,

    /// Malformed records tolerated per input before failing
    #[arg(long, default_value_t = DEFAULT_MAX_RECORD_ERRORS)]
    max_record_errors: u64,

    /// Inference partitions and merge buckets (defaults to core count)
    #[arg(short, long, env = "VARIANT_ETL_WORKERS")]
    workers: Option<usize>,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Args {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let info_keys = self
            .info_keys_to_move_to_calls
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("Invalid --info-keys-to-move-to-calls pattern")?;

        let merge_strategy = match (self.merge_strategy, info_keys) {
            (MergeStrategyArg::None, Some(_)) => {
                bail!("--info-keys-to-move-to-calls requires --merge-strategy move-to-calls")
            }
            (MergeStrategyArg::None, None) => MergeStrategy::None,
            (MergeStrategyArg::MoveToCalls, info_keys_to_move_to_calls) => {
                MergeStrategy::MoveToCalls {
                    info_keys_to_move_to_calls,
                }
            }
        };

        let sharding_policy = match &self.sharding_config {
            Some(path) => ShardingPolicy::from_path(path)
                .with_context(|| format!("Failed to load sharding config {:?}", path))?,
            None => ShardingPolicy::default_human(),
        };

        let regions = RegionFilter::parse_all(&self.regions).context("Invalid --region")?;

        Ok(PipelineConfig {
            base_table_id: self.base_table_id.clone(),
            merge_strategy,
            allow_incompatible_records: self.allow_incompatible_records,
            annotate_merge_conflicts: self.annotate_merge_conflicts,
            sharding_policy,
            sample_name_encoding: match self.sample_name_encoding {
                SampleEncodingArg::WithoutFilePath => SampleNameEncoding::WithoutFilePath,
                SampleEncodingArg::WithFilePath => SampleNameEncoding::WithFilePath,
            },
            regions,
            max_record_errors: self.max_record_errors,
            workers: self.workers.unwrap_or_else(default_workers),
        })
    }
}

fn is_vcf(path: &Path) -> bool {
    let name = path.to_string_lossy();
    VCF_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Expand directories into their VCF files, sorted for a stable source order
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_vcf(e.path()))
                .map(|e| e.into_path())
                .collect();
            found.sort();
            files.extend(found);
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            bail!("Input not found: {:?}", input);
        }
    }
    Ok(files)
}

/// Write a JSON report to `path`, or stdout when no path is given
fn write_report<T: serde::Serialize>(path: Option<&Path>, report: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to encode run report")?;
    match path {
        Some(path) => {
            std::fs::write(path, &json).with_context(|| format!("Failed to write report {:?}", path))?;
            info!("Run report written to {:?}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "variant_etl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.pipeline_config()?;

    let files = collect_inputs(&args.inputs)?;
    if files.is_empty() {
        bail!("No VCF inputs found");
    }
    let mut coordinator = PipelineCoordinator::new(config);
    for file in &files {
        let source = VcfSource::open(file).with_context(|| format!("Failed to open {:?}", file))?;
        coordinator.add_source(std::sync::Arc::new(source));
    }
    info!(
        "Variant ETL starting with {} source(s), merge strategy {}",
        coordinator.source_count(),
        coordinator.config().merge_strategy.name()
    );

    let writer = SqliteWriter::open(&args.output)?;
    let (report, _writer) = match coordinator.run(writer).await {
        Ok(result) => result,
        Err(e) => {
            error!("Run failed: {:#}", e);
            if let Some(failure) = e.downcast_ref::<RunFailedError>() {
                let counts = serde_json::json!({
                    "status": "failed",
                    "stage": failure.stage,
                    "error": format!("{:#}", e),
                    "diagnostics": failure.diagnostics,
                });
                write_report(args.report.as_deref(), &counts)?;
            }
            return Err(e);
        }
    };

    write_report(args.report.as_deref(), &report)?;
    Ok(())
}
