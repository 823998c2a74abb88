// ==============================================================================
// processor.rs - Pipeline Coordinator
// ==============================================================================
// Description: Sequences read -> infer -> group -> merge -> route -> write
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-10-17
// Version: 0.3.0
// ==============================================================================
// Stages:
//   1. Read every source (blocking pool, one task per source)
//   2. Infer: fold partitions into SchemaAccumulators, combine, freeze
//      ---- barrier: the schema is frozen before any row is encoded ----
//   3. Group by merge key into hash buckets, merge + encode + route per bucket
//   4. Create every destination, then write rows in key order
//
// Read and merge failures do not stop at the first error: the stage finishes,
// then fails with a RunFailedError carrying the counters of every source or
// merge group.
// ==============================================================================

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::diagnostics::{DestinationReport, Diagnostics, RunFailedError, RunReport, RunStage};
use crate::encoder::{RowEncoder, VariantRow};
use crate::key::{PositionKeyExtractor, VariantKey, VariantKeyExtractor};
use crate::merger::{IncompatibleRecordsError, MergeStrategy, VariantMerger};
use crate::models::RawVariantRecord;
use crate::output::RowWriter;
use crate::parsers::{VariantSource, VcfParseError};
use crate::sample_info::{sample_info_rows, SampleInfoRow};
use crate::schema::{DeclaredField, FieldCategory, FieldDefinition, Schema, SchemaAccumulator};
use crate::sharding::ShardRouter;

/// Rows produced by one merge bucket, tagged with key and destination
type RoutedRows = Vec<(VariantKey, String, Vec<VariantRow>)>;

/// Everything one merge bucket produced
#[derive(Debug, Default)]
struct BucketOutcome {
    routed: RoutedRows,
    diagnostics: Diagnostics,
    /// First failing group of the bucket, in key order
    failure: Option<IncompatibleRecordsError>,
}

/// Runs the whole pipeline over a set of sources
pub struct PipelineCoordinator {
    config: PipelineConfig,
    sources: Vec<Arc<dyn VariantSource>>,
    key_extractor: Arc<dyn VariantKeyExtractor>,
}

impl PipelineCoordinator {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            sources: Vec::new(),
            key_extractor: Arc::new(PositionKeyExtractor),
        }
    }

    /// Add a source; sources are enumerated in the order they are added
    pub fn with_source(mut self, source: impl VariantSource + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    pub fn add_source(&mut self, source: Arc<dyn VariantSource>) {
        self.sources.push(source);
    }

    pub fn with_key_extractor(mut self, extractor: impl VariantKeyExtractor + 'static) -> Self {
        self.key_extractor = Arc::new(extractor);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Run the pipeline into `writer`, handing the writer back with the report
    pub async fn run<W>(&self, writer: W) -> Result<(RunReport, W)>
    where
        W: RowWriter + 'static,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            "Starting run {} over {} source(s), merge strategy {}",
            run_id,
            self.sources.len(),
            self.config.merge_strategy.name()
        );

        let router = ShardRouter::new(
            &self.config.base_table_id,
            self.config.sharding_policy.clone(),
        )
        .context("Invalid sharding configuration")?;
        let sample_info_table = self.config.sample_info_table();
        if router.destinations().contains(&sample_info_table) {
            bail!(
                "Sharding destination {} collides with the sample info table",
                sample_info_table
            );
        }

        // 1. Read
        let (records, read_diagnostics) = self.read_sources().await?;
        let records_read = records.len() as u64;
        info!("Read {} record(s)", records_read);

        // 2. Infer
        let records = Arc::new(records);
        let schema = Arc::new(self.infer_schema(Arc::clone(&records)).await?);
        info!(
            "Schema frozen: {} INFO field(s), {} FORMAT field(s)",
            schema.info_fields().count(),
            schema.format_fields().count()
        );

        let schema_fields: Vec<FieldDefinition> = schema.definitions().cloned().collect();

        // 3. Group, merge, encode, route
        let records = Arc::try_unwrap(records).unwrap_or_else(|shared| (*shared).clone());
        let (routed, diagnostics) = self
            .merge_and_route(records, Arc::clone(&schema), &router, read_diagnostics)
            .await?;

        // 4. Write
        let sample_info = self.sample_info(started_at);
        let destinations = router.destinations().to_vec();
        let annotate = self.config.annotate_merge_conflicts;
        let (writer, destination_reports) = tokio::task::spawn_blocking(move || {
            write_all(
                writer,
                &schema,
                annotate,
                &destinations,
                routed,
                &sample_info_table,
                &sample_info,
            )
        })
        .await
        .context("Writer task panicked")??;

        let rows_written = destination_reports.iter().map(|d| d.rows).sum();
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            merge_strategy: self.config.merge_strategy.name().to_string(),
            sources: self.sources.len(),
            records_read,
            schema: schema_fields,
            rows_written,
            destinations: destination_reports,
            diagnostics,
        };

        info!(
            "Run {} complete: {} row(s) across {} destination(s) in {:.2}s",
            run_id,
            report.rows_written,
            report.destinations.len(),
            report.duration_seconds()
        );
        if diagnostics.anomalies() > 0 {
            warn!(
                "Run {} tolerated anomalies: {} malformed record(s), {} incompatible record(s), {} unparsable value(s)",
                run_id,
                diagnostics.malformed_records,
                diagnostics.incompatible_records,
                diagnostics.unparsable_field_values
            );
        }

        Ok((report, writer))
    }

    /// Read every source on the blocking pool
    ///
    /// A failing source does not cancel the others; once all reads finish the
    /// first failure (in source order) is returned with the combined counts.
    async fn read_sources(&self) -> Result<(Vec<RawVariantRecord>, Diagnostics)> {
        let mut tasks = JoinSet::new();
        for (source_index, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            let options = self.config.read_options();
            tasks.spawn_blocking(move || (source_index, source.read_records(source_index, &options)));
        }

        let mut reads = Vec::with_capacity(self.sources.len());
        while let Some(joined) = tasks.join_next().await {
            reads.push(joined.context("Reader task panicked")?);
        }
        reads.sort_by_key(|(source_index, _)| *source_index);

        let mut diagnostics = Diagnostics::default();
        let mut records = Vec::new();
        let mut failure: Option<anyhow::Error> = None;
        for (source_index, read) in reads {
            let label = self.sources[source_index].label();
            match read {
                Ok(read) => {
                    debug!(
                        "Source {} ({}): {} record(s), {} malformed, {} filtered",
                        source_index,
                        label,
                        read.records.len(),
                        read.malformed_records,
                        read.filtered_records
                    );
                    diagnostics.record_read(&read);
                    records.extend(read.records);
                }
                Err(e) => {
                    warn!("Source {} ({}) failed: {}", source_index, label, e);
                    if let VcfParseError::TooManyErrors { count, .. } = &e {
                        diagnostics.malformed_records += count;
                    }
                    failure.get_or_insert_with(|| {
                        anyhow::Error::new(e).context(format!("Failed to read {}", label))
                    });
                }
            }
        }

        match failure {
            Some(source) => Err(RunFailedError {
                stage: RunStage::Read,
                diagnostics,
                source: source.into(),
            }
            .into()),
            None => Ok((records, diagnostics)),
        }
    }

    /// Stage 1: fold partitions in parallel, then combine and freeze
    async fn infer_schema(&self, records: Arc<Vec<RawVariantRecord>>) -> Result<Schema> {
        let workers = self.config.effective_workers();
        let chunk = records.len().div_ceil(workers).max(1);
        let strategy = self.config.merge_strategy.clone();

        let mut tasks = JoinSet::new();
        for partition in 0..workers {
            let records = Arc::clone(&records);
            let strategy = strategy.clone();
            tasks.spawn_blocking(move || {
                let start = (partition * chunk).min(records.len());
                let end = (start + chunk).min(records.len());
                let mut accumulator = SchemaAccumulator::new();
                for record in &records[start..end] {
                    accumulator.observe_record(record, |key| strategy.info_category(key));
                }
                accumulator
            });
        }

        let mut accumulator = self.declared_accumulator(&strategy);
        while let Some(partial) = tasks.join_next().await {
            accumulator = accumulator.combine(partial.context("Inference task panicked")?);
        }

        accumulator.finalize().context("Schema finalization failed")
    }

    /// Header declarations, with moved INFO keys declared as FORMAT
    fn declared_accumulator(&self, strategy: &MergeStrategy) -> SchemaAccumulator {
        let mut accumulator = SchemaAccumulator::new();
        for source in &self.sources {
            for declared in source.declared_fields() {
                let category = match declared.category {
                    FieldCategory::Info => strategy.info_category(&declared.name),
                    FieldCategory::Format => FieldCategory::Format,
                };
                accumulator.declare(&DeclaredField {
                    category,
                    ..declared.clone()
                });
            }
        }
        accumulator
    }

    /// Stage 2: co-locate each merge key in one bucket, merge buckets in parallel
    ///
    /// `diagnostics` holds the read counters; the merge counters are added to it.
    async fn merge_and_route(
        &self,
        records: Vec<RawVariantRecord>,
        schema: Arc<Schema>,
        router: &ShardRouter,
        mut diagnostics: Diagnostics,
    ) -> Result<(BTreeMap<String, Vec<VariantRow>>, Diagnostics)> {
        let workers = self.config.effective_workers();
        let mut buckets: Vec<BTreeMap<VariantKey, Vec<RawVariantRecord>>> =
            (0..workers).map(|_| BTreeMap::new()).collect();
        for record in records {
            let key = self.key_extractor.key(&record);
            buckets[key.bucket(workers)]
                .entry(key)
                .or_default()
                .push(record);
        }
        debug!(
            "Grouped into {} merge key(s) across {} bucket(s)",
            buckets.iter().map(BTreeMap::len).sum::<usize>(),
            workers
        );

        let merger = self.config.merger();
        let encoder = RowEncoder::new(schema)
            .with_merge_conflict_annotation(self.config.annotate_merge_conflicts);

        let mut tasks = JoinSet::new();
        for bucket in buckets {
            let merger = merger.clone();
            let encoder = encoder.clone();
            let router = router.clone();
            tasks.spawn_blocking(move || merge_bucket(&merger, &encoder, &router, bucket));
        }

        let mut failure: Option<IncompatibleRecordsError> = None;
        let mut keyed: BTreeMap<String, Vec<(VariantKey, Vec<VariantRow>)>> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.context("Merge task panicked")??;
            diagnostics = diagnostics.combine(outcome.diagnostics);
            if let Some(bucket_failure) = outcome.failure {
                failure = match failure {
                    Some(current) if current.key <= bucket_failure.key => Some(current),
                    _ => Some(bucket_failure),
                };
            }
            for (key, destination, rows) in outcome.routed {
                keyed.entry(destination).or_default().push((key, rows));
            }
        }

        if let Some(source) = failure {
            return Err(RunFailedError {
                stage: RunStage::Merge,
                diagnostics,
                source: Box::new(source),
            }
            .into());
        }

        // Buckets finish in any order; key order makes the output deterministic
        let routed = keyed
            .into_iter()
            .map(|(destination, mut groups)| {
                groups.sort_by(|a, b| a.0.cmp(&b.0));
                let rows = groups.into_iter().flat_map(|(_, rows)| rows).collect();
                (destination, rows)
            })
            .collect();

        Ok((routed, diagnostics))
    }

    fn sample_info(&self, now: chrono::DateTime<Utc>) -> Vec<SampleInfoRow> {
        self.sources
            .iter()
            .flat_map(|source| {
                sample_info_rows(
                    source.sample_names(),
                    source.label(),
                    self.config.sample_name_encoding,
                    now,
                )
            })
            .collect()
    }
}

/// Merge, encode and route every group of one bucket
///
/// Groups that cannot be merged are counted and skipped so the bucket reports
/// every failure; the first one in key order is kept for the error.
fn merge_bucket(
    merger: &VariantMerger,
    encoder: &RowEncoder,
    router: &ShardRouter,
    bucket: BTreeMap<VariantKey, Vec<RawVariantRecord>>,
) -> Result<BucketOutcome> {
    let mut outcome = BucketOutcome {
        routed: Vec::with_capacity(bucket.len()),
        ..BucketOutcome::default()
    };

    for (key, group) in bucket {
        let merged = match merger.merge(&key, group) {
            Ok(merged) => merged,
            Err(e) => {
                debug!("{}", e);
                outcome.diagnostics.incompatible_records += 1;
                outcome.failure.get_or_insert(e);
                continue;
            }
        };
        outcome.diagnostics.record_merge(&merged);

        let destination = router.route(&key.contig).to_string();
        let mut rows = Vec::with_capacity(merged.variants.len());
        for variant in &merged.variants {
            let (row, widened) = encoder.encode(variant)?;
            outcome.diagnostics.unparsable_field_values += widened;
            rows.push(row);
        }
        outcome.routed.push((key, destination, rows));
    }

    Ok(outcome)
}

/// Create every destination, then write rows and sample info
fn write_all<W: RowWriter>(
    mut writer: W,
    schema: &Schema,
    annotate_merge_conflicts: bool,
    destinations: &[String],
    mut routed: BTreeMap<String, Vec<VariantRow>>,
    sample_info_table: &str,
    sample_info: &[SampleInfoRow],
) -> Result<(W, Vec<DestinationReport>)> {
    for destination in destinations {
        writer
            .create_destination(destination, schema, annotate_merge_conflicts)
            .with_context(|| format!("Failed to create destination {}", destination))?;
    }

    let mut reports = Vec::with_capacity(destinations.len());
    for destination in destinations {
        let rows = routed.remove(destination).unwrap_or_default();
        if !rows.is_empty() {
            writer
                .write_rows(destination, &rows)
                .with_context(|| format!("Failed to write {}", destination))?;
        }
        info!("  {}: {} row(s)", destination, rows.len());
        reports.push(DestinationReport {
            name: destination.clone(),
            rows: rows.len() as u64,
        });
    }

    writer
        .write_sample_info(sample_info_table, sample_info)
        .context("Failed to write sample info")?;
    writer.finish().context("Failed to finalize output")?;

    Ok((writer, reports))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CallRecord, RawValue, RecordOrigin};
    use crate::output::MemoryWriter;
    use crate::parsers::{InMemorySource, ReadOptions, SourceRead};
    use crate::sharding::{ShardingPolicy, ShardingRule};

    fn policy() -> ShardingPolicy {
        ShardingPolicy::new(vec![
            ShardingRule::exact("chr19", "chr19"),
            ShardingRule::exact("chr20", "chr20"),
        ])
        .unwrap()
    }

    fn record(contig: &str, start: u64, dp: &str) -> RawVariantRecord {
        RawVariantRecord::new(contig, start, "A", RecordOrigin::new(0, 0))
            .with_alternates(["G"])
            .with_info("DP", RawValue::parse(dp))
            .with_call(CallRecord::new("S1", 0).with_field("GT", RawValue::parse("0/1")))
    }

    fn config(strategy: MergeStrategy, workers: usize) -> PipelineConfig {
        PipelineConfig {
            merge_strategy: strategy,
            sharding_policy: policy(),
            workers,
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_every_destination_is_created() {
        let coordinator = PipelineCoordinator::new(config(MergeStrategy::None, 2))
            .with_source(InMemorySource::new("a").with_samples(["S1"]).with_record(record("chr20", 5, "3")));

        let (report, writer) = coordinator.run(MemoryWriter::new()).await.unwrap();
        assert_eq!(
            writer.destinations(),
            vec!["variants__chr19", "variants__chr20", "variants__residual"]
        );
        assert_eq!(writer.row_count("variants__chr20"), 1);
        assert_eq!(report.rows_in("variants__chr19"), Some(0));
        assert_eq!(report.records_read, 1);
        assert!(writer.is_finished());
        assert_eq!(writer.sample_info("variants__sample_info").len(), 1);
    }

    #[tokio::test]
    async fn test_output_is_independent_of_worker_count() {
        let source = InMemorySource::new("a")
            .with_samples(["S1"])
            .with_record(record("chr20", 30, "1"))
            .with_record(record("chr19", 10, "2.5"))
            .with_record(record("chrUn", 0, "x"))
            .with_record(record("chr20", 20, "4"));

        let mut outputs = Vec::new();
        for workers in [1, 3, 8] {
            let coordinator = PipelineCoordinator::new(config(MergeStrategy::move_to_calls(), workers))
                .with_source(source.clone());
            let (_, writer) = coordinator.run(MemoryWriter::new()).await.unwrap();
            outputs.push(
                writer
                    .destinations()
                    .iter()
                    .map(|d| writer.rows(d).to_vec())
                    .collect::<Vec<_>>(),
            );
        }
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[1], outputs[2]);

        let chr20 = &outputs[0][1];
        assert_eq!(chr20[0].start_position, 20);
        assert_eq!(chr20[1].start_position, 30);
    }

    #[tokio::test]
    async fn test_incompatible_records_fail_the_run_unless_tolerated() {
        let source = |label: &str| {
            InMemorySource::new(label)
                .with_samples(["S1"])
                .with_record(record("chr20", 5, "3"))
        };

        let strict = PipelineCoordinator::new(config(MergeStrategy::None, 2))
            .with_source(source("a"))
            .with_source(source("b"));
        assert!(strict.run(MemoryWriter::new()).await.is_err());

        let tolerant_config = PipelineConfig {
            allow_incompatible_records: true,
            ..config(MergeStrategy::None, 2)
        };
        let tolerant = PipelineCoordinator::new(tolerant_config)
            .with_source(source("a"))
            .with_source(source("b"));
        let (report, writer) = tolerant.run(MemoryWriter::new()).await.unwrap();
        assert_eq!(report.diagnostics.incompatible_records, 1);
        assert_eq!(writer.row_count("variants__chr20"), 2);
    }

    /// Keys on position only, so differing reference bases meet in one group
    struct PositionOnlyExtractor;

    impl VariantKeyExtractor for PositionOnlyExtractor {
        fn key(&self, record: &RawVariantRecord) -> VariantKey {
            VariantKey::new(record.contig.clone(), record.start, "")
        }
    }

    /// A source whose read always exceeds the malformed-record ceiling
    struct BrokenSource;

    impl VariantSource for BrokenSource {
        fn label(&self) -> &str {
            "broken.vcf"
        }

        fn declared_fields(&self) -> &[DeclaredField] {
            &[]
        }

        fn sample_names(&self) -> &[String] {
            &[]
        }

        fn read_records(
            &self,
            _source_index: usize,
            options: &ReadOptions,
        ) -> Result<SourceRead, VcfParseError> {
            Err(VcfParseError::TooManyErrors {
                path: self.label().to_string(),
                count: options.max_record_errors + 1,
                max: options.max_record_errors,
            })
        }
    }

    #[tokio::test]
    async fn test_failed_merge_reports_every_incompatible_group() {
        let source = |label: &str| {
            InMemorySource::new(label)
                .with_samples(["S1"])
                .with_record(record("chr1", 1, "3"))
                .with_record(record("chr19", 7, "3"))
                .with_record(record("chr20", 5, "3"))
                .with_record(record("chr20", 9, "3"))
        };
        let coordinator = PipelineCoordinator::new(config(MergeStrategy::None, 3))
            .with_source(source("a"))
            .with_source(source("b"));
        assert_eq!(coordinator.source_count(), 2);

        let err = coordinator.run(MemoryWriter::new()).await.unwrap_err();
        let failure = err.downcast_ref::<RunFailedError>().unwrap();
        assert_eq!(failure.stage, RunStage::Merge);
        assert_eq!(failure.diagnostics.incompatible_records, 4);
        // first failure in key order
        assert!(failure.source.to_string().contains("chr1:1:A"));
    }

    #[tokio::test]
    async fn test_failed_read_reports_malformed_counts() {
        let mut coordinator = PipelineCoordinator::new(config(MergeStrategy::None, 2))
            .with_source(InMemorySource::new("good").with_record(record("chr20", 5, "3")));
        coordinator.add_source(Arc::new(BrokenSource));

        let err = coordinator.run(MemoryWriter::new()).await.unwrap_err();
        let failure = err.downcast_ref::<RunFailedError>().unwrap();
        assert_eq!(failure.stage, RunStage::Read);
        assert_eq!(
            failure.diagnostics.malformed_records,
            coordinator.config().max_record_errors + 1
        );
        assert!(failure.to_string().contains("broken.vcf"));
    }

    #[tokio::test]
    async fn test_custom_key_extractor_reaches_reference_mismatch() {
        let source = |label: &str, reference: &str| {
            InMemorySource::new(label).with_samples([label]).with_record(
                RawVariantRecord::new("chr20", 5, reference, RecordOrigin::new(0, 0))
                    .with_alternates(["T"])
                    .with_call(CallRecord::new(label, 0).with_field("GT", RawValue::parse("0/1"))),
            )
        };

        let strict = PipelineCoordinator::new(config(MergeStrategy::move_to_calls(), 2))
            .with_key_extractor(PositionOnlyExtractor)
            .with_source(source("a", "A"))
            .with_source(source("b", "AC"));
        let err = strict.run(MemoryWriter::new()).await.unwrap_err();
        let failure = err.downcast_ref::<RunFailedError>().unwrap();
        assert_eq!(failure.diagnostics.incompatible_records, 1);
        assert!(failure.source.to_string().contains("reference bases mismatch"));

        let tolerant_config = PipelineConfig {
            allow_incompatible_records: true,
            annotate_merge_conflicts: true,
            ..config(MergeStrategy::move_to_calls(), 2)
        };
        let tolerant = PipelineCoordinator::new(tolerant_config)
            .with_key_extractor(PositionOnlyExtractor)
            .with_source(source("a", "A"))
            .with_source(source("b", "AC"));
        let (report, writer) = tolerant.run(MemoryWriter::new()).await.unwrap();
        assert_eq!(report.diagnostics.incompatible_records, 1);

        let rows = writer.rows("variants__chr20");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reference_bases, "A");
        assert_eq!(rows[0].calls.len(), 2);
        assert_eq!(rows[0].merge_conflicts, Some(1));
    }

    #[tokio::test]
    async fn test_moved_info_declarations_become_format() {
        let strategy = MergeStrategy::MoveToCalls {
            info_keys_to_move_to_calls: Some(regex::Regex::new("^DP$").unwrap()),
        };
        let source = InMemorySource::new("a")
            .with_samples(["S1"])
            .with_declared_field(DeclaredField {
                name: "DP".to_string(),
                category: FieldCategory::Info,
                field_type: crate::schema::FieldType::Integer,
                cardinality: crate::schema::Cardinality::Fixed(1),
                description: Some("Total Depth".to_string()),
            })
            .with_record(record("chr20", 5, "3"));

        let (report, writer) = PipelineCoordinator::new(config(strategy, 2))
            .with_source(source)
            .run(MemoryWriter::new())
            .await
            .unwrap();

        let dp = report.schema.iter().find(|f| f.name == "DP").unwrap();
        assert_eq!(dp.category, FieldCategory::Format);
        assert_eq!(dp.provenance, crate::schema::Provenance::Declared);
        assert_eq!(writer.sum_call_field("variants__chr20", "DP"), 3.0);
    }

    #[tokio::test]
    async fn test_sample_info_suffix_collision_rejected() {
        let config = PipelineConfig {
            sharding_policy: ShardingPolicy::new(vec![ShardingRule::exact("chr1", "sample_info")])
                .unwrap(),
            ..PipelineConfig::default()
        };
        let coordinator = PipelineCoordinator::new(config);
        assert!(coordinator.run(MemoryWriter::new()).await.is_err());
    }
}
