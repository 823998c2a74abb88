// ==============================================================================
// diagnostics.rs - Run Diagnostics and Report
// ==============================================================================
// Description: Anomaly counters by kind, the end-of-run report and the
//              failed-run error
// Author: Matt Barham
// Created: 2026-09-29
// Modified: 2026-10-17
// Version: 0.3.0
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::merger::MergeOutcome;
use crate::parsers::SourceRead;
use crate::schema::FieldDefinition;

/// Anomaly counters, one per error kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Records dropped as malformed while reading
    pub malformed_records: u64,
    /// Records outside the region filter
    pub filtered_records: u64,
    /// Incompatibilities inside merge groups: tolerated members, or groups
    /// that failed the run
    pub incompatible_records: u64,
    /// Values widened to string at write time
    pub unparsable_field_values: u64,
    /// Replayed records collapsed by the merger
    pub replayed_duplicates: u64,
}

impl Diagnostics {
    pub fn record_read(&mut self, read: &SourceRead) {
        self.malformed_records += read.malformed_records;
        self.filtered_records += read.filtered_records;
    }

    pub fn record_merge(&mut self, outcome: &MergeOutcome) {
        self.incompatible_records += u64::from(outcome.tolerated_conflicts);
        self.replayed_duplicates += u64::from(outcome.replayed_duplicates);
    }

    pub fn combine(mut self, other: Diagnostics) -> Diagnostics {
        self.malformed_records += other.malformed_records;
        self.filtered_records += other.filtered_records;
        self.incompatible_records += other.incompatible_records;
        self.unparsable_field_values += other.unparsable_field_values;
        self.replayed_duplicates += other.replayed_duplicates;
        self
    }

    /// Anomalies worth a warning (filtering is not one)
    pub fn anomalies(&self) -> u64 {
        self.malformed_records + self.incompatible_records + self.unparsable_field_values
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed_records={} filtered_records={} incompatible_records={} unparsable_field_values={} replayed_duplicates={}",
            self.malformed_records,
            self.filtered_records,
            self.incompatible_records,
            self.unparsable_field_values,
            self.replayed_duplicates
        )
    }
}

/// Pipeline stage a run failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    Read,
    Merge,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStage::Read => write!(f, "read"),
            RunStage::Merge => write!(f, "merge"),
        }
    }
}

/// A run stopped by a fatal error, with every counter gathered by the stage
///
/// The stage runs to completion before failing, so the counts cover all
/// sources or all merge groups, not just the first failure.
#[derive(Error, Debug)]
#[error("Run failed during {stage} ({diagnostics}): {source}")]
pub struct RunFailedError {
    pub stage: RunStage,
    pub diagnostics: Diagnostics,
    /// First failure in source or key order
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

/// Row count of one destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationReport {
    pub name: String,
    pub rows: u64,
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub merge_strategy: String,
    pub sources: usize,
    pub records_read: u64,
    /// Frozen field definitions, with their provenance
    pub schema: Vec<FieldDefinition>,
    pub rows_written: u64,
    /// Every destination in policy order, including empty ones
    pub destinations: Vec<DestinationReport>,
    pub diagnostics: Diagnostics,
}

impl RunReport {
    pub fn rows_in(&self, destination: &str) -> Option<u64> {
        self.destinations
            .iter()
            .find(|d| d.name == destination)
            .map(|d| d.rows)
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let mut diagnostics = Diagnostics::default();
        diagnostics.record_read(&SourceRead {
            records: Vec::new(),
            filtered_records: 4,
            malformed_records: 2,
        });
        diagnostics.record_merge(&MergeOutcome {
            variants: Vec::new(),
            tolerated_conflicts: 3,
            replayed_duplicates: 1,
        });

        let other = Diagnostics {
            unparsable_field_values: 5,
            ..Diagnostics::default()
        };
        let total = diagnostics.combine(other);

        assert_eq!(total.malformed_records, 2);
        assert_eq!(total.incompatible_records, 3);
        assert_eq!(total.replayed_duplicates, 1);
        assert_eq!(total.anomalies(), 2 + 3 + 5);
    }

    #[test]
    fn test_run_failure_names_counts_by_kind() {
        let failure = RunFailedError {
            stage: RunStage::Merge,
            diagnostics: Diagnostics {
                incompatible_records: 3,
                ..Diagnostics::default()
            },
            source: "2 distinct records share this key".into(),
        };

        let message = failure.to_string();
        assert!(message.starts_with("Run failed during merge"));
        assert!(message.contains("incompatible_records=3"));
        assert!(message.contains("malformed_records=0"));

        let error = anyhow::Error::new(failure);
        let failure = error.downcast_ref::<RunFailedError>().unwrap();
        assert_eq!(failure.diagnostics.incompatible_records, 3);
    }

    #[test]
    fn test_report_serializes() {
        let now = Utc::now();
        let report = RunReport {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            merge_strategy: "NONE".to_string(),
            sources: 1,
            records_read: 3,
            schema: Vec::new(),
            rows_written: 3,
            destinations: vec![DestinationReport {
                name: "variants__chr20".to_string(),
                rows: 3,
            }],
            diagnostics: Diagnostics::default(),
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["destinations"][0]["rows"], 3);
        assert_eq!(json["diagnostics"]["malformed_records"], 0);
        assert_eq!(report.rows_in("variants__chr20"), Some(3));
        assert_eq!(report.rows_in("variants__chr1"), None);
    }
}
