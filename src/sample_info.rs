// ==============================================================================
// sample_info.rs - Sample Identity and Sample Info Table
// ==============================================================================
// Description: Stable sample ids and the `{base}__sample_info` rows
// Author: Matt Barham
// Created: 2026-09-19
// Modified: 2026-10-02
// Version: 0.3.0
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Suffix of the sample info table
pub const SAMPLE_INFO_TABLE_SUFFIX: &str = "sample_info";

const INGESTION_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:00.0";

/// Whether the source file takes part in a sample's identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleNameEncoding {
    /// Same sample name in different files is the same sample
    #[default]
    WithoutFilePath,
    /// Same sample name in different files are different samples
    WithFilePath,
}

/// Stable, non-negative 63-bit id for a sample
pub fn sample_id(sample_name: &str, file_path: &str, encoding: SampleNameEncoding) -> i64 {
    let mut hasher = Sha256::new();
    match encoding {
        SampleNameEncoding::WithoutFilePath => hasher.update(sample_name.as_bytes()),
        SampleNameEncoding::WithFilePath => {
            hasher.update(file_path.as_bytes());
            hasher.update(b"/");
            hasher.update(sample_name.as_bytes());
        }
    }
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) >> 1) as i64
}

/// One row of the sample info table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleInfoRow {
    pub sample_id: i64,
    pub sample_name: String,
    pub file_path: String,
    pub ingestion_datetime: String,
}

/// Sample info rows for one source, stamped to the minute
pub fn sample_info_rows(
    sample_names: &[String],
    file_path: &str,
    encoding: SampleNameEncoding,
    now: DateTime<Utc>,
) -> Vec<SampleInfoRow> {
    let ingestion_datetime = now.format(INGESTION_DATETIME_FORMAT).to_string();
    sample_names
        .iter()
        .map(|name| SampleInfoRow {
            sample_id: sample_id(name, file_path, encoding),
            sample_name: name.clone(),
            file_path: file_path.to_string(),
            ingestion_datetime: ingestion_datetime.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sample_id_is_stable_and_non_negative() {
        let a = sample_id("NA00001", "a.vcf", SampleNameEncoding::WithoutFilePath);
        let b = sample_id("NA00001", "b.vcf", SampleNameEncoding::WithoutFilePath);
        assert_eq!(a, b);
        assert!(a >= 0);
        assert_ne!(a, sample_id("NA00002", "a.vcf", SampleNameEncoding::WithoutFilePath));
    }

    #[test]
    fn test_file_path_encoding_separates_samples() {
        let a = sample_id("NA00001", "a.vcf", SampleNameEncoding::WithFilePath);
        let b = sample_id("NA00001", "b.vcf", SampleNameEncoding::WithFilePath);
        assert_ne!(a, b);
        assert!(a >= 0 && b >= 0);
    }

    #[test]
    fn test_rows_are_stamped_to_the_minute() {
        let now = Utc.with_ymd_and_hms(2026, 10, 2, 13, 45, 59).unwrap();
        let rows = sample_info_rows(
            &["NA00001".to_string(), "NA00002".to_string()],
            "data/valid.vcf",
            SampleNameEncoding::WithoutFilePath,
            now,
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ingestion_datetime, "2026-10-02 13:45:00.0");
        assert_eq!(rows[1].file_path, "data/valid.vcf");
    }
}
