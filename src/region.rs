// ==============================================================================
// region.rs - Genomic Region Filter
// ==============================================================================
// Description: Parses `contig[:start-end]` regions and filters records to them
// Author: Matt Barham
// Created: 2026-09-22
// Modified: 2026-09-22
// Version: 0.3.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::models::RawVariantRecord;

/// Region parsing errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegionParseError {
    #[error("Empty genomic region")]
    Empty,

    #[error("Invalid range '{0}' (expected start-end)")]
    InvalidRange(String),

    #[error("Invalid position '{0}'")]
    InvalidPosition(String),

    #[error("Region start {start} is after end {end}")]
    StartAfterEnd { start: u64, end: u64 },
}

/// A contig, optionally narrowed to a 1-based inclusive range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenomicRegion {
    pub contig: String,
    /// 0-based inclusive start
    pub start: u64,
    /// 0-based exclusive end
    pub end: u64,
}

impl GenomicRegion {
    /// Whether a record overlaps this region
    pub fn overlaps(&self, record: &RawVariantRecord) -> bool {
        record.contig == self.contig
            && record.start < self.end
            && record.resolved_end().max(record.start + 1) > self.start
    }
}

impl FromStr for GenomicRegion {
    type Err = RegionParseError;

    fn from_str(region: &str) -> Result<Self, Self::Err> {
        let region = region.trim();
        if region.is_empty() {
            return Err(RegionParseError::Empty);
        }

        let (contig, range) = match region.rsplit_once(':') {
            Some((contig, range)) if range.contains('-') => (contig, Some(range)),
            _ => (region, None),
        };

        let Some(range) = range else {
            return Ok(Self {
                contig: contig.to_string(),
                start: 0,
                end: u64::MAX,
            });
        };

        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| RegionParseError::InvalidRange(range.to_string()))?;
        let start = parse_position(start)?;
        let end = parse_position(end)?;

        if start == 0 || start > end {
            return Err(RegionParseError::StartAfterEnd { start, end });
        }

        Ok(Self {
            contig: contig.to_string(),
            start: start - 1,
            end,
        })
    }
}

fn parse_position(raw: &str) -> Result<u64, RegionParseError> {
    raw.trim()
        .replace(',', "")
        .parse::<u64>()
        .map_err(|_| RegionParseError::InvalidPosition(raw.to_string()))
}

/// Keep records overlapping any region; no regions keeps everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionFilter {
    regions: Vec<GenomicRegion>,
}

impl RegionFilter {
    pub fn new(regions: Vec<GenomicRegion>) -> Self {
        Self { regions }
    }

    pub fn parse_all<I, S>(regions: I) -> Result<Self, RegionParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let regions = regions
            .into_iter()
            .map(|r| r.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(regions))
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn accepts(&self, record: &RawVariantRecord) -> bool {
        self.regions.is_empty() || self.regions.iter().any(|r| r.overlaps(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordOrigin;

    #[test]
    fn test_parse_regions() {
        let region: GenomicRegion = "chr20:14,370-17,330".parse().unwrap();
        assert_eq!(region.contig, "chr20");
        assert_eq!(region.start, 14_369);
        assert_eq!(region.end, 17_330);

        let whole: GenomicRegion = "chrY".parse().unwrap();
        assert_eq!(whole.start, 0);
        assert_eq!(whole.end, u64::MAX);

        // HLA contig names contain ':' without a range
        let hla: GenomicRegion = "HLA-A*01:01".parse().unwrap();
        assert_eq!(hla.contig, "HLA-A*01:01");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<GenomicRegion>(), Err(RegionParseError::Empty));
        assert!(matches!(
            "chr1:x-10".parse::<GenomicRegion>(),
            Err(RegionParseError::InvalidPosition(_))
        ));
        assert!(matches!(
            "chr1:20-10".parse::<GenomicRegion>(),
            Err(RegionParseError::StartAfterEnd { .. })
        ));
    }

    #[test]
    fn test_filter() {
        let filter = RegionFilter::parse_all(["chr20:14370-14370"]).unwrap();
        let hit = RawVariantRecord::new("chr20", 14_369, "G", RecordOrigin::new(0, 0));
        let miss = RawVariantRecord::new("chr20", 17_329, "T", RecordOrigin::new(0, 1));
        let other = RawVariantRecord::new("chr19", 14_369, "G", RecordOrigin::new(0, 2));

        assert!(filter.accepts(&hit));
        assert!(!filter.accepts(&miss));
        assert!(!filter.accepts(&other));
        assert!(RegionFilter::default().accepts(&other));
    }
}
