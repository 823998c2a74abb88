// ==============================================================================
// key.rs - Merge Key Extraction
// ==============================================================================
// Description: Grouping key used to detect records describing the same variant
// Author: Matt Barham
// Created: 2026-09-05
// Modified: 2026-09-05
// Version: 0.3.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::models::RawVariantRecord;

/// (contig, start, reference bases)
///
/// Alternate bases are not part of the key: whether differing alternates are
/// unioned or rejected is the merge strategy's call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantKey {
    pub contig: String,
    pub start: u64,
    pub reference_bases: String,
}

impl VariantKey {
    pub fn new(contig: impl Into<String>, start: u64, reference_bases: impl Into<String>) -> Self {
        Self {
            contig: contig.into(),
            start,
            reference_bases: reference_bases.into(),
        }
    }

    /// Compute the key of a record
    pub fn of(record: &RawVariantRecord) -> Self {
        Self::new(
            record.contig.clone(),
            record.start,
            record.reference_bases.clone(),
        )
    }

    /// Bucket index for spreading groups over `buckets` workers
    pub fn bucket(&self, buckets: usize) -> usize {
        if buckets <= 1 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        (hasher.finish() % buckets as u64) as usize
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.contig, self.start, self.reference_bases)
    }
}

/// Pluggable key function; the pipeline uses `VariantKey::of`
pub trait VariantKeyExtractor: Send + Sync {
    fn key(&self, record: &RawVariantRecord) -> VariantKey;
}

/// Default extractor: (contig, start, reference bases)
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionKeyExtractor;

impl VariantKeyExtractor for PositionKeyExtractor {
    fn key(&self, record: &RawVariantRecord) -> VariantKey {
        VariantKey::of(record)
    }
}
