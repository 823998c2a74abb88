// ==============================================================================
// merger.rs - Variant Merging
// ==============================================================================
// Description: Combines grouped raw records describing the same variant into
//              one merged row under a selectable strategy
// Author: Matt Barham
// Created: 2026-09-05
// Modified: 2026-10-12
// Version: 0.3.0
// ==============================================================================
// Member order:
//   Group members are sorted by RecordOrigin (source index, then record index
//   within the source). Members sharing an origin are replays of one record and
//   are collapsed before merging. When two members carry a call for the same
//   sample id, the later member in this order wins; the call keeps the slot
//   where the sample first appeared.
// ==============================================================================

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

use crate::key::VariantKey;
use crate::models::{CallRecord, MergedVariant, RawValue, RawVariantRecord};
use crate::schema::FieldCategory;

/// Records in a merge group that cannot be unified
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Incompatible records for variant {key}: {reason}")]
pub struct IncompatibleRecordsError {
    pub key: VariantKey,
    pub reason: String,
}

/// How a group of records sharing a merge key becomes output rows
#[derive(Debug, Clone)]
pub enum MergeStrategy {
    /// No merging; every group must hold exactly one record
    None,
    /// Union alternates, concatenate calls across all group members
    MoveToCalls {
        /// INFO keys matching this pattern are copied into each call
        info_keys_to_move_to_calls: Option<Regex>,
    },
}

impl MergeStrategy {
    pub fn move_to_calls() -> Self {
        MergeStrategy::MoveToCalls {
            info_keys_to_move_to_calls: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MergeStrategy::None => "NONE",
            MergeStrategy::MoveToCalls { .. } => "MOVE_TO_CALLS",
        }
    }

    /// Category an INFO key is written under after merging
    pub fn info_category(&self, key: &str) -> FieldCategory {
        if self.moves_to_calls(key) {
            FieldCategory::Format
        } else {
            FieldCategory::Info
        }
    }

    fn moves_to_calls(&self, key: &str) -> bool {
        match self {
            MergeStrategy::MoveToCalls {
                info_keys_to_move_to_calls: Some(pattern),
            } => pattern.is_match(key),
            _ => false,
        }
    }

    /// Merge ordered, de-duplicated members
    fn merge_group(
        &self,
        key: &VariantKey,
        members: Vec<RawVariantRecord>,
        allow_incompatible: bool,
    ) -> Result<MergeOutcome, IncompatibleRecordsError> {
        match self {
            MergeStrategy::None => merge_none(key, members, allow_incompatible),
            MergeStrategy::MoveToCalls { .. } => {
                self.merge_move_to_calls(key, members, allow_incompatible)
            }
        }
    }

    fn merge_move_to_calls(
        &self,
        key: &VariantKey,
        members: Vec<RawVariantRecord>,
        allow_incompatible: bool,
    ) -> Result<MergeOutcome, IncompatibleRecordsError> {
        let mut members = members.into_iter();
        let first = members.next().ok_or_else(|| IncompatibleRecordsError {
            key: key.clone(),
            reason: "empty merge group".to_string(),
        })?;

        let mut conflicts = 0u32;
        let mut merged = MergedVariant {
            contig: first.contig.clone(),
            start: first.start,
            end: first.resolved_end(),
            reference_bases: first.reference_bases.clone(),
            alternate_bases: Vec::new(),
            names: Vec::new(),
            info: BTreeMap::new(),
            calls: Vec::new(),
            merge_conflicts: 0,
        };
        let mut call_slots: HashMap<i64, usize> = HashMap::new();

        self.absorb(&mut merged, &mut call_slots, first);

        for member in members {
            if let Some(reason) = incompatibility(&merged, &member) {
                if !allow_incompatible {
                    return Err(IncompatibleRecordsError {
                        key: key.clone(),
                        reason,
                    });
                }
                warn!("Tolerating incompatible record in {}: {}", key, reason);
                conflicts += 1;
            }
            self.absorb(&mut merged, &mut call_slots, member);
        }

        merged.merge_conflicts = conflicts;
        Ok(MergeOutcome {
            variants: vec![merged],
            tolerated_conflicts: conflicts,
            replayed_duplicates: 0,
        })
    }

    /// Fold one member into the merged row
    fn absorb(
        &self,
        merged: &mut MergedVariant,
        call_slots: &mut HashMap<i64, usize>,
        member: RawVariantRecord,
    ) {
        push_unique(&mut merged.alternate_bases, member.alternate_bases);
        push_unique(&mut merged.names, member.names);

        let mut moved: Vec<(String, RawValue)> = Vec::new();
        for (info_key, value) in member.info {
            if self.moves_to_calls(&info_key) {
                moved.push((info_key, value));
            } else {
                merged.info.entry(info_key).or_insert(value);
            }
        }

        for mut call in member.calls {
            for (info_key, value) in &moved {
                call.fields
                    .entry(info_key.clone())
                    .or_insert_with(|| value.clone());
            }
            upsert_call(&mut merged.calls, call_slots, call);
        }
    }
}

fn merge_none(
    key: &VariantKey,
    members: Vec<RawVariantRecord>,
    allow_incompatible: bool,
) -> Result<MergeOutcome, IncompatibleRecordsError> {
    match members.len() {
        0 => Err(IncompatibleRecordsError {
            key: key.clone(),
            reason: "empty merge group".to_string(),
        }),
        1 => Ok(MergeOutcome {
            variants: members.into_iter().map(MergedVariant::from_record).collect(),
            tolerated_conflicts: 0,
            replayed_duplicates: 0,
        }),
        n if allow_incompatible => {
            warn!(
                "Tolerating {} distinct records for {} under NONE strategy; emitting each",
                n, key
            );
            let variants = members
                .into_iter()
                .map(|record| {
                    let mut variant = MergedVariant::from_record(record);
                    variant.merge_conflicts = 1;
                    variant
                })
                .collect();
            Ok(MergeOutcome {
                variants,
                tolerated_conflicts: (n - 1) as u32,
                replayed_duplicates: 0,
            })
        }
        n => Err(IncompatibleRecordsError {
            key: key.clone(),
            reason: format!("{} distinct records share this key under NONE strategy", n),
        }),
    }
}

/// Reason a member cannot join the merged row, if any
fn incompatibility(merged: &MergedVariant, member: &RawVariantRecord) -> Option<String> {
    if member.contig != merged.contig {
        Some(format!(
            "contig mismatch ({} vs {})",
            merged.contig, member.contig
        ))
    } else if member.start != merged.start {
        Some(format!("start mismatch ({} vs {})", merged.start, member.start))
    } else if member.reference_bases != merged.reference_bases {
        Some(format!(
            "reference bases mismatch ({} vs {})",
            merged.reference_bases, member.reference_bases
        ))
    } else {
        None
    }
}

fn push_unique(target: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

fn upsert_call(calls: &mut Vec<CallRecord>, slots: &mut HashMap<i64, usize>, call: CallRecord) {
    match slots.get(&call.sample_id) {
        Some(&slot) => calls[slot] = call,
        None => {
            slots.insert(call.sample_id, calls.len());
            calls.push(call);
        }
    }
}

/// Result of merging one group
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Rows produced (one, except NONE under tolerance)
    pub variants: Vec<MergedVariant>,
    /// Incompatibilities that were tolerated
    pub tolerated_conflicts: u32,
    /// Replayed copies dropped before merging
    pub replayed_duplicates: u32,
}

/// Merges groups of records sharing a `VariantKey`
#[derive(Debug, Clone)]
pub struct VariantMerger {
    strategy: MergeStrategy,
    allow_incompatible_records: bool,
}

impl VariantMerger {
    pub fn new(strategy: MergeStrategy) -> Self {
        Self {
            strategy,
            allow_incompatible_records: false,
        }
    }

    /// Tolerate incompatible members (best-effort merge + diagnostic count)
    pub fn with_allow_incompatible_records(mut self, allow: bool) -> Self {
        self.allow_incompatible_records = allow;
        self
    }

    pub fn strategy(&self) -> &MergeStrategy {
        &self.strategy
    }

    /// Merge one group
    ///
    /// Members are ordered by origin and replays collapsed first, so the
    /// result is independent of the order the group was assembled in.
    pub fn merge(
        &self,
        key: &VariantKey,
        mut group: Vec<RawVariantRecord>,
    ) -> Result<MergeOutcome, IncompatibleRecordsError> {
        let delivered = group.len();
        group.sort_by_key(|record| record.origin);
        group.dedup_by_key(|record| record.origin);
        let replayed = (delivered - group.len()) as u32;

        if replayed > 0 {
            debug!("Dropped {} replayed record(s) for {}", replayed, key);
        }

        let mut outcome =
            self.strategy
                .merge_group(key, group, self.allow_incompatible_records)?;
        outcome.replayed_duplicates = replayed;
        Ok(outcome)
    }
}
