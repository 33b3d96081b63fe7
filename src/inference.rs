// 🧭 Group Inference Cascade - record → canonical payer group
//
// Decision order (first match wins):
//   1. Known alias      partial_ratio(alias, name)              > keyword_match
//   2. Payer number     same number AND ratio(payer, name)      > payer_number_match
//   3. Group name       partial_ratio(group, simplified name)   > semantic_match
//   4. Fallback         Title Case of simplified name, or "Unknown"
//
// All records of one batch are decided against the same read-only snapshot.

use crate::config::MatchConfig;
use crate::entities::GroupWithPayers;
use crate::error::StoreError;
use crate::fuzz::{partial_ratio, ratio};
use crate::loader::PayerRecord;
use crate::normalizer::{title_case, Normalizer};
use crate::store::PayerStore;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Sentinel group for records without a usable name
pub const UNKNOWN_GROUP: &str = "Unknown";

// ============================================================================
// SNAPSHOT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPayer {
    pub name: String,
    pub payer_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotGroup {
    pub name: String,

    /// One entry per recorded observation (payer name + the number seen with it)
    pub payers: Vec<SnapshotPayer>,
}

/// Point-in-time view of existing groups, in store insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    groups: Vec<SnapshotGroup>,
}

impl GroupSnapshot {
    pub fn new(groups: Vec<SnapshotGroup>) -> Self {
        GroupSnapshot { groups }
    }

    pub fn empty() -> Self {
        GroupSnapshot::default()
    }

    /// Read the snapshot once from the store
    pub fn load<S: PayerStore + ?Sized>(store: &S) -> Result<Self, StoreError> {
        let groups = store.list_groups_with_payers_and_details()?;
        Ok(GroupSnapshot::from_groups(&groups))
    }

    pub fn from_groups(groups: &[GroupWithPayers]) -> Self {
        let groups = groups
            .iter()
            .map(|g| SnapshotGroup {
                name: g.group.name.clone(),
                payers: g
                    .payers
                    .iter()
                    .flat_map(|p| {
                        p.details.iter().map(move |d| SnapshotPayer {
                            name: p.payer.name.clone(),
                            payer_number: d.payer_number.clone(),
                        })
                    })
                    .collect(),
            })
            .collect();

        GroupSnapshot { groups }
    }

    pub fn groups(&self) -> &[SnapshotGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

// ============================================================================
// DECISION
// ============================================================================

/// Which cascade step produced the assignment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchRule {
    /// A predefined alias matched the raw name
    KnownAlias { alias: String },

    /// Same payer number and a similar stored payer name
    PayerNumber,

    /// An existing group name matched the simplified name
    GroupName,

    /// New (or same-named) group from the simplified name
    NewGroup,

    /// No usable name
    Unknown,
}

impl MatchRule {
    pub fn label(&self) -> &'static str {
        match self {
            MatchRule::KnownAlias { .. } => "known_alias",
            MatchRule::PayerNumber => "payer_number",
            MatchRule::GroupName => "group_name",
            MatchRule::NewGroup => "new_group",
            MatchRule::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAssignment {
    pub group_name: String,
    pub rule: MatchRule,
}

impl GroupAssignment {
    fn new(group_name: impl Into<String>, rule: MatchRule) -> Self {
        GroupAssignment {
            group_name: group_name.into(),
            rule,
        }
    }

    fn unknown() -> Self {
        GroupAssignment::new(UNKNOWN_GROUP, MatchRule::Unknown)
    }
}

/// A record paired with its decision by input position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    pub row: usize,
    pub record: PayerRecord,
    pub assignment: GroupAssignment,
}

// ============================================================================
// INFERRER
// ============================================================================

pub struct GroupInferrer<'a> {
    config: &'a MatchConfig,
    normalizer: Normalizer,
}

impl<'a> GroupInferrer<'a> {
    pub fn new(config: &'a MatchConfig) -> Self {
        GroupInferrer {
            config,
            normalizer: Normalizer::new(config),
        }
    }

    /// Decide the group for one record. Pure: same record + snapshot, same answer.
    pub fn infer(&self, record: &PayerRecord, snapshot: &GroupSnapshot) -> GroupAssignment {
        let name = match record.name.text().map(str::trim) {
            Some(n) if !n.is_empty() => n.to_lowercase(),
            _ => return GroupAssignment::unknown(),
        };

        if let Some(assignment) = self.match_known_alias(&name) {
            return assignment;
        }

        let number = record
            .payer_id
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        if let Some(number) = number {
            if let Some(assignment) = self.match_payer_number(&name, number, snapshot) {
                return assignment;
            }
        }

        let normalized = self.normalizer.normalize(&name);

        if let Some(assignment) = self.match_group_name(&normalized.simplified, snapshot) {
            return assignment;
        }

        if normalized.simplified.is_empty() {
            GroupAssignment::unknown()
        } else {
            GroupAssignment::new(title_case(&normalized.simplified), MatchRule::NewGroup)
        }
    }

    /// Decide a whole batch in parallel chunks against one snapshot.
    /// Output is in input order and each entry carries its input row.
    pub fn infer_batch(
        &self,
        records: &[PayerRecord],
        snapshot: &GroupSnapshot,
    ) -> Vec<ResolvedRecord> {
        let chunk_size = self.config.chunk_size.max(1);

        let chunks: Vec<Vec<ResolvedRecord>> = records
            .par_chunks(chunk_size)
            .enumerate()
            .map(|(chunk_idx, chunk)| {
                chunk
                    .iter()
                    .enumerate()
                    .map(|(offset, record)| {
                        let row = chunk_idx * chunk_size + offset;
                        let assignment = self.infer(record, snapshot);
                        debug!(
                            row,
                            name = record.raw_name(),
                            group = %assignment.group_name,
                            rule = assignment.rule.label(),
                            "inferred group"
                        );
                        ResolvedRecord {
                            row,
                            record: record.clone(),
                            assignment,
                        }
                    })
                    .collect()
            })
            .collect();

        chunks.into_iter().flatten().collect()
    }

    /// Step 1: predefined groups in configured order
    fn match_known_alias(&self, name: &str) -> Option<GroupAssignment> {
        let threshold = self.config.thresholds.keyword_match;

        self.config.known_groups.iter().find_map(|group| {
            group
                .aliases
                .iter()
                .find(|alias| partial_ratio(&alias.to_lowercase(), name) > threshold)
                .map(|alias| {
                    GroupAssignment::new(
                        group.name.clone(),
                        MatchRule::KnownAlias {
                            alias: alias.clone(),
                        },
                    )
                })
        })
    }

    /// Step 2: exact payer number plus a similar stored name
    fn match_payer_number(
        &self,
        name: &str,
        number: &str,
        snapshot: &GroupSnapshot,
    ) -> Option<GroupAssignment> {
        let threshold = self.config.thresholds.payer_number_match;

        snapshot
            .groups()
            .iter()
            .find(|group| {
                group.payers.iter().any(|payer| {
                    payer.payer_number.as_deref() == Some(number)
                        && ratio(&payer.name.to_lowercase(), name) > threshold
                })
            })
            .map(|group| GroupAssignment::new(group.name.clone(), MatchRule::PayerNumber))
    }

    /// Step 3: existing group names against the simplified name
    fn match_group_name(
        &self,
        simplified: &str,
        snapshot: &GroupSnapshot,
    ) -> Option<GroupAssignment> {
        if simplified.is_empty() {
            return None;
        }
        let threshold = self.config.thresholds.semantic_match;

        snapshot
            .groups()
            .iter()
            .find(|group| partial_ratio(&group.name.to_lowercase(), simplified) > threshold)
            .map(|group| GroupAssignment::new(group.name.clone(), MatchRule::GroupName))
    }
}

// ============================================================================
// TESTS
// ============================================================================
