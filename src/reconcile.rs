// ⚖️ Reconciliation Engine - resolved records → groups, payers, details
//
// Write order per batch:
//   1. groups that do not exist yet, then re-read every group by name
//   2. payers missing under their (group, raw name) key
//   3. one detail per record (repeat observations are kept on purpose)
//
// Natural keys make a re-run idempotent for groups and payers.

use crate::entities::{NewDetail, NewGroup, NewPayer};
use crate::error::{IngestError, StoreError};
use crate::inference::ResolvedRecord;
use crate::store::PayerStore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::info;

// ============================================================================
// RECONCILE REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub records: usize,
    pub groups_created: usize,
    pub groups_reused: usize,
    pub payers_created: usize,
    pub payers_reused: usize,
    pub details_created: usize,
}

impl ReconcileReport {
    pub fn summary(&self) -> String {
        format!(
            "{} records: {} new groups ({} existing), {} new payers ({} existing), {} details",
            self.records,
            self.groups_created,
            self.groups_reused,
            self.payers_created,
            self.payers_reused,
            self.details_created
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine<'s, S: PayerStore + ?Sized> {
    store: &'s S,
}

impl<'s, S: PayerStore + ?Sized> ReconciliationEngine<'s, S> {
    pub fn new(store: &'s S) -> Self {
        ReconciliationEngine { store }
    }

    /// Persist one batch. The caller owns the surrounding transaction.
    pub fn reconcile(&self, resolved: &[ResolvedRecord]) -> Result<ReconcileReport, IngestError> {
        let mut report = ReconcileReport {
            records: resolved.len(),
            ..ReconcileReport::default()
        };
        if resolved.is_empty() {
            return Ok(report);
        }

        let group_ids = self.upsert_groups(resolved, &mut report)?;
        let payer_ids = self.upsert_payers(resolved, &group_ids, &mut report)?;

        let details = resolved
            .iter()
            .map(|r| {
                let key = (group_id_of(&group_ids, r)?, r.record.raw_name().to_string());
                let payer_id = payer_ids.get(&key).copied().ok_or_else(|| {
                    IngestError::store(
                        "details",
                        StoreError::NotFound {
                            entity: "payer",
                            id: format!("{}/{}", key.0, key.1),
                        },
                    )
                })?;
                Ok(NewDetail {
                    payer_id,
                    raw_name: key.1,
                    payer_number: r.record.payer_id.clone(),
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        let created = self
            .store
            .create_details(&details)
            .map_err(|e| IngestError::store("details", e))?;
        report.details_created = created.len();

        info!(
            groups_created = report.groups_created,
            payers_created = report.payers_created,
            details_created = report.details_created,
            "reconciled batch"
        );

        Ok(report)
    }

    /// Group name → id for every group the batch references
    fn upsert_groups(
        &self,
        resolved: &[ResolvedRecord],
        report: &mut ReconcileReport,
    ) -> Result<HashMap<String, i64>, IngestError> {
        let existing: HashSet<String> = self
            .store
            .list_groups()
            .map_err(|e| IngestError::store("groups", e))?
            .into_iter()
            .map(|g| g.name)
            .collect();

        let mut seen = HashSet::new();
        let mut missing = Vec::new();
        for r in resolved {
            let name = r.assignment.group_name.as_str();
            if !seen.insert(name) {
                continue;
            }
            if existing.contains(name) {
                report.groups_reused += 1;
            } else {
                missing.push(NewGroup::new(name));
            }
        }

        if !missing.is_empty() {
            let upserted = self
                .store
                .create_groups(&missing)
                .map_err(|e| IngestError::store("groups", e))?;

            // Rows re-read after a unique conflict were written by someone else
            for u in &upserted {
                if u.inserted {
                    report.groups_created += 1;
                } else {
                    report.groups_reused += 1;
                }
            }
        }

        // Re-read so payers only ever point at persisted identities
        let group_ids: HashMap<String, i64> = self
            .store
            .list_groups()
            .map_err(|e| IngestError::store("groups", e))?
            .into_iter()
            .map(|g| (g.name, g.id))
            .collect();

        Ok(group_ids)
    }

    /// (group id, raw name) → payer id for every payer the batch references
    fn upsert_payers(
        &self,
        resolved: &[ResolvedRecord],
        group_ids: &HashMap<String, i64>,
        report: &mut ReconcileReport,
    ) -> Result<HashMap<(i64, String), i64>, IngestError> {
        let mut payer_ids = HashMap::new();
        let mut missing = Vec::new();
        let mut queued = HashSet::new();

        for r in resolved {
            let group_id = group_id_of(group_ids, r)?;
            let key = (group_id, r.record.raw_name().to_string());
            if payer_ids.contains_key(&key) || queued.contains(&key) {
                continue;
            }

            let found = self
                .store
                .find_payer_by(group_id, &key.1)
                .map_err(|e| IngestError::store("payers", e))?;
            match found {
                Some(payer) => {
                    report.payers_reused += 1;
                    payer_ids.insert(key, payer.id);
                }
                None => {
                    missing.push(NewPayer {
                        name: key.1.clone(),
                        group_id,
                    });
                    queued.insert(key);
                }
            }
        }

        if !missing.is_empty() {
            let upserted = self
                .store
                .create_payers(&missing)
                .map_err(|e| IngestError::store("payers", e))?;

            for u in upserted {
                if u.inserted {
                    report.payers_created += 1;
                } else {
                    report.payers_reused += 1;
                }
                payer_ids.insert((u.row.group_id, u.row.name), u.row.id);
            }
        }

        Ok(payer_ids)
    }
}

fn group_id_of(group_ids: &HashMap<String, i64>, r: &ResolvedRecord) -> Result<i64, IngestError> {
    group_ids
        .get(&r.assignment.group_name)
        .copied()
        .ok_or_else(|| {
            IngestError::store(
                "groups",
                StoreError::NotFound {
                    entity: "payer_group",
                    id: r.assignment.group_name.clone(),
                },
            )
        })
}

// ============================================================================
// TESTS
// ============================================================================
