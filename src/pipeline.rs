// 🚚 Ingestion Pipeline - workbook → store in one batch
//
// load (parallel per sheet) → snapshot → infer (parallel per chunk) → reconcile
//
// Everything after loading runs inside one IMMEDIATE transaction, so a
// concurrent ingester waits for us and a failure leaves the store untouched.

use crate::config::{Config, MatchConfig};
use crate::error::IngestError;
use crate::inference::{GroupInferrer, GroupSnapshot};
use crate::loader::{PayerRecord, SheetLoader, SheetOutcome, SheetReport};
use crate::reconcile::{ReconcileReport, ReconciliationEngine};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

// ============================================================================
// REPORTS
// ============================================================================

/// Result of resolving and storing one batch of records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Records per cascade rule label
    pub rule_counts: BTreeMap<String, usize>,
    pub reconcile: ReconcileReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub run_id: String,
    pub source: PathBuf,
    pub source_sha256: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sheets: Vec<SheetReport>,
    pub excluded: Vec<String>,
    pub records_loaded: usize,
    pub rule_counts: BTreeMap<String, usize>,
    pub reconcile: ReconcileReport,
}

impl IngestReport {
    pub fn sheets_loaded(&self) -> usize {
        self.sheets
            .iter()
            .filter(|s| matches!(s.outcome, SheetOutcome::Loaded { .. }))
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "Ingested {} ({} of {} sheets, {} excluded): {}",
            self.source.display(),
            self.sheets_loaded(),
            self.sheets.len(),
            self.excluded.len(),
            self.reconcile.summary()
        )
    }
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Load a workbook and merge its payers into the store.
///
/// Only an unreadable workbook or a store failure is an error; bad sheets are
/// reported in `IngestReport::sheets`.
pub fn ingest_workbook(
    conn: &mut Connection,
    path: &Path,
    config: &Config,
) -> Result<IngestReport, IngestError> {
    let started_at = Utc::now();
    let run_id = uuid::Uuid::new_v4().to_string();
    info!(run_id = %run_id, path = %path.display(), "starting ingestion");

    let source_sha256 = file_digest(path)?;
    let loaded = SheetLoader::new(&config.loader).load(path)?;

    let outcome = ingest_records(conn, &loaded.records, &config.matching)?;

    let report = IngestReport {
        run_id,
        source: path.to_path_buf(),
        source_sha256,
        started_at,
        finished_at: Utc::now(),
        sheets: loaded.sheets,
        excluded: loaded.excluded,
        records_loaded: loaded.records.len(),
        rule_counts: outcome.rule_counts,
        reconcile: outcome.reconcile,
    };

    info!(
        run_id = %report.run_id,
        records = report.records_loaded,
        groups_created = report.reconcile.groups_created,
        payers_created = report.reconcile.payers_created,
        details_created = report.reconcile.details_created,
        "ingestion complete"
    );

    Ok(report)
}

/// Resolve already-loaded records against one snapshot and store them
/// atomically. An empty batch opens no transaction.
pub fn ingest_records(
    conn: &mut Connection,
    records: &[PayerRecord],
    config: &MatchConfig,
) -> Result<BatchOutcome, IngestError> {
    if records.is_empty() {
        info!("no records to ingest");
        return Ok(BatchOutcome::default());
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| IngestError::store("snapshot", e))?;

    let snapshot = GroupSnapshot::load(&*tx).map_err(|e| IngestError::store("snapshot", e))?;
    info!(groups = snapshot.len(), "loaded group snapshot");

    let resolved = GroupInferrer::new(config).infer_batch(records, &snapshot);

    let mut rule_counts = BTreeMap::new();
    for r in &resolved {
        *rule_counts
            .entry(r.assignment.rule.label().to_string())
            .or_insert(0) += 1;
    }

    let reconcile = ReconciliationEngine::new(&*tx).reconcile(&resolved)?;

    tx.commit().map_err(|e| IngestError::store("commit", e))?;

    Ok(BatchOutcome {
        rule_counts,
        reconcile,
    })
}

fn file_digest(path: &Path) -> Result<String, IngestError> {
    let bytes = std::fs::read(path).map_err(|e| IngestError::OpenWorkbook {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{count_rows, setup_database, PayerStore};
    use rust_xlsxwriter::Workbook;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn write_workbook(dir: &tempfile::TempDir, sheets: &[(&str, Vec<(&str, &str)>)]) -> PathBuf {
        let mut workbook = Workbook::new();

        for (name, rows) in sheets {
            let sheet = workbook.add_worksheet();
            sheet.set_name(*name).unwrap();
            sheet.write_string(0, 0, "Payer ID").unwrap();
            sheet.write_string(0, 1, "Payer Name").unwrap();

            for (i, (id, payer)) in rows.iter().enumerate() {
                let row = (i + 1) as u32;
                if !id.is_empty() {
                    sheet.write_string(row, 0, *id).unwrap();
                }
                if !payer.is_empty() {
                    sheet.write_string(row, 1, *payer).unwrap();
                }
            }
        }

        let path = dir.path().join("payers.xlsx");
        workbook.save(&path).unwrap();
        path
    }

    const PAYERS: &[(&str, &str)] = &[
        ("60054", "Aetna Life"),
        ("62308", "Cigna"),
        ("77001", "Zephyr Regional Trust"),
    ];

    #[test]
    fn test_ingest_workbook_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_workbook(&dir, &[("Payers", PAYERS.to_vec())]);
        let mut conn = test_conn();

        let report = ingest_workbook(&mut conn, &path, &Config::default()).unwrap();

        assert_eq!(report.records_loaded, 3);
        assert_eq!(report.sheets_loaded(), 1);
        assert_eq!(report.rule_counts.get("known_alias"), Some(&2));
        assert_eq!(report.rule_counts.get("new_group"), Some(&1));
        assert_eq!(report.reconcile.groups_created, 3);
        assert_eq!(report.source_sha256.len(), 64);

        let names: Vec<String> = conn.list_groups().unwrap().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["Aetna", "Cigna", "Zephyr Regional Trust"]);
    }

    #[test]
    fn test_ingest_is_idempotent_on_groups_and_payers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_workbook(&dir, &[("Payers", PAYERS.to_vec())]);
        let mut conn = test_conn();
        let config = Config::default();

        ingest_workbook(&mut conn, &path, &config).unwrap();
        let second = ingest_workbook(&mut conn, &path, &config).unwrap();

        assert_eq!(second.reconcile.groups_created, 0);
        assert_eq!(second.reconcile.payers_created, 0);
        assert_eq!(count_rows(&conn, "payer_group").unwrap(), 3);
        assert_eq!(count_rows(&conn, "payer").unwrap(), 3);
        assert_eq!(count_rows(&conn, "payer_detail").unwrap(), 6);
    }

    #[test]
    fn test_legend_sheet_never_reaches_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_workbook(
            &dir,
            &[
                ("Payers", vec![("62308", "Cigna")]),
                ("Legend", vec![("X1", "Legend Only Payer")]),
            ],
        );
        let mut conn = test_conn();

        let report = ingest_workbook(&mut conn, &path, &Config::default()).unwrap();

        assert_eq!(report.excluded, vec!["Legend".to_string()]);
        let details = conn.list_details().unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].raw_name, "Cigna");
    }

    #[test]
    fn test_missing_workbook_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = test_conn();

        let err = ingest_workbook(&mut conn, &dir.path().join("nope.xlsx"), &Config::default())
            .unwrap_err();

        assert!(matches!(err, IngestError::OpenWorkbook { .. }));
        assert_eq!(err.stage(), "load");
    }

    #[test]
    fn test_empty_workbook_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_workbook(&dir, &[("Payers", vec![])]);
        let mut conn = test_conn();

        let report = ingest_workbook(&mut conn, &path, &Config::default()).unwrap();

        assert_eq!(report.records_loaded, 0);
        assert_eq!(report.reconcile, ReconcileReport::default());
        assert_eq!(count_rows(&conn, "payer_group").unwrap(), 0);
    }

    #[test]
    fn test_store_failure_rolls_back_the_batch() {
        let mut conn = test_conn();
        conn.execute_batch(
            "CREATE TRIGGER reject_details BEFORE INSERT ON payer_detail
             BEGIN SELECT RAISE(ABORT, 'details rejected'); END;",
        )
        .unwrap();

        let records = vec![PayerRecord::new(Some("Aetna Life"), Some("60054"))];
        let err = ingest_records(&mut conn, &records, &MatchConfig::default()).unwrap_err();

        assert_eq!(err.stage(), "details");
        // Groups and payers written earlier in the batch are gone too
        assert_eq!(count_rows(&conn, "payer_group").unwrap(), 0);
        assert_eq!(count_rows(&conn, "payer").unwrap(), 0);
    }

    #[test]
    fn test_batch_reads_snapshot_once() {
        let mut conn = test_conn();

        // On a fresh store both records start their own group, even though
        // the second would match the first one's group on a later run
        let records = vec![
            PayerRecord::new(Some("Zephyr Regional Trust"), None),
            PayerRecord::new(Some("Zephyr Regional Trust West"), None),
        ];
        let outcome = ingest_records(&mut conn, &records, &MatchConfig::default()).unwrap();

        assert_eq!(outcome.reconcile.groups_created, 2);
        assert_eq!(outcome.rule_counts.get("new_group"), Some(&2));

        let rerun = ingest_records(
            &mut conn,
            &[PayerRecord::new(Some("Zephyr Regional Trust West"), None)],
            &MatchConfig::default(),
        )
        .unwrap();
        assert_eq!(rerun.rule_counts.get("group_name"), Some(&1));
    }
}
