use crate::entities::{
    DetailView, GroupWithPayers, NewDetail, NewGroup, NewPayer, Payer, PayerDetail, PayerGroup,
    PayerWithDetails,
};
use crate::error::StoreError;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::collections::HashMap;
use tracing::{info, warn};

/// Read/write primitives the resolution engine needs from persistence.
///
/// Implemented for `rusqlite::Connection`; a `rusqlite::Transaction` derefs to a
/// connection, so the same calls run inside a batch transaction.
pub trait PayerStore {
    /// All groups, in insertion order
    fn list_groups(&self) -> Result<Vec<PayerGroup>, StoreError>;

    /// All groups with nested payers and details, in insertion order
    fn list_groups_with_payers_and_details(&self) -> Result<Vec<GroupWithPayers>, StoreError>;

    fn find_group_by_name(&self, name: &str) -> Result<Option<PayerGroup>, StoreError>;

    fn find_payer_by(&self, group_id: i64, name: &str) -> Result<Option<Payer>, StoreError>;

    /// Insert groups; names that already exist resolve to the existing row
    fn create_groups(&self, batch: &[NewGroup]) -> Result<Vec<Upserted<PayerGroup>>, StoreError>;

    /// Insert payers; (group, name) pairs that already exist resolve to the existing row
    fn create_payers(&self, batch: &[NewPayer]) -> Result<Vec<Upserted<Payer>>, StoreError>;

    fn create_details(&self, batch: &[NewDetail]) -> Result<Vec<PayerDetail>, StoreError>;

    /// Move every payer of `source_group_id` under `target_group_id`.
    /// Returns the number of source payers handled.
    fn reassign_payers(&self, source_group_id: i64, target_group_id: i64)
        -> Result<usize, StoreError>;

    fn delete_group(&self, id: i64) -> Result<(), StoreError>;

    /// Detail rows joined with payer and group, for review
    fn list_details(&self) -> Result<Vec<DetailView>, StoreError>;

    fn set_pretty_name(&self, payer_id: i64, pretty_name: Option<&str>) -> Result<(), StoreError>;
}

/// Row returned by a create call, flagged with whether this call inserted it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted<T> {
    pub row: T,
    pub inserted: bool,
}

impl<T> Upserted<T> {
    fn inserted(row: T) -> Self {
        Upserted { row, inserted: true }
    }

    fn existing(row: T) -> Self {
        Upserted {
            row,
            inserted: false,
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<(), StoreError> {
    // WAL for crash recovery; in-memory databases silently keep "memory"
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payer_group (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payer (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            pretty_name TEXT,
            payer_group_id INTEGER NOT NULL REFERENCES payer_group(id),
            UNIQUE (payer_group_id, name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payer_detail (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            payer_id INTEGER NOT NULL REFERENCES payer(id),
            payer_name_raw TEXT NOT NULL,
            payer_number TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payer_detail_payer ON payer_detail(payer_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payer_detail_number ON payer_detail(payer_number)",
        [],
    )?;

    Ok(())
}

/// Merge `source_id` into `target_id` in one transaction: payers move, the
/// source group is deleted. Nothing changes if any step fails.
pub fn merge_groups(
    conn: &mut Connection,
    source_id: i64,
    target_id: i64,
) -> Result<usize, StoreError> {
    if source_id == target_id {
        return Err(StoreError::InvalidMerge { source_id, target_id });
    }

    let tx = conn.transaction()?;
    let moved = tx.reassign_payers(source_id, target_id)?;
    tx.delete_group(source_id)?;
    tx.commit()?;

    info!(source_id, target_id, moved, "merged payer groups");
    Ok(moved)
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64, StoreError> {
    let table = match table {
        "payer_group" | "payer" | "payer_detail" => table,
        other => {
            return Err(StoreError::NotFound {
                entity: "table",
                id: other.to_string(),
            })
        }
    };

    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

// ============================================================================
// SQLITE IMPLEMENTATION
// ============================================================================

impl PayerStore for Connection {
    fn list_groups(&self) -> Result<Vec<PayerGroup>, StoreError> {
        let mut stmt = self.prepare("SELECT id, name FROM payer_group ORDER BY id")?;
        let groups = stmt
            .query_map([], group_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(groups)
    }

    fn list_groups_with_payers_and_details(&self) -> Result<Vec<GroupWithPayers>, StoreError> {
        let groups = self.list_groups()?;

        let mut stmt = self.prepare(
            "SELECT id, name, pretty_name, payer_group_id FROM payer ORDER BY id",
        )?;
        let payers = stmt
            .query_map([], payer_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.prepare(
            "SELECT id, payer_id, payer_name_raw, payer_number FROM payer_detail ORDER BY id",
        )?;
        let details = stmt
            .query_map([], detail_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut details_by_payer: HashMap<i64, Vec<PayerDetail>> = HashMap::new();
        for detail in details {
            details_by_payer.entry(detail.payer_id).or_default().push(detail);
        }

        let mut payers_by_group: HashMap<i64, Vec<PayerWithDetails>> = HashMap::new();
        for payer in payers {
            let details = details_by_payer.remove(&payer.id).unwrap_or_default();
            payers_by_group
                .entry(payer.group_id)
                .or_default()
                .push(PayerWithDetails { payer, details });
        }

        Ok(groups
            .into_iter()
            .map(|group| {
                let payers = payers_by_group.remove(&group.id).unwrap_or_default();
                GroupWithPayers { group, payers }
            })
            .collect())
    }

    fn find_group_by_name(&self, name: &str) -> Result<Option<PayerGroup>, StoreError> {
        let group = self
            .query_row(
                "SELECT id, name FROM payer_group WHERE name = ?1",
                [name],
                group_from_row,
            )
            .optional()?;
        Ok(group)
    }

    fn find_payer_by(&self, group_id: i64, name: &str) -> Result<Option<Payer>, StoreError> {
        let payer = self
            .query_row(
                "SELECT id, name, pretty_name, payer_group_id FROM payer
                 WHERE payer_group_id = ?1 AND name = ?2",
                params![group_id, name],
                payer_from_row,
            )
            .optional()?;
        Ok(payer)
    }

    fn create_groups(&self, batch: &[NewGroup]) -> Result<Vec<Upserted<PayerGroup>>, StoreError> {
        with_savepoint(self, "create_groups", || {
            let mut created = Vec::with_capacity(batch.len());

            for new_group in batch {
                let result = self.execute(
                    "INSERT INTO payer_group (name) VALUES (?1)",
                    [&new_group.name],
                );

                match result {
                    Ok(_) => created.push(Upserted::inserted(PayerGroup {
                        id: self.last_insert_rowid(),
                        name: new_group.name.clone(),
                    })),
                    Err(e) if is_unique_violation(&e) => {
                        warn!(group = %new_group.name, "group already exists, re-reading");
                        let existing = self.find_group_by_name(&new_group.name)?.ok_or_else(|| {
                            StoreError::Conflict {
                                entity: "payer_group",
                                key: new_group.name.clone(),
                            }
                        })?;
                        created.push(Upserted::existing(existing));
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            Ok(created)
        })
    }

    fn create_payers(&self, batch: &[NewPayer]) -> Result<Vec<Upserted<Payer>>, StoreError> {
        with_savepoint(self, "create_payers", || {
            let mut created = Vec::with_capacity(batch.len());

            for new_payer in batch {
                let result = self.execute(
                    "INSERT INTO payer (name, payer_group_id) VALUES (?1, ?2)",
                    params![new_payer.name, new_payer.group_id],
                );

                match result {
                    Ok(_) => created.push(Upserted::inserted(Payer {
                        id: self.last_insert_rowid(),
                        name: new_payer.name.clone(),
                        pretty_name: None,
                        group_id: new_payer.group_id,
                    })),
                    Err(e) if is_unique_violation(&e) => {
                        warn!(
                            payer = %new_payer.name,
                            group_id = new_payer.group_id,
                            "payer already exists, re-reading"
                        );
                        let existing = self
                            .find_payer_by(new_payer.group_id, &new_payer.name)?
                            .ok_or_else(|| StoreError::Conflict {
                                entity: "payer",
                                key: format!("{}/{}", new_payer.group_id, new_payer.name),
                            })?;
                        created.push(Upserted::existing(existing));
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            Ok(created)
        })
    }

    fn create_details(&self, batch: &[NewDetail]) -> Result<Vec<PayerDetail>, StoreError> {
        with_savepoint(self, "create_details", || {
            let mut stmt = self.prepare(
                "INSERT INTO payer_detail (payer_id, payer_name_raw, payer_number)
                 VALUES (?1, ?2, ?3)",
            )?;

            let mut created = Vec::with_capacity(batch.len());
            for new_detail in batch {
                stmt.execute(params![
                    new_detail.payer_id,
                    new_detail.raw_name,
                    new_detail.payer_number,
                ])?;
                created.push(PayerDetail {
                    id: self.last_insert_rowid(),
                    payer_id: new_detail.payer_id,
                    raw_name: new_detail.raw_name.clone(),
                    payer_number: new_detail.payer_number.clone(),
                });
            }

            Ok(created)
        })
    }

    fn reassign_payers(
        &self,
        source_group_id: i64,
        target_group_id: i64,
    ) -> Result<usize, StoreError> {
        if source_group_id == target_group_id {
            return Err(StoreError::InvalidMerge {
                source_id: source_group_id,
                target_id: target_group_id,
            });
        }
        require_group(self, source_group_id)?;
        require_group(self, target_group_id)?;

        with_savepoint(self, "reassign_payers", || {
            let mut stmt = self.prepare(
                "SELECT id, name, pretty_name, payer_group_id FROM payer
                 WHERE payer_group_id = ?1 ORDER BY id",
            )?;
            let payers = stmt
                .query_map([source_group_id], payer_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            for payer in &payers {
                match self.find_payer_by(target_group_id, &payer.name)? {
                    // Same natural key already in the target: fold the observations into it
                    Some(existing) => {
                        self.execute(
                            "UPDATE payer_detail SET payer_id = ?1 WHERE payer_id = ?2",
                            params![existing.id, payer.id],
                        )?;
                        if existing.pretty_name.is_none() && payer.pretty_name.is_some() {
                            self.execute(
                                "UPDATE payer SET pretty_name = ?1 WHERE id = ?2",
                                params![payer.pretty_name, existing.id],
                            )?;
                        }
                        self.execute("DELETE FROM payer WHERE id = ?1", [payer.id])?;
                    }
                    None => {
                        self.execute(
                            "UPDATE payer SET payer_group_id = ?1 WHERE id = ?2",
                            params![target_group_id, payer.id],
                        )?;
                    }
                }
            }

            Ok(payers.len())
        })
    }

    fn delete_group(&self, id: i64) -> Result<(), StoreError> {
        let deleted = self.execute("DELETE FROM payer_group WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "payer_group",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn list_details(&self) -> Result<Vec<DetailView>, StoreError> {
        let mut stmt = self.prepare(
            "SELECT d.id, d.payer_name_raw, d.payer_number,
                    p.id, p.name, p.pretty_name,
                    g.id, g.name
             FROM payer_detail d
             JOIN payer p ON p.id = d.payer_id
             JOIN payer_group g ON g.id = p.payer_group_id
             ORDER BY d.id",
        )?;

        let details = stmt
            .query_map([], |row| {
                Ok(DetailView {
                    detail_id: row.get(0)?,
                    raw_name: row.get(1)?,
                    payer_number: row.get(2)?,
                    payer_id: row.get(3)?,
                    payer_name: row.get(4)?,
                    pretty_name: row.get(5)?,
                    group_id: row.get(6)?,
                    group_name: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(details)
    }

    fn set_pretty_name(&self, payer_id: i64, pretty_name: Option<&str>) -> Result<(), StoreError> {
        let pretty_name = pretty_name.map(str::trim).filter(|s| !s.is_empty());
        let updated = self.execute(
            "UPDATE payer SET pretty_name = ?1 WHERE id = ?2",
            params![pretty_name, payer_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "payer",
                id: payer_id.to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn group_from_row(row: &Row) -> rusqlite::Result<PayerGroup> {
    Ok(PayerGroup {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

fn payer_from_row(row: &Row) -> rusqlite::Result<Payer> {
    Ok(Payer {
        id: row.get(0)?,
        name: row.get(1)?,
        pretty_name: row.get(2)?,
        group_id: row.get(3)?,
    })
}

fn detail_from_row(row: &Row) -> rusqlite::Result<PayerDetail> {
    Ok(PayerDetail {
        id: row.get(0)?,
        payer_id: row.get(1)?,
        raw_name: row.get(2)?,
        payer_number: row.get(3)?,
    })
}

fn require_group(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM payer_group WHERE id = ?1)",
        [id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(StoreError::NotFound {
            entity: "payer_group",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// UNIQUE violations only; foreign-key and NOT NULL failures stay errors
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, message) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || message
                        .as_deref()
                        .is_some_and(|m| m.starts_with("UNIQUE constraint failed")))
        }
        _ => false,
    }
}

/// Run `f` inside a savepoint so a bulk call is all-or-nothing, also when
/// nested in an outer transaction.
fn with_savepoint<T, F>(conn: &Connection, name: &str, f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError>,
{
    conn.execute_batch(&format!("SAVEPOINT {}", name))?;

    match f() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {}", name))?;
            Ok(value)
        }
        Err(e) => {
            conn.execute_batch(&format!("ROLLBACK TO {}; RELEASE {}", name, name))?;
            Err(e)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
