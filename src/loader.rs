// 📂 Sheet Loader - workbook → deduplicated (payer id, payer name) records
//
// One task per eligible sheet, each with its own workbook handle. A sheet that
// is missing columns or fails to read contributes nothing; siblings carry on.

use crate::config::LoaderConfig;
use crate::error::IngestError;
use calamine::{open_workbook_auto, Data, Reader};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

// ============================================================================
// RECORD
// ============================================================================

/// Payer name cell as read from the sheet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawName {
    /// Text cell, trimmed
    Text(String),

    /// Number, date or boolean cell, kept as its display text
    NonText(String),

    Absent,
}

impl RawName {
    /// Value persisted on payer and detail rows; "" when absent
    pub fn as_str(&self) -> &str {
        match self {
            RawName::Text(s) | RawName::NonText(s) => s,
            RawName::Absent => "",
        }
    }

    /// Only text cells are names the cascade can work with
    pub fn text(&self) -> Option<&str> {
        match self {
            RawName::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, RawName::Absent)
    }
}

/// One raw row: payer identifier and payer identification information.
/// A blank id cell is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayerRecord {
    pub payer_id: Option<String>,
    pub name: RawName,
}

impl PayerRecord {
    pub fn new(name: Option<&str>, payer_id: Option<&str>) -> Self {
        let name = match name {
            Some(n) => RawName::Text(n.to_string()),
            None => RawName::Absent,
        };
        PayerRecord::with_name(name, payer_id)
    }

    pub fn with_name(name: RawName, payer_id: Option<&str>) -> Self {
        PayerRecord {
            payer_id: payer_id.map(str::to_string),
            name,
        }
    }

    /// Raw name as stored on payer and detail rows
    pub fn raw_name(&self) -> &str {
        self.name.as_str()
    }
}

// ============================================================================
// SHEET REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SheetOutcome {
    /// Rows contributed after in-sheet deduplication
    Loaded { rows: usize },

    /// Header row lacks a required column
    MissingColumns { missing: Vec<String> },

    /// Sheet could not be read
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetReport {
    pub sheet: String,
    pub outcome: SheetOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadResult {
    /// Globally deduplicated records, in sheet then row order
    pub records: Vec<PayerRecord>,

    /// One entry per eligible sheet, in workbook order
    pub sheets: Vec<SheetReport>,

    /// Sheets skipped by name
    pub excluded: Vec<String>,
}

// ============================================================================
// SHEET LOADER
// ============================================================================

enum SheetRead {
    Records(Vec<PayerRecord>),
    MissingColumns(Vec<String>),
}

pub struct SheetLoader<'a> {
    config: &'a LoaderConfig,
}

impl<'a> SheetLoader<'a> {
    pub fn new(config: &'a LoaderConfig) -> Self {
        SheetLoader { config }
    }

    pub fn is_excluded(&self, sheet_name: &str) -> bool {
        let marker = self.config.excluded_sheet_marker.to_lowercase();
        !marker.is_empty() && sheet_name.to_lowercase().contains(&marker)
    }

    /// Load every eligible sheet in parallel and merge the results.
    ///
    /// Only an unopenable workbook is an error.
    pub fn load(&self, path: &Path) -> Result<LoadResult, IngestError> {
        let start = Instant::now();

        let workbook = open_workbook_auto(path).map_err(|e| IngestError::OpenWorkbook {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let all_sheets: Vec<String> = workbook.sheet_names().to_vec();
        drop(workbook);

        let (eligible, excluded): (Vec<String>, Vec<String>) =
            all_sheets.iter().cloned().partition(|name| !self.is_excluded(name));

        info!(
            total = all_sheets.len(),
            eligible = eligible.len(),
            ?excluded,
            "found sheets"
        );

        if eligible.is_empty() {
            warn!("no eligible sheets found");
            return Ok(LoadResult {
                excluded,
                ..LoadResult::default()
            });
        }

        let mut result = self.load_sheets(path, &eligible);
        result.excluded = excluded;

        info!(
            rows = result.records.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "loaded workbook"
        );

        Ok(result)
    }

    /// Read the named sheets in parallel and merge them in the given order.
    ///
    /// A sheet that cannot be read is reported as `Failed` and contributes
    /// nothing; the others are unaffected.
    pub fn load_sheets(&self, path: &Path, sheet_names: &[String]) -> LoadResult {
        let per_sheet: Vec<(String, Result<SheetRead, IngestError>)> = sheet_names
            .par_iter()
            .map(|sheet| (sheet.clone(), self.read_sheet(path, sheet)))
            .collect();

        let mut seen: HashSet<PayerRecord> = HashSet::new();
        let mut records = Vec::new();
        let mut sheets = Vec::with_capacity(per_sheet.len());

        for (sheet, result) in per_sheet {
            let outcome = match result {
                Ok(SheetRead::Records(rows)) => {
                    let count = rows.len();
                    for record in rows {
                        if seen.insert(record.clone()) {
                            records.push(record);
                        }
                    }
                    SheetOutcome::Loaded { rows: count }
                }
                Ok(SheetRead::MissingColumns(missing)) => {
                    warn!(sheet = %sheet, ?missing, "sheet missing required columns, skipped");
                    SheetOutcome::MissingColumns { missing }
                }
                Err(e) => {
                    error!(sheet = %sheet, error = %e, "error processing sheet");
                    SheetOutcome::Failed {
                        message: e.to_string(),
                    }
                }
            };
            sheets.push(SheetReport { sheet, outcome });
        }

        LoadResult {
            records,
            sheets,
            excluded: Vec::new(),
        }
    }

    /// Read one sheet through its own workbook handle
    fn read_sheet(&self, path: &Path, sheet: &str) -> Result<SheetRead, IngestError> {
        let sheet_error = |message: String| IngestError::Sheet {
            sheet: sheet.to_string(),
            message,
        };

        info!(sheet, "processing sheet");

        let mut workbook = open_workbook_auto(path).map_err(|e| sheet_error(e.to_string()))?;
        let range = workbook
            .worksheet_range(sheet)
            .map_err(|e| sheet_error(e.to_string()))?;

        let mut rows = range.rows();
        let headers: Vec<String> = match rows.next() {
            Some(header_row) => header_row
                .iter()
                .map(|c| cell_text(c).unwrap_or_default())
                .collect(),
            None => Vec::new(),
        };

        let id_idx = header_index(&headers, &[&self.config.id_column]);
        let name_idx = header_index(
            &headers,
            &[&self.config.name_column, &self.config.canonical_name_column],
        );

        let (id_idx, name_idx) = match (id_idx, name_idx) {
            (Some(id), Some(name)) => (id, name),
            (id, name) => {
                let mut missing = Vec::new();
                if id.is_none() {
                    missing.push(self.config.id_column.clone());
                }
                if name.is_none() {
                    missing.push(self.config.canonical_name_column.clone());
                }
                return Ok(SheetRead::MissingColumns(missing));
            }
        };

        let mut seen: HashSet<PayerRecord> = HashSet::new();
        let mut records = Vec::new();

        for row in rows {
            let record = PayerRecord {
                payer_id: row.get(id_idx).and_then(cell_text),
                name: row.get(name_idx).map_or(RawName::Absent, cell_name),
            };

            // Fully blank rows carry nothing to resolve
            if record.payer_id.is_none() && record.name.is_absent() {
                continue;
            }

            if seen.insert(record.clone()) {
                records.push(record);
            }
        }

        Ok(SheetRead::Records(records))
    }
}

// ============================================================================
// CELL HELPERS
// ============================================================================

fn header_index(headers: &[String], candidates: &[&String]) -> Option<usize> {
    candidates.iter().find_map(|candidate| {
        let wanted = candidate.trim();
        headers.iter().position(|h| h.trim() == wanted)
    })
}

/// Any cell as trimmed text; integral floats lose their ".0"
fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(s) => s.trim().to_string(),
        Data::Float(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", *v as i64),
        Data::Float(v) => format!("{v}"),
        Data::Int(v) => format!("{v}"),
        other => other.to_string().trim().to_string(),
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Text cells stay names; other non-blank cells keep their display text
fn cell_name(cell: &Data) -> RawName {
    match (cell, cell_text(cell)) {
        (_, None) => RawName::Absent,
        (Data::String(_), Some(text)) => RawName::Text(text),
        (_, Some(text)) => RawName::NonText(text),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;
    use std::path::PathBuf;

    enum Cell<'a> {
        Text(&'a str),
        Number(f64),
        Blank,
    }

    fn write_sheet(workbook: &mut Workbook, name: &str, headers: &[&str], rows: &[Vec<Cell>]) {
        let sheet = workbook.add_worksheet();
        sheet.set_name(name).unwrap();

        for (col, header) in headers.iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }

        for (row_idx, row) in rows.iter().enumerate() {
            let excel_row = (row_idx + 1) as u32;
            for (col, value) in row.iter().enumerate() {
                match value {
                    Cell::Text(s) => {
                        sheet.write_string(excel_row, col as u16, *s).unwrap();
                    }
                    Cell::Number(n) => {
                        sheet.write_number(excel_row, col as u16, *n).unwrap();
                    }
                    Cell::Blank => {}
                }
            }
        }
    }

    fn save(workbook: &mut Workbook, dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("payers.xlsx");
        workbook.save(&path).unwrap();
        path
    }

    #[test]
    fn test_legend_sheet_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let mut workbook = Workbook::new();
        write_sheet(
            &mut workbook,
            "Payers",
            &["Payer ID", "Payer Name"],
            &[vec![Cell::Text("60054"), Cell::Text("Aetna")]],
        );
        write_sheet(
            &mut workbook,
            "Legend - Codes",
            &["Payer ID", "Payer Name"],
            &[vec![Cell::Text("X1"), Cell::Text("Legend Only Payer")]],
        );
        let path = save(&mut workbook, &dir);

        let config = LoaderConfig::default();
        let result = SheetLoader::new(&config).load(&path).unwrap();

        assert_eq!(result.excluded, vec!["Legend - Codes".to_string()]);
        assert_eq!(result.sheets.len(), 1);
        assert_eq!(result.records, vec![PayerRecord::new(Some("Aetna"), Some("60054"))]);
        assert!(result
            .records
            .iter()
            .all(|r| r.raw_name() != "Legend Only Payer"));
    }

    #[test]
    fn test_is_excluded_case_insensitive() {
        let config = LoaderConfig::default();
        let loader = SheetLoader::new(&config);

        assert!(loader.is_excluded("LEGEND"));
        assert!(loader.is_excluded("Sheet Legend"));
        assert!(!loader.is_excluded("Payers"));
    }

    #[test]
    fn test_missing_columns_skips_sheet_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut workbook = Workbook::new();
        write_sheet(
            &mut workbook,
            "Claims",
            &["Claim ID", "Payer Name"],
            &[vec![Cell::Text("C1"), Cell::Text("Cigna")]],
        );
        write_sheet(
            &mut workbook,
            "Payers",
            &["Payer ID", "Payer Identification Information"],
            &[vec![Cell::Text("62308"), Cell::Text("Cigna")]],
        );
        let path = save(&mut workbook, &dir);

        let config = LoaderConfig::default();
        let result = SheetLoader::new(&config).load(&path).unwrap();

        assert_eq!(result.records.len(), 1);
        assert_eq!(
            result.sheets[0].outcome,
            SheetOutcome::MissingColumns {
                missing: vec!["Payer ID".to_string()]
            }
        );
        assert_eq!(result.sheets[1].outcome, SheetOutcome::Loaded { rows: 1 });
    }

    #[test]
    fn test_deduplicates_within_and_across_sheets() {
        let dir = tempfile::tempdir().unwrap();
        let mut workbook = Workbook::new();
        let rows = vec![
            vec![Cell::Text("60054"), Cell::Text("Aetna")],
            vec![Cell::Text("60054"), Cell::Text("Aetna")],
            vec![Cell::Text("62308"), Cell::Text("Cigna")],
        ];
        write_sheet(&mut workbook, "January", &["Payer ID", "Payer Name"], &rows);
        write_sheet(
            &mut workbook,
            "February",
            &["Payer ID", "Payer Name"],
            &[
                vec![Cell::Text("62308"), Cell::Text("Cigna")],
                vec![Cell::Blank, Cell::Text("Zephyr Regional Trust")],
            ],
        );
        let path = save(&mut workbook, &dir);

        let config = LoaderConfig::default();
        let result = SheetLoader::new(&config).load(&path).unwrap();

        assert_eq!(result.sheets[0].outcome, SheetOutcome::Loaded { rows: 2 });
        assert_eq!(result.sheets[1].outcome, SheetOutcome::Loaded { rows: 2 });
        assert_eq!(
            result.records,
            vec![
                PayerRecord::new(Some("Aetna"), Some("60054")),
                PayerRecord::new(Some("Cigna"), Some("62308")),
                PayerRecord::new(Some("Zephyr Regional Trust"), None),
            ]
        );
    }

    #[test]
    fn test_numeric_cells() {
        let dir = tempfile::tempdir().unwrap();
        let mut workbook = Workbook::new();
        write_sheet(
            &mut workbook,
            "Payers",
            &["Payer ID", "Payer Name"],
            &[
                vec![Cell::Number(12345.0), Cell::Text("Acme Health")],
                vec![Cell::Text("777"), Cell::Number(42.0)],
            ],
        );
        let path = save(&mut workbook, &dir);

        let config = LoaderConfig::default();
        let result = SheetLoader::new(&config).load(&path).unwrap();

        assert_eq!(result.records[0].payer_id.as_deref(), Some("12345"));
        // A numeric payer name keeps its value but is not usable text
        assert_eq!(result.records[1].name, RawName::NonText("42".to_string()));
        assert_eq!(result.records[1].name.text(), None);
        assert_eq!(result.records[1].raw_name(), "42");
        assert_eq!(result.records[1].payer_id.as_deref(), Some("777"));
    }

    #[test]
    fn test_distinct_non_text_names_are_not_merged() {
        let dir = tempfile::tempdir().unwrap();
        let mut workbook = Workbook::new();
        write_sheet(
            &mut workbook,
            "Payers",
            &["Payer ID", "Payer Name"],
            &[
                vec![Cell::Text("777"), Cell::Number(42.0)],
                vec![Cell::Text("777"), Cell::Number(43.0)],
                vec![Cell::Text("777"), Cell::Number(43.0)],
            ],
        );
        let path = save(&mut workbook, &dir);

        let config = LoaderConfig::default();
        let result = SheetLoader::new(&config).load(&path).unwrap();

        assert_eq!(
            result.records,
            vec![
                PayerRecord::with_name(RawName::NonText("42".to_string()), Some("777")),
                PayerRecord::with_name(RawName::NonText("43".to_string()), Some("777")),
            ]
        );
    }

    #[test]
    fn test_unreadable_sheet_does_not_affect_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let mut workbook = Workbook::new();
        write_sheet(
            &mut workbook,
            "Payers",
            &["Payer ID", "Payer Name"],
            &[vec![Cell::Text("62308"), Cell::Text("Cigna")]],
        );
        let path = save(&mut workbook, &dir);

        let config = LoaderConfig::default();
        let sheets = vec!["Vanished".to_string(), "Payers".to_string()];
        let result = SheetLoader::new(&config).load_sheets(&path, &sheets);

        assert_eq!(result.sheets[0].sheet, "Vanished");
        assert!(matches!(result.sheets[0].outcome, SheetOutcome::Failed { .. }));
        assert_eq!(result.sheets[1].outcome, SheetOutcome::Loaded { rows: 1 });
        assert_eq!(result.records, vec![PayerRecord::new(Some("Cigna"), Some("62308"))]);
    }

    #[test]
    fn test_only_legend_sheets_yield_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut workbook = Workbook::new();
        write_sheet(
            &mut workbook,
            "Legend",
            &["Payer ID", "Payer Name"],
            &[vec![Cell::Text("1"), Cell::Text("Aetna")]],
        );
        let path = save(&mut workbook, &dir);

        let config = LoaderConfig::default();
        let result = SheetLoader::new(&config).load(&path).unwrap();

        assert!(result.records.is_empty());
        assert!(result.sheets.is_empty());
        assert_eq!(result.excluded.len(), 1);
    }

    #[test]
    fn test_missing_workbook_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoaderConfig::default();

        let result = SheetLoader::new(&config).load(&dir.path().join("missing.xlsx"));
        assert!(matches!(result, Err(IngestError::OpenWorkbook { .. })));
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&Data::Empty), None);
        assert_eq!(cell_text(&Data::String("  ".to_string())), None);
        assert_eq!(cell_text(&Data::String(" 60054 ".to_string())), Some("60054".to_string()));
        assert_eq!(cell_text(&Data::Float(12345.0)), Some("12345".to_string()));
        assert_eq!(cell_text(&Data::Float(1.5)), Some("1.5".to_string()));
        assert_eq!(cell_text(&Data::Int(7)), Some("7".to_string()));
    }

    #[test]
    fn test_cell_name() {
        assert_eq!(
            cell_name(&Data::String(" Aetna ".to_string())),
            RawName::Text("Aetna".to_string())
        );
        assert_eq!(cell_name(&Data::Float(42.0)), RawName::NonText("42".to_string()));
        assert_eq!(cell_name(&Data::Bool(true)), RawName::NonText("true".to_string()));
        assert_eq!(cell_name(&Data::String("   ".to_string())), RawName::Absent);
        assert_eq!(cell_name(&Data::Empty), RawName::Absent);
    }
}
