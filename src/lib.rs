// Payer Groups - Core Library
// Resolves raw payer names from spreadsheets into canonical payer groups

pub mod config;
pub mod normalizer;
pub mod fuzz;
pub mod entities;
pub mod error;
pub mod loader;
pub mod inference;
pub mod store;
pub mod reconcile;
pub mod pipeline;

// Re-export commonly used types
pub use config::{Config, KnownGroup, LoaderConfig, MatchConfig, Thresholds};
pub use normalizer::{title_case, NormalizedName, Normalizer};
pub use fuzz::{partial_ratio, ratio};
pub use entities::{
    DetailView, GroupWithPayers, NewDetail, NewGroup, NewPayer,
    Payer, PayerDetail, PayerGroup, PayerWithDetails,
};
pub use error::{IngestError, StoreError};
pub use loader::{LoadResult, PayerRecord, RawName, SheetLoader, SheetOutcome, SheetReport};
pub use inference::{
    GroupAssignment, GroupInferrer, GroupSnapshot, MatchRule, ResolvedRecord,
    SnapshotGroup, SnapshotPayer, UNKNOWN_GROUP,
};
pub use store::{count_rows, merge_groups, setup_database, PayerStore, Upserted};
pub use reconcile::{ReconcileReport, ReconciliationEngine};
pub use pipeline::{ingest_records, ingest_workbook, BatchOutcome, IngestReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
