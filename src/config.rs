// ⚙️ Configuration - Thresholds and alias tables as data
// One immutable value per run, handed to the normalizer and the inference cascade

use anyhow::{bail, Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// THRESHOLDS
// ============================================================================

/// Similarity thresholds on the 0-100 scale. A match requires a score
/// strictly greater than the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Partial ratio between a known alias and the raw name
    pub keyword_match: f64,

    /// Full ratio between a stored payer name and the raw name (same number)
    pub payer_number_match: f64,

    /// Partial ratio between an existing group name and the simplified name
    pub semantic_match: f64,

    /// Reserved, not consulted by the cascade yet
    pub dynamic_group_match: f64,

    /// Reserved, not consulted by the cascade yet
    pub name_similarity: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            keyword_match: 80.0,
            payer_number_match: 70.0,
            semantic_match: 75.0,
            dynamic_group_match: 80.0,
            name_similarity: 85.0,
        }
    }
}

impl Thresholds {
    fn named(&self) -> [(&'static str, f64); 5] {
        [
            ("keyword_match", self.keyword_match),
            ("payer_number_match", self.payer_number_match),
            ("semantic_match", self.semantic_match),
            ("dynamic_group_match", self.dynamic_group_match),
            ("name_similarity", self.name_similarity),
        ]
    }
}

// ============================================================================
// KNOWN GROUPS
// ============================================================================

/// A predefined canonical group and the alias strings that route to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownGroup {
    pub name: String,
    pub aliases: Vec<String>,
}

impl KnownGroup {
    pub fn new(name: &str, aliases: &[&str]) -> Self {
        KnownGroup {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

fn default_known_groups() -> Vec<KnownGroup> {
    vec![
        KnownGroup::new("Delta Dental", &["delta dental", "delta", "dd", "deltacare"]),
        KnownGroup::new(
            "Blue Cross Blue Shield",
            &[
                "blue cross",
                "blue shield",
                "bcbs",
                "bluecross",
                "anthem",
                "wellpoint",
                "carefirst",
            ],
        ),
        KnownGroup::new("Aetna", &["aetna", "aetna dental", "aetna life"]),
        KnownGroup::new("Cigna", &["cigna", "cigna dental", "connecticut general"]),
        KnownGroup::new(
            "UnitedHealthcare",
            &[
                "unitedhealthcare",
                "united healthcare",
                "uhc",
                "united health",
                "uhg",
                "optum",
            ],
        ),
        KnownGroup::new("MetLife", &["metlife", "met life", "metropolitan"]),
        KnownGroup::new("Medicare", &["medicare", "medicare advantage", "cms"]),
        KnownGroup::new("Medicaid", &["medicaid", "medical assistance"]),
    ]
}

fn default_ignored_words() -> Vec<String> {
    [
        "of", "in", "at", "for", "the", "and", "inc", "corp", "llc", "corporation", "company",
        "dental", "plan", "group", "insurance",
    ]
    .iter()
    .map(|w| w.to_string())
    .collect()
}

// ============================================================================
// MATCH CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub thresholds: Thresholds,

    /// Checked in order; the first group with a passing alias wins
    pub known_groups: Vec<KnownGroup>,

    /// Stop-words dropped by the normalizer
    pub ignored_words: Vec<String>,

    /// Records per parallel inference chunk
    pub chunk_size: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            thresholds: Thresholds::default(),
            known_groups: default_known_groups(),
            ignored_words: default_ignored_words(),
            chunk_size: 256,
        }
    }
}

// ============================================================================
// LOADER CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Header of the payer-identifier column
    pub id_column: String,

    /// Header of the payer-name column as it appears in source sheets
    pub name_column: String,

    /// Canonical header the name column is renamed to (also accepted on read)
    pub canonical_name_column: String,

    /// Sheets whose name contains this (case-insensitive) are skipped
    pub excluded_sheet_marker: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            id_column: "Payer ID".to_string(),
            name_column: "Payer Name".to_string(),
            canonical_name_column: "Payer Identification Information".to_string(),
            excluded_sheet_marker: "legend".to_string(),
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub matching: MatchConfig,
    pub loader: LoaderConfig,
}

impl Config {
    /// Load configuration from a JSON file; omitted fields keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config = Config::from_json(&content)?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(content).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in self.matching.thresholds.named() {
            if !(0.0..=100.0).contains(&value) {
                bail!("threshold {} = {} is outside 0-100", name, value);
            }
        }

        if self.matching.chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }

        for group in &self.matching.known_groups {
            if group.name.trim().is_empty() {
                bail!("known group with empty name");
            }
        }

        if self.loader.id_column.trim().is_empty() || self.loader.name_column.trim().is_empty() {
            bail!("loader column names must not be empty");
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
