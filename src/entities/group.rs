// 🏷️ PayerGroup - canonical cluster of payer identities

use super::payer::PayerWithDetails;
use serde::{Deserialize, Serialize};

/// Canonical cluster such as "Aetna" or "Blue Cross Blue Shield".
/// `name` is unique across the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerGroup {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
}

impl NewGroup {
    pub fn new(name: impl Into<String>) -> Self {
        NewGroup { name: name.into() }
    }
}

/// Group with its payers and their detail rows loaded eagerly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupWithPayers {
    pub group: PayerGroup,
    pub payers: Vec<PayerWithDetails>,
}

impl GroupWithPayers {
    pub fn payer_count(&self) -> usize {
        self.payers.len()
    }

    pub fn detail_count(&self) -> usize {
        self.payers.iter().map(|p| p.details.len()).sum()
    }
}
