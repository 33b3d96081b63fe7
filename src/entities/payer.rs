// 🏥 Payer - one distinct payer identity, owned by exactly one group

use super::detail::PayerDetail;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payer {
    pub id: i64,

    /// Name as first observed
    pub name: String,

    /// User-assigned display override
    pub pretty_name: Option<String>,

    /// Owning group (required)
    pub group_id: i64,
}

impl Payer {
    /// Name to show in listings
    pub fn display_name(&self) -> &str {
        self.pretty_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NewPayer {
    pub name: String,
    pub group_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayerWithDetails {
    pub payer: Payer,
    pub details: Vec<PayerDetail>,
}
