// 🧾 PayerDetail - one raw observation of a payer (append-only audit trail)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerDetail {
    pub id: i64,
    pub payer_id: i64,
    pub raw_name: String,
    pub payer_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDetail {
    pub payer_id: i64,
    pub raw_name: String,
    pub payer_number: Option<String>,
}

/// Detail row joined with its payer and group, for review listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailView {
    pub detail_id: i64,
    pub raw_name: String,
    pub payer_number: Option<String>,
    pub payer_id: i64,
    pub payer_name: String,
    pub pretty_name: Option<String>,
    pub group_id: i64,
    pub group_name: String,
}
