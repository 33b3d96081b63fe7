// Entity Models - PayerGroup → Payer → PayerDetail
//
// Each entity has:
// - Store-assigned identity (INTEGER primary key)
// - A natural key used for deduplication (group name; group + payer name)
// - A `New*` insert form without identity

pub mod group;
pub mod payer;
pub mod detail;

pub use group::{PayerGroup, NewGroup, GroupWithPayers};
pub use payer::{Payer, NewPayer, PayerWithDetails};
pub use detail::{PayerDetail, NewDetail, DetailView};
