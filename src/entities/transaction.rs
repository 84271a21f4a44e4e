//! Transaction entity - Append-only log of balance-changing events.
//!
//! Each row records a deposit, withdrawal or loan funding against a wallet.
//! Amounts are stored as positive cents; the `kind` says which way money moved.
//! Deposits and payouts carry the gateway `reference` so a replayed
//! confirmation can be recognised.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    /// Unique identifier for the transaction
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Wallet (account id) this transaction belongs to
    pub wallet_id: String,
    /// Amount in cents, always positive
    pub amount: i64,
    /// `"deposit"`, `"withdrawal"` or `"loan_fund"`
    pub kind: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Gateway session or payout id, unique when present
    #[sea_orm(unique)]
    pub reference: Option<String>,
    /// When the transaction was recorded
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Transaction and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each transaction belongs to one wallet
    #[sea_orm(
        belongs_to = "super::wallet::Entity",
        from = "Column::WalletId",
        to = "super::wallet::Column::Id"
    )]
    Wallet,
}

impl Related<super::wallet::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Wallet.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
