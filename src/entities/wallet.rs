//! Wallet entity - A lender's spendable balance.
//!
//! The primary key is the owning account's id. The balance is only ever changed
//! through deposits, withdrawals and pledges, each of which also appends a row
//! to the transaction log.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Wallet database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallets")]
pub struct Model {
    /// Owning account id
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Current balance in cents, never negative
    pub balance: i64,
    /// Last time the balance changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Wallet and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each wallet belongs to one account
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::Id",
        to = "super::account::Column::Id"
    )]
    Account,
    /// One wallet has many transactions
    #[sea_orm(has_many = "super::transaction::Entity")]
    Transactions,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
