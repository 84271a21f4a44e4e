//! Account entity - A person using the platform.
//!
//! The role is chosen at signup and never changes afterwards. Borrowers carry
//! a loan application status once they have applied for a loan.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Account database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    /// Identifier issued by the auth provider
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Contact email used for pledges and receipts
    pub email: String,
    /// Display name shown on the community leaderboard
    pub name: Option<String>,
    /// `"lender"` or `"borrower"`
    pub role: String,
    /// `"submitted"` once a borrower has applied, otherwise None
    pub loan_application_status: Option<String>,
    /// When the account was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Account and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// A lender account owns exactly one wallet
    #[sea_orm(has_one = "super::wallet::Entity")]
    Wallet,
}

impl Related<super::wallet::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Wallet.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
