//! Loan entity - A borrower's funding request.
//!
//! Status moves `pending` → `open` on approval and `open` → `funded` once the
//! pledged total reaches the requested amount.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Loan database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "loans")]
pub struct Model {
    /// Unique identifier for the loan
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Account id of the borrower who applied
    pub borrower_id: String,
    /// Borrower's display name
    pub name: String,
    /// Borrower's country
    pub country: String,
    /// Requested amount in cents
    pub amount: i64,
    /// Sum of all pledges against this loan, in cents
    pub funded_total: i64,
    /// Short purpose line ("Expand her shop")
    pub purpose: String,
    /// Longer story shown on the loan page
    pub description: String,
    /// Optional image URL
    pub image: Option<String>,
    /// `"pending"`, `"open"` or `"funded"`
    pub status: String,
    /// When the application was submitted
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Loan and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One loan has many pledges
    #[sea_orm(has_many = "super::pledge::Entity")]
    Pledges,
}

impl Related<super::pledge::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Pledges.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
