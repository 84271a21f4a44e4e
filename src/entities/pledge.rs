//! Pledge entity - A lender's commitment toward one loan.
//!
//! Pledges reference the lender and loan by id only. There is no edit or delete
//! path; the only mutation is `pending` → `settled` when the loan is fully funded.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Pledge database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pledges")]
pub struct Model {
    /// Unique identifier for the pledge
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Account id of the lender
    pub lender_id: String,
    /// Loan being funded
    pub loan_id: i64,
    /// Pledged amount in cents
    pub amount: i64,
    /// Email the borrower's updates are sent to
    pub contact_email: String,
    /// `"pending"` or `"settled"`
    pub status: String,
    /// When the pledge was made
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Pledge and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each pledge belongs to one loan
    #[sea_orm(
        belongs_to = "super::loan::Entity",
        from = "Column::LoanId",
        to = "super::loan::Column::Id"
    )]
    Loan,
}

impl Related<super::loan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Loan.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
