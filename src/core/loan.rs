//! Loan business logic - applications, approval and listings.
//!
//! Borrowers submit an application that starts out `pending`. Approval opens it
//! for pledges; the funding procedure in [`crate::core::funding`] is the only
//! thing that moves it on to `funded`.

use crate::{
    core::{
        types::{LoanStatus, Role},
        validation,
    },
    entities::{Account, Loan, account, loan},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{info, instrument};

/// What a borrower fills in on the application form.
#[derive(Debug, Clone, Default)]
pub struct LoanApplication {
    /// Borrower's display name
    pub name: String,
    /// Borrower's country
    pub country: String,
    /// Requested amount as typed, in whole dollars
    pub amount: String,
    /// Short purpose line
    pub purpose: String,
    /// Longer story
    pub description: String,
    /// Optional image URL; blank means none
    pub image: Option<String>,
}

/// Submits a loan application for `borrower_id`.
///
/// The form is validated before anything is written. On success the loan is
/// stored as `pending` and the borrower's application status becomes
/// `"submitted"`, both in one database transaction.
#[instrument(skip(db, application), fields(amount = %application.amount))]
pub async fn apply_for_loan(
    db: &DatabaseConnection,
    borrower_id: &str,
    application: LoanApplication,
    min_request_cents: i64,
) -> Result<loan::Model> {
    validation::require_field(&application.name, "name")?;
    validation::require_field(&application.country, "country")?;
    validation::require_field(&application.purpose, "purpose")?;
    validation::require_field(&application.description, "description")?;
    let amount = validation::validate_loan_request(&application.amount, min_request_cents)?;

    let txn = db.begin().await?;

    let borrower = Account::find_by_id(borrower_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::NotFound {
            entity: "account",
            id: borrower_id.to_string(),
        })?;
    if borrower.role != Role::Borrower.as_str() {
        return Err(Error::WrongRole {
            account_id: borrower_id.to_string(),
            expected: Role::Borrower.as_str(),
        });
    }

    let created = loan::ActiveModel {
        borrower_id: Set(borrower_id.to_string()),
        name: Set(application.name.trim().to_string()),
        country: Set(application.country.trim().to_string()),
        amount: Set(amount),
        funded_total: Set(0),
        purpose: Set(application.purpose.trim().to_string()),
        description: Set(application.description.trim().to_string()),
        image: Set(application.image.filter(|url| !url.trim().is_empty())),
        status: Set(LoanStatus::Pending.as_str().to_string()),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let mut borrower: account::ActiveModel = borrower.into();
    borrower.loan_application_status = Set(Some("submitted".to_string()));
    borrower.update(&txn).await?;

    txn.commit().await?;
    info!("Loan {} submitted by {} for {} cents", created.id, borrower_id, amount);
    Ok(created)
}

/// Retrieves a loan by id.
pub async fn get_loan(db: &DatabaseConnection, loan_id: i64) -> Result<Option<loan::Model>> {
    Loan::find_by_id(loan_id).one(db).await.map_err(Into::into)
}

/// Retrieves a loan by id, failing with `NotFound` if it does not exist.
pub async fn require_loan(db: &DatabaseConnection, loan_id: i64) -> Result<loan::Model> {
    get_loan(db, loan_id).await?.ok_or_else(|| Error::NotFound {
        entity: "loan",
        id: loan_id.to_string(),
    })
}

/// Opens a pending loan for pledges.
#[instrument(skip(db))]
pub async fn approve_loan(db: &DatabaseConnection, loan_id: i64) -> Result<loan::Model> {
    let loan = require_loan(db, loan_id).await?;
    if loan.status != LoanStatus::Pending.as_str() {
        return Err(Error::InvalidTransition {
            loan_id,
            from: loan.status,
            to: LoanStatus::Open.as_str(),
        });
    }

    let mut active: loan::ActiveModel = loan.into();
    active.status = Set(LoanStatus::Open.as_str().to_string());
    let updated = active.update(db).await?;
    info!("Loan {} approved and open for funding", loan_id);
    Ok(updated)
}

/// Lists loans accepting pledges, oldest first.
pub async fn list_open_loans(db: &DatabaseConnection) -> Result<Vec<loan::Model>> {
    Loan::find()
        .filter(loan::Column::Status.eq(LoanStatus::Open.as_str()))
        .order_by_asc(loan::Column::CreatedAt)
        .order_by_asc(loan::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Lists every loan regardless of status.
pub async fn list_all_loans(db: &DatabaseConnection) -> Result<Vec<loan::Model>> {
    Loan::find()
        .order_by_asc(loan::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Lists a borrower's applications that are still awaiting approval.
pub async fn list_pending_loans_for_borrower(
    db: &DatabaseConnection,
    borrower_id: &str,
) -> Result<Vec<loan::Model>> {
    Loan::find()
        .filter(loan::Column::BorrowerId.eq(borrower_id))
        .filter(loan::Column::Status.eq(LoanStatus::Pending.as_str()))
        .order_by_desc(loan::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Amount still needed before the loan is fully funded, in cents.
#[must_use]
pub const fn remaining(loan: &loan::Model) -> i64 {
    let left = loan.amount - loan.funded_total;
    if left > 0 { left } else { 0 }
}
