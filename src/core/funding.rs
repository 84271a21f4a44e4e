//! The "fund a loan" procedure and pledge queries.
//!
//! A pledge, the matching wallet debit and the loan's funded-total increment are
//! written in one database transaction. Either all three happen or none do: any
//! failure drops the transaction before commit and SQLite rolls it back.

use crate::{
    core::{
        types::{LoanStatus, PledgeStatus},
        wallet,
    },
    entities::{Loan, Pledge, loan, pledge, transaction, wallet as wallet_entity},
    errors::{Error, Result, ValidationError},
};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument};

/// Everything that changed as a result of a successful pledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingReceipt {
    /// The new pledge (settled if it completed the loan)
    pub pledge: pledge::Model,
    /// The lender's wallet after the debit
    pub wallet: wallet_entity::Model,
    /// The loan after the funded-total increment
    pub loan: loan::Model,
    /// The `loan_fund` row added to the lender's history
    pub transaction: transaction::Model,
}

impl FundingReceipt {
    /// Whether this pledge completed the loan.
    #[must_use]
    pub fn completed_loan(&self) -> bool {
        self.loan.status == LoanStatus::Funded.as_str()
    }
}

/// Pledges `amount` cents from `lender_id`'s wallet to `loan_id`.
///
/// Checks, inside the transaction, that the loan is open, that the pledge does
/// not exceed what the loan still needs, and that the wallet covers it. When the
/// funded-total reaches the requested amount the loan becomes `funded` and all
/// of its pledges become `settled`.
///
/// # Arguments
/// * `lender_id` - Account id of the lender; must own a wallet
/// * `loan_id` - Loan to fund
/// * `amount` - Pledge amount in cents
/// * `contact_email` - Email stored on the pledge
#[instrument(skip(db))]
pub async fn fund_loan(
    db: &DatabaseConnection,
    lender_id: &str,
    loan_id: i64,
    amount: i64,
    contact_email: &str,
) -> Result<FundingReceipt> {
    if amount <= 0 {
        return Err(ValidationError::NotPositive.into());
    }

    let txn = db.begin().await?;

    let loan = Loan::find_by_id(loan_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::NotFound {
            entity: "loan",
            id: loan_id.to_string(),
        })?;
    if loan.status != LoanStatus::Open.as_str() {
        return Err(Error::LoanNotOpen {
            loan_id,
            status: loan.status,
        });
    }
    let remaining = crate::core::loan::remaining(&loan);
    if amount > remaining {
        return Err(Error::ExceedsRemaining {
            loan_id,
            remaining,
            requested: amount,
        });
    }

    let (wallet, logged) = wallet::record_pledge_debit(
        &txn,
        lender_id,
        amount,
        format!("Funded loan #{} ({})", loan.id, loan.name),
    )
    .await?;

    let mut new_pledge = pledge::ActiveModel {
        lender_id: Set(lender_id.to_string()),
        loan_id: Set(loan_id),
        amount: Set(amount),
        contact_email: Set(contact_email.to_string()),
        status: Set(PledgeStatus::Pending.as_str().to_string()),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    // Guarded increment: only applies while the loan is open and not over-funded
    let updated = Loan::update_many()
        .col_expr(
            loan::Column::FundedTotal,
            Expr::col(loan::Column::FundedTotal).add(amount),
        )
        .filter(loan::Column::Id.eq(loan_id))
        .filter(loan::Column::Status.eq(LoanStatus::Open.as_str()))
        .filter(
            Expr::expr(Expr::col(loan::Column::FundedTotal).add(amount))
                .lte(Expr::col(loan::Column::Amount)),
        )
        .exec(&txn)
        .await?;
    if updated.rows_affected == 0 {
        return Err(Error::ExceedsRemaining {
            loan_id,
            remaining,
            requested: amount,
        });
    }

    let mut loan = Loan::find_by_id(loan_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::NotFound {
            entity: "loan",
            id: loan_id.to_string(),
        })?;

    if loan.funded_total >= loan.amount {
        let mut active: loan::ActiveModel = loan.into();
        active.status = Set(LoanStatus::Funded.as_str().to_string());
        loan = active.update(&txn).await?;

        let settled = Pledge::update_many()
            .col_expr(
                pledge::Column::Status,
                Expr::value(PledgeStatus::Settled.as_str()),
            )
            .filter(pledge::Column::LoanId.eq(loan_id))
            .exec(&txn)
            .await?;
        debug!("Settled {} pledges on loan {}", settled.rows_affected, loan_id);
        new_pledge.status = PledgeStatus::Settled.as_str().to_string();
    }

    txn.commit().await?;
    info!(
        "{} pledged {} cents to loan {} (funded {}/{})",
        lender_id, amount, loan_id, loan.funded_total, loan.amount
    );

    Ok(FundingReceipt {
        pledge: new_pledge,
        wallet,
        loan,
        transaction: logged,
    })
}

/// Retrieves all pledges made by a lender, newest first.
pub async fn get_pledges_for_lender(
    db: &DatabaseConnection,
    lender_id: &str,
) -> Result<Vec<pledge::Model>> {
    Pledge::find()
        .filter(pledge::Column::LenderId.eq(lender_id))
        .order_by_desc(pledge::Column::CreatedAt)
        .order_by_desc(pledge::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Retrieves all pledges against a loan, oldest first.
pub async fn get_pledges_for_loan(
    db: &DatabaseConnection,
    loan_id: i64,
) -> Result<Vec<pledge::Model>> {
    Pledge::find()
        .filter(pledge::Column::LoanId.eq(loan_id))
        .order_by_asc(pledge::Column::CreatedAt)
        .order_by_asc(pledge::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Retrieves every pledge on the platform.
pub async fn get_all_pledges(db: &DatabaseConnection) -> Result<Vec<pledge::Model>> {
    Pledge::find()
        .order_by_asc(pledge::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}
