//! Wallet business logic - balances, deposits, withdrawals and lending history.
//!
//! Every balance change runs in one database transaction together with the
//! transaction-log row that explains it. Balances are adjusted with a single
//! `UPDATE wallets SET balance = balance + delta` so concurrent writers cannot
//! lose each other's updates, and debits carry a `balance >= amount` guard so a
//! wallet can never go negative.

use crate::{
    core::types::TransactionKind,
    entities::{Transaction, Wallet, transaction, wallet},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{info, instrument, warn};

/// Result of the deposit procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositOutcome {
    /// The wallet was credited
    Credited(wallet::Model),
    /// A deposit with the same gateway reference was already applied; nothing changed
    AlreadyApplied(wallet::Model),
}

impl DepositOutcome {
    /// The wallet as it stands after the call.
    #[must_use]
    pub const fn wallet(&self) -> &wallet::Model {
        match self {
            Self::Credited(w) | Self::AlreadyApplied(w) => w,
        }
    }
}

/// Retrieves the wallet owned by `account_id`.
pub async fn get_wallet<C>(db: &C, account_id: &str) -> Result<wallet::Model>
where
    C: ConnectionTrait,
{
    Wallet::find_by_id(account_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::NotFound {
            entity: "wallet",
            id: account_id.to_string(),
        })
}

/// Reads the authoritative balance in cents.
pub async fn get_balance<C>(db: &C, account_id: &str) -> Result<i64>
where
    C: ConnectionTrait,
{
    Ok(get_wallet(db, account_id).await?.balance)
}

/// Adds `amount_delta` to the wallet balance in a single UPDATE.
///
/// A negative delta is only applied when the balance covers it; otherwise
/// nothing is written and `InsufficientFunds` is returned.
pub async fn update_wallet_balance_atomic<C>(
    db: &C,
    account_id: &str,
    amount_delta: i64,
) -> Result<wallet::Model>
where
    C: ConnectionTrait,
{
    let current = get_wallet(db, account_id).await?;

    let mut update = Wallet::update_many()
        .col_expr(
            wallet::Column::Balance,
            Expr::col(wallet::Column::Balance).add(amount_delta),
        )
        .col_expr(wallet::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
        .filter(wallet::Column::Id.eq(account_id));
    if amount_delta < 0 {
        update = update.filter(wallet::Column::Balance.gte(-amount_delta));
    }

    let result = update.exec(db).await?;
    if result.rows_affected == 0 {
        return Err(Error::InsufficientFunds {
            available: current.balance,
            required: -amount_delta,
        });
    }

    get_wallet(db, account_id).await
}

async fn append_transaction<C>(
    db: &C,
    account_id: &str,
    amount: i64,
    kind: TransactionKind,
    description: Option<String>,
    reference: Option<String>,
) -> Result<transaction::Model>
where
    C: ConnectionTrait,
{
    transaction::ActiveModel {
        wallet_id: Set(account_id.to_string()),
        amount: Set(amount),
        kind: Set(kind.as_str().to_string()),
        description: Set(description),
        reference: Set(reference),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Finds a logged transaction by its gateway reference.
pub async fn find_by_reference<C>(db: &C, reference: &str) -> Result<Option<transaction::Model>>
where
    C: ConnectionTrait,
{
    Transaction::find()
        .filter(transaction::Column::Reference.eq(reference))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Credits a confirmed card payment to a wallet.
///
/// The gateway `reference` makes the call idempotent: replaying a confirmation
/// that was already applied returns [`DepositOutcome::AlreadyApplied`] and the
/// balance is credited exactly once.
#[instrument(skip(db))]
pub async fn deposit_to_wallet(
    db: &DatabaseConnection,
    account_id: &str,
    amount: i64,
    reference: &str,
) -> Result<DepositOutcome> {
    if amount <= 0 {
        return Err(crate::errors::ValidationError::NotPositive.into());
    }

    let txn = db.begin().await?;

    if let Some(existing) = find_by_reference(&txn, reference).await? {
        warn!(
            "Deposit {} already applied as transaction {}, not crediting again",
            reference, existing.id
        );
        let wallet = get_wallet(&txn, account_id).await?;
        return Ok(DepositOutcome::AlreadyApplied(wallet));
    }

    let wallet = update_wallet_balance_atomic(&txn, account_id, amount).await?;
    append_transaction(
        &txn,
        account_id,
        amount,
        TransactionKind::Deposit,
        Some("Card deposit".to_string()),
        Some(reference.to_string()),
    )
    .await?;

    txn.commit().await?;
    info!(
        "Credited {} cents to {} (balance now {})",
        amount, account_id, wallet.balance
    );
    Ok(DepositOutcome::Credited(wallet))
}

/// Debits a wallet for a payout the gateway has accepted.
#[instrument(skip(db))]
pub async fn withdraw_from_wallet(
    db: &DatabaseConnection,
    account_id: &str,
    amount: i64,
    reference: &str,
) -> Result<wallet::Model> {
    if amount <= 0 {
        return Err(crate::errors::ValidationError::NotPositive.into());
    }

    let txn = db.begin().await?;

    let wallet = update_wallet_balance_atomic(&txn, account_id, -amount).await?;
    append_transaction(
        &txn,
        account_id,
        amount,
        TransactionKind::Withdrawal,
        Some("Withdrawal to bank".to_string()),
        Some(reference.to_string()),
    )
    .await?;

    txn.commit().await?;
    info!(
        "Debited {} cents from {} (balance now {})",
        amount, account_id, wallet.balance
    );
    Ok(wallet)
}

/// Records a pledge debit inside an already-open transaction.
///
/// Returns the debited wallet and the `loan_fund` log row.
pub(crate) async fn record_pledge_debit<C>(
    db: &C,
    account_id: &str,
    amount: i64,
    description: String,
) -> Result<(wallet::Model, transaction::Model)>
where
    C: ConnectionTrait,
{
    let wallet = update_wallet_balance_atomic(db, account_id, -amount).await?;
    let logged = append_transaction(
        db,
        account_id,
        amount,
        TransactionKind::LoanFund,
        Some(description),
        None,
    )
    .await?;
    Ok((wallet, logged))
}

/// Retrieves all transactions for a wallet, newest first.
pub async fn get_transactions(
    db: &DatabaseConnection,
    account_id: &str,
) -> Result<Vec<transaction::Model>> {
    Transaction::find()
        .filter(transaction::Column::WalletId.eq(account_id))
        .order_by_desc(transaction::Column::CreatedAt)
        .order_by_desc(transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Retrieves a lender's `loan_fund` transactions, newest first.
pub async fn get_lending_history(
    db: &DatabaseConnection,
    account_id: &str,
) -> Result<Vec<transaction::Model>> {
    Transaction::find()
        .filter(transaction::Column::WalletId.eq(account_id))
        .filter(transaction::Column::Kind.eq(TransactionKind::LoanFund.as_str()))
        .order_by_desc(transaction::Column::CreatedAt)
        .order_by_desc(transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}
