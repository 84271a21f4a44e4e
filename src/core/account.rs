//! Account business logic - signup and lookups.
//!
//! A lender's wallet is created in the same database transaction as the account,
//! so every lender account always has exactly one wallet.

use crate::{
    core::{types::Role, validation},
    entities::{Account, account, wallet},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{info, instrument};

/// Creates an account with a fixed role. Lenders also get a zero-balance wallet.
///
/// # Arguments
/// * `account_id` - Identifier issued by the auth provider
/// * `email` - Contact email
/// * `name` - Optional display name
/// * `role` - Lender or borrower; cannot be changed later
#[instrument(skip(db))]
pub async fn sign_up(
    db: &DatabaseConnection,
    account_id: &str,
    email: &str,
    name: Option<String>,
    role: Role,
) -> Result<account::Model> {
    validation::require_field(account_id, "account id")?;
    validation::require_field(email, "email")?;

    let txn = db.begin().await?;

    if Account::find_by_id(account_id).one(&txn).await?.is_some() {
        return Err(Error::AccountExists {
            account_id: account_id.to_string(),
        });
    }

    let now = chrono::Utc::now();
    let created = account::ActiveModel {
        id: Set(account_id.to_string()),
        email: Set(email.trim().to_string()),
        name: Set(name),
        role: Set(role.as_str().to_string()),
        loan_application_status: Set(None),
        created_at: Set(now),
    }
    .insert(&txn)
    .await?;

    if role == Role::Lender {
        wallet::ActiveModel {
            id: Set(account_id.to_string()),
            balance: Set(0),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
    }

    txn.commit().await?;
    info!("Signed up {} as {}", account_id, role);
    Ok(created)
}

/// Retrieves an account by id.
pub async fn get_account(db: &DatabaseConnection, account_id: &str) -> Result<Option<account::Model>> {
    Account::find_by_id(account_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Retrieves an account by id, failing with `NotFound` if it does not exist.
pub async fn require_account(db: &DatabaseConnection, account_id: &str) -> Result<account::Model> {
    get_account(db, account_id)
        .await?
        .ok_or_else(|| Error::NotFound {
            entity: "account",
            id: account_id.to_string(),
        })
}

/// Reads the stored role of an account.
pub async fn get_role(db: &DatabaseConnection, account_id: &str) -> Result<Role> {
    require_account(db, account_id).await?.role.parse()
}

/// Fails with `WrongRole` unless the account has `expected` role.
pub async fn require_role(db: &DatabaseConnection, account_id: &str, expected: Role) -> Result<()> {
    if get_role(db, account_id).await? == expected {
        Ok(())
    } else {
        Err(Error::WrongRole {
            account_id: account_id.to_string(),
            expected: expected.as_str(),
        })
    }
}

/// Lists all lender accounts ordered by creation time.
pub async fn list_lenders(db: &DatabaseConnection) -> Result<Vec<account::Model>> {
    Account::find()
        .filter(account::Column::Role.eq(Role::Lender.as_str()))
        .order_by_asc(account::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}
