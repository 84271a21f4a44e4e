//! Locally persisted key-value state.
//!
//! Anything the client must remember across a full page navigation (the deposit
//! amount in flight while the user is on the hosted checkout page) is written
//! here before leaving and read back on return.

use crate::{
    entities::{ClientState, client_state},
    errors::Result,
};
use sea_orm::{Set, prelude::*, sea_query::OnConflict};

/// Writes `value` under `key`, replacing any previous value.
pub async fn put<C>(db: &C, key: &str, value: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    let model = client_state::ActiveModel {
        key: Set(key.to_string()),
        value: Set(value.to_string()),
        updated_at: Set(chrono::Utc::now().naive_utc()),
    };

    ClientState::insert(model)
        .on_conflict(
            OnConflict::column(client_state::Column::Key)
                .update_columns([client_state::Column::Value, client_state::Column::UpdatedAt])
                .to_owned(),
        )
        .exec(db)
        .await?;
    Ok(())
}

/// Reads the value stored under `key`.
pub async fn get<C>(db: &C, key: &str) -> Result<Option<String>>
where
    C: ConnectionTrait,
{
    Ok(ClientState::find_by_id(key.to_string())
        .one(db)
        .await?
        .map(|state| state.value))
}

/// Removes and returns the value stored under `key`.
///
/// Only the caller whose delete actually removed the row gets the value back,
/// so two racing `take`s cannot both observe it.
pub async fn take<C>(db: &C, key: &str) -> Result<Option<String>>
where
    C: ConnectionTrait,
{
    let Some(value) = get(db, key).await? else {
        return Ok(None);
    };

    let deleted = ClientState::delete_by_id(key.to_string()).exec(db).await?;
    Ok((deleted.rows_affected == 1).then_some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_test_db;

    #[tokio::test]
    async fn test_put_overwrites_existing_value() -> Result<()> {
        let db = setup_test_db().await?;
        put(&db, "pending_deposit:a", "first").await?;
        put(&db, "pending_deposit:a", "second").await?;

        assert_eq!(get(&db, "pending_deposit:a").await?.as_deref(), Some("second"));
        Ok(())
    }

    #[tokio::test]
    async fn test_take_returns_value_once() -> Result<()> {
        let db = setup_test_db().await?;
        put(&db, "pending_deposit:a", "5000").await?;

        assert_eq!(take(&db, "pending_deposit:a").await?.as_deref(), Some("5000"));
        assert_eq!(take(&db, "pending_deposit:a").await?, None);
        Ok(())
    }
}
