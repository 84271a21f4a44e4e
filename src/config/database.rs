//! Database configuration module.
//!
//! This module handles the `SQLite` connection for the authoritative ledger store and
//! creates every table from its `SeaORM` entity definition with
//! `Schema::create_table_from_entity`, so the schema always matches the Rust structs.

use crate::entities::{Account, ClientState, Loan, Pledge, Transaction, Wallet};
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};
use std::path::Path;
use tracing::{debug, info};

/// Default database location when neither the settings file nor `DATABASE_URL` sets one.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/candlelend.sqlite?mode=rwc";

/// File path of a `sqlite://` URL, or `None` for in-memory and other backends.
fn sqlite_file_path(database_url: &str) -> Option<&Path> {
    let rest = database_url.strip_prefix("sqlite://")?;
    let path = rest.split('?').next().unwrap_or(rest);
    (!path.is_empty() && !path.contains(":memory:")).then(|| Path::new(path))
}

/// Connects to the database at `database_url`.
///
/// For file-backed `SQLite` the parent directory is created first, since
/// `SQLite` creates the file but not the folders leading to it.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    if let Some(parent) = sqlite_file_path(database_url).and_then(Path::parent) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    debug!("Connecting to database at {}", database_url);
    Database::connect(database_url).await.map_err(Into::into)
}

/// Creates all ledger tables from the entity definitions.
///
/// Tables are created parents first so foreign keys resolve: accounts, wallets,
/// transactions, loans, pledges, then the client-side key-value table.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut statements = vec![
        schema.create_table_from_entity(Account),
        schema.create_table_from_entity(Wallet),
        schema.create_table_from_entity(Transaction),
        schema.create_table_from_entity(Loan),
        schema.create_table_from_entity(Pledge),
        schema.create_table_from_entity(ClientState),
    ];

    for statement in &mut statements {
        statement.if_not_exists();
        db.execute(builder.build(&*statement)).await?;
    }

    info!("Ledger tables ensured ({} tables)", statements.len());
    Ok(())
}
