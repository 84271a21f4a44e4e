//! Client state entity - Key-value pairs that must survive a page reload.
//!
//! Used for the in-flight deposit that is written before the user is sent to
//! the hosted checkout and read back when they return.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Client state database model - stores key-value pairs
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "client_state")]
pub struct Model {
    /// Key (e.g., `"pending_deposit:<account id>"`)
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    /// Value stored as string
    pub value: String,
    /// When this value was last written
    pub updated_at: DateTime,
}

/// `ClientState` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
