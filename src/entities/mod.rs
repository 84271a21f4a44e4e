//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the authoritative tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod account;
pub mod client_state;
pub mod loan;
pub mod pledge;
pub mod transaction;
pub mod wallet;

// Re-export specific types to avoid conflicts
pub use account::{Column as AccountColumn, Entity as Account, Model as AccountModel};
pub use client_state::{
    Column as ClientStateColumn, Entity as ClientState, Model as ClientStateModel,
};
pub use loan::{Column as LoanColumn, Entity as Loan, Model as LoanModel};
pub use pledge::{Column as PledgeColumn, Entity as Pledge, Model as PledgeModel};
pub use transaction::{
    Column as TransactionColumn, Entity as Transaction, Model as TransactionModel,
};
pub use wallet::{Column as WalletColumn, Entity as Wallet, Model as WalletModel};
