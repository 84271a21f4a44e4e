//! Core ledger logic - framework-agnostic rules and the authoritative store operations.
//!
//! The store operations (`account`, `wallet`, `loan`, `funding`) stand in for the
//! backend's atomic procedures; the client layer only ever reaches the tables
//! through them. `validation`, `report` and `retry` are pure helpers.

/// Signup and account lookups
pub mod account;
/// Locally persisted key-value state (in-flight deposits)
pub mod client_state;
/// The atomic "fund a loan" procedure and pledge queries
pub mod funding;
/// Loan applications, approval and listings
pub mod loan;
/// Funded totals, history dedup, progress and impact statistics
pub mod report;
/// Bounded retry with fixed delay or exponential backoff
pub mod retry;
/// Typed views of the stored status strings
pub mod types;
/// Amount parsing and pledge/deposit/withdrawal rules
pub mod validation;
/// Wallet balance, deposits, withdrawals and lending history
pub mod wallet;

pub use types::{LoanStatus, PledgeStatus, Role, TransactionKind};
