//! Unified error types for the funding ledger.
//!
//! Every failure path in the crate ends up as an [`Error`]. Callers that need to
//! decide *what to do* with a failure (retry, send the user to sign-in, show a
//! message) use [`Error::kind`] rather than matching individual variants.

use std::time::Duration;
use thiserror::Error;

/// Local rule violations caught before any store or gateway call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The input could not be read as a number at all
    #[error("'{input}' is not a valid amount")]
    NotANumber {
        /// Raw text supplied by the user
        input: String,
    },
    /// Zero or negative
    #[error("Amount must be greater than zero")]
    NotPositive,
    /// More precision than the currency supports
    #[error("Amount '{input}' has more than two decimal places")]
    TooPrecise {
        /// Raw text supplied by the user
        input: String,
    },
    /// Pledges and loan requests are made in whole currency units
    #[error("Amount must be a whole number of dollars")]
    NotWholeUnits,
    /// Below the configured minimum
    #[error("Minimum amount is {minimum} cents, got {amount}")]
    BelowMinimum {
        /// Minimum in cents
        minimum: i64,
        /// Requested amount in cents
        amount: i64,
    },
    /// Amount exceeds the spendable wallet balance
    #[error("Insufficient funds: available {available} cents, requested {requested}")]
    InsufficientFunds {
        /// Current wallet balance in cents
        available: i64,
        /// Requested amount in cents
        requested: i64,
    },
    /// A required text field was blank
    #[error("Missing required field: {field}")]
    MissingField {
        /// Field name
        field: &'static str,
    },
}

/// The failure taxonomy used to decide how an error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected locally
    Validation,
    /// No session or an expired one; send the user to sign-in
    Authentication,
    /// Network or gateway hiccup; safe to retry with a fixed delay
    Transient,
    /// Gateway asked us to slow down; retry with exponential backoff
    RateLimited,
    /// Gateway or store rejected the request on its merits; show verbatim
    Business,
    /// Anything else; log it and show a generic notice
    Unexpected,
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Settings file or environment could not be used
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Store query failed
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed JSON payload
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Numeric value out of range
    #[error("Integer conversion error: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),

    /// Input rejected before any IO
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// No session
    #[error("Not signed in")]
    NotAuthenticated,

    /// Session lost across a redirect
    #[error("Session could not be confirmed; please sign in again")]
    ReauthenticationRequired,

    /// Worth retrying
    #[error("Transient failure: {message}")]
    Transient { message: String },

    /// 429 from the gateway, with its `Retry-After` hint
    #[error("Rate limited by payment gateway")]
    RateLimited { retry_after: Option<Duration> },

    /// Gateway refused the request
    #[error("{message}")]
    Gateway { message: String },

    /// Embedded confirmation did not answer in time
    #[error("Payment confirmation timed out after {seconds}s")]
    PaymentTimeout { seconds: u64 },

    /// Missing row
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Wallet balance too low in the store
    #[error("Insufficient funds: available {available} cents, required {required}")]
    InsufficientFunds { available: i64, required: i64 },

    /// Loan already funded or not yet approved
    #[error("Loan {loan_id} is not open for funding (status: {status})")]
    LoanNotOpen { loan_id: i64, status: String },

    /// Pledge would overfund the loan
    #[error("Loan {loan_id} only needs {remaining} more cents, pledge was {requested}")]
    ExceedsRemaining {
        loan_id: i64,
        remaining: i64,
        requested: i64,
    },

    /// Action needs the other role
    #[error("Account {account_id} is not a {expected}")]
    WrongRole {
        account_id: String,
        expected: &'static str,
    },

    /// Sign-up for an id that is taken
    #[error("Account already exists: {account_id}")]
    AccountExists { account_id: String },

    /// Loan status change not allowed
    #[error("Loan {loan_id} cannot move from {from} to {to}")]
    InvalidTransition {
        loan_id: i64,
        from: String,
        to: &'static str,
    },

    /// Amount changed after the confirmation prompt
    #[error("Please confirm the amount and recipient before submitting")]
    ConfirmationRequired,

    /// Form is already submitting
    #[error("A request from this form is already in progress")]
    RequestInFlight,

    /// Retry budget used up; wraps the last error
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<Error>,
    },
}

impl Error {
    /// Classifies the error for retry and presentation decisions.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::ConfirmationRequired | Self::RequestInFlight => {
                ErrorKind::Validation
            }
            Self::NotAuthenticated | Self::ReauthenticationRequired => ErrorKind::Authentication,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                ErrorKind::Transient
            }
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Gateway { .. }
            | Self::PaymentTimeout { .. }
            | Self::NotFound { .. }
            | Self::InsufficientFunds { .. }
            | Self::LoanNotOpen { .. }
            | Self::ExceedsRemaining { .. }
            | Self::WrongRole { .. }
            | Self::AccountExists { .. }
            | Self::InvalidTransition { .. } => ErrorKind::Business,
            Self::RetriesExhausted { last, .. } => match last.kind() {
                ErrorKind::Authentication => ErrorKind::Authentication,
                _ => ErrorKind::Unexpected,
            },
            _ => ErrorKind::Unexpected,
        }
    }

    /// Whether a bounded retry is allowed to try this operation again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::RateLimited)
    }

    /// Text suitable for a toast or inline error next to the form.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Business => self.to_string(),
            ErrorKind::Authentication => "Please sign in again to continue.".to_string(),
            ErrorKind::Transient | ErrorKind::RateLimited => {
                "The payment service is busy. Please try again in a moment.".to_string()
            }
            ErrorKind::Unexpected => "Something went wrong. Please try again.".to_string(),
        }
    }
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
