//! Payment gateway and auth provider seams.
//!
//! The client layer only talks to the outside world through these two traits.
//! [`http`] has the reqwest-backed implementations used in production; tests
//! substitute scripted fakes.

/// reqwest implementations of the gateway and auth provider
pub mod http;

use crate::client::session::Session;
use crate::errors::Result;
use async_trait::async_trait;

pub use http::{HttpAuthProvider, HttpGateway};

/// Who is paying and how much.
#[derive(Debug, Clone, Copy)]
pub struct PaymentRequest<'a> {
    /// Bearer token of the signed-in user
    pub access_token: &'a str,
    /// Account the money belongs to
    pub account_id: &'a str,
    /// Amount in cents
    pub amount_cents: i64,
}

/// A payment session ready to hand to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentSession {
    /// Hosted checkout; the user leaves the app and comes back via redirect
    Checkout {
        /// Gateway session id
        session_id: String,
        /// Hosted page URL, when the gateway returns one
        url: Option<String>,
    },
    /// In-page card widget confirmed with a client secret
    Intent {
        /// Secret passed to the card widget
        client_secret: String,
    },
}

impl PaymentSession {
    /// Stable identifier of the underlying payment, used as the ledger reference.
    #[must_use]
    pub fn reference(&self) -> &str {
        match self {
            Self::Checkout { session_id, .. } => session_id,
            Self::Intent { client_secret } => intent_id(client_secret),
        }
    }
}

/// Payment intent id inside a client secret.
///
/// Client secrets have the form `pi_123_secret_abc`; the intent id is the part
/// before `_secret_`.
#[must_use]
pub fn intent_id(client_secret: &str) -> &str {
    client_secret
        .split_once("_secret_")
        .map_or(client_secret, |(id, _)| id)
}

/// A payout the gateway accepted (not necessarily settled).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    /// Gateway payout id
    pub payout_id: String,
}

/// Outcome of confirming an embedded card payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentConfirmation {
    /// Card charged
    Succeeded,
    /// Card declined or otherwise failed; message is shown verbatim
    Failed {
        /// Gateway's explanation
        message: String,
    },
}

/// Card payments and payouts.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a hosted checkout session for a deposit.
    async fn create_checkout_session(&self, request: PaymentRequest<'_>) -> Result<PaymentSession>;

    /// Creates a payment intent for the embedded card widget.
    async fn create_payment_intent(&self, request: PaymentRequest<'_>) -> Result<PaymentSession>;

    /// Requests a payout to the user's bank account.
    ///
    /// Repeating a call with the same `idempotency_key` must return the payout
    /// created by the first call instead of sending the money twice.
    async fn create_payout(
        &self,
        request: PaymentRequest<'_>,
        idempotency_key: &str,
    ) -> Result<Payout>;

    /// Confirms an embedded card payment.
    async fn confirm_card_payment(&self, client_secret: &str) -> Result<PaymentConfirmation>;
}

/// Session lookups against the auth provider.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns the session for `access_token`, or `None` if it is not (yet) valid.
    async fn get_session(&self, access_token: &str) -> Result<Option<Session>>;
}
