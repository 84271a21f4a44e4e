//! Shared test utilities for `CandleLend`.
//!
//! Helpers for setting up test databases, seeding accounts and loans with
//! sensible defaults, and scripted fakes for the gateway and auth seams.

use crate::{
    client::session::Session,
    core::{
        account,
        loan::{self, LoanApplication},
        types::Role,
        wallet,
    },
    entities,
    errors::{Error, Result},
    gateway::{AuthProvider, PaymentConfirmation, PaymentGateway, PaymentRequest, PaymentSession, Payout},
};
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Signs up a lender and seeds their wallet.
///
/// # Defaults
/// * email: `{id}@example.com`
/// * name: none
/// * seed deposit reference: `seed-{id}` (skipped when `balance_cents` is 0)
pub async fn create_test_lender(
    db: &DatabaseConnection,
    id: &str,
    balance_cents: i64,
) -> Result<entities::account::Model> {
    let created = account::sign_up(db, id, &format!("{id}@example.com"), None, Role::Lender).await?;
    if balance_cents > 0 {
        wallet::deposit_to_wallet(db, id, balance_cents, &format!("seed-{id}")).await?;
    }
    Ok(created)
}

/// Signs up a borrower with email `{id}@example.com`.
pub async fn create_test_borrower(
    db: &DatabaseConnection,
    id: &str,
) -> Result<entities::account::Model> {
    account::sign_up(db, id, &format!("{id}@example.com"), None, Role::Borrower).await
}

/// A filled-in application form requesting `amount` dollars.
pub fn test_application(amount: &str) -> LoanApplication {
    LoanApplication {
        name: "Amina".to_string(),
        country: "Kenya".to_string(),
        amount: amount.to_string(),
        purpose: "Sewing machine".to_string(),
        description: "Expanding a tailoring business".to_string(),
        image: None,
    }
}

/// Submits a pending loan for `borrower_id`, creating the borrower if needed.
pub async fn create_test_loan(
    db: &DatabaseConnection,
    borrower_id: &str,
    amount: &str,
) -> Result<entities::loan::Model> {
    if account::get_account(db, borrower_id).await?.is_none() {
        create_test_borrower(db, borrower_id).await?;
    }
    loan::apply_for_loan(db, borrower_id, test_application(amount), 2_500).await
}

/// Fresh database with one approved loan of `amount_cents` from borrower `amina`.
pub async fn setup_with_open_loan(
    amount_cents: i64,
) -> Result<(DatabaseConnection, entities::loan::Model)> {
    let db = setup_test_db().await?;
    let pending = create_test_loan(&db, "amina", &(amount_cents / 100).to_string()).await?;
    let open = loan::approve_loan(&db, pending.id).await?;
    Ok((db, open))
}

/// Session for `id` with token `tok-{id}`.
pub fn test_session(id: &str) -> Session {
    Session {
        account_id: id.to_string(),
        email: format!("{id}@example.com"),
        access_token: format!("tok-{id}"),
    }
}

/// Auth provider that answers `None` a set number of times, then the session.
pub struct FakeAuth {
    empty_answers: u32,
    session: Option<Session>,
    calls: AtomicU32,
}

impl FakeAuth {
    /// Always returns `session`.
    pub fn with(session: Session) -> Self {
        Self::appearing_after(0, session)
    }

    /// Returns `None` for the first `empty_answers` lookups.
    pub const fn appearing_after(empty_answers: u32, session: Session) -> Self {
        Self {
            empty_answers,
            session: Some(session),
            calls: AtomicU32::new(0),
        }
    }

    /// Never finds a session.
    pub const fn never() -> Self {
        Self {
            empty_answers: u32::MAX,
            session: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn get_session(&self, _access_token: &str) -> Result<Option<Session>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.empty_answers {
            return Ok(None);
        }
        Ok(self.session.clone())
    }
}

/// Scripted payment gateway that counts every call.
#[derive(Default)]
pub struct FakeGateway {
    session_failures: u32,
    payout_rejection: Option<String>,
    lost_payout_responses: u32,
    payouts: Mutex<HashMap<String, String>>,
    decline: Option<String>,
    confirm_delay: Duration,
    session_calls: AtomicU32,
    payout_calls: AtomicU32,
    confirm_calls: AtomicU32,
    last_amount: Mutex<Option<i64>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `failures` session creations fail transiently.
    #[must_use]
    pub fn failing_sessions(mut self, failures: u32) -> Self {
        self.session_failures = failures;
        self
    }

    /// Every payout is rejected with `message`.
    #[must_use]
    pub fn rejecting_payouts(mut self, message: &str) -> Self {
        self.payout_rejection = Some(message.to_string());
        self
    }

    /// The first `lost` payout calls create the payout, then fail transiently
    /// as if the response never made it back.
    #[must_use]
    pub fn losing_payout_responses(mut self, lost: u32) -> Self {
        self.lost_payout_responses = lost;
        self
    }

    /// Card confirmations fail with `message`.
    #[must_use]
    pub fn declining(mut self, message: &str) -> Self {
        self.decline = Some(message.to_string());
        self
    }

    /// Card confirmations take `delay` to answer.
    #[must_use]
    pub const fn confirming_after(mut self, delay: Duration) -> Self {
        self.confirm_delay = delay;
        self
    }

    pub fn session_calls(&self) -> u32 {
        self.session_calls.load(Ordering::SeqCst)
    }

    pub fn payout_calls(&self) -> u32 {
        self.payout_calls.load(Ordering::SeqCst)
    }

    /// Distinct payouts actually created.
    pub fn payouts_created(&self) -> usize {
        self.payouts.lock().map_or(0, |payouts| payouts.len())
    }

    pub fn confirm_calls(&self) -> u32 {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    /// Amount of the most recent session or payout request.
    pub fn last_amount(&self) -> Option<i64> {
        self.last_amount.lock().ok().and_then(|guard| *guard)
    }

    fn record(&self, request: PaymentRequest<'_>) {
        if let Ok(mut guard) = self.last_amount.lock() {
            *guard = Some(request.amount_cents);
        }
    }

    fn next_session(&self, request: PaymentRequest<'_>) -> Result<u32> {
        self.record(request);
        let call = self.session_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.session_failures {
            return Err(Error::Transient {
                message: "gateway unavailable".to_string(),
            });
        }
        Ok(call + 1)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(&self, request: PaymentRequest<'_>) -> Result<PaymentSession> {
        let n = self.next_session(request)?;
        Ok(PaymentSession::Checkout {
            session_id: format!("cs_test_{n}"),
            url: Some(format!("https://checkout.example.test/cs_test_{n}")),
        })
    }

    async fn create_payment_intent(&self, request: PaymentRequest<'_>) -> Result<PaymentSession> {
        let n = self.next_session(request)?;
        Ok(PaymentSession::Intent {
            client_secret: format!("pi_test_{n}_secret_abc"),
        })
    }

    async fn create_payout(
        &self,
        request: PaymentRequest<'_>,
        idempotency_key: &str,
    ) -> Result<Payout> {
        self.record(request);
        let call = self.payout_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.payout_rejection {
            return Err(Error::Gateway {
                message: message.clone(),
            });
        }
        let payout_id = {
            let mut payouts = self.payouts.lock().map_err(|_| Error::Transient {
                message: "payout ledger poisoned".to_string(),
            })?;
            let created = payouts.len() + 1;
            payouts
                .entry(idempotency_key.to_string())
                .or_insert_with(|| format!("po_test_{created}"))
                .clone()
        };
        if call < self.lost_payout_responses {
            return Err(Error::Transient {
                message: "gateway timed out".to_string(),
            });
        }
        Ok(Payout { payout_id })
    }

    async fn confirm_card_payment(&self, _client_secret: &str) -> Result<PaymentConfirmation> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        if !self.confirm_delay.is_zero() {
            tokio::time::sleep(self.confirm_delay).await;
        }
        Ok(self.decline.as_ref().map_or(PaymentConfirmation::Succeeded, |message| {
            PaymentConfirmation::Failed {
                message: message.clone(),
            }
        }))
    }
}
