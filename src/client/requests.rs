//! Funding, deposit and withdrawal requesters.
//!
//! Every requester validates locally first, so bad input never reaches the
//! store or the gateway. Pledges and withdrawals additionally need an explicit
//! confirmation produced by `prepare`. Each form carries a [`SubmitGuard`] so a
//! second submit while the first is still running is refused.

use crate::{
    client::{dashboard::LenderView, session::Session},
    config::{CheckoutFlow, Settings},
    core::{
        client_state,
        funding::{self, FundingReceipt},
        retry::{RetryPolicy, retry},
        validation::{self, format_cents},
    },
    entities::{loan, wallet as wallet_entity},
    errors::{Error, Result},
    gateway::{PaymentGateway, PaymentRequest, PaymentSession},
};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Per-form in-flight flag.
///
/// Clones share the flag, so a UI can hold one to disable its submit button.
#[derive(Debug, Clone, Default)]
pub struct SubmitGuard {
    in_flight: Arc<AtomicBool>,
}

impl SubmitGuard {
    /// Marks the form as submitting until the returned token is dropped.
    ///
    /// # Errors
    /// `RequestInFlight` if a submission is already outstanding.
    pub fn try_begin(&self) -> Result<InFlight> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(Error::RequestInFlight);
        }
        Ok(InFlight {
            flag: Arc::clone(&self.in_flight),
        })
    }

    /// Whether a submission is outstanding.
    #[must_use]
    pub fn is_submitting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Releases the form's [`SubmitGuard`] when dropped.
#[derive(Debug)]
#[must_use = "the form is released as soon as this is dropped"]
pub struct InFlight {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// A single-amount form: what the user typed plus the last error shown.
///
/// Failed submissions leave `amount` as typed so the user can correct it.
#[derive(Debug, Clone, Default)]
pub struct AmountForm {
    /// Amount as typed, in dollars
    pub amount: String,
    /// Message from the last failed submit
    pub error: Option<String>,
    guard: SubmitGuard,
}

/// Pledge amount entry on a loan card.
pub type PledgeForm = AmountForm;
/// Deposit amount entry on the profile page.
pub type DepositForm = AmountForm;
/// Withdrawal amount entry on the profile page.
pub type WithdrawalForm = AmountForm;

impl AmountForm {
    /// Form pre-filled with `amount`.
    pub fn new(amount: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            ..Self::default()
        }
    }

    /// Shared handle on this form's in-flight flag.
    #[must_use]
    pub fn guard(&self) -> SubmitGuard {
        self.guard.clone()
    }

    fn fail(&mut self, err: Error) -> Error {
        self.error = Some(err.user_message());
        err
    }

    fn succeed(&mut self) {
        self.amount.clear();
        self.error = None;
    }
}

/// Amount and recipient the lender agreed to. Only [`FundingRequester::prepare`]
/// builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PledgeConfirmation {
    loan_id: i64,
    recipient: String,
    amount: i64,
    input: String,
}

impl PledgeConfirmation {
    /// Loan being funded
    #[must_use]
    pub const fn loan_id(&self) -> i64 {
        self.loan_id
    }

    /// Amount in cents
    #[must_use]
    pub const fn amount(&self) -> i64 {
        self.amount
    }

    /// Prompt text, e.g. `"Pledge $40.00 to Amina (Kenya)?"`.
    #[must_use]
    pub fn prompt(&self) -> String {
        format!("Pledge {} to {}?", format_cents(self.amount), self.recipient)
    }
}

/// Validates and dispatches pledges.
pub struct FundingRequester<'a> {
    db: &'a DatabaseConnection,
    min_pledge_cents: i64,
}

impl<'a> FundingRequester<'a> {
    /// Requester enforcing the configured minimum pledge.
    pub fn new(db: &'a DatabaseConnection, settings: &Settings) -> Self {
        Self {
            db,
            min_pledge_cents: settings.lending.min_pledge_cents,
        }
    }

    /// Validates the form against the local balance and builds the confirmation
    /// the lender has to accept. Makes no store call.
    pub fn prepare(
        &self,
        form: &mut PledgeForm,
        view: &LenderView,
        loan: &loan::Model,
    ) -> Result<PledgeConfirmation> {
        let amount = validation::validate_pledge(&form.amount, view.balance, self.min_pledge_cents)
            .map_err(|e| form.fail(e.into()))?;

        form.error = None;
        Ok(PledgeConfirmation {
            loan_id: loan.id,
            recipient: format!("{} ({})", loan.name, loan.country),
            amount,
            input: form.amount.trim().to_string(),
        })
    }

    /// Sends a confirmed pledge to the store.
    ///
    /// On success the view is patched and the form cleared. On failure the view
    /// is untouched and the form keeps its amount.
    ///
    /// # Errors
    /// `ConfirmationRequired` if the amount was edited after `prepare`,
    /// `RequestInFlight` if this form is already submitting, otherwise
    /// whatever the store's funding procedure reports.
    #[instrument(skip_all, fields(loan_id = confirmation.loan_id, amount = confirmation.amount))]
    pub async fn submit(
        &self,
        form: &mut PledgeForm,
        view: &mut LenderView,
        confirmation: PledgeConfirmation,
    ) -> Result<FundingReceipt> {
        if confirmation.input != form.amount.trim() {
            return Err(form.fail(Error::ConfirmationRequired));
        }
        let _in_flight = form.guard.try_begin()?;

        match funding::fund_loan(
            self.db,
            &view.account_id,
            confirmation.loan_id,
            confirmation.amount,
            &view.email,
        )
        .await
        {
            Ok(receipt) => {
                view.apply_pledge(&receipt);
                form.succeed();
                Ok(receipt)
            }
            Err(e) => {
                error!("Pledge to loan {} failed: {e}", confirmation.loan_id);
                Err(form.fail(e))
            }
        }
    }
}

/// Deposit in flight while the user is away on the hosted checkout page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeposit {
    /// Amount in cents
    pub amount: i64,
    /// Gateway reference the credit will be keyed by
    pub reference: String,
    /// When the checkout was started
    pub created_at: DateTime<Utc>,
}

/// `client_state` key holding an account's in-flight deposit.
#[must_use]
pub fn pending_deposit_key(account_id: &str) -> String {
    format!("pending_deposit:{account_id}")
}

/// Where to send the user to pay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositInitiation {
    /// Navigate to the hosted checkout page
    Redirect {
        /// Gateway session id, echoed back on the success URL
        session_id: String,
        /// Hosted page, when the gateway returned one
        url: Option<String>,
    },
    /// Mount the card widget with this secret
    Embedded { client_secret: String },
}

impl From<PaymentSession> for DepositInitiation {
    fn from(session: PaymentSession) -> Self {
        match session {
            PaymentSession::Checkout { session_id, url } => Self::Redirect { session_id, url },
            PaymentSession::Intent { client_secret } => Self::Embedded { client_secret },
        }
    }
}

/// Starts card deposits. The wallet is only credited later, by the reconciler.
pub struct DepositRequester<'a> {
    db: &'a DatabaseConnection,
    gateway: &'a dyn PaymentGateway,
    policy: RetryPolicy,
    flow: CheckoutFlow,
}

impl<'a> DepositRequester<'a> {
    /// Requester using the settings' retry policy and checkout flow.
    pub fn new(
        db: &'a DatabaseConnection,
        gateway: &'a dyn PaymentGateway,
        settings: &Settings,
    ) -> Self {
        Self {
            db,
            gateway,
            policy: settings.retry_policy(),
            flow: settings.gateway.flow,
        }
    }

    /// Validates the amount, asks the gateway for a payment session (with
    /// bounded retry) and records the deposit as in flight.
    ///
    /// # Errors
    /// Validation errors before any gateway call; `RetriesExhausted` when the
    /// gateway kept failing; authentication errors when the session is gone.
    #[instrument(skip_all, fields(account = %session.account_id, amount = %form.amount))]
    pub async fn initiate(
        &self,
        session: &Session,
        form: &mut DepositForm,
    ) -> Result<DepositInitiation> {
        let amount = validation::validate_deposit(&form.amount).map_err(|e| form.fail(e.into()))?;
        let _in_flight = form.guard.try_begin()?;

        let request = PaymentRequest {
            access_token: &session.access_token,
            account_id: &session.account_id,
            amount_cents: amount,
        };
        let flow = self.flow;
        let created = retry(&self.policy, "create deposit session", || async move {
            match flow {
                CheckoutFlow::Redirect => self.gateway.create_checkout_session(request).await,
                CheckoutFlow::Embedded => self.gateway.create_payment_intent(request).await,
            }
        })
        .await;
        let payment = created.map_err(|e| form.fail(e))?;

        let pending = PendingDeposit {
            amount,
            reference: payment.reference().to_string(),
            created_at: Utc::now(),
        };
        let record = serde_json::to_string(&pending)?;
        client_state::put(self.db, &pending_deposit_key(&session.account_id), &record)
            .await
            .map_err(|e| form.fail(e))?;

        info!(
            "Deposit of {} cents started for {} ({})",
            amount, session.account_id, pending.reference
        );
        form.succeed();
        Ok(payment.into())
    }
}

/// Amount the lender agreed to withdraw.
///
/// Carries the idempotency key for the payout, so every retry of this one
/// withdrawal is recognised by the gateway as the same request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalConfirmation {
    amount: i64,
    input: String,
    idempotency_key: String,
}

impl WithdrawalConfirmation {
    /// Amount in cents
    #[must_use]
    pub const fn amount(&self) -> i64 {
        self.amount
    }

    /// Key sent with every payout attempt for this withdrawal.
    #[must_use]
    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    /// Prompt text, e.g. `"Withdraw $25.00 to your bank account?"`.
    #[must_use]
    pub fn prompt(&self) -> String {
        format!("Withdraw {} to your bank account?", format_cents(self.amount))
    }
}

/// Requests payouts and debits the wallet once the gateway accepts them.
pub struct WithdrawalRequester<'a> {
    db: &'a DatabaseConnection,
    gateway: &'a dyn PaymentGateway,
    policy: RetryPolicy,
}

impl<'a> WithdrawalRequester<'a> {
    /// Requester using the settings' retry policy.
    pub fn new(
        db: &'a DatabaseConnection,
        gateway: &'a dyn PaymentGateway,
        settings: &Settings,
    ) -> Self {
        Self {
            db,
            gateway,
            policy: settings.retry_policy(),
        }
    }

    /// Checks the amount against the local balance. Makes no network call.
    pub fn prepare(
        &self,
        form: &mut WithdrawalForm,
        view: &LenderView,
    ) -> Result<WithdrawalConfirmation> {
        let amount = validation::validate_withdrawal(&form.amount, view.balance)
            .map_err(|e| form.fail(e.into()))?;
        form.error = None;
        Ok(WithdrawalConfirmation {
            amount,
            input: form.amount.trim().to_string(),
            idempotency_key: format!("payout-{}", Uuid::new_v4()),
        })
    }

    /// Requests the payout, then debits the wallet by the payout reference.
    ///
    /// Retried attempts reuse the confirmation's idempotency key, so a payout
    /// whose response was lost is not created twice. The local balance drops as
    /// soon as the gateway accepts the payout; bank settlement is not awaited.
    #[instrument(skip_all, fields(account = %session.account_id, amount = confirmation.amount))]
    pub async fn submit(
        &self,
        session: &Session,
        form: &mut WithdrawalForm,
        view: &mut LenderView,
        confirmation: WithdrawalConfirmation,
    ) -> Result<wallet_entity::Model> {
        if confirmation.input != form.amount.trim() {
            return Err(form.fail(Error::ConfirmationRequired));
        }
        let _in_flight = form.guard.try_begin()?;

        let request = PaymentRequest {
            access_token: &session.access_token,
            account_id: &session.account_id,
            amount_cents: confirmation.amount,
        };
        let key = confirmation.idempotency_key.as_str();
        let payout = retry(&self.policy, "create payout", || async move {
            self.gateway.create_payout(request, key).await
        })
        .await
        .map_err(|e| form.fail(e))?;

        view.balance -= confirmation.amount;
        match crate::core::wallet::withdraw_from_wallet(
            self.db,
            &session.account_id,
            confirmation.amount,
            &payout.payout_id,
        )
        .await
        {
            Ok(wallet) => {
                view.reconcile_balance(wallet.balance);
                form.succeed();
                Ok(wallet)
            }
            Err(e) => {
                error!(
                    "Payout {} accepted but wallet debit failed for {}: {e}",
                    payout.payout_id, session.account_id
                );
                view.balance += confirmation.amount;
                Err(form.fail(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::{loan::require_loan, wallet::get_balance};
    use crate::errors::{ErrorKind, ValidationError};
    use crate::test_utils::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.retry.delay_ms = 0;
        settings
    }

    async fn lender_view(db: &DatabaseConnection, id: &str) -> Result<LenderView> {
        LenderView::load(db, &test_session(id)).await
    }

    #[test]
    fn test_guard_rejects_second_submission() {
        let guard = SubmitGuard::default();
        let first = guard.try_begin().unwrap();
        assert!(guard.is_submitting());
        assert!(matches!(guard.try_begin(), Err(Error::RequestInFlight)));
        drop(first);
        assert!(!guard.is_submitting());
        assert!(guard.try_begin().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_pledges_never_reach_the_store() -> Result<()> {
        let (db, loan) = setup_with_open_loan(10_000).await?;
        create_test_lender(&db, "lender-1", 10_000).await?;
        let view = lender_view(&db, "lender-1").await?;

        // Prepare is pure; an empty mock would fail any query
        let mock = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let settings = settings();
        let requester = FundingRequester::new(&mock, &settings);

        for (input, expected) in [
            ("10", ValidationError::BelowMinimum { minimum: 2_500, amount: 1_000 }),
            ("-5", ValidationError::NotPositive),
            ("25.50", ValidationError::NotWholeUnits),
            ("500", ValidationError::InsufficientFunds { available: 10_000, requested: 50_000 }),
        ] {
            let mut form = PledgeForm::new(input);
            let result = requester.prepare(&mut form, &view, &loan);
            assert!(matches!(result, Err(Error::Validation(ref e)) if *e == expected), "{input}");
            assert_eq!(form.amount, input);
            assert!(form.error.is_some());
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_pledge_updates_local_view_by_amount() -> Result<()> {
        // $100 loan with $20 already pledged; lender has $100 and pledges $40
        let (db, loan) = setup_with_open_loan(10_000).await?;
        create_test_lender(&db, "other", 2_000).await?;
        funding::fund_loan(&db, "other", loan.id, 2_000, "other@example.com").await?;
        create_test_lender(&db, "lender-1", 10_000).await?;
        let loan = require_loan(&db, loan.id).await?;

        let settings = settings();
        let requester = FundingRequester::new(&db, &settings);
        let mut view = lender_view(&db, "lender-1").await?;
        let mut form = PledgeForm::new("40");

        let confirmation = requester.prepare(&mut form, &view, &loan)?;
        assert_eq!(confirmation.prompt(), "Pledge $40.00 to Amina (Kenya)?");
        let receipt = requester.submit(&mut form, &mut view, confirmation).await?;

        assert_eq!(view.balance, 6_000);
        assert_eq!(view.funded_totals.get(&loan.id), Some(&6_000));
        assert_eq!(view.lending_history.len(), 1);
        assert_eq!(receipt.loan.status, "open");
        assert_eq!(get_balance(&db, "lender-1").await?, 6_000);
        assert!(form.amount.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_pledge_keeps_form_and_view() -> Result<()> {
        let (db, loan) = setup_with_open_loan(5_000).await?;
        create_test_lender(&db, "lender-1", 10_000).await?;
        let settings = settings();
        let requester = FundingRequester::new(&db, &settings);
        let mut view = lender_view(&db, "lender-1").await?;

        // Someone else completes the loan between prepare and submit
        let mut form = PledgeForm::new("30");
        let confirmation = requester.prepare(&mut form, &view, &loan)?;
        create_test_lender(&db, "other", 5_000).await?;
        funding::fund_loan(&db, "other", loan.id, 5_000, "other@example.com").await?;

        let result = requester.submit(&mut form, &mut view, confirmation).await;
        assert!(matches!(result, Err(Error::LoanNotOpen { .. })));
        assert_eq!(view.balance, 10_000);
        assert!(view.funded_totals.is_empty());
        assert_eq!(form.amount, "30");
        assert!(form.error.is_some());
        assert!(!form.guard().is_submitting());
        Ok(())
    }

    #[tokio::test]
    async fn test_submit_requires_matching_confirmation() -> Result<()> {
        let (db, loan) = setup_with_open_loan(10_000).await?;
        create_test_lender(&db, "lender-1", 10_000).await?;
        let settings = settings();
        let requester = FundingRequester::new(&db, &settings);
        let mut view = lender_view(&db, "lender-1").await?;

        let mut form = PledgeForm::new("30");
        let confirmation = requester.prepare(&mut form, &view, &loan)?;
        form.amount = "90".to_string();

        let result = requester.submit(&mut form, &mut view, confirmation).await;
        assert!(matches!(result, Err(Error::ConfirmationRequired)));
        assert_eq!(get_balance(&db, "lender-1").await?, 10_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_in_flight_pledge_blocks_resubmit() -> Result<()> {
        let (db, loan) = setup_with_open_loan(10_000).await?;
        create_test_lender(&db, "lender-1", 10_000).await?;
        let settings = settings();
        let requester = FundingRequester::new(&db, &settings);
        let mut view = lender_view(&db, "lender-1").await?;

        let mut form = PledgeForm::new("30");
        let confirmation = requester.prepare(&mut form, &view, &loan)?;
        let _held = form.guard().try_begin()?;

        let result = requester.submit(&mut form, &mut view, confirmation).await;
        assert!(matches!(result, Err(Error::RequestInFlight)));
        assert_eq!(get_balance(&db, "lender-1").await?, 10_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_deposit_makes_no_gateway_call() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let gateway = FakeGateway::new();
        let settings = settings();
        let requester = DepositRequester::new(&db, &gateway, &settings);

        let mut form = DepositForm::new("abc");
        let result = requester.initiate(&test_session("lender-1"), &mut form).await;

        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::NotANumber { .. }))
        ));
        assert_eq!(gateway.session_calls(), 0);
    }

    #[tokio::test]
    async fn test_deposit_records_in_flight_and_leaves_wallet() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_lender(&db, "lender-1", 1_000).await?;
        let gateway = FakeGateway::new();
        let settings = settings();
        let requester = DepositRequester::new(&db, &gateway, &settings);

        let mut form = DepositForm::new("50.25");
        let initiation = requester.initiate(&test_session("lender-1"), &mut form).await?;

        assert!(matches!(initiation, DepositInitiation::Redirect { ref session_id, .. } if session_id == "cs_test_1"));
        assert_eq!(gateway.last_amount(), Some(5_025));
        assert_eq!(get_balance(&db, "lender-1").await?, 1_000);

        let stored = client_state::get(&db, &pending_deposit_key("lender-1")).await?.unwrap();
        let pending: PendingDeposit = serde_json::from_str(&stored)?;
        assert_eq!(pending.amount, 5_025);
        assert_eq!(pending.reference, "cs_test_1");
        Ok(())
    }

    #[tokio::test]
    async fn test_embedded_deposit_keys_by_intent_id() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_lender(&db, "lender-1", 0).await?;
        let gateway = FakeGateway::new();
        let mut settings = settings();
        settings.gateway.flow = CheckoutFlow::Embedded;
        let requester = DepositRequester::new(&db, &gateway, &settings);

        let mut form = DepositForm::new("20");
        let initiation = requester.initiate(&test_session("lender-1"), &mut form).await?;

        assert_eq!(
            initiation,
            DepositInitiation::Embedded {
                client_secret: "pi_test_1_secret_abc".to_string()
            }
        );
        let stored = client_state::get(&db, &pending_deposit_key("lender-1")).await?.unwrap();
        let pending: PendingDeposit = serde_json::from_str(&stored)?;
        assert_eq!(pending.reference, "pi_test_1");
        Ok(())
    }

    #[tokio::test]
    async fn test_deposit_session_retries_are_bounded() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_lender(&db, "lender-1", 0).await?;
        let gateway = FakeGateway::new().failing_sessions(u32::MAX);
        let settings = settings();
        let requester = DepositRequester::new(&db, &gateway, &settings);

        let mut form = DepositForm::new("20");
        let result = requester.initiate(&test_session("lender-1"), &mut form).await;

        assert!(matches!(result, Err(Error::RetriesExhausted { attempts: 3, .. })));
        assert_eq!(gateway.session_calls(), 3);
        assert_eq!(get_balance(&db, "lender-1").await?, 0);
        assert!(client_state::get(&db, &pending_deposit_key("lender-1")).await?.is_none());
        assert_eq!(form.amount, "20");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Unexpected);
        Ok(())
    }

    #[tokio::test]
    async fn test_deposit_recovers_from_transient_failure() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_lender(&db, "lender-1", 0).await?;
        let gateway = FakeGateway::new().failing_sessions(2);
        let settings = settings();
        let requester = DepositRequester::new(&db, &gateway, &settings);

        let mut form = DepositForm::new("20");
        let initiation = requester.initiate(&test_session("lender-1"), &mut form).await?;
        assert!(matches!(initiation, DepositInitiation::Redirect { .. }));
        assert_eq!(gateway.session_calls(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_withdrawal_over_balance_never_reaches_gateway() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_lender(&db, "lender-1", 1_000).await?;
        let gateway = FakeGateway::new();
        let settings = settings();
        let requester = WithdrawalRequester::new(&db, &gateway, &settings);
        let view = lender_view(&db, "lender-1").await?;

        let mut form = WithdrawalForm::new("10.01");
        let result = requester.prepare(&mut form, &view);
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::InsufficientFunds { .. }))
        ));
        assert_eq!(gateway.payout_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_withdrawal_debits_after_payout_accepted() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_lender(&db, "lender-1", 10_000).await?;
        let gateway = FakeGateway::new();
        let settings = settings();
        let requester = WithdrawalRequester::new(&db, &gateway, &settings);
        let session = test_session("lender-1");
        let mut view = lender_view(&db, "lender-1").await?;

        let mut form = WithdrawalForm::new("25");
        let confirmation = requester.prepare(&mut form, &view)?;
        assert_eq!(confirmation.prompt(), "Withdraw $25.00 to your bank account?");
        let wallet = requester.submit(&session, &mut form, &mut view, confirmation).await?;

        assert_eq!(wallet.balance, 7_500);
        assert_eq!(view.balance, 7_500);
        assert_eq!(gateway.payout_calls(), 1);
        assert_eq!(gateway.last_amount(), Some(2_500));
        Ok(())
    }

    #[tokio::test]
    async fn test_payout_retry_after_lost_response_pays_once() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_lender(&db, "lender-1", 10_000).await?;
        let gateway = FakeGateway::new().losing_payout_responses(1);
        let settings = settings();
        let requester = WithdrawalRequester::new(&db, &gateway, &settings);
        let session = test_session("lender-1");
        let mut view = lender_view(&db, "lender-1").await?;

        let mut form = WithdrawalForm::new("25");
        let confirmation = requester.prepare(&mut form, &view)?;
        let wallet = requester.submit(&session, &mut form, &mut view, confirmation).await?;

        // The first attempt created the payout but its answer was lost
        assert_eq!(gateway.payout_calls(), 2);
        assert_eq!(gateway.payouts_created(), 1);
        assert_eq!(wallet.balance, 7_500);
        assert_eq!(get_balance(&db, "lender-1").await?, 7_500);
        Ok(())
    }

    #[tokio::test]
    async fn test_each_withdrawal_gets_its_own_key() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_lender(&db, "lender-1", 10_000).await?;
        let gateway = FakeGateway::new();
        let settings = settings();
        let requester = WithdrawalRequester::new(&db, &gateway, &settings);
        let view = lender_view(&db, "lender-1").await?;

        let first = requester.prepare(&mut WithdrawalForm::new("25"), &view)?;
        let second = requester.prepare(&mut WithdrawalForm::new("25"), &view)?;
        assert_ne!(first.idempotency_key(), second.idempotency_key());
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_payout_leaves_wallet_alone() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_lender(&db, "lender-1", 10_000).await?;
        let gateway = FakeGateway::new().rejecting_payouts("Invalid user_id or amount");
        let settings = settings();
        let requester = WithdrawalRequester::new(&db, &gateway, &settings);
        let session = test_session("lender-1");
        let mut view = lender_view(&db, "lender-1").await?;

        let mut form = WithdrawalForm::new("25");
        let confirmation = requester.prepare(&mut form, &view)?;
        let result = requester.submit(&session, &mut form, &mut view, confirmation).await;

        assert!(matches!(result, Err(Error::Gateway { .. })));
        assert_eq!(gateway.payout_calls(), 1);
        assert_eq!(view.balance, 10_000);
        assert_eq!(get_balance(&db, "lender-1").await?, 10_000);
        assert_eq!(form.error.as_deref(), Some("Invalid user_id or amount"));
        Ok(())
    }
}
