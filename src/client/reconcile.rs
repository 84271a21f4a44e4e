//! Payment confirmation reconciler.
//!
//! Turns "the gateway says the card was charged" into exactly one wallet
//! credit. The amount and reference come from the in-flight record written by
//! the deposit requester, never from the return URL. A credit only happens while
//! that record exists and names the same payment as the return, and the store
//! ignores a second deposit with the same reference, so replaying a success
//! return cannot credit twice. Cancelled and failed payments drop the record.

use crate::{
    client::{
        dashboard::LenderView,
        requests::{PendingDeposit, pending_deposit_key},
        session::{Session, SessionContext},
    },
    config::Settings,
    core::{
        client_state,
        retry::{RetryPolicy, retry},
        validation::{format_cents, parse_amount},
        wallet::{self, DepositOutcome},
    },
    errors::{Error, Result},
    gateway::{AuthProvider, PaymentConfirmation, PaymentGateway, intent_id},
};
use reqwest::Url;
use sea_orm::DatabaseConnection;
use std::borrow::Cow;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// What the redirect back from the hosted checkout says happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentReturn {
    /// `?success=true&session_id=...`, optionally with the amount in dollars
    Success {
        /// Checkout session the gateway says was paid
        session_id: Option<String>,
        /// Amount hint in cents; never used for the credit
        amount: Option<i64>,
    },
    /// `?cancelled=true`
    Cancelled,
    /// `?error=...`
    Failed { message: String },
    /// No payment parameters at all
    Nothing,
}

fn flag_set(value: &str) -> bool {
    !value.is_empty() && !value.eq_ignore_ascii_case("false") && value != "0"
}

impl PaymentReturn {
    fn from_pairs<'p>(pairs: impl Iterator<Item = (Cow<'p, str>, Cow<'p, str>)>) -> Self {
        let mut success = false;
        let mut cancelled = false;
        let mut error = None;
        let mut amount = None;
        let mut session_id = None;

        for (key, value) in pairs {
            match key.as_ref() {
                "success" => success = flag_set(&value),
                "session_id" if !value.is_empty() => session_id = Some(value.into_owned()),
                "cancelled" => cancelled = flag_set(&value),
                "error" if !value.is_empty() => error = Some(value.into_owned()),
                "amount" => amount = parse_amount(&value).ok(),
                _ => {}
            }
        }

        if success {
            Self::Success { session_id, amount }
        } else if cancelled {
            Self::Cancelled
        } else if let Some(message) = error {
            Self::Failed { message }
        } else {
            Self::Nothing
        }
    }

    /// Parses a query string, with or without the leading `?`.
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let query = query.trim_start_matches('?');
        match Url::parse(&format!("http://return.invalid/?{query}")) {
            Ok(url) => Self::from_pairs(url.query_pairs()),
            Err(_) => Self::Nothing,
        }
    }

    /// Parses the full URL the user came back on.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| Error::Gateway {
            message: format!("Invalid return URL: {e}"),
        })?;
        Ok(Self::from_pairs(parsed.query_pairs()))
    }
}

/// How a [`Notice`] is styled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Neutral, e.g. a cancelled checkout
    Info,
    /// Money arrived
    Success,
    /// Payment failed
    Error,
}

/// A message for the user, shown as a toast or banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Styling
    pub level: NoticeLevel,
    /// Text shown verbatim
    pub message: String,
}

impl Notice {
    /// Neutral notice
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    /// Success notice
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    /// Error notice
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Result of handling a payment return or an embedded confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The wallet was credited
    Credited {
        /// Amount credited in cents
        amount: i64,
        /// Store balance afterwards
        balance: i64,
        /// What to tell the user
        notice: Notice,
    },
    /// Nothing in flight, or the store had already applied it
    AlreadyProcessed {
        /// Store balance
        balance: i64,
    },
    /// The return or secret names a payment other than the one in flight;
    /// nothing was credited and the in-flight record is kept
    Unmatched {
        /// Store balance
        balance: i64,
    },
    /// The user backed out of checkout
    Cancelled(Notice),
    /// The gateway reported a failed payment
    Failed(Notice),
    /// Not a payment return
    NoPayment,
}

/// Applies confirmed payments to the wallet.
pub struct Reconciler<'a> {
    db: &'a DatabaseConnection,
    auth: &'a dyn AuthProvider,
    gateway: &'a dyn PaymentGateway,
    session_policy: RetryPolicy,
    confirm_timeout: Duration,
}

impl<'a> Reconciler<'a> {
    /// Reconciler using the settings' session policy and confirm timeout.
    pub fn new(
        db: &'a DatabaseConnection,
        auth: &'a dyn AuthProvider,
        gateway: &'a dyn PaymentGateway,
        settings: &Settings,
    ) -> Self {
        Self {
            db,
            auth,
            gateway,
            session_policy: settings.session_policy(),
            confirm_timeout: settings.confirm_timeout(),
        }
    }

    /// Overrides the wall-clock limit on embedded confirmation.
    #[must_use]
    pub const fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    /// Handles the redirect back from the hosted checkout.
    ///
    /// Cancel and error returns drop the in-flight deposit and produce a
    /// notice. A success return first re-confirms the session, then credits the
    /// in-flight deposit if its reference is the returned session id.
    ///
    /// # Errors
    /// `ReauthenticationRequired` if the session cannot be confirmed within the
    /// retry budget; the session context is cleared in that case.
    #[instrument(skip_all, fields(ret = ?ret))]
    pub async fn handle_return(
        &self,
        ctx: &mut SessionContext,
        view: &mut LenderView,
        ret: PaymentReturn,
    ) -> Result<ReconcileOutcome> {
        match ret {
            PaymentReturn::Nothing => Ok(ReconcileOutcome::NoPayment),
            PaymentReturn::Cancelled => {
                if let Some(session) = ctx.current() {
                    self.discard_pending(&session.account_id).await?;
                }
                Ok(ReconcileOutcome::Cancelled(Notice::info("Payment was cancelled.")))
            }
            PaymentReturn::Failed { message } => {
                if let Some(session) = ctx.current() {
                    self.discard_pending(&session.account_id).await?;
                }
                Ok(ReconcileOutcome::Failed(Notice::error(message)))
            }
            PaymentReturn::Success { session_id, amount } => {
                let session = self.confirm_session(ctx).await?;
                let Some(reference) = session_id else {
                    warn!("Success return for {} names no checkout session", session.account_id);
                    return self.unmatched(&session.account_id, view).await;
                };
                self.credit_pending(&session, view, &reference, amount).await
            }
        }
    }

    /// Confirms an embedded card payment and credits it.
    ///
    /// The card is only confirmed when `client_secret` belongs to the deposit in
    /// flight. The confirmation is bounded by the configured timeout. A timeout
    /// or a declined card counts as a failed payment and the in-flight record is
    /// dropped.
    ///
    /// # Errors
    /// `PaymentTimeout` when the gateway does not answer in time.
    #[instrument(skip_all)]
    pub async fn confirm_embedded(
        &self,
        ctx: &SessionContext,
        view: &mut LenderView,
        client_secret: &str,
    ) -> Result<ReconcileOutcome> {
        let session = ctx.require()?.clone();
        let reference = intent_id(client_secret);
        let in_flight = self.pending(&session.account_id).await?;
        if in_flight.is_none_or(|pending| pending.reference != reference) {
            warn!(
                "Payment {} is not the deposit in flight for {}, not confirming",
                reference, session.account_id
            );
            return self.unmatched(&session.account_id, view).await;
        }

        let confirmation =
            tokio::time::timeout(self.confirm_timeout, self.gateway.confirm_card_payment(client_secret))
                .await;

        match confirmation {
            Ok(Ok(PaymentConfirmation::Succeeded)) => {
                self.credit_pending(&session, view, reference, None).await
            }
            Ok(Ok(PaymentConfirmation::Failed { message })) => {
                self.discard_pending(&session.account_id).await?;
                Ok(ReconcileOutcome::Failed(Notice::error(message)))
            }
            Ok(Err(e)) => {
                self.discard_pending(&session.account_id).await?;
                Err(e)
            }
            Err(_) => {
                warn!(
                    "Card confirmation for {} timed out after {:?}",
                    session.account_id, self.confirm_timeout
                );
                self.discard_pending(&session.account_id).await?;
                Err(Error::PaymentTimeout {
                    seconds: self.confirm_timeout.as_secs(),
                })
            }
        }
    }

    async fn confirm_session(&self, ctx: &mut SessionContext) -> Result<Session> {
        let token = ctx
            .require()
            .map_err(|_| Error::ReauthenticationRequired)?
            .access_token
            .clone();

        let confirmed = retry(&self.session_policy, "confirm session", || {
            let token = token.as_str();
            async move {
                self.auth
                    .get_session(token)
                    .await?
                    .ok_or_else(|| Error::Transient {
                        message: "session not available yet".to_string(),
                    })
            }
        })
        .await;

        confirmed.map_err(|e| {
            warn!("Could not confirm session after payment return: {e}");
            ctx.sign_out();
            Error::ReauthenticationRequired
        })
    }

    async fn pending(&self, account_id: &str) -> Result<Option<PendingDeposit>> {
        match client_state::get(self.db, &pending_deposit_key(account_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn unmatched(&self, account_id: &str, view: &mut LenderView) -> Result<ReconcileOutcome> {
        let balance = wallet::get_balance(self.db, account_id).await?;
        view.reconcile_balance(balance);
        Ok(ReconcileOutcome::Unmatched { balance })
    }

    async fn credit_pending(
        &self,
        session: &Session,
        view: &mut LenderView,
        reference: &str,
        hinted: Option<i64>,
    ) -> Result<ReconcileOutcome> {
        let account_id = session.account_id.as_str();
        let key = pending_deposit_key(account_id);

        let Some(pending) = self.pending(account_id).await? else {
            let balance = wallet::get_balance(self.db, account_id).await?;
            view.reconcile_balance(balance);
            info!("No deposit in flight for {}, nothing to credit", account_id);
            return Ok(ReconcileOutcome::AlreadyProcessed { balance });
        };
        if pending.reference != reference {
            warn!(
                "Return names {} but {} is in flight for {}, not crediting",
                reference, pending.reference, account_id
            );
            return self.unmatched(account_id, view).await;
        }
        if hinted.is_some_and(|amount| amount != pending.amount) {
            warn!(
                "Return URL amount {:?} differs from in-flight amount {}, using the latter",
                hinted, pending.amount
            );
        }

        let before = wallet::get_balance(self.db, account_id).await?;
        view.reconcile_balance(before);
        view.credit_provisionally(pending.amount);

        let outcome =
            match wallet::deposit_to_wallet(self.db, account_id, pending.amount, &pending.reference)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    view.reconcile_balance(before);
                    return Err(e);
                }
            };
        client_state::take(self.db, &key).await?;

        let balance = wallet::get_balance(self.db, account_id).await?;
        view.reconcile_balance(balance);

        Ok(match outcome {
            DepositOutcome::Credited(_) => ReconcileOutcome::Credited {
                amount: pending.amount,
                balance,
                notice: Notice::success(format!(
                    "{} added to your wallet.",
                    format_cents(pending.amount)
                )),
            },
            DepositOutcome::AlreadyApplied(_) => ReconcileOutcome::AlreadyProcessed { balance },
        })
    }

    async fn discard_pending(&self, account_id: &str) -> Result<()> {
        if client_state::take(self.db, &pending_deposit_key(account_id))
            .await?
            .is_some()
        {
            info!("Dropped in-flight deposit for {}", account_id);
        }
        Ok(())
    }
}
