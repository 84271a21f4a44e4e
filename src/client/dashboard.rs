//! Role-selected dashboards.
//!
//! The role is read once when the dashboard is loaded and picks the variant.
//! Lender and borrower state never share a struct, so neither view carries
//! fields that only make sense for the other role.

use crate::{
    client::session::Session,
    core::{
        account, funding,
        funding::FundingReceipt,
        loan as loan_ops,
        report::{self, HistoryEntry, ImpactStats, LoanProgress, PledgeAmount},
        types::Role,
        wallet,
    },
    entities::{loan, transaction},
    errors::Result,
};
use sea_orm::DatabaseConnection;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, instrument, warn};

/// What the signed-in user sees after login.
#[derive(Debug, Clone)]
pub enum Dashboard {
    /// Wallet, pledges and impact
    Lender(LenderView),
    /// Application status and pending requests
    Borrower(BorrowerView),
}

impl Dashboard {
    /// Loads the dashboard matching the account's stored role.
    #[instrument(skip(db, session), fields(account = %session.account_id))]
    pub async fn load(db: &DatabaseConnection, session: &Session) -> Result<Self> {
        match account::get_role(db, &session.account_id).await? {
            Role::Lender => Ok(Self::Lender(LenderView::load(db, session).await?)),
            Role::Borrower => Ok(Self::Borrower(
                BorrowerView::load(db, &session.account_id).await?,
            )),
        }
    }
}

/// Local copy of everything a lender's profile page shows.
///
/// Loaded from the store, then patched in place after each successful pledge
/// or deposit. Whenever the store hands back an authoritative value that
/// disagrees with the local one, the store wins.
#[derive(Debug, Clone)]
pub struct LenderView {
    /// Signed-in lender
    pub account_id: String,
    /// Sent with each pledge
    pub email: String,
    /// Wallet balance in cents
    pub balance: i64,
    /// `loan_fund` transactions, newest first
    pub lending_history: Vec<transaction::Model>,
    /// Pledged total per loan across all lenders, for the loan list
    pub funded_totals: BTreeMap<i64, i64>,
    /// This lender's own pledges
    pub pledges: Vec<PledgeAmount>,
    /// Totals over this lender's pledges
    pub impact: ImpactStats,
    borrowers: HashSet<String>,
}

impl LenderView {
    /// Reads the lender's wallet, history and pledges from the store.
    pub async fn load(db: &DatabaseConnection, session: &Session) -> Result<Self> {
        let account_id = session.account_id.as_str();
        let balance = wallet::get_balance(db, account_id).await?;
        let lending_history = wallet::get_lending_history(db, account_id).await?;
        let own = funding::get_pledges_for_lender(db, account_id).await?;
        let all = funding::get_all_pledges(db).await?;
        let loans = loan_ops::list_all_loans(db).await?;

        let mine: HashSet<i64> = own.iter().map(|p| p.loan_id).collect();
        let every: Vec<PledgeAmount> = all.iter().map(PledgeAmount::from).collect();
        let borrowers = loans
            .iter()
            .filter(|l| mine.contains(&l.id))
            .map(|l| l.borrower_id.clone())
            .collect();

        debug!(
            "Loaded lender view for {}: balance {}, {} pledges",
            account_id,
            balance,
            own.len()
        );
        Ok(Self {
            account_id: account_id.to_string(),
            email: session.email.clone(),
            balance,
            lending_history,
            funded_totals: report::aggregate_funded_totals(&every),
            pledges: own.iter().map(PledgeAmount::from).collect(),
            impact: report::impact_stats(&own, &loans),
            borrowers,
        })
    }

    /// Patches the view after a successful pledge.
    ///
    /// Balance goes down and the loan's funded total goes up by the pledge
    /// amount, and the new `loan_fund` row is prepended to the history.
    pub fn apply_pledge(&mut self, receipt: &FundingReceipt) {
        let amount = receipt.pledge.amount;
        let loan_id = receipt.pledge.loan_id;

        self.balance -= amount;
        let total = self.funded_totals.entry(loan_id).or_insert(0);
        *total += amount;
        if *total != receipt.loan.funded_total {
            warn!(
                "Local funded total for loan {} was {}, store says {}",
                loan_id, *total, receipt.loan.funded_total
            );
            *total = receipt.loan.funded_total;
        }
        self.lending_history.insert(0, receipt.transaction.clone());
        self.pledges.push(PledgeAmount::from(&receipt.pledge));
        self.borrowers.insert(receipt.loan.borrower_id.clone());

        let loans_funded = self.pledges.iter().map(|p| p.loan_id).collect::<HashSet<_>>().len();
        self.impact = ImpactStats {
            total_funded: report::lender_total_contribution(&self.pledges),
            loans_funded,
            borrowers_impacted: self.borrowers.len(),
        };
        self.reconcile_balance(receipt.wallet.balance);
    }

    /// Shows `amount` as credited before the store has confirmed it.
    pub fn credit_provisionally(&mut self, amount: i64) {
        self.balance += amount;
    }

    /// Replaces the local balance with the store's value.
    pub fn reconcile_balance(&mut self, authoritative: i64) {
        if self.balance != authoritative {
            warn!(
                "Local balance for {} was {}, store says {}",
                self.account_id, self.balance, authoritative
            );
            self.balance = authoritative;
        }
    }

    /// Chart entries, oldest first, one per date label.
    #[must_use]
    pub fn chart_history(&self) -> Vec<HistoryEntry> {
        report::dedup_history_by_date(&report::history_from_transactions(&self.lending_history))
    }

    /// Progress bar data for `loan` from the local funded totals.
    #[must_use]
    pub fn progress_for(&self, loan: &loan::Model) -> LoanProgress {
        LoanProgress::from_totals(loan, &self.funded_totals)
    }
}

/// What a borrower sees: their application status and open requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowerView {
    /// Signed-in borrower
    pub account_id: String,
    /// `"submitted"` once an application has been made
    pub application_status: Option<String>,
    /// Requests still awaiting approval, newest first
    pub pending_loans: Vec<loan::Model>,
}

impl BorrowerView {
    /// Reads the borrower's account and pending requests.
    pub async fn load(db: &DatabaseConnection, account_id: &str) -> Result<Self> {
        let account = account::require_account(db, account_id).await?;
        let pending_loans = loan_ops::list_pending_loans_for_borrower(db, account_id).await?;
        Ok(Self {
            account_id: account.id,
            application_status: account.loan_application_status,
            pending_loans,
        })
    }

    /// Whether an application has been submitted.
    #[must_use]
    pub const fn has_applied(&self) -> bool {
        self.application_status.is_some()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::funding::fund_loan;
    use crate::errors::Error;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_dashboard_follows_stored_role() -> Result<()> {
        let (db, _loan) = setup_with_open_loan(10_000).await?;
        create_test_lender(&db, "lender-1", 5_000).await?;

        let lender = Dashboard::load(&db, &test_session("lender-1")).await?;
        assert!(matches!(lender, Dashboard::Lender(ref v) if v.balance == 5_000));

        let borrower = Dashboard::load(&db, &test_session("amina")).await?;
        let Dashboard::Borrower(view) = borrower else {
            panic!("expected borrower dashboard");
        };
        assert!(view.has_applied());
        // The fixture loan was approved, so nothing is pending
        assert!(view.pending_loans.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_account_has_no_dashboard() -> Result<()> {
        let db = setup_test_db().await?;
        let result = Dashboard::load(&db, &test_session("ghost")).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_lender_view_totals_include_other_lenders() -> Result<()> {
        let (db, loan) = setup_with_open_loan(10_000).await?;
        create_test_lender(&db, "other", 5_000).await?;
        create_test_lender(&db, "lender-1", 10_000).await?;
        fund_loan(&db, "other", loan.id, 2_000, "other@example.com").await?;
        fund_loan(&db, "lender-1", loan.id, 3_000, "lender-1@example.com").await?;

        let view = LenderView::load(&db, &test_session("lender-1")).await?;
        assert_eq!(view.balance, 7_000);
        assert_eq!(view.funded_totals.get(&loan.id), Some(&5_000));
        assert_eq!(view.impact.total_funded, 3_000);
        assert_eq!(view.impact.loans_funded, 1);
        assert_eq!(view.impact.borrowers_impacted, 1);
        assert_eq!(view.lending_history.len(), 1);
        assert_eq!(view.progress_for(&loan).funded, 5_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_pledge_matches_reloaded_view() -> Result<()> {
        let (db, loan) = setup_with_open_loan(10_000).await?;
        create_test_lender(&db, "lender-1", 10_000).await?;
        let session = test_session("lender-1");
        let mut view = LenderView::load(&db, &session).await?;

        let receipt = fund_loan(&db, "lender-1", loan.id, 4_000, &session.email).await?;
        view.apply_pledge(&receipt);

        let fresh = LenderView::load(&db, &session).await?;
        assert_eq!(view.balance, fresh.balance);
        assert_eq!(view.funded_totals, fresh.funded_totals);
        assert_eq!(view.impact, fresh.impact);
        let ids = |v: &LenderView| v.lending_history.iter().map(|t| t.id).collect::<Vec<_>>();
        assert_eq!(ids(&view), ids(&fresh));
        Ok(())
    }

    #[tokio::test]
    async fn test_chart_history_one_bar_per_day() -> Result<()> {
        let (db, loan) = setup_with_open_loan(20_000).await?;
        create_test_lender(&db, "lender-1", 10_000).await?;
        fund_loan(&db, "lender-1", loan.id, 2_500, "x@example.com").await?;
        fund_loan(&db, "lender-1", loan.id, 3_000, "x@example.com").await?;

        let view = LenderView::load(&db, &test_session("lender-1")).await?;
        let chart = view.chart_history();
        // Both pledges were made today; only the first one is charted
        assert_eq!(chart.len(), 1);
        assert_eq!(chart[0].amount, 2_500);
        Ok(())
    }

    #[test]
    fn test_reconcile_prefers_store_value() {
        let mut view = LenderView {
            account_id: "lender-1".to_string(),
            email: "lender-1@example.com".to_string(),
            balance: 1_000,
            lending_history: Vec::new(),
            funded_totals: BTreeMap::new(),
            pledges: Vec::new(),
            impact: ImpactStats::default(),
            borrowers: HashSet::new(),
        };
        view.credit_provisionally(500);
        assert_eq!(view.balance, 1_500);
        view.reconcile_balance(1_200);
        assert_eq!(view.balance, 1_200);
    }
}
