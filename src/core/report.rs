//! Funded totals, chart history, progress and impact statistics.
//!
//! Two rules here look alike and must stay separate: funded totals *sum* every
//! pledge per loan, while the chart history *keeps the first* entry per date
//! label and drops the rest.

use crate::{
    core::{account, funding, loan as loan_ops, validation::format_cents},
    entities::{loan, pledge, transaction},
    errors::Result,
};
use sea_orm::DatabaseConnection;
use std::collections::{BTreeMap, HashMap, HashSet};

/// The two pledge fields the aggregator needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PledgeAmount {
    /// Loan the pledge went to
    pub loan_id: i64,
    /// Amount in cents
    pub amount: i64,
}

impl From<&pledge::Model> for PledgeAmount {
    fn from(pledge: &pledge::Model) -> Self {
        Self {
            loan_id: pledge.loan_id,
            amount: pledge.amount,
        }
    }
}

/// One bar on the funding-history chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Display label, e.g. `"Jan 1"`
    pub date: String,
    /// Amount in cents
    pub amount: i64,
}

/// Sums pledge amounts per loan. Loans without pledges are absent (read as zero).
#[must_use]
pub fn aggregate_funded_totals(pledges: &[PledgeAmount]) -> BTreeMap<i64, i64> {
    pledges.iter().fold(BTreeMap::new(), |mut totals, p| {
        *totals.entry(p.loan_id).or_insert(0) += p.amount;
        totals
    })
}

/// Total a lender has pledged across all loans.
#[must_use]
pub fn lender_total_contribution(pledges: &[PledgeAmount]) -> i64 {
    pledges.iter().map(|p| p.amount).sum()
}

/// Keeps only the first entry for each date label, preserving order.
#[must_use]
pub fn dedup_history_by_date(entries: &[HistoryEntry]) -> Vec<HistoryEntry> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter(|entry| seen.insert(entry.date.as_str()))
        .cloned()
        .collect()
}

/// Builds chart entries from lending-history transactions, oldest first.
#[must_use]
pub fn history_from_transactions(transactions: &[transaction::Model]) -> Vec<HistoryEntry> {
    let mut ordered: Vec<&transaction::Model> = transactions.iter().collect();
    ordered.sort_by_key(|t| (t.created_at, t.id));
    ordered
        .into_iter()
        .map(|t| HistoryEntry {
            date: t.created_at.format("%b %-d").to_string(),
            amount: t.amount,
        })
        .collect()
}

/// Percentage of the requested amount that has been pledged.
///
/// A loan requesting nothing reports 0%.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_progress(funded: i64, requested: i64) -> f64 {
    if requested == 0 {
        return 0.0;
    }

    (funded as f64 / requested as f64) * 100.0
}

/// Generates a progress bar string for visual representation.
///
/// Creates a text-based progress bar like: `[████████░░] 80.0%`
#[must_use]
pub fn format_progress_bar(progress_percent: f64, bar_length: Option<usize>) -> String {
    let length = bar_length.unwrap_or(10);
    let clamped_progress = progress_percent.clamp(0.0, 100.0);

    // Cast safety: clamped_progress ∈ [0, 100], length is small (10-20).
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let filled = ((clamped_progress / 100.0) * length as f64).round() as usize;
    let empty = length.saturating_sub(filled);

    format!(
        "[{}{}] {progress_percent:.1}%",
        "█".repeat(filled),
        "░".repeat(empty)
    )
}

/// Whether the pledged total means the loan should flip to funded.
#[must_use]
pub const fn predicts_funded(funded: i64, requested: i64) -> bool {
    requested > 0 && funded >= requested
}

/// Progress indicator data for one loan card.
#[derive(Debug, Clone, PartialEq)]
pub struct LoanProgress {
    /// Loan id
    pub loan_id: i64,
    /// Requested amount in cents
    pub requested: i64,
    /// Pledged so far in cents
    pub funded: i64,
    /// `funded / requested` as a percentage
    pub percent: f64,
    /// Local prediction that the loan is now fully funded
    pub predicted_funded: bool,
}

impl LoanProgress {
    /// Progress for `loan` using a locally aggregated funded total.
    #[must_use]
    pub fn from_totals(loan: &loan::Model, totals: &BTreeMap<i64, i64>) -> Self {
        let funded = totals.get(&loan.id).copied().unwrap_or(0);
        Self {
            loan_id: loan.id,
            requested: loan.amount,
            funded,
            percent: calculate_progress(funded, loan.amount),
            predicted_funded: predicts_funded(funded, loan.amount),
        }
    }

    /// One-line summary: `"$60.00 of $100.00 [██████░░░░] 60.0%"`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} of {} {}",
            format_cents(self.funded),
            format_cents(self.requested),
            format_progress_bar(self.percent, None)
        )
    }
}

/// Headline numbers for a lender's impact dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImpactStats {
    /// Total pledged, in cents
    pub total_funded: i64,
    /// Distinct loans pledged to
    pub loans_funded: usize,
    /// Distinct borrowers behind those loans
    pub borrowers_impacted: usize,
}

/// Computes impact numbers from a lender's pledges and the loans they reference.
#[must_use]
pub fn impact_stats(pledges: &[pledge::Model], loans: &[loan::Model]) -> ImpactStats {
    let borrower_of: HashMap<i64, &str> = loans
        .iter()
        .map(|l| (l.id, l.borrower_id.as_str()))
        .collect();

    let loan_ids: HashSet<i64> = pledges.iter().map(|p| p.loan_id).collect();
    let borrowers: HashSet<&str> = loan_ids
        .iter()
        .filter_map(|id| borrower_of.get(id).copied())
        .collect();

    ImpactStats {
        total_funded: pledges.iter().map(|p| p.amount).sum(),
        loans_funded: loan_ids.len(),
        borrowers_impacted: borrowers.len(),
    }
}

/// One row of the community leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    /// Lender account id
    pub account_id: String,
    /// Display name, or `"Anonymous Lender"`
    pub name: String,
    /// Impact numbers for this lender
    pub impact: ImpactStats,
}

/// Lists every lender with their impact, biggest total pledged first.
pub async fn community_leaderboard(db: &DatabaseConnection) -> Result<Vec<LeaderboardEntry>> {
    let lenders = account::list_lenders(db).await?;
    let pledges = funding::get_all_pledges(db).await?;
    let loans = loan_ops::list_all_loans(db).await?;

    let mut by_lender: HashMap<&str, Vec<pledge::Model>> = HashMap::new();
    for p in &pledges {
        by_lender.entry(p.lender_id.as_str()).or_default().push(p.clone());
    }

    let mut entries: Vec<LeaderboardEntry> = lenders
        .into_iter()
        .map(|lender| {
            let own = by_lender.get(lender.id.as_str()).map_or(&[][..], Vec::as_slice);
            LeaderboardEntry {
                impact: impact_stats(own, &loans),
                name: lender
                    .name
                    .clone()
                    .unwrap_or_else(|| "Anonymous Lender".to_string()),
                account_id: lender.id,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.impact
            .total_funded
            .cmp(&a.impact.total_funded)
            .then_with(|| a.account_id.cmp(&b.account_id))
    });
    Ok(entries)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;

    fn entry(date: &str, amount: i64) -> HistoryEntry {
        HistoryEntry {
            date: date.to_string(),
            amount,
        }
    }

    #[test]
    fn test_aggregate_sums_per_loan() {
        let pledges = [
            PledgeAmount { loan_id: 1, amount: 25 },
            PledgeAmount { loan_id: 1, amount: 30 },
            PledgeAmount { loan_id: 2, amount: 10 },
        ];
        let totals = aggregate_funded_totals(&pledges);

        assert_eq!(totals, BTreeMap::from([(1, 55), (2, 10)]));
        assert_eq!(totals.get(&3), None);
        assert_eq!(lender_total_contribution(&pledges), 65);
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(aggregate_funded_totals(&[]).is_empty());
        assert_eq!(lender_total_contribution(&[]), 0);
    }

    #[test]
    fn test_history_dedup_keeps_first_per_date() {
        let history = [entry("Jan 1", 25), entry("Jan 1", 30), entry("Jan 2", 10)];
        let deduped = dedup_history_by_date(&history);

        assert_eq!(deduped, vec![entry("Jan 1", 25), entry("Jan 2", 10)]);
    }

    #[test]
    fn test_dedup_is_not_summation() {
        let history = [entry("Jan 1", 25), entry("Jan 1", 30)];
        let deduped = dedup_history_by_date(&history);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].amount, 25);

        // The funded-total rule over the same amounts sums instead
        let pledges = [
            PledgeAmount { loan_id: 1, amount: 25 },
            PledgeAmount { loan_id: 1, amount: 30 },
        ];
        assert_eq!(aggregate_funded_totals(&pledges)[&1], 55);
    }

    #[test]
    fn test_calculate_progress() {
        assert_eq!(calculate_progress(6_000, 10_000), 60.0);
        assert_eq!(calculate_progress(10_000, 10_000), 100.0);
        assert_eq!(calculate_progress(0, 0), 0.0);
    }

    #[test]
    fn test_format_progress_bar() {
        assert_eq!(format_progress_bar(60.0, None), "[██████░░░░] 60.0%");
        assert_eq!(format_progress_bar(0.0, Some(4)), "[░░░░] 0.0%");
        assert_eq!(format_progress_bar(150.0, Some(4)), "[████] 150.0%");
    }

    #[test]
    fn test_predicts_funded() {
        assert!(!predicts_funded(6_000, 10_000));
        assert!(predicts_funded(10_000, 10_000));
        assert!(!predicts_funded(0, 0));
    }

    #[tokio::test]
    async fn test_loan_progress_from_totals() -> Result<()> {
        let (_db, loan) = setup_with_open_loan(10_000).await?;
        let totals = BTreeMap::from([(loan.id, 6_000)]);

        let progress = LoanProgress::from_totals(&loan, &totals);
        assert_eq!(progress.funded, 6_000);
        assert!(!progress.predicted_funded);
        assert_eq!(progress.summary(), "$60.00 of $100.00 [██████░░░░] 60.0%");

        let untouched = LoanProgress::from_totals(&loan, &BTreeMap::new());
        assert_eq!(untouched.funded, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_community_leaderboard() -> Result<()> {
        let (db, loan) = setup_with_open_loan(50_000).await?;
        create_test_lender(&db, "lender-1", 10_000).await?;
        create_test_lender(&db, "lender-2", 10_000).await?;
        create_test_lender(&db, "lender-3", 0).await?;

        funding::fund_loan(&db, "lender-1", loan.id, 2_500, "a@example.com").await?;
        funding::fund_loan(&db, "lender-2", loan.id, 5_000, "b@example.com").await?;
        funding::fund_loan(&db, "lender-2", loan.id, 2_500, "b@example.com").await?;

        let board = community_leaderboard(&db).await?;
        assert_eq!(board.len(), 3);
        assert_eq!(board[0].account_id, "lender-2");
        assert_eq!(board[0].impact.total_funded, 7_500);
        assert_eq!(board[0].impact.loans_funded, 1);
        assert_eq!(board[0].impact.borrowers_impacted, 1);
        assert_eq!(board[1].account_id, "lender-1");
        assert_eq!(board[2].impact, ImpactStats::default());
        assert_eq!(board[2].name, "Anonymous Lender");
        Ok(())
    }
}
