//! Client-side state and requesters.
//!
//! Everything here runs on behalf of one signed-in user: the session context,
//! the role-selected dashboard, the forms that move money, and the reconciler
//! that credits confirmed card payments. All money movement goes through the
//! store operations in [`crate::core`].

/// Lender and borrower dashboards
pub mod dashboard;
/// Payment return handling and exactly-once crediting
pub mod reconcile;
/// Pledge, deposit and withdrawal requesters
pub mod requests;
/// Explicit session context and OAuth callback completion
pub mod session;

pub use dashboard::{BorrowerView, Dashboard, LenderView};
pub use reconcile::{Notice, NoticeLevel, PaymentReturn, ReconcileOutcome, Reconciler};
pub use requests::{
    AmountForm, DepositForm, DepositInitiation, DepositRequester, FundingRequester, PledgeForm,
    SubmitGuard, WithdrawalForm, WithdrawalRequester,
};
pub use session::{Session, SessionContext, complete_oauth_callback};
