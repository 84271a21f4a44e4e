//! Typed views of the status and kind strings stored in the ledger tables.

use crate::errors::{Error, Result};
use std::fmt;
use std::str::FromStr;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $what:literal { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// The string stored in the database
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(Error::Config {
                        message: format!("Unknown {}: '{other}'", $what),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Account role, fixed at signup
    Role, "role" {
        /// Funds loans from a wallet
        Lender => "lender",
        /// Applies for loans
        Borrower => "borrower",
    }
);

string_enum!(
    /// Loan lifecycle: pending → open → funded
    LoanStatus, "loan status" {
        /// Submitted, awaiting approval
        Pending => "pending",
        /// Approved and accepting pledges
        Open => "open",
        /// Pledges reached the requested amount
        Funded => "funded",
    }
);

string_enum!(
    /// Pledge lifecycle
    PledgeStatus, "pledge status" {
        /// Recorded, loan still raising
        Pending => "pending",
        /// Loan fully funded
        Settled => "settled",
    }
);

string_enum!(
    /// What a transaction log entry records
    TransactionKind, "transaction kind" {
        /// Card payment credited to the wallet
        Deposit => "deposit",
        /// Payout debited from the wallet
        Withdrawal => "withdrawal",
        /// Pledge debited from the wallet
        LoanFund => "loan_fund",
    }
);
