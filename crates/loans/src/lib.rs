//! Loan workflows: asset loans to units and time-boxed venue (room) loans.

pub mod asset_loan;
pub mod venue_loan;

pub use asset_loan::{
    AssetLoan, AssetLoanAction, AssetLoanId, AssetLoanStatus, LoanItem, LoanItemId, NewAssetLoan,
    ReturnState, VerificationState,
};
pub use venue_loan::{NewVenueLoan, VenueLoan, VenueLoanAction, VenueLoanId, VenueLoanStatus};
