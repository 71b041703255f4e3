pub mod account;
pub mod application;
pub mod customer;
pub mod loan;

pub use account::{Account, Transaction, TransactionMetadata};
pub use application::{EmploymentInfo, LoanApplication};
pub use customer::{Beneficiary, Customer};
pub use loan::{Loan, TimelineEvent};
