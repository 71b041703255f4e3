pub mod amortization;
pub mod config;
pub mod decimal;
pub mod engine;
pub mod errors;
pub mod events;
pub mod ids;
pub mod model;
pub mod store;
pub mod types;

// re-export key types
pub use amortization::{compute_emi, select_interest_rate, total_interest, RepaymentSchedule};
pub use config::{LedgerConfig, RateTable, RetryPolicy};
pub use decimal::{Money, Rate};
pub use engine::{DisbursementReceipt, EmiReceipt, LedgerEngine, TransactionReceipt};
pub use errors::{LedgerError, Result};
pub use events::{EventStore, LedgerEvent};
pub use ids::IdGenerator;
pub use model::{
    Account, Beneficiary, Customer, EmploymentInfo, Loan, LoanApplication, TimelineEvent,
    Transaction, TransactionMetadata,
};
pub use store::{AccountStore, MemoryStore, StoreError, Versioned};
pub use types::{
    AccountId, AccountSelector, AccountType, ApplicationId, ApplicationStatus, CustomerId,
    LoanId, LoanStatus, LoanType, TimelineStatus, TransactionId, TransactionStatus,
    TransactionType,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
