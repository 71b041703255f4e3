use thiserror::Error;

use crate::decimal::Money;
use crate::types::{AccountId, ApplicationId, ApplicationStatus, LoanId, LoanStatus};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid input: {message}")]
    InvalidInput {
        message: String,
    },

    #[error("customer not found: {key}")]
    CustomerNotFound {
        key: String,
    },

    #[error("account not found: {account_id}")]
    AccountNotFound {
        account_id: AccountId,
    },

    #[error("loan not found: {loan_id}")]
    LoanNotFound {
        loan_id: LoanId,
    },

    #[error("loan application not found: {application_id}")]
    ApplicationNotFound {
        application_id: ApplicationId,
    },

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Money,
        requested: Money,
    },

    #[error("invalid loan amount: {amount}")]
    InvalidLoanAmount {
        amount: Money,
    },

    #[error("customer has no accounts: {key}")]
    NoAccounts {
        key: String,
    },

    #[error("application already processed: {application_id} is {status:?}")]
    ApplicationAlreadyProcessed {
        application_id: ApplicationId,
        status: ApplicationStatus,
    },

    #[error("loan not active: {loan_id} is {status:?}")]
    LoanNotActive {
        loan_id: LoanId,
        status: LoanStatus,
    },

    #[error("contention on {operation}: retries exhausted after {attempts} attempts")]
    Contention {
        operation: String,
        attempts: u32,
    },

    #[error("deadline elapsed during {operation}")]
    Timeout {
        operation: String,
    },

    #[error("store unavailable: {message}")]
    StoreUnavailable {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
