pub mod memory;

use thiserror::Error;

use crate::model::application::LoanApplication;
use crate::model::customer::Customer;
use crate::types::{ApplicationId, CustomerId};

pub use memory::MemoryStore;

/// failures at the account-store boundary
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found: {key}")]
    NotFound {
        key: String,
    },

    #[error("version conflict on {key}: expected {expected}, found {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("store backend unavailable: {message}")]
    Unavailable {
        message: String,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// record read together with the version its snapshot was taken at
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub record: T,
    pub version: u64,
}

/// opaque transactional document store holding customer and application
/// records
///
/// Writes are conditional on the version observed at read time; a
/// mismatch fails with `Conflict` and the caller re-runs its whole
/// read-validate-write cycle from a fresh read.
pub trait AccountStore: Send + Sync {
    fn get_customer(&self, customer_id: CustomerId) -> StoreResult<Versioned<Customer>>;

    /// exact-match email lookup
    ///
    /// If multiple records carry the same email, the first in the store's
    /// key order is returned deterministically.
    fn find_customer_by_email(&self, email: &str) -> StoreResult<Versioned<Customer>>;

    fn insert_customer(&self, customer: Customer) -> StoreResult<u64>;

    /// compare-and-swap the full customer document
    fn update_customer(
        &self,
        customer_id: CustomerId,
        expected_version: u64,
        record: Customer,
    ) -> StoreResult<u64>;

    fn get_application(&self, application_id: ApplicationId) -> StoreResult<Versioned<LoanApplication>>;

    fn insert_application(&self, application: LoanApplication) -> StoreResult<u64>;

    fn update_application(
        &self,
        application_id: ApplicationId,
        expected_version: u64,
        record: LoanApplication,
    ) -> StoreResult<u64>;

    /// remove a rejected application
    fn delete_application(&self, application_id: ApplicationId) -> StoreResult<()>;

    /// atomically commit a disbursement: customer document (loan
    /// sub-record plus credited account) and approved application, both
    /// conditional on their read versions; neither is written unless both
    /// checks pass
    fn commit_disbursement(
        &self,
        customer_id: CustomerId,
        expected_customer_version: u64,
        customer: Customer,
        application_id: ApplicationId,
        expected_application_version: u64,
        application: LoanApplication,
    ) -> StoreResult<()>;
}
