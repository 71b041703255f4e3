use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::model::application::LoanApplication;
use crate::model::customer::Customer;
use crate::store::{AccountStore, StoreError, StoreResult, Versioned};
use crate::types::{ApplicationId, CustomerId};

/// in-process account store with per-record version counters
///
/// One mutex guards both collections, so the paired disbursement commit
/// is atomic the same way a document store's multi-document transaction
/// would be.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    customers: BTreeMap<CustomerId, (u64, Customer)>,
    applications: BTreeMap<ApplicationId, (u64, LoanApplication)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a poisoned lock means a writer panicked mid-update; the data is
        // versioned copies, so recover the guard
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AccountStore for MemoryStore {
    fn get_customer(&self, customer_id: CustomerId) -> StoreResult<Versioned<Customer>> {
        let inner = self.lock();
        inner
            .customers
            .get(&customer_id)
            .map(|(version, record)| Versioned {
                record: record.clone(),
                version: *version,
            })
            .ok_or(StoreError::NotFound {
                key: customer_id.to_string(),
            })
    }

    fn find_customer_by_email(&self, email: &str) -> StoreResult<Versioned<Customer>> {
        let inner = self.lock();
        inner
            .customers
            .values()
            .find(|(_, record)| record.email == email)
            .map(|(version, record)| Versioned {
                record: record.clone(),
                version: *version,
            })
            .ok_or(StoreError::NotFound {
                key: email.to_string(),
            })
    }

    fn insert_customer(&self, customer: Customer) -> StoreResult<u64> {
        let mut inner = self.lock();
        inner.customers.insert(customer.customer_id, (1, customer));
        Ok(1)
    }

    fn update_customer(
        &self,
        customer_id: CustomerId,
        expected_version: u64,
        record: Customer,
    ) -> StoreResult<u64> {
        let mut inner = self.lock();
        let entry = inner
            .customers
            .get_mut(&customer_id)
            .ok_or(StoreError::NotFound {
                key: customer_id.to_string(),
            })?;

        if entry.0 != expected_version {
            return Err(StoreError::Conflict {
                key: customer_id.to_string(),
                expected: expected_version,
                found: entry.0,
            });
        }

        entry.0 += 1;
        entry.1 = record;
        Ok(entry.0)
    }

    fn get_application(
        &self,
        application_id: ApplicationId,
    ) -> StoreResult<Versioned<LoanApplication>> {
        let inner = self.lock();
        inner
            .applications
            .get(&application_id)
            .map(|(version, record)| Versioned {
                record: record.clone(),
                version: *version,
            })
            .ok_or(StoreError::NotFound {
                key: application_id.to_string(),
            })
    }

    fn insert_application(&self, application: LoanApplication) -> StoreResult<u64> {
        let mut inner = self.lock();
        inner
            .applications
            .insert(application.application_id, (1, application));
        Ok(1)
    }

    fn update_application(
        &self,
        application_id: ApplicationId,
        expected_version: u64,
        record: LoanApplication,
    ) -> StoreResult<u64> {
        let mut inner = self.lock();
        let entry = inner
            .applications
            .get_mut(&application_id)
            .ok_or(StoreError::NotFound {
                key: application_id.to_string(),
            })?;

        if entry.0 != expected_version {
            return Err(StoreError::Conflict {
                key: application_id.to_string(),
                expected: expected_version,
                found: entry.0,
            });
        }

        entry.0 += 1;
        entry.1 = record;
        Ok(entry.0)
    }

    fn delete_application(&self, application_id: ApplicationId) -> StoreResult<()> {
        let mut inner = self.lock();
        inner
            .applications
            .remove(&application_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                key: application_id.to_string(),
            })
    }

    fn commit_disbursement(
        &self,
        customer_id: CustomerId,
        expected_customer_version: u64,
        customer: Customer,
        application_id: ApplicationId,
        expected_application_version: u64,
        application: LoanApplication,
    ) -> StoreResult<()> {
        let mut inner = self.lock();

        // validate both version checks before writing either record
        let customer_version = inner
            .customers
            .get(&customer_id)
            .map(|(version, _)| *version)
            .ok_or(StoreError::NotFound {
                key: customer_id.to_string(),
            })?;
        if customer_version != expected_customer_version {
            return Err(StoreError::Conflict {
                key: customer_id.to_string(),
                expected: expected_customer_version,
                found: customer_version,
            });
        }

        let application_version = inner
            .applications
            .get(&application_id)
            .map(|(version, _)| *version)
            .ok_or(StoreError::NotFound {
                key: application_id.to_string(),
            })?;
        if application_version != expected_application_version {
            return Err(StoreError::Conflict {
                key: application_id.to_string(),
                expected: expected_application_version,
                found: application_version,
            });
        }

        inner
            .customers
            .insert(customer_id, (customer_version + 1, customer));
        inner
            .applications
            .insert(application_id, (application_version + 1, application));
        Ok(())
    }
}
