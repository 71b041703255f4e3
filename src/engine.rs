use chrono::Duration;
use hourglass_rs::SafeTimeProvider;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::amortization::{compute_emi, select_interest_rate};
use crate::config::LedgerConfig;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::events::{EventStore, LedgerEvent};
use crate::ids::IdGenerator;
use crate::model::account::{Transaction, TransactionMetadata};
use crate::model::customer::Customer;
use crate::model::loan::Loan;
use crate::store::{AccountStore, StoreError};
use crate::types::{
    AccountId, AccountSelector, ApplicationId, CustomerId, LoanId, LoanStatus, TimelineStatus,
    TransactionId, TransactionStatus, TransactionType,
};

/// result of a committed account posting
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionReceipt {
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub new_balance: Money,
}

/// result of a committed loan approval and disbursement
#[derive(Debug, Clone, PartialEq)]
pub struct DisbursementReceipt {
    pub loan_id: LoanId,
    pub account_id: AccountId,
    pub new_balance: Money,
    pub emi: Money,
    pub interest_rate: Rate,
}

/// result of a committed EMI payment
#[derive(Debug, Clone, PartialEq)]
pub struct EmiReceipt {
    pub transaction_id: TransactionId,
    pub loan_id: LoanId,
    pub paid_emis: u32,
    pub remaining_amount: Money,
    pub loan_status: LoanStatus,
    pub new_balance: Money,
}

/// one attempt of the conditional-commit cycle
enum AttemptError {
    /// the conditional write lost the race; re-run from a fresh read
    Conflict,
    /// business or backend failure; surface to the caller as-is
    Fatal(LedgerError),
}

impl From<LedgerError> for AttemptError {
    fn from(err: LedgerError) -> Self {
        AttemptError::Fatal(err)
    }
}

type Attempt<T> = std::result::Result<T, AttemptError>;

/// the ledger engine: the only code path that mutates balances,
/// transaction history, and loan state
///
/// Every operation runs the conditional-commit protocol against the
/// account store: read a versioned snapshot, validate invariants against
/// it, compute the fully-updated record, and commit conditioned on the
/// version being unchanged. A conflicted commit retries the whole cycle
/// from a fresh read, bounded by the configured retry policy; commits are
/// all-or-nothing per attempt.
///
/// Callers pass an explicit initiating identity with each posting; the
/// engine never reads ambient current-user state.
pub struct LedgerEngine<S: AccountStore> {
    store: Arc<S>,
    config: LedgerConfig,
    ids: IdGenerator,
    events: Mutex<EventStore>,
}

impl<S: AccountStore> LedgerEngine<S> {
    pub fn new(store: Arc<S>, config: LedgerConfig) -> Self {
        Self {
            store,
            config,
            ids: IdGenerator::new(),
            events: Mutex::new(EventStore::new()),
        }
    }

    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, LedgerConfig::default())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// drain audit events emitted by committed operations
    pub fn take_events(&self) -> Vec<LedgerEvent> {
        self.lock_events().take_events()
    }

    /// post a credit or debit against one account
    ///
    /// Debits require sufficient settled balance. The balance update and
    /// the prepended transaction record commit together or not at all.
    pub fn post_account_transaction(
        &self,
        customer_id: CustomerId,
        selector: AccountSelector,
        kind: TransactionType,
        amount: Money,
        metadata: TransactionMetadata,
        time: &SafeTimeProvider,
    ) -> Result<TransactionReceipt> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidInput {
                message: format!("transaction amount must be positive, got {}", amount),
            });
        }

        self.run_conditional_commit("post_account_transaction", time, || {
            let snapshot = self
                .store
                .get_customer(customer_id)
                .map_err(|e| customer_error(&customer_id.to_string(), e))?;
            let mut customer = snapshot.record;

            let account_id = self.resolve_account(&customer, selector)?;
            let account = customer
                .account(account_id)
                .ok_or(LedgerError::AccountNotFound { account_id })?;

            if kind == TransactionType::Debit && !account.can_debit(amount) {
                return Err(AttemptError::Fatal(LedgerError::InsufficientBalance {
                    available: account.current_balance,
                    requested: amount,
                }));
            }

            let now = time.now();
            let transaction = Transaction {
                id: self.ids.transaction_id(now),
                date: now,
                kind,
                amount,
                description: metadata.description.clone(),
                category: metadata.category.clone(),
                status: TransactionStatus::Completed,
                balance: Money::ZERO, // snapshot set on apply
                reference: metadata.reference.clone(),
                initiated_by: metadata.initiated_by.clone(),
            };
            let transaction_id = transaction.id.clone();

            let account = customer
                .account_mut(account_id)
                .ok_or(LedgerError::AccountNotFound { account_id })?;
            account.apply(transaction);
            let new_balance = account.current_balance;

            self.store
                .update_customer(customer_id, snapshot.version, customer)
                .map_err(|e| customer_error(&customer_id.to_string(), e))?;

            self.lock_events().emit(LedgerEvent::TransactionPosted {
                customer_id,
                account_id,
                transaction_id: transaction_id.clone(),
                kind,
                amount,
                balance_after: new_balance,
                timestamp: now,
            });

            Ok(TransactionReceipt {
                transaction_id,
                account_id,
                new_balance,
            })
        })
    }

    /// approve a pending application and disburse the loan principal
    ///
    /// Creates the loan sub-record, credits the target account, and marks
    /// the application approved as one atomic unit: a partial
    /// disbursement can never commit.
    pub fn approve_and_disburse_loan(
        &self,
        application_id: ApplicationId,
        customer_email: &str,
        selector: AccountSelector,
        initiated_by: &str,
        time: &SafeTimeProvider,
    ) -> Result<DisbursementReceipt> {
        self.run_conditional_commit("approve_and_disburse_loan", time, || {
            let app_snapshot = self
                .store
                .get_application(application_id)
                .map_err(|e| application_error(application_id, e))?;
            let mut application = app_snapshot.record;

            if application.is_processed() {
                return Err(AttemptError::Fatal(
                    LedgerError::ApplicationAlreadyProcessed {
                        application_id,
                        status: application.status,
                    },
                ));
            }
            if !application.requested_amount.is_positive() {
                return Err(AttemptError::Fatal(LedgerError::InvalidLoanAmount {
                    amount: application.requested_amount,
                }));
            }

            let customer_snapshot = self
                .store
                .find_customer_by_email(customer_email)
                .map_err(|e| customer_error(customer_email, e))?;
            let mut customer = customer_snapshot.record;
            let customer_id = customer.customer_id;

            if customer.accounts.is_empty() {
                return Err(AttemptError::Fatal(LedgerError::NoAccounts {
                    key: customer_email.to_string(),
                }));
            }
            let account_id = self.resolve_account(&customer, selector)?;

            let principal = application.requested_amount;
            let interest_rate = select_interest_rate(
                application.loan_type,
                application.credit_score,
                &self.config.rates,
            );
            let emi = compute_emi(principal, interest_rate, application.tenure_months)?;

            let now = time.now();
            let loan_id = self.ids.loan_id(now);

            let mut loan = Loan {
                loan_id: loan_id.clone(),
                loan_type: application.loan_type,
                principal,
                interest_rate,
                tenure_months: application.tenure_months,
                emi,
                remaining_amount: principal,
                paid_emis: 0,
                status: LoanStatus::Active,
                next_emi_date: Some(now + Duration::days(self.config.emi_interval_days)),
                disbursement_account: account_id,
                timeline: Vec::new(),
            };
            loan.record_event(
                TimelineStatus::Applied,
                application.submitted_at,
                "loan application submitted",
            );
            loan.record_event(TimelineStatus::Approved, now, "application approved");
            loan.record_event(
                TimelineStatus::Disbursed,
                now,
                format!("principal {} disbursed", principal),
            );

            let transaction = Transaction {
                id: self.ids.transaction_id(now),
                date: now,
                kind: TransactionType::Credit,
                amount: principal,
                description: format!("Loan disbursement {}", loan_id),
                category: "Loan".to_string(),
                status: TransactionStatus::Completed,
                balance: Money::ZERO,
                reference: Some(loan_id.clone()),
                initiated_by: initiated_by.to_string(),
            };
            let transaction_id = transaction.id.clone();

            let account = customer
                .account_mut(account_id)
                .ok_or(LedgerError::AccountNotFound { account_id })?;
            account.apply(transaction);
            let new_balance = account.current_balance;

            customer.loans.insert(loan_id.clone(), loan);

            application.status = crate::types::ApplicationStatus::Approved;
            application.decided_at = Some(now);
            application.approved_loan_id = Some(loan_id.clone());

            self.store
                .commit_disbursement(
                    customer_id,
                    customer_snapshot.version,
                    customer,
                    application_id,
                    app_snapshot.version,
                    application,
                )
                .map_err(|e| customer_error(customer_email, e))?;

            let mut events = self.lock_events();
            events.emit(LedgerEvent::ApplicationApproved {
                application_id,
                loan_id: loan_id.clone(),
                timestamp: now,
            });
            events.emit(LedgerEvent::LoanDisbursed {
                customer_id,
                loan_id: loan_id.clone(),
                account_id,
                principal,
                emi,
                timestamp: now,
            });
            events.emit(LedgerEvent::TransactionPosted {
                customer_id,
                account_id,
                transaction_id,
                kind: TransactionType::Credit,
                amount: principal,
                balance_after: new_balance,
                timestamp: now,
            });
            drop(events);

            Ok(DisbursementReceipt {
                loan_id,
                account_id,
                new_balance,
                emi,
                interest_rate,
            })
        })
    }

    /// debit one EMI from the target account and advance the loan
    ///
    /// Increments `paid_emis`, reduces `remaining_amount` (clamped at
    /// zero), and closes the loan once the tenure is exhausted or the
    /// balance cleared; otherwise schedules the next EMI date.
    pub fn post_emi_payment(
        &self,
        customer_email: &str,
        loan_id: &LoanId,
        selector: AccountSelector,
        initiated_by: &str,
        time: &SafeTimeProvider,
    ) -> Result<EmiReceipt> {
        self.run_conditional_commit("post_emi_payment", time, || {
            let snapshot = self
                .store
                .find_customer_by_email(customer_email)
                .map_err(|e| customer_error(customer_email, e))?;
            let mut customer = snapshot.record;
            let customer_id = customer.customer_id;

            let loan = customer
                .loan(loan_id)
                .ok_or_else(|| LedgerError::LoanNotFound {
                    loan_id: loan_id.clone(),
                })?;
            if !loan.is_active() {
                return Err(AttemptError::Fatal(LedgerError::LoanNotActive {
                    loan_id: loan_id.clone(),
                    status: loan.status,
                }));
            }
            let emi = loan.emi;
            let tenure_months = loan.tenure_months;

            let account_id = self.resolve_account(&customer, selector)?;
            let account = customer
                .account(account_id)
                .ok_or(LedgerError::AccountNotFound { account_id })?;
            if !account.can_debit(emi) {
                return Err(AttemptError::Fatal(LedgerError::InsufficientBalance {
                    available: account.current_balance,
                    requested: emi,
                }));
            }

            let now = time.now();
            let transaction = Transaction {
                id: self.ids.transaction_id(now),
                date: now,
                kind: TransactionType::Debit,
                amount: emi,
                description: format!("EMI payment {}", loan_id),
                category: "Loan".to_string(),
                status: TransactionStatus::Completed,
                balance: Money::ZERO,
                reference: Some(loan_id.clone()),
                initiated_by: initiated_by.to_string(),
            };
            let transaction_id = transaction.id.clone();

            let account = customer
                .account_mut(account_id)
                .ok_or(LedgerError::AccountNotFound { account_id })?;
            account.apply(transaction);
            let new_balance = account.current_balance;

            let loan = customer
                .loan_mut(loan_id)
                .ok_or_else(|| LedgerError::LoanNotFound {
                    loan_id: loan_id.clone(),
                })?;
            loan.paid_emis += 1;
            loan.remaining_amount = (loan.remaining_amount - emi).max(Money::ZERO);

            let closed = loan.is_fully_repaid();
            if closed {
                loan.status = LoanStatus::Closed;
                loan.next_emi_date = None;
                loan.record_event(TimelineStatus::Closed, now, "loan fully repaid");
            } else {
                loan.next_emi_date = Some(now + Duration::days(self.config.emi_interval_days));
                loan.record_event(
                    TimelineStatus::EmiPaid,
                    now,
                    format!("installment {} of {}", loan.paid_emis, tenure_months),
                );
            }

            let paid_emis = loan.paid_emis;
            let remaining_amount = loan.remaining_amount;
            let loan_status = loan.status;

            self.store
                .update_customer(customer_id, snapshot.version, customer)
                .map_err(|e| customer_error(customer_email, e))?;

            let mut events = self.lock_events();
            events.emit(LedgerEvent::EmiPosted {
                loan_id: loan_id.clone(),
                installment_number: paid_emis,
                amount: emi,
                remaining_amount,
                timestamp: now,
            });
            if closed {
                events.emit(LedgerEvent::LoanClosed {
                    loan_id: loan_id.clone(),
                    paid_emis,
                    timestamp: now,
                });
            }
            drop(events);

            Ok(EmiReceipt {
                transaction_id,
                loan_id: loan_id.clone(),
                paid_emis,
                remaining_amount,
                loan_status,
                new_balance,
            })
        })
    }

    /// customer-lookup boundary: exact-match email resolution
    pub fn find_customer_by_email(&self, email: &str) -> Result<Customer> {
        match self.store.find_customer_by_email(email) {
            Ok(snapshot) => Ok(snapshot.record),
            Err(StoreError::NotFound { .. }) => Err(LedgerError::CustomerNotFound {
                key: email.to_string(),
            }),
            Err(e) => Err(LedgerError::StoreUnavailable {
                message: e.to_string(),
            }),
        }
    }

    /// all loans held by a customer, newest id last
    pub fn get_customer_loans(&self, email: &str) -> Result<Vec<Loan>> {
        let customer = self.find_customer_by_email(email)?;
        Ok(customer.loans.into_values().collect())
    }

    fn resolve_account(
        &self,
        customer: &Customer,
        selector: AccountSelector,
    ) -> Attempt<AccountId> {
        match selector {
            AccountSelector::Primary => {
                customer
                    .resolve_account(selector)
                    .ok_or(AttemptError::Fatal(LedgerError::NoAccounts {
                        key: customer.email.clone(),
                    }))
            }
            AccountSelector::Account(account_id) => customer
                .resolve_account(selector)
                .ok_or(AttemptError::Fatal(LedgerError::AccountNotFound {
                    account_id,
                })),
        }
    }

    /// drive one operation through the bounded retry loop
    ///
    /// Each attempt is a complete read-validate-write cycle; stale state
    /// is never reused across attempts. The deadline covers the whole
    /// operation including backoff waits.
    fn run_conditional_commit<T>(
        &self,
        operation: &'static str,
        time: &SafeTimeProvider,
        mut attempt: impl FnMut() -> Attempt<T>,
    ) -> Result<T> {
        let started = time.now();
        let mut attempts = 0;

        while attempts < self.config.retry.max_attempts {
            if time.now() - started > self.config.operation_deadline {
                warn!(operation, attempts, "operation deadline elapsed");
                return Err(LedgerError::Timeout {
                    operation: operation.to_string(),
                });
            }
            attempts += 1;

            match attempt() {
                Ok(value) => {
                    debug!(operation, attempts, "conditional commit succeeded");
                    return Ok(value);
                }
                Err(AttemptError::Conflict) => {
                    warn!(
                        operation,
                        attempt = attempts,
                        "conditional commit conflicted, retrying from fresh read"
                    );
                    let backoff = self.config.retry.backoff_for(attempts);
                    if !backoff.is_zero() {
                        std::thread::sleep(backoff);
                    }
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
            }
        }

        Err(LedgerError::Contention {
            operation: operation.to_string(),
            attempts,
        })
    }

    fn lock_events(&self) -> std::sync::MutexGuard<'_, EventStore> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn customer_error(key: &str, err: StoreError) -> AttemptError {
    match err {
        StoreError::NotFound { .. } => AttemptError::Fatal(LedgerError::CustomerNotFound {
            key: key.to_string(),
        }),
        StoreError::Conflict { .. } => AttemptError::Conflict,
        StoreError::Unavailable { message } => {
            AttemptError::Fatal(LedgerError::StoreUnavailable { message })
        }
    }
}

fn application_error(application_id: ApplicationId, err: StoreError) -> AttemptError {
    match err {
        StoreError::NotFound { .. } => {
            AttemptError::Fatal(LedgerError::ApplicationNotFound { application_id })
        }
        StoreError::Conflict { .. } => AttemptError::Conflict,
        StoreError::Unavailable { message } => {
            AttemptError::Fatal(LedgerError::StoreUnavailable { message })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::account::Account;
    use crate::model::application::{EmploymentInfo, LoanApplication};
    use crate::store::{MemoryStore, StoreResult, Versioned};
    use crate::types::{AccountType, ApplicationStatus, LoanType};
    use chrono::{TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use uuid::Uuid;

    fn test_time() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn seed_customer(store: &MemoryStore, email: &str, balance: i64) -> (CustomerId, AccountId) {
        let mut customer = Customer::new(email, "Test Customer");
        let account_id =
            customer.add_account(Account::open(AccountType::Checking, Money::from_major(balance)));
        let customer_id = customer.customer_id;
        store.insert_customer(customer).unwrap();
        (customer_id, account_id)
    }

    fn seed_application(store: &MemoryStore, email: &str, amount: i64, tenure: u32) -> ApplicationId {
        let application = LoanApplication::submit(
            email,
            LoanType::Personal,
            Money::from_major(amount),
            tenure,
            700,
            EmploymentInfo {
                employer: "Acme".to_string(),
                occupation: "Engineer".to_string(),
                monthly_income: Money::from_major(6_000),
            },
            Utc.with_ymd_and_hms(2024, 5, 20, 9, 0, 0).unwrap(),
        );
        let id = application.application_id;
        store.insert_application(application).unwrap();
        id
    }

    fn engine() -> (Arc<MemoryStore>, LedgerEngine<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = LedgerEngine::with_defaults(Arc::clone(&store));
        (store, engine)
    }

    fn metadata(description: &str) -> TransactionMetadata {
        TransactionMetadata::new(description, "Transfer", "teller:alice")
    }

    #[test]
    fn test_credit_posting() {
        let (store, engine) = engine();
        let (customer_id, account_id) = seed_customer(&store, "a@example.com", 1_000);
        let time = test_time();

        let receipt = engine
            .post_account_transaction(
                customer_id,
                AccountSelector::Primary,
                TransactionType::Credit,
                Money::from_major(500),
                metadata("salary"),
                &time,
            )
            .unwrap();

        assert_eq!(receipt.account_id, account_id);
        assert_eq!(receipt.new_balance, Money::from_major(1_500));

        let customer = store.get_customer(customer_id).unwrap().record;
        let account = customer.account(account_id).unwrap();
        assert_eq!(account.current_balance, Money::from_major(1_500));
        assert_eq!(account.available_balance, Money::from_major(1_500));
        assert_eq!(account.transactions.len(), 1);
        assert_eq!(account.transactions[0].initiated_by, "teller:alice");
        assert!(account.verify_history());

        let events = engine.take_events();
        assert!(matches!(events[0], LedgerEvent::TransactionPosted { .. }));
    }

    #[test]
    fn test_debit_requires_sufficient_balance() {
        let (store, engine) = engine();
        let (customer_id, _) = seed_customer(&store, "a@example.com", 100);
        let time = test_time();
        let before = store.get_customer(customer_id).unwrap().record;

        let result = engine.post_account_transaction(
            customer_id,
            AccountSelector::Primary,
            TransactionType::Debit,
            Money::from_major(150),
            metadata("withdrawal"),
            &time,
        );

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance { available, requested })
                if available == Money::from_major(100) && requested == Money::from_major(150)
        ));

        // account and transaction list untouched
        let after = store.get_customer(customer_id).unwrap().record;
        assert_eq!(before, after);
        assert!(engine.take_events().is_empty());
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let (store, engine) = engine();
        let (customer_id, _) = seed_customer(&store, "a@example.com", 100);
        let time = test_time();

        for amount in [Money::ZERO, Money::from_major(-5)] {
            let result = engine.post_account_transaction(
                customer_id,
                AccountSelector::Primary,
                TransactionType::Credit,
                amount,
                metadata("bad"),
                &time,
            );
            assert!(matches!(result, Err(LedgerError::InvalidInput { .. })));
        }
    }

    #[test]
    fn test_unknown_customer_and_account() {
        let (store, engine) = engine();
        let (customer_id, _) = seed_customer(&store, "a@example.com", 100);
        let time = test_time();

        let result = engine.post_account_transaction(
            Uuid::new_v4(),
            AccountSelector::Primary,
            TransactionType::Credit,
            Money::from_major(10),
            metadata("x"),
            &time,
        );
        assert!(matches!(result, Err(LedgerError::CustomerNotFound { .. })));

        let result = engine.post_account_transaction(
            customer_id,
            AccountSelector::Account(Uuid::new_v4()),
            TransactionType::Credit,
            Money::from_major(10),
            metadata("x"),
            &time,
        );
        assert!(matches!(result, Err(LedgerError::AccountNotFound { .. })));
    }

    #[test]
    fn test_concurrent_debits_exactly_one_wins() {
        let (store, engine) = engine();
        let (customer_id, account_id) = seed_customer(&store, "a@example.com", 1_000);
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let time = SafeTimeProvider::new(TimeSource::System);
                    engine.post_account_transaction(
                        customer_id,
                        AccountSelector::Primary,
                        TransactionType::Debit,
                        Money::from_major(600),
                        TransactionMetadata::new("transfer", "Transfer", "teller:bob"),
                        &time,
                    )
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientBalance { .. })))
            .count();

        assert_eq!(successes, 1);
        assert_eq!(insufficient, 1);

        let customer = store.get_customer(customer_id).unwrap().record;
        let account = customer.account(account_id).unwrap();
        assert_eq!(account.current_balance, Money::from_major(400));
        assert_eq!(account.transactions.len(), 1);
        assert!(account.verify_history());
    }

    #[test]
    fn test_approve_and_disburse() {
        let (store, engine) = engine();
        let (customer_id, account_id) = seed_customer(&store, "a@example.com", 500);
        let application_id = seed_application(&store, "a@example.com", 100_000, 12);
        let time = test_time();

        let receipt = engine
            .approve_and_disburse_loan(
                application_id,
                "a@example.com",
                AccountSelector::Primary,
                "officer:carol",
                &time,
            )
            .unwrap();

        assert_eq!(receipt.account_id, account_id);
        assert_eq!(receipt.new_balance, Money::from_major(100_500));

        let customer = store.get_customer(customer_id).unwrap().record;
        let loan = customer.loan(&receipt.loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.principal, Money::from_major(100_000));
        assert_eq!(loan.remaining_amount, Money::from_major(100_000));
        assert_eq!(loan.paid_emis, 0);
        assert_eq!(loan.emi, receipt.emi);
        assert_eq!(loan.disbursement_account, account_id);

        // timeline seeded applied -> approved -> disbursed
        let statuses: Vec<_> = loan.timeline.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                TimelineStatus::Applied,
                TimelineStatus::Approved,
                TimelineStatus::Disbursed
            ]
        );

        // credit transaction references the loan
        let account = customer.account(account_id).unwrap();
        assert_eq!(account.transactions[0].reference, Some(receipt.loan_id.clone()));
        assert_eq!(account.transactions[0].kind, TransactionType::Credit);
        assert!(account.verify_history());

        // application stamped approved
        let application = store.get_application(application_id).unwrap().record;
        assert_eq!(application.status, ApplicationStatus::Approved);
        assert!(application.decided_at.is_some());
        assert_eq!(application.approved_loan_id, Some(receipt.loan_id));
    }

    #[test]
    fn test_approve_twice_fails_second_time() {
        let (store, engine) = engine();
        seed_customer(&store, "a@example.com", 0);
        let application_id = seed_application(&store, "a@example.com", 10_000, 12);
        let time = test_time();

        engine
            .approve_and_disburse_loan(
                application_id,
                "a@example.com",
                AccountSelector::Primary,
                "officer:carol",
                &time,
            )
            .unwrap();

        let result = engine.approve_and_disburse_loan(
            application_id,
            "a@example.com",
            AccountSelector::Primary,
            "officer:carol",
            &time,
        );
        assert!(matches!(
            result,
            Err(LedgerError::ApplicationAlreadyProcessed {
                status: ApplicationStatus::Approved,
                ..
            })
        ));
    }

    #[test]
    fn test_concurrent_approval_disburses_once() {
        let (store, engine) = engine();
        let (customer_id, account_id) = seed_customer(&store, "a@example.com", 0);
        let application_id = seed_application(&store, "a@example.com", 50_000, 24);
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let time = SafeTimeProvider::new(TimeSource::System);
                    engine.approve_and_disburse_loan(
                        application_id,
                        "a@example.com",
                        AccountSelector::Primary,
                        "officer:carol",
                        &time,
                    )
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let already_processed = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::ApplicationAlreadyProcessed { .. })))
            .count();

        assert_eq!(successes, 1);
        assert_eq!(already_processed, 1);

        // exactly one loan and one credit posted
        let customer = store.get_customer(customer_id).unwrap().record;
        assert_eq!(customer.loans.len(), 1);
        let account = customer.account(account_id).unwrap();
        assert_eq!(account.transactions.len(), 1);
        assert_eq!(account.current_balance, Money::from_major(50_000));
        assert!(account.verify_history());
    }

    #[test]
    fn test_approve_validation_failures() {
        let (store, engine) = engine();
        let time = test_time();

        // unknown application
        seed_customer(&store, "a@example.com", 0);
        let result = engine.approve_and_disburse_loan(
            Uuid::new_v4(),
            "a@example.com",
            AccountSelector::Primary,
            "officer:carol",
            &time,
        );
        assert!(matches!(result, Err(LedgerError::ApplicationNotFound { .. })));

        // unknown customer
        let application_id = seed_application(&store, "ghost@example.com", 10_000, 12);
        let result = engine.approve_and_disburse_loan(
            application_id,
            "ghost@example.com",
            AccountSelector::Primary,
            "officer:carol",
            &time,
        );
        assert!(matches!(result, Err(LedgerError::CustomerNotFound { .. })));

        // customer with no accounts
        let accountless = Customer::new("empty@example.com", "Empty");
        store.insert_customer(accountless).unwrap();
        let application_id = seed_application(&store, "empty@example.com", 10_000, 12);
        let result = engine.approve_and_disburse_loan(
            application_id,
            "empty@example.com",
            AccountSelector::Primary,
            "officer:carol",
            &time,
        );
        assert!(matches!(result, Err(LedgerError::NoAccounts { .. })));

        // non-positive loan amount
        let application_id = seed_application(&store, "a@example.com", 0, 12);
        let result = engine.approve_and_disburse_loan(
            application_id,
            "a@example.com",
            AccountSelector::Primary,
            "officer:carol",
            &time,
        );
        assert!(matches!(result, Err(LedgerError::InvalidLoanAmount { .. })));
    }

    #[test]
    fn test_emi_payment_advances_loan() {
        let (store, engine) = engine();
        let (customer_id, account_id) = seed_customer(&store, "a@example.com", 20_000);
        let application_id = seed_application(&store, "a@example.com", 100_000, 12);
        let time = test_time();

        let disbursement = engine
            .approve_and_disburse_loan(
                application_id,
                "a@example.com",
                AccountSelector::Primary,
                "officer:carol",
                &time,
            )
            .unwrap();
        engine.take_events();

        let receipt = engine
            .post_emi_payment(
                "a@example.com",
                &disbursement.loan_id,
                AccountSelector::Primary,
                "sweep:emi",
                &time,
            )
            .unwrap();

        assert_eq!(receipt.paid_emis, 1);
        assert_eq!(
            receipt.remaining_amount,
            Money::from_major(100_000) - disbursement.emi
        );
        assert_eq!(receipt.loan_status, LoanStatus::Active);
        assert_eq!(
            receipt.new_balance,
            Money::from_major(120_000) - disbursement.emi
        );

        let customer = store.get_customer(customer_id).unwrap().record;
        let loan = customer.loan(&disbursement.loan_id).unwrap();
        assert_eq!(
            loan.next_emi_date,
            Some(time.now() + Duration::days(30))
        );
        assert_eq!(loan.timeline.last().unwrap().status, TimelineStatus::EmiPaid);

        let account = customer.account(account_id).unwrap();
        assert_eq!(account.transactions[0].kind, TransactionType::Debit);
        assert_eq!(account.transactions[0].reference, Some(disbursement.loan_id.clone()));
        assert!(account.verify_history());

        let events = engine.take_events();
        assert!(matches!(events[0], LedgerEvent::EmiPosted { .. }));
    }

    #[test]
    fn test_final_emi_closes_loan() {
        let (store, engine) = engine();
        let (customer_id, account_id) = seed_customer(&store, "a@example.com", 5_000);
        let time = test_time();

        // seed a loan one installment from closure
        let ids = IdGenerator::new();
        let loan_id = ids.loan_id(time.now());
        let snapshot = store.get_customer(customer_id).unwrap();
        let mut customer = snapshot.record;
        customer.loans.insert(
            loan_id.clone(),
            Loan {
                loan_id: loan_id.clone(),
                loan_type: LoanType::Personal,
                principal: Money::from_major(12_000),
                interest_rate: Rate::from_percentage(10),
                tenure_months: 12,
                emi: Money::from_major(1_000),
                remaining_amount: Money::from_major(1_000),
                paid_emis: 11,
                status: LoanStatus::Active,
                next_emi_date: Some(time.now()),
                disbursement_account: account_id,
                timeline: Vec::new(),
            },
        );
        store
            .update_customer(customer_id, snapshot.version, customer)
            .unwrap();

        let receipt = engine
            .post_emi_payment(
                "a@example.com",
                &loan_id,
                AccountSelector::Primary,
                "sweep:emi",
                &time,
            )
            .unwrap();

        assert_eq!(receipt.paid_emis, 12);
        assert_eq!(receipt.remaining_amount, Money::ZERO);
        assert_eq!(receipt.loan_status, LoanStatus::Closed);

        let customer = store.get_customer(customer_id).unwrap().record;
        let loan = customer.loan(&loan_id).unwrap();
        assert!(loan.is_closed());
        assert_eq!(loan.next_emi_date, None);
        assert_eq!(loan.timeline.last().unwrap().status, TimelineStatus::Closed);

        // a further payment is rejected
        let result = engine.post_emi_payment(
            "a@example.com",
            &loan_id,
            AccountSelector::Primary,
            "sweep:emi",
            &time,
        );
        assert!(matches!(result, Err(LedgerError::LoanNotActive { .. })));

        let events = engine.take_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, LedgerEvent::LoanClosed { paid_emis: 12, .. })));
    }

    #[test]
    fn test_emi_failures() {
        let (store, engine) = engine();
        seed_customer(&store, "a@example.com", 100);
        let application_id = seed_application(&store, "a@example.com", 100_000, 12);
        let time = test_time();

        // unknown loan
        let result = engine.post_emi_payment(
            "a@example.com",
            &LoanId("LN-missing".to_string()),
            AccountSelector::Primary,
            "sweep:emi",
            &time,
        );
        assert!(matches!(result, Err(LedgerError::LoanNotFound { .. })));

        // balance below the EMI
        let disbursement = engine
            .approve_and_disburse_loan(
                application_id,
                "a@example.com",
                AccountSelector::Primary,
                "officer:carol",
                &time,
            )
            .unwrap();
        let drain = engine
            .post_account_transaction(
                store.find_customer_by_email("a@example.com").unwrap().record.customer_id,
                AccountSelector::Primary,
                TransactionType::Debit,
                Money::from_major(100_000),
                metadata("drain"),
                &time,
            )
            .unwrap();
        assert!(drain.new_balance < disbursement.emi);

        let result = engine.post_emi_payment(
            "a@example.com",
            &disbursement.loan_id,
            AccountSelector::Primary,
            "sweep:emi",
            &time,
        );
        assert!(matches!(result, Err(LedgerError::InsufficientBalance { .. })));
    }

    #[test]
    fn test_emi_monotonicity_over_full_tenure() {
        let (store, engine) = engine();
        seed_customer(&store, "a@example.com", 200_000);
        let application_id = seed_application(&store, "a@example.com", 100_000, 12);
        let time = test_time();

        let disbursement = engine
            .approve_and_disburse_loan(
                application_id,
                "a@example.com",
                AccountSelector::Primary,
                "officer:carol",
                &time,
            )
            .unwrap();

        let mut last_paid = 0;
        let mut last_remaining = Money::from_major(100_000);
        loop {
            let receipt = engine
                .post_emi_payment(
                    "a@example.com",
                    &disbursement.loan_id,
                    AccountSelector::Primary,
                    "sweep:emi",
                    &time,
                )
                .unwrap();

            assert!(receipt.paid_emis > last_paid);
            assert!(receipt.paid_emis <= 12);
            assert!(receipt.remaining_amount <= last_remaining);
            assert!(receipt.remaining_amount >= Money::ZERO);

            last_paid = receipt.paid_emis;
            last_remaining = receipt.remaining_amount;
            if receipt.loan_status == LoanStatus::Closed {
                break;
            }
        }
        assert_eq!(last_paid, 12);
    }

    #[test]
    fn test_lookup_and_loan_queries() {
        let (store, engine) = engine();
        seed_customer(&store, "a@example.com", 0);
        let application_id = seed_application(&store, "a@example.com", 10_000, 12);
        let time = test_time();

        assert!(matches!(
            engine.find_customer_by_email("missing@example.com"),
            Err(LedgerError::CustomerNotFound { .. })
        ));
        assert!(engine.get_customer_loans("a@example.com").unwrap().is_empty());

        let disbursement = engine
            .approve_and_disburse_loan(
                application_id,
                "a@example.com",
                AccountSelector::Primary,
                "officer:carol",
                &time,
            )
            .unwrap();

        let loans = engine.get_customer_loans("a@example.com").unwrap();
        assert_eq!(loans.len(), 1);
        assert_eq!(loans[0].loan_id, disbursement.loan_id);
    }

    #[test]
    fn test_deadline_elapsed_surfaces_timeout() {
        let store = Arc::new(MemoryStore::new());
        let (customer_id, _) = seed_customer(&store, "a@example.com", 1_000);
        let before = store.get_customer(customer_id).unwrap().record;

        let config = LedgerConfig {
            // deadline already in the past: first attempt never starts
            operation_deadline: Duration::milliseconds(-1),
            ..LedgerConfig::default()
        };
        let engine = LedgerEngine::new(Arc::clone(&store), config);
        let time = SafeTimeProvider::new(TimeSource::System);

        let result = engine.post_account_transaction(
            customer_id,
            AccountSelector::Primary,
            TransactionType::Debit,
            Money::from_major(100),
            metadata("late"),
            &time,
        );
        assert!(matches!(result, Err(LedgerError::Timeout { .. })));

        // no partial write
        let after = store.get_customer(customer_id).unwrap().record;
        assert_eq!(before, after);
    }

    /// store wrapper whose customer writes always lose the race
    struct ContentedStore {
        inner: MemoryStore,
    }

    impl AccountStore for ContentedStore {
        fn get_customer(&self, customer_id: CustomerId) -> StoreResult<Versioned<Customer>> {
            self.inner.get_customer(customer_id)
        }

        fn find_customer_by_email(&self, email: &str) -> StoreResult<Versioned<Customer>> {
            self.inner.find_customer_by_email(email)
        }

        fn insert_customer(&self, customer: Customer) -> StoreResult<u64> {
            self.inner.insert_customer(customer)
        }

        fn update_customer(
            &self,
            customer_id: CustomerId,
            expected_version: u64,
            _record: Customer,
        ) -> StoreResult<u64> {
            Err(StoreError::Conflict {
                key: customer_id.to_string(),
                expected: expected_version,
                found: expected_version + 1,
            })
        }

        fn get_application(
            &self,
            application_id: ApplicationId,
        ) -> StoreResult<Versioned<LoanApplication>> {
            self.inner.get_application(application_id)
        }

        fn insert_application(&self, application: LoanApplication) -> StoreResult<u64> {
            self.inner.insert_application(application)
        }

        fn update_application(
            &self,
            application_id: ApplicationId,
            expected_version: u64,
            record: LoanApplication,
        ) -> StoreResult<u64> {
            self.inner.update_application(application_id, expected_version, record)
        }

        fn delete_application(&self, application_id: ApplicationId) -> StoreResult<()> {
            self.inner.delete_application(application_id)
        }

        fn commit_disbursement(
            &self,
            customer_id: CustomerId,
            expected_customer_version: u64,
            _customer: Customer,
            _application_id: ApplicationId,
            _expected_application_version: u64,
            _application: LoanApplication,
        ) -> StoreResult<()> {
            Err(StoreError::Conflict {
                key: customer_id.to_string(),
                expected: expected_customer_version,
                found: expected_customer_version + 1,
            })
        }
    }

    #[test]
    fn test_retry_exhaustion_surfaces_contention() {
        let store = Arc::new(ContentedStore {
            inner: MemoryStore::new(),
        });
        let mut customer = Customer::new("a@example.com", "Test");
        customer.add_account(Account::open(AccountType::Checking, Money::from_major(1_000)));
        let customer_id = customer.customer_id;
        store.insert_customer(customer).unwrap();

        let config = LedgerConfig {
            retry: crate::config::RetryPolicy {
                max_attempts: 3,
                backoff: std::time::Duration::ZERO,
            },
            ..LedgerConfig::default()
        };
        let engine = LedgerEngine::new(store, config);
        let time = test_time();

        let result = engine.post_account_transaction(
            customer_id,
            AccountSelector::Primary,
            TransactionType::Credit,
            Money::from_major(10),
            metadata("doomed"),
            &time,
        );
        assert!(matches!(
            result,
            Err(LedgerError::Contention { attempts: 3, .. })
        ));
    }
}
