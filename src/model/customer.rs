use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::model::account::Account;
use crate::model::loan::Loan;
use crate::types::{AccountId, AccountSelector, CustomerId, LoanId};

/// customer document: accounts, loans, and beneficiaries
///
/// Owned exclusively by the account store; callers mutate it only through
/// ledger engine operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: CustomerId,
    pub email: String,
    pub name: String,
    pub accounts: Vec<Account>,
    /// named primary-account relationship, not an array position
    pub primary_account_id: Option<AccountId>,
    /// loan sub-collection keyed by loan id
    pub loans: BTreeMap<LoanId, Loan>,
    pub beneficiaries: Vec<Beneficiary>,
}

impl Customer {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            customer_id: Uuid::new_v4(),
            email: email.into(),
            name: name.into(),
            accounts: Vec::new(),
            primary_account_id: None,
            loans: BTreeMap::new(),
            beneficiaries: Vec::new(),
        }
    }

    /// add an account; the first account becomes primary
    pub fn add_account(&mut self, account: Account) -> AccountId {
        let id = account.account_id;
        if self.primary_account_id.is_none() {
            self.primary_account_id = Some(id);
        }
        self.accounts.push(account);
        id
    }

    pub fn account(&self, account_id: AccountId) -> Option<&Account> {
        self.accounts.iter().find(|a| a.account_id == account_id)
    }

    pub fn account_mut(&mut self, account_id: AccountId) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.account_id == account_id)
    }

    /// resolve a selector to a concrete account id
    pub fn resolve_account(&self, selector: AccountSelector) -> Option<AccountId> {
        match selector {
            AccountSelector::Primary => self.primary_account_id,
            AccountSelector::Account(id) => {
                self.account(id).map(|a| a.account_id)
            }
        }
    }

    pub fn loan(&self, loan_id: &LoanId) -> Option<&Loan> {
        self.loans.get(loan_id)
    }

    pub fn loan_mut(&mut self, loan_id: &LoanId) -> Option<&mut Loan> {
        self.loans.get_mut(loan_id)
    }
}

/// registered transfer beneficiary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub beneficiary_id: Uuid,
    pub name: String,
    pub account_number: String,
    pub nickname: Option<String>,
}
