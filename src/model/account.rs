use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{AccountId, AccountType, LoanId, TransactionId, TransactionStatus, TransactionType};

/// customer account with its full transaction history
///
/// Balance mutations happen exclusively through the ledger engine; the
/// apply methods here are crate-internal building blocks of its commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub account_type: AccountType,
    /// settled balance, never negative
    pub current_balance: Money,
    /// mirrors current_balance (no hold/pending distinction)
    pub available_balance: Money,
    /// balance the account opened with, anchor for history replay
    pub opening_balance: Money,
    /// most-recent-first
    pub transactions: Vec<Transaction>,
}

impl Account {
    pub fn open(account_type: AccountType, opening_balance: Money) -> Self {
        Self {
            account_id: Uuid::new_v4(),
            account_type,
            current_balance: opening_balance,
            available_balance: opening_balance,
            opening_balance,
            transactions: Vec::new(),
        }
    }

    pub fn can_debit(&self, amount: Money) -> bool {
        self.current_balance >= amount
    }

    /// apply a posting and prepend its transaction record
    ///
    /// The caller has already validated direction and funds; the snapshot
    /// recorded on the transaction is the post-update balance.
    pub(crate) fn apply(&mut self, mut transaction: Transaction) {
        match transaction.kind {
            TransactionType::Credit => {
                self.current_balance += transaction.amount;
            }
            TransactionType::Debit => {
                self.current_balance -= transaction.amount;
            }
        }
        self.available_balance = self.current_balance;
        transaction.balance = self.current_balance;
        self.transactions.insert(0, transaction);
    }

    /// replay the full history oldest-to-newest from the opening balance
    ///
    /// Returns false if any stored balance snapshot disagrees with the
    /// replayed running balance, or if the final balance does not match
    /// `current_balance`.
    pub fn verify_history(&self) -> bool {
        let mut running = self.opening_balance;
        for transaction in self.transactions.iter().rev() {
            match transaction.kind {
                TransactionType::Credit => running += transaction.amount,
                TransactionType::Debit => running -= transaction.amount,
            }
            if transaction.balance != running {
                return false;
            }
        }
        running == self.current_balance
    }
}

/// immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub date: DateTime<Utc>,
    pub kind: TransactionType,
    /// always positive; direction is carried by `kind`
    pub amount: Money,
    pub description: String,
    pub category: String,
    pub status: TransactionStatus,
    /// account balance immediately after this transaction
    pub balance: Money,
    /// links the entry to a loan where applicable
    pub reference: Option<LoanId>,
    /// identity of the caller that initiated the posting
    pub initiated_by: String,
}

/// caller-supplied posting details
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionMetadata {
    pub description: String,
    pub category: String,
    pub initiated_by: String,
    pub reference: Option<LoanId>,
}

impl TransactionMetadata {
    pub fn new(
        description: impl Into<String>,
        category: impl Into<String>,
        initiated_by: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            category: category.into(),
            initiated_by: initiated_by.into(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, loan_id: LoanId) -> Self {
        self.reference = Some(loan_id);
        self
    }
}
