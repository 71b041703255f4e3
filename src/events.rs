use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{
    AccountId, ApplicationId, CustomerId, LoanId, TransactionId, TransactionType,
};

/// audit events emitted by committed ledger operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    TransactionPosted {
        customer_id: CustomerId,
        account_id: AccountId,
        transaction_id: TransactionId,
        kind: TransactionType,
        amount: Money,
        balance_after: Money,
        timestamp: DateTime<Utc>,
    },
    ApplicationApproved {
        application_id: ApplicationId,
        loan_id: LoanId,
        timestamp: DateTime<Utc>,
    },
    LoanDisbursed {
        customer_id: CustomerId,
        loan_id: LoanId,
        account_id: AccountId,
        principal: Money,
        emi: Money,
        timestamp: DateTime<Utc>,
    },
    EmiPosted {
        loan_id: LoanId,
        installment_number: u32,
        amount: Money,
        remaining_amount: Money,
        timestamp: DateTime<Utc>,
    },
    LoanClosed {
        loan_id: LoanId,
        paid_emis: u32,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<LedgerEvent>,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
