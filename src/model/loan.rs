use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::types::{AccountId, LoanId, LoanStatus, LoanType, TimelineStatus};

/// disbursed loan owned by a customer record
///
/// Created only by the approval operation, never at application time.
/// Loans are never deleted; they only transition Active -> Closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub loan_id: LoanId,
    pub loan_type: LoanType,
    pub principal: Money,
    pub interest_rate: Rate,
    pub tenure_months: u32,
    pub emi: Money,
    pub remaining_amount: Money,
    pub paid_emis: u32,
    pub status: LoanStatus,
    pub next_emi_date: Option<DateTime<Utc>>,
    /// account the principal was credited to and EMIs are debited from
    pub disbursement_account: AccountId,
    /// append-only lifecycle audit log
    pub timeline: Vec<TimelineEvent>,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }

    pub fn is_closed(&self) -> bool {
        self.status == LoanStatus::Closed
    }

    /// closure condition: tenure exhausted or nothing left to repay
    pub fn is_fully_repaid(&self) -> bool {
        self.paid_emis >= self.tenure_months || self.remaining_amount.is_zero()
    }

    /// append a lifecycle event; existing entries are never touched
    pub(crate) fn record_event(
        &mut self,
        status: TimelineStatus,
        timestamp: DateTime<Utc>,
        description: impl Into<String>,
    ) {
        self.timeline.push(TimelineEvent {
            status,
            timestamp,
            description: description.into(),
        });
    }
}

/// one entry in a loan's lifecycle timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub status: TimelineStatus,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}
