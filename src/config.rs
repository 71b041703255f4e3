use chrono::Duration;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;

use crate::decimal::Rate;
use crate::types::LoanType;

/// ledger engine configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub retry: RetryPolicy,
    /// overall deadline for one engine operation, including retries
    pub operation_deadline: Duration,
    /// days between EMI due dates
    pub emi_interval_days: i64,
    pub rates: RateTable,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            operation_deadline: Duration::seconds(5),
            emi_interval_days: 30,
            rates: RateTable::default(),
        }
    }
}

/// explicit retry policy for optimistic-concurrency conflicts
///
/// A conflicted commit re-runs the whole read-validate-write cycle from a
/// fresh read. `max_attempts` bounds the total attempts before the
/// operation surfaces `Contention`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// base backoff between attempts, scaled linearly by attempt number
    pub backoff: StdDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: StdDuration::from_millis(2),
        }
    }
}

impl RetryPolicy {
    /// no retries, no waiting (single attempt)
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: StdDuration::ZERO,
        }
    }

    pub fn backoff_for(&self, attempt: u32) -> StdDuration {
        self.backoff * attempt
    }
}

/// base interest rates per loan product with credit-score adjustments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateTable {
    pub personal: Rate,
    pub home: Rate,
    pub auto: Rate,
    pub education: Rate,
    pub business: Rate,
    /// score at or above which the rate drops one point
    pub prime_score: u32,
    /// score below which the rate rises two points
    pub subprime_score: u32,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            personal: Rate::from_percentage_decimal(dec!(10.5)),
            home: Rate::from_percentage_decimal(dec!(8.5)),
            auto: Rate::from_percentage_decimal(dec!(9.5)),
            education: Rate::from_percentage_decimal(dec!(9.0)),
            business: Rate::from_percentage_decimal(dec!(12.0)),
            prime_score: 750,
            subprime_score: 650,
        }
    }
}

impl RateTable {
    pub fn base_rate(&self, loan_type: LoanType) -> Rate {
        match loan_type {
            LoanType::Personal => self.personal,
            LoanType::Home => self.home,
            LoanType::Auto => self.auto,
            LoanType::Education => self.education,
            LoanType::Business => self.business,
        }
    }
}
