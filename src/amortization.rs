use rust_decimal::Decimal;

use crate::config::RateTable;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::types::LoanType;

/// calculate the equal monthly installment for an amortized loan
///
/// EMI = P * r * (1 + r)^n / ((1 + r)^n - 1), where r is the monthly
/// rate. Falls back to straight-line P / n when the rate is zero.
/// Rounds to the currency minor unit.
pub fn compute_emi(principal: Money, annual_rate: Rate, tenure_months: u32) -> Result<Money> {
    if !principal.is_positive() {
        return Err(LedgerError::InvalidInput {
            message: format!("principal must be positive, got {}", principal),
        });
    }
    if tenure_months == 0 {
        return Err(LedgerError::InvalidInput {
            message: "tenure must be at least one month".to_string(),
        });
    }

    let monthly_rate = annual_rate.monthly_rate().as_decimal();

    if monthly_rate.is_zero() {
        return Ok(principal / Decimal::from(tenure_months));
    }

    let mut compound = Decimal::ONE;
    let base = Decimal::ONE + monthly_rate;
    for _ in 0..tenure_months {
        compound *= base;
    }

    let numerator = principal.as_decimal() * monthly_rate * compound;
    let denominator = compound - Decimal::ONE;

    Ok(Money::from_decimal(numerator / denominator))
}

/// select the interest rate for a loan product and applicant credit score
///
/// Base rate comes from the table; scores at or above the prime cutoff
/// earn a one-point discount, scores below the subprime cutoff pay a
/// two-point premium. Deterministic, no side effects.
pub fn select_interest_rate(loan_type: LoanType, credit_score: u32, rates: &RateTable) -> Rate {
    let base = rates.base_rate(loan_type);
    if credit_score >= rates.prime_score {
        base.add_points(-1)
    } else if credit_score < rates.subprime_score {
        base.add_points(2)
    } else {
        base
    }
}

/// total interest paid over the life of the loan, clamped at zero
pub fn total_interest(emi: Money, tenure_months: u32, principal: Money) -> Money {
    let total_repayment = emi * Decimal::from(tenure_months);
    (total_repayment - principal).max(Money::ZERO)
}

/// one month of a repayment schedule preview
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub month: u32,
    pub payment: Money,
    pub principal_portion: Money,
    pub interest_portion: Money,
    pub remaining_balance: Money,
}

/// read-only amortization schedule preview for a prospective loan
#[derive(Debug, Clone)]
pub struct RepaymentSchedule {
    pub principal: Money,
    pub annual_rate: Rate,
    pub tenure_months: u32,
    pub emi: Money,
    pub entries: Vec<ScheduleEntry>,
    pub total_interest: Money,
}

impl RepaymentSchedule {
    pub fn generate(principal: Money, annual_rate: Rate, tenure_months: u32) -> Result<Self> {
        let emi = compute_emi(principal, annual_rate, tenure_months)?;
        let monthly_rate = annual_rate.monthly_rate().as_decimal();

        let mut entries = Vec::with_capacity(tenure_months as usize);
        let mut balance = principal;

        for month in 1..=tenure_months {
            let interest_portion = Money::from_decimal(balance.as_decimal() * monthly_rate);
            let principal_portion = (emi - interest_portion).min(balance);
            let remaining_balance = (balance - principal_portion).max(Money::ZERO);

            entries.push(ScheduleEntry {
                month,
                payment: principal_portion + interest_portion,
                principal_portion,
                interest_portion,
                remaining_balance,
            });

            balance = remaining_balance;
        }

        // absorb residual rounding into the final installment
        if let Some(last) = entries.last_mut() {
            if last.remaining_balance > Money::ZERO && last.remaining_balance < Money::from_major(1)
            {
                last.principal_portion += last.remaining_balance;
                last.payment += last.remaining_balance;
                last.remaining_balance = Money::ZERO;
            }
        }

        let schedule_interest = entries
            .iter()
            .map(|e| e.interest_portion)
            .fold(Money::ZERO, |acc, x| acc + x);

        Ok(Self {
            principal,
            annual_rate,
            tenure_months,
            emi,
            entries,
            total_interest: schedule_interest,
        })
    }
}
