use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{ApplicationId, ApplicationStatus, LoanId, LoanType};

/// loan application: the pre-approval entity
///
/// One canonical schema produced at submission time. On approval it
/// spawns a `Loan` and is stamped Approved; on rejection it is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplication {
    pub application_id: ApplicationId,
    pub applicant_email: String,
    pub loan_type: LoanType,
    pub requested_amount: Money,
    pub tenure_months: u32,
    pub credit_score: u32,
    pub employment: EmploymentInfo,
    pub status: ApplicationStatus,
    pub submitted_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    /// set when approval spawns the loan
    pub approved_loan_id: Option<LoanId>,
}

impl LoanApplication {
    pub fn submit(
        applicant_email: impl Into<String>,
        loan_type: LoanType,
        requested_amount: Money,
        tenure_months: u32,
        credit_score: u32,
        employment: EmploymentInfo,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            application_id: Uuid::new_v4(),
            applicant_email: applicant_email.into(),
            loan_type,
            requested_amount,
            tenure_months,
            credit_score,
            employment,
            status: ApplicationStatus::PendingReview,
            submitted_at,
            decided_at: None,
            approved_loan_id: None,
        }
    }

    pub fn is_pending_like(&self) -> bool {
        self.status == ApplicationStatus::PendingReview
    }

    pub fn is_processed(&self) -> bool {
        !self.is_pending_like()
    }
}

/// applicant employment and income details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmploymentInfo {
    pub employer: String,
    pub occupation: String,
    pub monthly_income: Money,
}
