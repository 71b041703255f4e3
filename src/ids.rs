use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::types::{LoanId, TransactionId};

/// collision-resistant identifier generator
///
/// Ids carry an epoch-millisecond prefix for rough time ordering, a
/// process-local monotonic sequence, and a random suffix so that two
/// operations committing in the same millisecond never collide.
#[derive(Debug, Default)]
pub struct IdGenerator {
    sequence: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
        }
    }

    pub fn transaction_id(&self, now: DateTime<Utc>) -> TransactionId {
        TransactionId(self.generate("TXN", now))
    }

    pub fn loan_id(&self, now: DateTime<Utc>) -> LoanId {
        LoanId(self.generate("LN", now))
    }

    fn generate(&self, prefix: &str, now: DateTime<Utc>) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}-{}",
            prefix,
            now.timestamp_millis(),
            seq,
            &suffix[..8]
        )
    }
}
