//! Job id generation.
//!
//! Ids keep the readable `job_<project>_<category>_<millis>` shape, but the
//! millisecond component is drawn from a process-wide monotonic clock: two
//! launches landing in the same millisecond get consecutive values instead of
//! the same id.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::category::AuditCategory;
use crate::types::JobId;

#[derive(Debug, Default)]
pub struct JobIdGenerator {
    last_millis: AtomicI64,
}

impl JobIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self, project_id: &str, category: AuditCategory) -> JobId {
        let millis = self.next_millis(chrono::Utc::now().timestamp_millis());
        format!("job_{project_id}_{}_{millis}", category.as_str())
    }

    /// Strictly increasing timestamp: `now` unless that has already been
    /// issued, in which case one past the last issued value.
    fn next_millis(&self, now: i64) -> i64 {
        let mut last = self.last_millis.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self.last_millis.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}
