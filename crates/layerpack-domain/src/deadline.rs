use std::time::{Duration, Instant};

use crate::error::PackagingError;

/// Overall time budget of one pipeline invocation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn new(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.started.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.limit
    }

    /// Fails with [`PackagingError::Timeout`] once the budget is spent.
    pub fn check(&self, stage: &str) -> Result<(), PackagingError> {
        if self.expired() {
            return Err(self.timeout(stage));
        }
        Ok(())
    }

    pub fn timeout(&self, stage: &str) -> PackagingError {
        PackagingError::Timeout {
            stage: stage.to_string(),
            limit_secs: self.limit.as_secs(),
        }
    }
}

/// `check` on an optional deadline.
pub fn check_deadline(deadline: Option<&Deadline>, stage: &str) -> Result<(), PackagingError> {
    deadline.map_or(Ok(()), |deadline| deadline.check(stage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_budget_expires_immediately() {
        let deadline = Deadline::new(Duration::ZERO);
        let err = deadline.check("fetch").unwrap_err();
        assert_eq!(err.kind(), "TimeoutError");
        assert!(err.to_string().contains("fetch"));
    }

    #[test]
    fn generous_budget_passes() {
        let deadline = Deadline::new(Duration::from_secs(3600));
        assert!(check_deadline(Some(&deadline), "resolve").is_ok());
        assert!(check_deadline(None, "resolve").is_ok());
        assert!(deadline.remaining() > Duration::from_secs(3500));
    }
}
