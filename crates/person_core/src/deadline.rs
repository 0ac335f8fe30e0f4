//! Request deadlines threaded through store operations.

use std::time::{Duration, Instant};

/// Point in time after which a store operation must stop and roll back.
///
/// `Deadline::none()` never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// Deadline that never expires.
    pub fn none() -> Self {
        Self(None)
    }

    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self(Some(Instant::now() + budget))
    }

    /// Deadline at a fixed instant.
    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left before expiry; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::Deadline;
    use std::time::{Duration, Instant};

    #[test]
    fn unbounded_deadline_never_expires() {
        let deadline = Deadline::none();
        assert!(!deadline.is_expired());
        assert_eq!(deadline.remaining(), None);
    }

    #[test]
    fn zero_budget_is_already_expired() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn future_deadline_reports_remaining_time() {
        let deadline = Deadline::at(Instant::now() + Duration::from_secs(60));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining().unwrap() > Duration::from_secs(50));
    }
}
