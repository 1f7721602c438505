// Retry state machine for queue entries
//
// pending --claim--> in_flight --ok--> sent
// in_flight --err, attempts < max--> pending (rescheduled)
// in_flight --err, attempts >= max--> failed

use std::time::Duration;

use super::models::QueueStatus;

/// Where an entry goes after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureTransition {
    pub status: QueueStatus,
    pub retry_count: i64,
    /// Delay before the entry is due again; `None` when terminal
    pub retry_in: Option<Duration>,
}

/// Status after a failed attempt, given the retry count before the attempt
pub fn next_status(retry_count: i64, max_retries: i64) -> QueueStatus {
    if retry_count + 1 >= max_retries {
        QueueStatus::Failed
    } else {
        QueueStatus::Pending
    }
}

/// `base * 2^(attempt-1)`, capped at `max`. `attempt` counts from 1.
pub fn backoff_delay(attempt: i64, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).clamp(0, 31) as u32;
    base.checked_mul(2u32.saturating_pow(exponent))
        .unwrap_or(max)
        .min(max)
}

pub fn on_failure(
    retry_count: i64,
    max_retries: i64,
    base: Duration,
    max: Duration,
) -> FailureTransition {
    let attempts = retry_count + 1;
    match next_status(retry_count, max_retries) {
        QueueStatus::Failed => FailureTransition {
            status: QueueStatus::Failed,
            retry_count: attempts,
            retry_in: None,
        },
        status => FailureTransition {
            status,
            retry_count: attempts,
            retry_in: Some(backoff_delay(attempts, base, max)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(60);
    const MAX: Duration = Duration::from_secs(3600);

    #[test]
    fn test_three_failures_exhaust_budget_of_three() {
        assert_eq!(next_status(0, 3), QueueStatus::Pending);
        assert_eq!(next_status(1, 3), QueueStatus::Pending);
        assert_eq!(next_status(2, 3), QueueStatus::Failed);
    }

    #[test]
    fn test_single_attempt_budget() {
        assert_eq!(next_status(0, 1), QueueStatus::Failed);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1, BASE, MAX), Duration::from_secs(60));
        assert_eq!(backoff_delay(2, BASE, MAX), Duration::from_secs(120));
        assert_eq!(backoff_delay(3, BASE, MAX), Duration::from_secs(240));
        assert_eq!(backoff_delay(10, BASE, MAX), MAX);
        assert_eq!(backoff_delay(400, BASE, MAX), MAX);
        assert_eq!(backoff_delay(3, Duration::ZERO, MAX), Duration::ZERO);
    }

    #[test]
    fn test_on_failure_transitions() {
        let retry = on_failure(0, 3, BASE, MAX);
        assert_eq!(retry.status, QueueStatus::Pending);
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.retry_in, Some(BASE));

        let terminal = on_failure(2, 3, BASE, MAX);
        assert_eq!(terminal.status, QueueStatus::Failed);
        assert_eq!(terminal.retry_count, 3);
        assert_eq!(terminal.retry_in, None);
    }
}
