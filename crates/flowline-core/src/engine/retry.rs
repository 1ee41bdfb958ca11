//! Retry decisions for failed state executions.

use chrono::Duration;

use crate::definition::WorkflowSettings;

/// Back-off before the next attempt after `retries` earlier failures:
/// `min_error_delay * 2^retries`, capped at `max_error_delay`.
pub fn error_delay(settings: &WorkflowSettings, retries: u32) -> Duration {
    let min_ms = settings.min_error_delay.num_milliseconds().max(0);
    let max_ms = settings.max_error_delay.num_milliseconds().max(min_ms);
    let factor = 1i64.checked_shl(retries.min(62)).unwrap_or(i64::MAX);
    Duration::milliseconds(min_ms.saturating_mul(factor).min(max_ms))
}

/// Whether a failure with `retries` earlier failures exhausts the policy.
pub fn retries_exhausted(settings: &WorkflowSettings, retries: u32) -> bool {
    retries >= settings.max_retries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> WorkflowSettings {
        WorkflowSettings {
            min_error_delay: Duration::seconds(10),
            max_error_delay: Duration::minutes(5),
            max_retries: 3,
        }
    }

    #[test]
    fn test_delay_doubles_per_retry() {
        let s = settings();
        assert_eq!(error_delay(&s, 0), Duration::seconds(10));
        assert_eq!(error_delay(&s, 1), Duration::seconds(20));
        assert_eq!(error_delay(&s, 2), Duration::seconds(40));
        assert_eq!(error_delay(&s, 4), Duration::seconds(160));
    }

    #[test]
    fn test_delay_is_capped() {
        let s = settings();
        assert_eq!(error_delay(&s, 5), Duration::minutes(5));
        assert_eq!(error_delay(&s, 100), Duration::minutes(5));
    }

    #[test]
    fn test_exhaustion() {
        let s = settings();
        assert!(!retries_exhausted(&s, 2));
        assert!(retries_exhausted(&s, 3));
    }
}
