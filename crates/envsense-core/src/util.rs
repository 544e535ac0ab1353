//! Small shared helpers.

use std::time::Duration;

use tokio::time::Instant;

/// Roughly 30 years, the same horizon tokio uses for an unbounded sleep.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Instant `after` from now, saturating at a far-future deadline instead of
/// overflowing for huge durations.
pub(crate) fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_after() {
        let now = Instant::now();
        assert_eq!(deadline_after(Duration::from_secs(5)), now + Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_after_saturates() {
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline > Instant::now() + Duration::from_secs(86400 * 365));
        let deadline = deadline_after(Duration::from_secs(u64::MAX));
        assert!(deadline > Instant::now());
    }
}
