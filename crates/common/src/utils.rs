//! Utility functions for the session orchestrator

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Formats a duration into a human-readable string
///
/// # Examples
///
/// ```
/// use common::utils::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
/// assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();

    if total_secs == 0 {
        let millis = duration.subsec_millis();
        if millis == 0 {
            return format!("{}us", duration.subsec_micros());
        }
        return format!("{}ms", millis);
    }

    let days = total_secs / (24 * 60 * 60);
    let hours = (total_secs % (24 * 60 * 60)) / (60 * 60);
    let minutes = (total_secs % (60 * 60)) / 60;
    let seconds = total_secs % 60;

    let mut result = String::new();

    if days > 0 {
        result.push_str(&format!("{}d ", days));
    }

    if hours > 0 || !result.is_empty() {
        result.push_str(&format!("{}h ", hours));
    }

    if minutes > 0 || !result.is_empty() {
        result.push_str(&format!("{}m ", minutes));
    }

    result.push_str(&format!("{}s", seconds));

    result
}

/// Executes a future with a timeout, mapping expiry through `on_timeout`
///
/// # Examples
///
/// ```
/// use common::utils::execute_with_timeout;
/// use std::time::Duration;
///
/// let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
/// let value: Result<u32, String> = rt.block_on(execute_with_timeout(
///     async { Ok(42) },
///     Duration::from_secs(1),
///     |d| format!("timed out after {:?}", d),
/// ));
/// assert_eq!(value, Ok(42));
/// ```
pub async fn execute_with_timeout<T, E, F, M>(future: F, duration: Duration, on_timeout: M) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    M: FnOnce(Duration) -> E,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(duration)),
    }
}

/// Capped exponential backoff used when polling the store
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `initial` and doubling up to `max`
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            max,
        }
    }

    /// Returns the next delay and advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_millis(300));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(600)), "10m 0s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[tokio::test]
    async fn test_execute_with_timeout_expires() {
        let result: Result<(), String> = execute_with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_millis(10),
            |d| format!("late after {}", format_duration(d)),
        )
        .await;
        assert_eq!(result, Err("late after 10ms".to_string()));
    }
}
