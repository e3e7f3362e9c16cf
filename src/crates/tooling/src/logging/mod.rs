//! Logging helpers
//!
//! Small utilities shared by the engine and the binaries for timing work and
//! rendering values in log lines.

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Await `future` and report how long it took
///
/// The elapsed time is returned alongside the output so the caller can attach it
/// to its own structured log fields.
///
/// # Example
///
/// ```rust,ignore
/// use tooling::logging::{timed, format_duration};
///
/// let (output, elapsed) = timed("allocate", run_step()).await;
/// tracing::info!(elapsed = %format_duration(elapsed), "Step finished");
/// ```
pub async fn timed<F, T>(name: &str, future: F) -> (T, Duration)
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let output = future.await;
    let elapsed = start.elapsed();
    debug!(operation = name, elapsed = %format_duration(elapsed), "Timed operation completed");
    (output, elapsed)
}

/// Human-readable duration: `850μs`, `12.40ms`, `3.25s`, `2m5s`
pub fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    if micros < 1_000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{:.2}ms", micros as f64 / 1_000.0)
    } else if duration.as_secs() < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m{}s", secs / 60, secs % 60)
    }
}

/// Keep the first four characters of a secret and mask the rest
pub fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(850)), "850μs");
        assert_eq!(format_duration(Duration::from_micros(12_400)), "12.40ms");
        assert_eq!(format_duration(Duration::from_millis(3_250)), "3.25s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m5s");
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("sk-abcdef123"), "sk-a****");
        assert_eq!(mask_secret("abc"), "****");
        assert_eq!(mask_secret(""), "****");
    }

    #[tokio::test]
    async fn test_timed_returns_output_and_elapsed() {
        let (value, elapsed) = timed("sleep", async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            "done"
        })
        .await;
        assert_eq!(value, "done");
        assert!(elapsed >= Duration::from_millis(5));
    }
}
