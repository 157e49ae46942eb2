// Deadline wrapper for store calls that must not hang the caller.

use std::future::Future;
use std::time::Duration;

/// Raised when the wrapped future did not finish in time. Distinct from
/// whatever error the future itself can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation timed out after {}ms", .0.as_millis())]
pub struct Elapsed(pub Duration);

pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future).await.map_err(|_| Elapsed(duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fast_future_returns_its_output() {
        let result = with_timeout(Duration::from_secs(5), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_future_elapses() {
        let result = with_timeout(Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            7
        })
        .await;
        assert_eq!(result, Err(Elapsed(Duration::from_millis(100))));
    }

    #[tokio::test(start_paused = true)]
    async fn inner_error_is_not_a_timeout() {
        let result: Result<Result<(), &str>, Elapsed> =
            with_timeout(Duration::from_secs(1), async { Err("refused") }).await;
        assert_eq!(result, Ok(Err("refused")));
    }

    #[test]
    fn elapsed_message_names_the_deadline() {
        assert_eq!(Elapsed(Duration::from_secs(5)).to_string(), "operation timed out after 5000ms");
    }
}
