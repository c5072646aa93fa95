use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("condition not met after {attempts} attempts")]
pub struct PollTimeout {
    pub attempts: u32,
}

/// Bounded retry: run `probe` up to `max_attempts` times, sleeping `interval`
/// between attempts, and return the first `Some`.
///
/// Shared by the element wait, the redirect wait, and the Coordinator's
/// tab-load and registration waits.
pub async fn poll<T, F, Fut>(
    interval: Duration,
    max_attempts: u32,
    mut probe: F,
) -> Result<T, PollTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 1..=max_attempts {
        if let Some(value) = probe().await {
            return Ok(value);
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(PollTimeout {
        attempts: max_attempts,
    })
}

/// Attempt count that covers `timeout` when polling every `interval`.
pub fn attempts_for(timeout: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    let n = timeout.as_millis().div_ceil(interval.as_millis());
    (n as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn returns_first_hit() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let value = poll(Duration::from_millis(500), 10, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            (n == 3).then_some(n)
        })
        .await;
        assert_eq!(value, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let started = tokio::time::Instant::now();
        let value: Result<(), _> = poll(Duration::from_secs(1), 30, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            None
        })
        .await;
        assert_eq!(value, Err(PollTimeout { attempts: 30 }));
        assert_eq!(calls.load(Ordering::SeqCst), 30);
        // no sleep after the final attempt
        assert_eq!(started.elapsed(), Duration::from_secs(29));
    }

    #[test]
    fn attempts_cover_the_timeout() {
        assert_eq!(
            attempts_for(Duration::from_secs(20), Duration::from_millis(500)),
            40
        );
        assert_eq!(
            attempts_for(Duration::from_millis(10), Duration::from_millis(250)),
            1
        );
        assert_eq!(attempts_for(Duration::from_secs(1), Duration::ZERO), 1);
    }
}
