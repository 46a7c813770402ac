use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

impl<T> WaitOutcome<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::TimedOut | Self::Cancelled => None,
        }
    }
}

/// Polls `check` until it yields a value, the deadline passes, or `cancel` fires.
///
/// The check always runs at least once, even with a zero timeout.
pub async fn wait_until<T, F, Fut>(
    config: PollConfig,
    cancel: &CancellationToken,
    mut check: F,
) -> WaitOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + config.timeout;
    loop {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }
        if let Some(value) = check().await {
            return WaitOutcome::Ready(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        let pause = config.interval.min(deadline - now);
        tokio::select! {
            () = cancel.cancelled() => return WaitOutcome::Cancelled,
            () = tokio::time::sleep(pause) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_ready_after_a_few_checks() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = wait_until(fast(), &CancellationToken::new(), || {
            let calls = Arc::clone(&calls);
            async move {
                let seen = calls.fetch_add(1, Ordering::SeqCst) + 1;
                (seen >= 3).then_some(seen)
            }
        })
        .await;
        assert_eq!(outcome, WaitOutcome::Ready(3));
    }

    #[tokio::test]
    async fn test_times_out() {
        let config = PollConfig {
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(50),
        };
        let outcome: WaitOutcome<()> =
            wait_until(config, &CancellationToken::new(), || async { None }).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let config = PollConfig {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(120),
        };
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let outcome: WaitOutcome<()> = tokio::time::timeout(
            Duration::from_secs(5),
            wait_until(config, &cancel, || async { None }),
        )
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }
}
