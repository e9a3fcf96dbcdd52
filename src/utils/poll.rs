use std::future::Future;
use std::time::Duration;

use crate::{KaleidoError, Result};

/// Bounded wait-then-recheck policy for asynchronous vendor jobs. Exhausting
/// the budget surfaces as an upstream error rather than looping forever.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(120),
        }
    }
}

impl PollPolicy {
    /// Re-invokes `poll` at the configured interval until it yields a
    /// terminal value (`Ok(Some(_))`) or fails. `what` names the job in the
    /// timeout message.
    pub async fn wait_for<T, F, Fut>(&self, what: &str, mut poll: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let deadline = tokio::time::Instant::now() + self.max_wait;
        loop {
            if let Some(value) = poll().await? {
                return Ok(value);
            }
            if tokio::time::Instant::now() + self.interval > deadline {
                return Err(KaleidoError::Upstream(format!(
                    "timed out after {:?} waiting for {what}",
                    self.max_wait
                )));
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn resolves_once_poll_is_terminal() -> Result<()> {
        let policy = PollPolicy::default();
        let mut remaining = 3u32;
        let value = policy
            .wait_for("test job", || {
                let done = remaining == 0;
                remaining = remaining.saturating_sub(1);
                async move { Ok(done.then_some(42)) }
            })
            .await?;
        assert_eq!(value, 42);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_is_an_upstream_error() {
        let policy = PollPolicy {
            interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(5),
        };
        let err = policy
            .wait_for("stuck job", || async { Ok(None::<u32>) })
            .await
            .expect_err("should time out");
        match err {
            KaleidoError::Upstream(message) => {
                assert!(message.contains("stuck job"), "message: {message}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_propagate_immediately() {
        let policy = PollPolicy::default();
        let err = policy
            .wait_for("failing job", || async {
                Err::<Option<u32>, _>(KaleidoError::Upstream("vendor says no".to_string()))
            })
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("vendor says no"));
    }
}
