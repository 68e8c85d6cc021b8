use std::time::Duration;

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each wait.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt + 1`: `base * 2^attempt + jitter`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(fastrand::u64(0..jitter_ms))
        };
        exp.saturating_add(jitter).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with an error `should_retry` rejects,
/// or the policy runs out of retries. Returns the value and the number of
/// retries it took.
pub fn with_retry<T, E>(
    policy: &RetryPolicy,
    should_retry: impl Fn(&E) -> bool,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<(T, u32), E>
where
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok((value, attempt)),
            Err(err) => {
                if attempt >= policy.max_retries || !should_retry(&err) {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    error = %err,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
