use std::time::Duration;

/// Bounded retry: probe, and while the probe comes back empty wait up to
/// `timeout` and probe again, at most `attempts` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    timeout: Duration,
}

impl RetryPolicy {
    /// `attempts` waits of at most `timeout` each.
    pub const fn new(attempts: u32, timeout: Duration) -> Self {
        Self { attempts, timeout }
    }

    /// Maximum number of waits.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Upper bound for a single wait.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Worst-case time spent waiting before giving up.
    pub fn budget(&self) -> Duration {
        self.timeout.saturating_mul(self.attempts)
    }

    /// Run `probe` until it yields a value or the attempts are used up.
    ///
    /// `wait` is called between probes with the per-attempt timeout and is
    /// never called if the first probe succeeds.
    pub fn run<T, P, W>(&self, mut probe: P, mut wait: W) -> Option<T>
    where
        P: FnMut() -> Option<T>,
        W: FnMut(Duration),
    {
        for _ in 0..self.attempts {
            if let Some(v) = probe() {
                return Some(v);
            }
            wait(self.timeout);
        }
        probe()
    }
}

impl Default for RetryPolicy {
    /// Ten waits of 500 ms.
    fn default() -> Self {
        Self::new(10, Duration::from_millis(500))
    }
}
