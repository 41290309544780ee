//! Timing and teardown policy shared by orchestrators
use std::time::Duration;

/// Default delay between two probes of a wait
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default bound on a single wait
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Settings threaded into every [`Orchestrator`](crate::Orchestrator).
///
/// ```
/// use lifecycle_runtime::Config;
/// use std::time::Duration;
///
/// let config = Config::default()
///     .poll_interval(Duration::from_millis(250))
///     .skip_teardown(true);
/// assert_eq!(config.timeout, Duration::from_secs(300));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Delay between two probes of a wait
    pub poll_interval: Duration,
    /// Bound on every individual wait
    pub timeout: Duration,
    /// Leave created resources in place when tearing down
    ///
    /// Useful to inspect a failed run. Cleanup actions stay registered.
    pub skip_teardown: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            skip_teardown: false,
        }
    }
}

impl Config {
    /// Sets the delay between two probes
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the bound on every wait
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether teardown is skipped
    #[must_use]
    pub fn skip_teardown(mut self, skip: bool) -> Self {
        self.skip_teardown = skip;
        self
    }
}
