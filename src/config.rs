//! Configuration for the proxy pool.

use std::time::Duration;

/// Configuration for the proxy pool and its background workers.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Consecutive failures after which an endpoint is considered dead.
    pub max_fail_count: u32,
    /// Worst-case response time; used as the verification timeout and as the
    /// latency sample recorded for a failure.
    pub max_timeout: Duration,
    /// How long a single failure suspends an endpoint.
    pub cooldown: Duration,
    /// How long a dead endpoint is kept before being forgotten.
    pub dead_retention: Duration,
    /// How many inactive endpoints the checking worker verifies per batch.
    pub check_batch_size: usize,
    /// Upper bound on concurrent verification probes within a batch.
    pub check_concurrency: usize,
    /// Once this many endpoints are active, the checking worker idles
    /// between batches instead of verifying at full speed.
    pub active_soft_cap: usize,
    /// How long the checking worker sleeps when there is nothing to verify.
    pub check_idle_sleep: Duration,
    /// How often `select_best` re-polls while no endpoint is active.
    pub select_poll_interval: Duration,
    /// Period of the reaping worker.
    pub reap_interval: Duration,
    /// How often the candidate source is asked for fresh proxies.
    pub refresh_interval: Duration,
    /// Number of times the middleware retries a request with another proxy.
    pub retry_count: usize,
}

impl PoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfigBuilder::new().build()
    }
}

/// Builder for `PoolConfig`.
pub struct PoolConfigBuilder {
    max_fail_count: Option<u32>,
    max_timeout: Option<Duration>,
    cooldown: Option<Duration>,
    dead_retention: Option<Duration>,
    check_batch_size: Option<usize>,
    check_concurrency: Option<usize>,
    active_soft_cap: Option<usize>,
    check_idle_sleep: Option<Duration>,
    select_poll_interval: Option<Duration>,
    reap_interval: Option<Duration>,
    refresh_interval: Option<Duration>,
    retry_count: Option<usize>,
}

impl PoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            max_fail_count: None,
            max_timeout: None,
            cooldown: None,
            dead_retention: None,
            check_batch_size: None,
            check_concurrency: None,
            active_soft_cap: None,
            check_idle_sleep: None,
            select_poll_interval: None,
            reap_interval: None,
            refresh_interval: None,
            retry_count: None,
        }
    }

    /// Set the consecutive-failure threshold for declaring an endpoint dead.
    pub fn max_fail_count(mut self, count: u32) -> Self {
        self.max_fail_count = Some(count);
        self
    }

    /// Set the worst-case response time / verification timeout.
    pub fn max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = Some(timeout);
        self
    }

    /// Set how long a failure suspends an endpoint.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Set how long dead endpoints are retained before deletion.
    pub fn dead_retention(mut self, retention: Duration) -> Self {
        self.dead_retention = Some(retention);
        self
    }

    /// Set the checking worker's batch size.
    pub fn check_batch_size(mut self, size: usize) -> Self {
        self.check_batch_size = Some(size);
        self
    }

    /// Set the bound on concurrent verification probes.
    pub fn check_concurrency(mut self, concurrency: usize) -> Self {
        self.check_concurrency = Some(concurrency);
        self
    }

    /// Set the active-set size beyond which checking slows down.
    pub fn active_soft_cap(mut self, cap: usize) -> Self {
        self.active_soft_cap = Some(cap);
        self
    }

    /// Set the checking worker's idle sleep.
    pub fn check_idle_sleep(mut self, sleep: Duration) -> Self {
        self.check_idle_sleep = Some(sleep);
        self
    }

    /// Set the polling interval of `select_best` while no endpoint is active.
    pub fn select_poll_interval(mut self, interval: Duration) -> Self {
        self.select_poll_interval = Some(interval);
        self
    }

    /// Set the period of the reaping worker.
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = Some(interval);
        self
    }

    /// Set how often the candidate source is polled for fresh proxies.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Set the number of times to retry a request with different proxies.
    pub fn retry_count(mut self, count: usize) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PoolConfig {
        PoolConfig {
            max_fail_count: self.max_fail_count.unwrap_or(3),
            max_timeout: self.max_timeout.unwrap_or(Duration::from_secs(8)),
            cooldown: self.cooldown.unwrap_or(Duration::from_secs(60 * 60)),
            dead_retention: self
                .dead_retention
                .unwrap_or(Duration::from_secs(12 * 60 * 60)),
            check_batch_size: self.check_batch_size.unwrap_or(30),
            check_concurrency: self.check_concurrency.unwrap_or(15),
            active_soft_cap: self.active_soft_cap.unwrap_or(100),
            check_idle_sleep: self.check_idle_sleep.unwrap_or(Duration::from_secs(5)),
            select_poll_interval: self
                .select_poll_interval
                .unwrap_or(Duration::from_secs(2)),
            reap_interval: self.reap_interval.unwrap_or(Duration::from_secs(60)),
            refresh_interval: self
                .refresh_interval
                .unwrap_or(Duration::from_secs(20 * 60)),
            retry_count: self.retry_count.unwrap_or(3),
        }
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
