//! Proxy endpoint representation and its derived health state.

use parking_lot::Mutex;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An endpoint handed out by the pool. The pool mutex only guards set
/// membership; the endpoint's own counters live behind this per-endpoint lock.
pub type SharedEndpoint = Arc<Mutex<Endpoint>>;

/// Health state of an endpoint, derived from its counters and the current
/// time. An endpoint is in exactly one state at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Never produced a latency sample; should be checked before use.
    Unknown,
    /// Verified and eligible for selection.
    Active,
    /// Temporarily suspended after a failure; expires on its own.
    Cooldown,
    /// Exceeded the consecutive-failure threshold; held for a retention
    /// window before being forgotten.
    Dead,
    /// Flagged for permanent exclusion (e.g. a leaking proxy).
    Removal,
}

/// A single proxy candidate (host:port) tracked by the pool.
///
/// Identity is `(host, port)` and nothing else; every other field is a
/// mutable attribute of that identity. Equality and hashing reflect this.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// When a verification probe last finished for this endpoint.
    pub last_checked: Option<Instant>,
    /// Consecutive failures since the last success.
    fail_count: u32,
    /// Suspended until this instant, if set. Cleared on inspection once past.
    cooldown_until: Option<Instant>,
    /// Set the first time the failure threshold is observed, cleared on
    /// success. Drives retention-based eviction.
    died_at: Option<Instant>,
    to_be_removed: bool,
    /// Rolling average accumulator, in seconds.
    latency_total: f64,
    latency_samples: u32,
    /// Consecutive failures after which the endpoint is considered dead.
    max_fail_count: u32,
    /// Worst-case response time; recorded as the latency sample of a failure.
    max_timeout: Duration,
    /// How long a failure suspends the endpoint.
    cooldown: Duration,
}

impl Endpoint {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        max_fail_count: u32,
        max_timeout: Duration,
        cooldown: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            last_checked: None,
            fail_count: 0,
            cooldown_until: None,
            died_at: None,
            to_be_removed: false,
            latency_total: 0.0,
            latency_samples: 0,
            max_fail_count,
            max_timeout,
            cooldown,
        }
    }

    /// The proxy URL understood by reqwest, e.g. "http://1.2.3.4:8080".
    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Convert to a reqwest::Proxy routing all traffic through this endpoint.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy, reqwest::Error> {
        reqwest::Proxy::all(self.proxy_url())
    }

    /// Resolve the current state. Takes `now` explicitly so the state machine
    /// stays deterministic under an injected clock.
    ///
    /// Two bookkeeping side effects happen here: the death timestamp is set
    /// the first time the failure threshold is observed, and an expired
    /// cooldown is cleared.
    pub fn state(&mut self, now: Instant) -> EndpointState {
        if self.to_be_removed {
            return EndpointState::Removal;
        }
        if self.fail_count >= self.max_fail_count {
            if self.died_at.is_none() {
                self.died_at = Some(now);
            }
            return EndpointState::Dead;
        }
        if let Some(until) = self.cooldown_until {
            if until > now {
                return EndpointState::Cooldown;
            }
            self.cooldown_until = None;
        }
        if self.latency_samples == 0 {
            return EndpointState::Unknown;
        }
        EndpointState::Active
    }

    /// A request or probe through this endpoint succeeded.
    pub fn report_success(&mut self) {
        self.fail_count = 0;
        self.died_at = None;
    }

    /// A request or probe through this endpoint failed. The failure counts as
    /// a maximally slow response, so repeated offenders sink to the bottom of
    /// the latency ranking, and the endpoint is suspended for the cooldown
    /// period even before it reaches the death threshold.
    pub fn report_failure(&mut self, now: Instant) {
        self.record_latency(self.max_timeout);
        self.fail_count += 1;
        self.cooldown_until = Some(now + self.cooldown);
    }

    /// Append one response-time sample to the rolling average.
    pub fn record_latency(&mut self, sample: Duration) {
        self.latency_total += sample.as_secs_f64();
        self.latency_samples += 1;
    }

    /// Average response time in seconds. 0.0 means no samples yet.
    pub fn average_latency(&self) -> f64 {
        if self.latency_samples == 0 {
            return 0.0;
        }
        self.latency_total / self.latency_samples as f64
    }

    /// Permanently exclude this endpoint. Irreversible.
    pub fn mark_for_removal(&mut self) {
        self.to_be_removed = true;
    }

    /// When this endpoint's current death episode started, if it is dead.
    pub fn died_at(&self) -> Option<Instant> {
        self.died_at
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::new(
            "10.0.0.1",
            3128,
            3,
            Duration::from_secs(8),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn fresh_endpoint_is_unknown() {
        let mut ep = endpoint();
        assert_eq!(ep.state(Instant::now()), EndpointState::Unknown);
    }

    #[test]
    fn becomes_active_after_first_sample() {
        let mut ep = endpoint();
        ep.record_latency(Duration::from_millis(120));
        assert_eq!(ep.state(Instant::now()), EndpointState::Active);
        assert!((ep.average_latency() - 0.120).abs() < 1e-9);
    }

    #[test]
    fn dead_after_max_consecutive_failures() {
        let mut ep = endpoint();
        let now = Instant::now();
        for _ in 0..3 {
            ep.report_failure(now);
        }
        assert_eq!(ep.state(now), EndpointState::Dead);
        assert!(ep.died_at().is_some());
        // A later look at a dead endpoint must not restart the episode.
        let first_death = ep.died_at();
        assert_eq!(ep.state(now + Duration::from_secs(60)), EndpointState::Dead);
        assert_eq!(ep.died_at(), first_death);
    }

    #[test]
    fn success_resets_failures_and_death() {
        let mut ep = endpoint();
        let now = Instant::now();
        for _ in 0..3 {
            ep.report_failure(now);
        }
        assert_eq!(ep.state(now), EndpointState::Dead);
        ep.report_success();
        assert!(ep.died_at().is_none());
        // Still cooling down from the failures, but no longer dead.
        assert_eq!(ep.state(now), EndpointState::Cooldown);
    }

    #[test]
    fn cooldown_expires_with_time() {
        let mut ep = endpoint();
        ep.record_latency(Duration::from_millis(50));
        let now = Instant::now();
        ep.report_failure(now);
        assert_eq!(ep.state(now), EndpointState::Cooldown);
        assert_eq!(
            ep.state(now + Duration::from_secs(30 * 60)),
            EndpointState::Cooldown
        );
        assert_eq!(
            ep.state(now + Duration::from_secs(3601)),
            EndpointState::Active
        );
    }

    #[test]
    fn failure_counts_as_slowest_sample() {
        let mut ep = endpoint();
        ep.record_latency(Duration::from_millis(100));
        let now = Instant::now();
        ep.report_failure(now);
        // (0.1 + 8.0) / 2
        assert!((ep.average_latency() - 4.05).abs() < 1e-9);
    }

    #[test]
    fn removal_is_terminal() {
        let mut ep = endpoint();
        ep.mark_for_removal();
        ep.report_success();
        ep.record_latency(Duration::from_millis(10));
        assert_eq!(ep.state(Instant::now()), EndpointState::Removal);
    }

    #[test]
    fn identity_ignores_mutable_attributes() {
        let mut a = endpoint();
        let b = endpoint();
        a.record_latency(Duration::from_millis(300));
        a.report_failure(Instant::now());
        assert_eq!(a, b);
        let c = Endpoint::new(
            "10.0.0.1",
            3129,
            3,
            Duration::from_secs(8),
            Duration::from_secs(3600),
        );
        assert_ne!(a, c);
    }
}
