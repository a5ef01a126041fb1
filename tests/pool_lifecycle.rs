//! End-to-end tests driving the pool through its real background workers.
//!
//! Intervals are shrunk so the workers make progress in milliseconds; the
//! time-arithmetic cases (cooldown, retention) live in the unit tests with a
//! manual clock.

use async_trait::async_trait;
use reqwest_proxy_rotator::{
    AnonymityProbe, Endpoint, PoolConfig, ProxyPool, Verifier, VerifyError,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

struct AlwaysOk(Duration);

#[async_trait]
impl Verifier for AlwaysOk {
    async fn check(&self, _endpoint: &Endpoint, _timeout: Duration) -> Result<Duration, VerifyError> {
        Ok(self.0)
    }
}

struct AlwaysErr;

#[async_trait]
impl Verifier for AlwaysErr {
    async fn check(&self, _endpoint: &Endpoint, _timeout: Duration) -> Result<Duration, VerifyError> {
        Err(VerifyError::Other(anyhow::anyhow!("probe blew up")))
    }
}

struct NeverAnonymous;

#[async_trait]
impl AnonymityProbe for NeverAnonymous {
    async fn is_anonymous(
        &self,
        _endpoint: &Endpoint,
        _timeout: Duration,
    ) -> Result<bool, VerifyError> {
        Ok(false)
    }
}

fn fast_config() -> PoolConfig {
    PoolConfig::builder()
        .check_idle_sleep(Duration::from_millis(10))
        .select_poll_interval(Duration::from_millis(10))
        .reap_interval(Duration::from_millis(20))
        .build()
}

/// Wait until `predicate` holds or five seconds pass.
async fn wait_for(pool: &Arc<ProxyPool>, predicate: impl Fn(&ProxyPool) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if predicate(pool.as_ref()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn seeded_endpoint_becomes_active_and_selectable() {
    let pool = ProxyPool::new(fast_config(), Arc::new(AlwaysOk(Duration::from_millis(100))));
    pool.add("1.2.3.4", 8080, None);

    let endpoint = timeout(Duration::from_secs(5), pool.select_best())
        .await
        .expect("checking worker should promote the endpoint well within 5s")
        .expect("pool is not stopped");

    {
        let ep = endpoint.lock();
        assert_eq!(ep.host, "1.2.3.4");
        assert_eq!(ep.port, 8080);
        assert!((ep.average_latency() - 0.1).abs() < 1e-9);
    }
    assert_eq!(pool.status().active, 1);

    pool.stop().await;
    assert!(pool.select_best().await.is_err());
}

// The checking worker verifies instant test probes without ever yielding, so
// these tests need a second runtime thread to keep the reaper and the test
// body running (spec §4.3: the worker only sleeps when idle or capped).
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn leaking_proxy_is_removed_for_good() {
    let pool = ProxyPool::new_with(
        fast_config(),
        Arc::new(AlwaysOk(Duration::from_millis(50))),
        Some(Arc::new(NeverAnonymous)),
        Arc::new(reqwest_proxy_rotator::SystemClock),
    );
    pool.add("9.9.9.9", 1080, None);
    pool.ensure_workers();

    // Checking flags it for removal, the reaper then deletes it.
    assert!(
        wait_for(&pool, |p| p.status().total() == 0).await,
        "leaking endpoint should be verified, flagged and reaped"
    );
    pool.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn verifier_errors_never_kill_the_worker() {
    let pool = ProxyPool::new(fast_config(), Arc::new(AlwaysErr));
    pool.add("10.0.0.1", 3128, None);
    pool.ensure_workers();

    // The first endpoint fails its probe and lands in cooldown.
    assert!(
        wait_for(&pool, |p| p.status().cooldown + p.status().dead >= 1).await,
        "failed endpoint should be cooling down"
    );

    // The worker is still making progress: a later candidate gets probed too.
    pool.add("10.0.0.2", 3128, None);
    assert!(
        wait_for(&pool, |p| {
            let status = p.status();
            status.unknown == 0 && status.total() == 2
        })
        .await,
        "worker should keep verifying after probe errors"
    );
    pool.stop().await;
}

#[tokio::test]
async fn selection_prefers_the_fastest_of_many() {
    let pool = ProxyPool::new(fast_config(), Arc::new(AlwaysOk(Duration::from_millis(10))));
    // Seeded latencies are replaced by verified samples, so all three end up
    // near 10ms; the ranking is still recomputed live and must return an
    // Active endpoint.
    pool.add("a.example", 80, Some(Duration::from_millis(500)));
    pool.add("b.example", 80, Some(Duration::from_millis(50)));
    pool.add("c.example", 80, Some(Duration::from_millis(5)));

    let endpoint = timeout(Duration::from_secs(5), pool.select_best())
        .await
        .expect("selection should not block once endpoints are active")
        .expect("pool is not stopped");

    let best = endpoint.lock().average_latency();
    let status = pool.status();
    assert!(status.active >= 1);
    // The winner's average can never exceed any other active endpoint's.
    assert!(best <= 0.505, "best average was {}", best);
    pool.stop().await;
}
