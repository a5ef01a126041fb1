//! Background workers: verification and reaping.
//!
//! Both loops are spawned lazily by the pool and exit at their next poll
//! boundary once the shutdown signal flips. A probe failure is always scoped
//! to its endpoint; neither loop ever dies because of one.

use crate::endpoint::SharedEndpoint;
use crate::pool::ProxyPool;
use crate::verify::VerifyError;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Continuously pulls batches of inactive endpoints and verifies them with
/// bounded fan-out, then files each one back by its resulting state.
pub(crate) async fn checking_loop(pool: Arc<ProxyPool>, mut shutdown: watch::Receiver<bool>) {
    debug!("Checking worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let batch = pool.take_check_batch();
        let had_work = !batch.is_empty();
        if had_work {
            check_batch(&pool, batch).await;
        }
        // Idle when there is nothing to verify, or when the pool already has
        // plenty of active endpoints and verification can afford to lag.
        if !had_work || pool.active_len() >= pool.config.active_soft_cap {
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(pool.config.check_idle_sleep) => {}
            }
        }
    }
    debug!("Checking worker stopped");
}

async fn check_batch(pool: &Arc<ProxyPool>, batch: Vec<SharedEndpoint>) {
    let size = batch.len();
    let checked: Vec<SharedEndpoint> = stream::iter(batch)
        .map(|endpoint| {
            let pool = Arc::clone(pool);
            async move {
                verify_endpoint(&pool, &endpoint, pool.config.max_timeout).await;
                endpoint
            }
        })
        .buffer_unordered(pool.config.check_concurrency)
        .collect()
        .await;
    pool.reinsert_batch(checked);
    debug!("Checked batch of {} endpoints, pool now {}", size, pool.status());
}

/// Probe one endpoint and apply the outcome to its counters. Works on a
/// snapshot so no endpoint lock is held across the network exchange.
async fn verify_endpoint(pool: &ProxyPool, endpoint: &SharedEndpoint, timeout: Duration) {
    let snapshot = endpoint.lock().clone();
    let url = snapshot.proxy_url();

    let verified = pool.verifier.check(&snapshot, timeout).await;
    match verified {
        Ok(latency) => {
            let anonymous = match &pool.anonymity {
                Some(probe) => probe.is_anonymous(&snapshot, timeout).await,
                None => Ok(true),
            };
            let now = pool.clock.now();
            match anonymous {
                Ok(true) => {
                    debug!("Proxy {} verified in {:?}", url, latency);
                    let mut ep = endpoint.lock();
                    ep.record_latency(latency);
                    ep.report_success();
                    ep.last_checked = Some(now);
                }
                Ok(false) => {
                    warn!("Proxy {} leaks the client address, removing", url);
                    let mut ep = endpoint.lock();
                    ep.mark_for_removal();
                    ep.last_checked = Some(now);
                }
                Err(err) => {
                    debug!("Anonymity probe failed for {}: {}", url, err);
                    fail_endpoint(pool, endpoint);
                }
            }
        }
        Err(VerifyError::Other(err)) => {
            // Unexpected errors are surfaced but still count as a failure.
            warn!("Unexpected error verifying {}: {:#}", url, err);
            fail_endpoint(pool, endpoint);
        }
        Err(err) => {
            debug!("Proxy {} failed verification: {}", url, err);
            fail_endpoint(pool, endpoint);
        }
    }
}

fn fail_endpoint(pool: &ProxyPool, endpoint: &SharedEndpoint) {
    let now = pool.clock.now();
    let mut ep = endpoint.lock();
    ep.report_failure(now);
    ep.last_checked = Some(now);
}

/// Periodically demotes decayed active endpoints and forgets endpoints that
/// are flagged for removal or dead beyond the retention window.
pub(crate) async fn reaping_loop(pool: Arc<ProxyPool>, mut shutdown: watch::Receiver<bool>) {
    debug!("Reaping worker started");
    let mut ticker = tokio::time::interval(pool.config.reap_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let (demoted, deleted) = pool.reap(pool.clock.now());
                if demoted + deleted > 0 {
                    info!(
                        "Reaper demoted {} and deleted {} endpoints, pool now {}",
                        demoted,
                        deleted,
                        pool.status()
                    );
                }
            }
        }
    }
    debug!("Reaping worker stopped");
}
