//! Core proxy pool implementation.
//!
//! The pool keeps every known endpoint in exactly one of two sets: `active`
//! (verified, eligible for selection) and `inactive` (unknown, cooling down
//! or dead). A single mutex guards set membership; the endpoints themselves
//! carry their own small locks, so feedback never contends with selection.

use crate::clock::{Clock, SystemClock};
use crate::config::PoolConfig;
use crate::endpoint::{Endpoint, EndpointState, SharedEndpoint};
use crate::error::PoolStopped;
use crate::verify::{AnonymityProbe, Verifier};
use crate::worker;

use log::{debug, info};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Snapshot of endpoint counts by state. Best-effort: workers may be moving
/// endpoints while it is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    pub unknown: usize,
    pub active: usize,
    pub cooldown: usize,
    pub dead: usize,
    pub removal: usize,
}

impl PoolStatus {
    pub fn total(&self) -> usize {
        self.unknown + self.active + self.cooldown + self.dead + self.removal
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "active: {}, unknown: {}, cooldown: {}, dead: {}, removal: {} ({} total)",
            self.active,
            self.unknown,
            self.cooldown,
            self.dead,
            self.removal,
            self.total()
        )
    }
}

struct Sets {
    active: Vec<SharedEndpoint>,
    inactive: Vec<SharedEndpoint>,
    /// Identities currently popped out by the checking worker. They belong
    /// to neither set until the batch settles, but they are still known, so
    /// `add` must dedup against them too.
    in_flight: HashSet<(String, u16)>,
}

#[derive(Default)]
struct Workers {
    checking: Option<JoinHandle<()>>,
    reaping: Option<JoinHandle<()>>,
}

/// A self-healing pool of proxy endpoints.
pub struct ProxyPool {
    sets: Mutex<Sets>,
    /// Configuration for the pool.
    pub config: PoolConfig,
    pub(crate) verifier: Arc<dyn Verifier>,
    pub(crate) anonymity: Option<Arc<dyn AnonymityProbe>>,
    pub(crate) clock: Arc<dyn Clock>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Workers>,
}

impl ProxyPool {
    /// Create a new pool using the system clock and no anonymity probe.
    /// Workers start lazily on the first `select_best` call.
    pub fn new(config: PoolConfig, verifier: Arc<dyn Verifier>) -> Arc<Self> {
        Self::new_with(config, verifier, None, Arc::new(SystemClock))
    }

    /// Create a new pool with every collaborator supplied explicitly.
    pub fn new_with(
        config: PoolConfig,
        verifier: Arc<dyn Verifier>,
        anonymity: Option<Arc<dyn AnonymityProbe>>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            sets: Mutex::new(Sets {
                active: Vec::new(),
                inactive: Vec::new(),
                in_flight: HashSet::new(),
            }),
            config,
            verifier,
            anonymity,
            clock,
            shutdown,
            workers: Mutex::new(Workers::default()),
        })
    }

    /// Add a candidate endpoint to the pool. A no-op if an endpoint with the
    /// same (host, port) identity is already known, in either set. New
    /// endpoints enter the inactive set and wait for verification; a nonzero
    /// seed latency gives them one sample to start from.
    pub fn add(&self, host: impl Into<String>, port: u16, seed_latency: Option<Duration>) {
        let host = host.into();
        let mut sets = self.sets.lock();
        let known = sets
            .active
            .iter()
            .chain(sets.inactive.iter())
            .any(|ep| {
                let ep = ep.lock();
                ep.host == host && ep.port == port
            })
            || sets
                .in_flight
                .iter()
                .any(|(h, p)| *h == host && *p == port);
        if known {
            return;
        }
        let mut endpoint = Endpoint::new(
            host,
            port,
            self.config.max_fail_count,
            self.config.max_timeout,
            self.config.cooldown,
        );
        if let Some(latency) = seed_latency {
            if !latency.is_zero() {
                endpoint.record_latency(latency);
            }
        }
        debug!("Added proxy candidate {}", endpoint.proxy_url());
        sets.inactive.push(Arc::new(Mutex::new(endpoint)));
    }

    /// Return the active endpoint with the lowest average latency.
    ///
    /// While nothing is active this sleeps and re-polls; the pool mutex is
    /// never held across the wait. Also lazily (re)starts the background
    /// workers, so the pool heals itself if one of them died. Fails only
    /// once the pool has been stopped.
    pub async fn select_best(self: &Arc<Self>) -> Result<SharedEndpoint, PoolStopped> {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                return Err(PoolStopped);
            }
            self.ensure_workers();
            if let Some(endpoint) = self.best_active() {
                return Ok(endpoint);
            }
            debug!("No active proxy available, waiting");
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(self.config.select_poll_interval) => {}
            }
        }
    }

    /// Feedback from a real request made through `endpoint`. A failure puts
    /// the endpoint into cooldown and counts it as a maximally slow response,
    /// so the reaping worker will pull it out of rotation on its next pass.
    pub fn report_outcome(&self, endpoint: &SharedEndpoint, success: bool) {
        let mut ep = endpoint.lock();
        if success {
            ep.report_success();
        } else {
            ep.report_failure(self.clock.now());
        }
    }

    /// Count endpoints by state, across both sets.
    pub fn status(&self) -> PoolStatus {
        let now = self.clock.now();
        let mut status = PoolStatus::default();
        let sets = self.sets.lock();
        for ep in sets.active.iter().chain(sets.inactive.iter()) {
            match ep.lock().state(now) {
                EndpointState::Unknown => status.unknown += 1,
                EndpointState::Active => status.active += 1,
                EndpointState::Cooldown => status.cooldown += 1,
                EndpointState::Dead => status.dead += 1,
                EndpointState::Removal => status.removal += 1,
            }
        }
        status
    }

    /// Stop the pool permanently. Both background workers observe the signal
    /// at their next poll boundary; this waits for them to exit. Afterwards
    /// `select_best` fails with `PoolStopped` and workers never restart.
    pub async fn stop(&self) {
        // send() fails without receivers; send_replace latches the flag even
        // when no worker ever started.
        self.shutdown.send_replace(true);
        let (checking, reaping) = {
            let mut workers = self.workers.lock();
            (workers.checking.take(), workers.reaping.take())
        };
        if let Some(handle) = checking {
            let _ = handle.await;
        }
        if let Some(handle) = reaping {
            let _ = handle.await;
        }
        info!("Proxy pool stopped");
    }

    /// Spawn any background worker that is not currently running. Idempotent;
    /// a no-op once the pool is stopped.
    pub fn ensure_workers(self: &Arc<Self>) {
        if *self.shutdown.borrow() {
            return;
        }
        let mut workers = self.workers.lock();
        if workers.checking.as_ref().map_or(true, JoinHandle::is_finished) {
            debug!("Starting checking worker");
            let pool = Arc::clone(self);
            let shutdown = self.shutdown.subscribe();
            workers.checking = Some(tokio::spawn(worker::checking_loop(pool, shutdown)));
        }
        if workers.reaping.as_ref().map_or(true, JoinHandle::is_finished) {
            debug!("Starting reaping worker");
            let pool = Arc::clone(self);
            let shutdown = self.shutdown.subscribe();
            workers.reaping = Some(tokio::spawn(worker::reaping_loop(pool, shutdown)));
        }
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn best_active(&self) -> Option<SharedEndpoint> {
        let now = self.clock.now();
        let sets = self.sets.lock();
        let mut ranked: Vec<(f64, &SharedEndpoint)> = Vec::with_capacity(sets.active.len());
        for ep in &sets.active {
            let mut guard = ep.lock();
            if guard.state(now) == EndpointState::Active {
                ranked.push((guard.average_latency(), ep));
            }
        }
        ranked
            .into_iter()
            .min_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
            .map(|(_, ep)| Arc::clone(ep))
    }

    /// Pop up to a batch worth of inactive endpoints for verification. The
    /// popped endpoints are owned by the checking worker until it reinserts
    /// them with `reinsert_batch`.
    pub(crate) fn take_check_batch(&self) -> Vec<SharedEndpoint> {
        let mut sets = self.sets.lock();
        let n = sets.inactive.len().min(self.config.check_batch_size);
        let batch: Vec<SharedEndpoint> = sets.inactive.drain(..n).collect();
        for ep in &batch {
            let ep = ep.lock();
            sets.in_flight.insert((ep.host.clone(), ep.port));
        }
        batch
    }

    /// Put a verified batch back, each endpoint into the set matching its
    /// current derived state. Keeps the active set ordered by latency.
    pub(crate) fn reinsert_batch(&self, batch: Vec<SharedEndpoint>) {
        let now = self.clock.now();
        let mut sets = self.sets.lock();
        for endpoint in batch {
            let is_active = {
                let mut ep = endpoint.lock();
                sets.in_flight.remove(&(ep.host.clone(), ep.port));
                ep.state(now) == EndpointState::Active
            };
            if is_active {
                sets.active.push(endpoint);
            } else {
                sets.inactive.push(endpoint);
            }
        }
        sets.active.sort_by(|a, b| {
            let a = a.lock().average_latency();
            let b = b.lock().average_latency();
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        });
    }

    pub(crate) fn active_len(&self) -> usize {
        self.sets.lock().active.len()
    }

    /// One reaping pass: demote active endpoints that are no longer Active,
    /// then forget inactive endpoints that are flagged for removal or whose
    /// death episode outlived the retention window. Returns (demoted,
    /// deleted) counts.
    pub(crate) fn reap(&self, now: Instant) -> (usize, usize) {
        let mut sets = self.sets.lock();
        let mut demoted = Vec::new();
        sets.active.retain(|ep| {
            if ep.lock().state(now) == EndpointState::Active {
                true
            } else {
                demoted.push(Arc::clone(ep));
                false
            }
        });
        let demoted_count = demoted.len();
        sets.inactive.extend(demoted);

        let retention = self.config.dead_retention;
        let before = sets.inactive.len();
        sets.inactive.retain(|ep| {
            let mut guard = ep.lock();
            match guard.state(now) {
                EndpointState::Removal => false,
                EndpointState::Dead => guard
                    .died_at()
                    .map_or(true, |died| now.duration_since(died) < retention),
                _ => true,
            }
        });
        (demoted_count, before - sets.inactive.len())
    }

    #[cfg(test)]
    pub(crate) fn set_lens(&self) -> (usize, usize) {
        let sets = self.sets.lock();
        (sets.active.len(), sets.inactive.len())
    }
}
