//! Middleware implementation for reqwest.
//!
//! The facade over the pool: pick the best proxy, send the request through
//! it, feed the outcome back, and retry with another proxy on failure.

use crate::pool::ProxyPool;
use crate::source::{spawn_refresher, ProxySource};

use anyhow::anyhow;
use async_trait::async_trait;
use log::{info, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::Arc;

/// Middleware that routes every request through the pool's current best
/// proxy, with automatic retries on other proxies.
#[derive(Clone)]
pub struct ProxyPoolMiddleware {
    /// The proxy pool.
    pool: Arc<ProxyPool>,
}

impl ProxyPoolMiddleware {
    /// Wrap an existing pool. The pool's candidates are whatever the caller
    /// feeds it via `add`.
    pub fn new(pool: Arc<ProxyPool>) -> Self {
        Self { pool }
    }

    /// Wrap a pool and keep it fed from a candidate source. The refresh task
    /// runs until the pool is stopped.
    pub fn with_source(pool: Arc<ProxyPool>, source: Arc<dyn ProxySource>) -> Self {
        spawn_refresher(Arc::clone(&pool), source);
        Self { pool }
    }

    /// The underlying pool, for feeding candidates or reading status.
    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }
}

#[async_trait]
impl Middleware for ProxyPoolMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let max_retries = self.pool.config.retry_count;
        let mut attempt = 0;

        loop {
            // Blocks while the pool has nothing active; fails only if the
            // pool was stopped.
            let endpoint = self
                .pool
                .select_best()
                .await
                .map_err(|err| Error::Middleware(anyhow!(err)))?;

            let proxied_request = req.try_clone().ok_or_else(|| {
                Error::Middleware(anyhow!(
                    "Request object is not cloneable. Are you passing a streaming body?"
                ))
            })?;

            let (reqwest_proxy, proxy_url) = {
                let ep = endpoint.lock();
                (ep.to_reqwest_proxy(), ep.proxy_url())
            };
            info!("Using proxy {} (attempt {})", proxy_url, attempt + 1);

            let reqwest_proxy = match reqwest_proxy {
                Ok(proxy) => proxy,
                Err(err) => {
                    warn!("Failed to create proxy from {}: {}", proxy_url, err);
                    self.pool.report_outcome(&endpoint, false);
                    attempt += 1;
                    if attempt > max_retries {
                        return Err(Error::Reqwest(err));
                    }
                    continue;
                }
            };

            let client = match reqwest::Client::builder()
                .proxy(reqwest_proxy)
                .timeout(self.pool.config.max_timeout)
                .build()
            {
                Ok(client) => client,
                Err(err) => {
                    warn!("Failed to build client with proxy {}: {}", proxy_url, err);
                    self.pool.report_outcome(&endpoint, false);
                    attempt += 1;
                    if attempt > max_retries {
                        return Err(Error::Reqwest(err));
                    }
                    continue;
                }
            };

            match client.execute(proxied_request).await {
                Ok(response) => {
                    self.pool.report_outcome(&endpoint, true);
                    return Ok(response);
                }
                Err(err) => {
                    warn!(
                        "Request failed through proxy {} (attempt {}): {}",
                        proxy_url,
                        attempt + 1,
                        err
                    );
                    // The failure puts the endpoint into cooldown, so the
                    // next selection picks a different proxy.
                    self.pool.report_outcome(&endpoint, false);
                    attempt += 1;
                    if attempt > max_retries {
                        return Err(Error::Reqwest(err));
                    }
                }
            }
        }
    }
}
