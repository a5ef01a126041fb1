//! Verification probes: liveliness and anonymity.
//!
//! Both probes are injected into the pool as trait objects so callers can
//! substitute their own checks; the reqwest-based defaults here mirror what
//! most users want.

use crate::endpoint::Endpoint;

use async_trait::async_trait;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a verification probe did not produce a usable result.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Transport-level failure: timeout, connection reset, proxy error,
    /// too many redirects. Treated exactly like a failed verification.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    /// The exchange completed but the response was not acceptable.
    #[error("unusable response: {0}")]
    BadResponse(String),
    /// Anything else. Logged at warn by the checking worker and still
    /// counted as a failure; never kills the worker loop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Probe that tests whether an endpoint relays traffic at all.
///
/// Returns the observed round-trip latency on success. Transport failures
/// must surface as `Err`, not as a slow success.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn check(&self, endpoint: &Endpoint, timeout: Duration) -> Result<Duration, VerifyError>;
}

/// Secondary probe run after a successful liveliness check: does the proxy
/// hide the caller? `Ok(false)` means the proxy leaks and must be removed
/// from the pool permanently.
#[async_trait]
pub trait AnonymityProbe: Send + Sync {
    async fn is_anonymous(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<bool, VerifyError>;
}

/// Default liveliness probe: issue a GET through the proxy and time it.
pub struct HttpVerifier {
    check_url: String,
}

impl HttpVerifier {
    pub fn new(check_url: impl Into<String>) -> Self {
        Self {
            check_url: check_url.into(),
        }
    }
}

impl Default for HttpVerifier {
    fn default() -> Self {
        Self::new("http://icanhazip.com/")
    }
}

#[async_trait]
impl Verifier for HttpVerifier {
    async fn check(&self, endpoint: &Endpoint, timeout: Duration) -> Result<Duration, VerifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .proxy(endpoint.to_reqwest_proxy()?)
            .build()?;

        let started = Instant::now();
        let response = client.get(&self.check_url).send().await?;
        if !response.status().is_success() {
            return Err(VerifyError::BadResponse(format!(
                "status {}",
                response.status()
            )));
        }
        Ok(started.elapsed())
    }
}

/// Default anonymity probe: fetch an IP-echo URL through the proxy and make
/// sure our real address does not show up in the response body.
pub struct EchoAnonymityProbe {
    echo_url: String,
    real_ip: String,
}

impl EchoAnonymityProbe {
    pub fn new(echo_url: impl Into<String>, real_ip: impl Into<String>) -> Self {
        Self {
            echo_url: echo_url.into(),
            real_ip: real_ip.into(),
        }
    }
}

#[async_trait]
impl AnonymityProbe for EchoAnonymityProbe {
    async fn is_anonymous(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<bool, VerifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .proxy(endpoint.to_reqwest_proxy()?)
            .build()?;

        let response = client.get(&self.echo_url).send().await?;
        if !response.status().is_success() {
            return Err(VerifyError::BadResponse(format!(
                "status {}",
                response.status()
            )));
        }
        let body = response.text().await?;
        Ok(!body.contains(&self.real_ip))
    }
}
