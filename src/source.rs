//! Candidate proxy sources.
//!
//! A source produces (host, port) candidates, typically by downloading a
//! public proxy list. The refresher task feeds them into the pool on a fixed
//! period so the pool keeps receiving fresh candidates as old ones die off.

use crate::pool::ProxyPool;

use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// A proxy candidate as produced by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub host: String,
    pub port: u16,
    /// Optional seed latency, when the source publishes one.
    pub latency: Option<Duration>,
}

/// Why a source could not be fetched at all. Malformed individual lines are
/// skipped with a warning instead.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to fetch proxy list: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to read proxy list: {0}")]
    Io(#[from] std::io::Error),
}

/// A candidate line that does not describe a valid (host, port) pair.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseCandidateError {
    #[error("missing ':' separator in {0:?}")]
    MissingPort(String),
    #[error("port out of range in {0:?}")]
    InvalidPort(String),
    #[error("empty host in {0:?}")]
    EmptyHost(String),
}

impl Candidate {
    /// Parse a "host:port" line, tolerating an "http://" prefix.
    pub fn parse(line: &str) -> Result<Self, ParseCandidateError> {
        let trimmed = line.trim();
        let trimmed = trimmed.strip_prefix("http://").unwrap_or(trimmed);
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| ParseCandidateError::MissingPort(line.to_string()))?;
        if host.is_empty() {
            return Err(ParseCandidateError::EmptyHost(line.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| ParseCandidateError::InvalidPort(line.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
            latency: None,
        })
    }
}

/// Producer of proxy candidates.
#[async_trait]
pub trait ProxySource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Candidate>, SourceError>;
}

/// Default source: fetch plain-text "host:port" lists from URLs or local
/// files. Sources that fail are skipped; the rest still contribute.
pub struct UrlSource {
    sources: Vec<String>,
}

impl UrlSource {
    pub fn new(sources: Vec<impl Into<String>>) -> Self {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ProxySource for UrlSource {
    async fn fetch(&self) -> Result<Vec<Candidate>, SourceError> {
        let mut all = Vec::new();
        for source in &self.sources {
            match fetch_one(source).await {
                Ok(candidates) => {
                    info!("Fetched {} candidates from {}", candidates.len(), source);
                    all.extend(candidates);
                }
                Err(err) => {
                    warn!("Failed to fetch candidates from {}: {}", source, err);
                }
            }
        }
        Ok(all)
    }
}

async fn fetch_one(source: &str) -> Result<Vec<Candidate>, SourceError> {
    let content = if source.starts_with("http") {
        let response = reqwest::Client::new().get(source).send().await?;
        response.text().await?
    } else {
        std::fs::read_to_string(source)?
    };
    Ok(parse_candidate_list(&content))
}

/// Parse a proxy list, one "host:port" per line. Comments and malformed
/// lines are skipped.
pub fn parse_candidate_list(content: &str) -> Vec<Candidate> {
    content
        .lines()
        .filter(|line| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .filter_map(|line| match Candidate::parse(line) {
            Ok(candidate) => Some(candidate),
            Err(err) => {
                warn!("Skipping proxy list line: {}", err);
                None
            }
        })
        .collect()
}

/// Spawn the refresh task: ask `source` for candidates now and on every
/// refresh interval, feeding them into the pool. Exits with the pool's
/// shutdown signal.
pub fn spawn_refresher(pool: Arc<ProxyPool>, source: Arc<dyn ProxySource>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown = pool.subscribe_shutdown();
        loop {
            if *shutdown.borrow() {
                break;
            }
            match source.fetch().await {
                Ok(candidates) => {
                    let count = candidates.len();
                    for candidate in candidates {
                        pool.add(candidate.host, candidate.port, candidate.latency);
                    }
                    info!("Refreshed pool with {} candidates, {}", count, pool.status());
                }
                Err(err) => {
                    warn!("Candidate source failed: {}", err);
                }
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(pool.config.refresh_interval) => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port_lines() {
        let candidate = Candidate::parse("1.2.3.4:8080").unwrap();
        assert_eq!(candidate.host, "1.2.3.4");
        assert_eq!(candidate.port, 8080);
    }

    #[test]
    fn tolerates_scheme_prefix_and_whitespace() {
        let candidate = Candidate::parse("  http://proxy.example:3128  ").unwrap();
        assert_eq!(candidate.host, "proxy.example");
        assert_eq!(candidate.port, 3128);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(
            Candidate::parse("no-port-here"),
            Err(ParseCandidateError::MissingPort(_))
        ));
        assert!(matches!(
            Candidate::parse("1.2.3.4:99999"),
            Err(ParseCandidateError::InvalidPort(_))
        ));
        assert!(matches!(
            Candidate::parse(":8080"),
            Err(ParseCandidateError::EmptyHost(_))
        ));
    }

    #[test]
    fn list_parsing_skips_comments_and_garbage() {
        let content = "# a comment\n1.2.3.4:8080\n\nnot a proxy\n5.6.7.8:1080\n";
        let candidates = parse_candidate_list(content);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].host, "1.2.3.4");
        assert_eq!(candidates[1].port, 1080);
    }
}
