//! # reqwest-proxy-rotator
//!
//! A self-healing rotating proxy pool middleware for reqwest.
//!
//! The pool keeps a live collection of proxy candidates, continuously
//! verifies their health in the background, and hands out the lowest-latency
//! verified proxy for each request. Feedback from real requests and a
//! periodic reaper keep dead and leaking proxies out of rotation.

pub mod clock;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod middleware;
pub mod pool;
pub mod source;
pub mod verify;
mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PoolConfig, PoolConfigBuilder};
pub use endpoint::{Endpoint, EndpointState, SharedEndpoint};
pub use error::PoolStopped;
pub use middleware::ProxyPoolMiddleware;
pub use pool::{PoolStatus, ProxyPool};
pub use source::{Candidate, ParseCandidateError, ProxySource, SourceError, UrlSource};
pub use verify::{AnonymityProbe, EchoAnonymityProbe, HttpVerifier, Verifier, VerifyError};
