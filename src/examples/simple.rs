//! Simple example of using reqwest-proxy-rotator.

use reqwest_middleware::ClientBuilder;
use reqwest_proxy_rotator::{
    HttpVerifier, PoolConfig, ProxyPool, ProxyPoolMiddleware, UrlSource,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Initializing proxy pool...");

    let config = PoolConfig::builder()
        .max_timeout(Duration::from_secs(5))
        .retry_count(2)
        .build();

    // Free proxy lists, one host:port per line.
    let source = Arc::new(UrlSource::new(vec![
        "https://raw.githubusercontent.com/clarketm/proxy-list/master/proxy-list-raw.txt",
    ]));
    let verifier = Arc::new(HttpVerifier::default());

    let pool = ProxyPool::new(config, verifier);
    let middleware = ProxyPoolMiddleware::with_source(Arc::clone(&pool), source);

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(middleware)
        .build();

    println!("Sending request...");
    let response = client.get("https://httpbin.org/ip").send().await?;

    println!("Status: {}", response.status());
    println!("Response: {}", response.text().await?);
    println!("Pool status: {}", pool.status());

    pool.stop().await;
    Ok(())
}
