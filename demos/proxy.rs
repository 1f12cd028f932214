//! Runs shelfcache as a caching reverse proxy in front of the recommendation backend.
//!
//! ```text
//! cargo run --example proxy                     # defaults
//! cargo run --example proxy -- shelfcache.json  # config file
//! SHELFCACHE_VERSION=v2 cargo run --example proxy
//! ```

use std::sync::Arc;

use shelfcache::{
    HttpOrigin, Interceptor, LifecycleManager, MemoryStore, PolicyMatcher, ProxyConfig, Server,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("shelfcache=debug,info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ProxyConfig::from_path(path)?,
        None => ProxyConfig::default(),
    }
    .with_env_overrides()?;

    let manager = Arc::new(LifecycleManager::new(
        Arc::new(MemoryStore::new()),
        config.namespace_prefix.clone(),
    ));
    if let Err(e) = manager.on_init(&config.version) {
        tracing::warn!(error = %e, "starting without an active namespace");
    }
    let retry = manager.spawn_retry(config.swap_retry());

    let origin = HttpOrigin::new(&config.origin)?;
    let matcher = PolicyMatcher::new(config.policy.clone());
    let interceptor = Interceptor::from_lifecycle(&manager, matcher, origin)
        .with_origin_timeout(config.origin_timeout())
        .with_offline(config.offline.clone());

    let server = Server::bind(&config.listen).await?;
    tracing::info!(
        listen = %server.local_addr(),
        origin = %config.origin,
        version = %config.version,
        "proxy ready"
    );

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    server.serve_until(Arc::new(interceptor), shutdown).await?;
    retry.abort();
    Ok(())
}
