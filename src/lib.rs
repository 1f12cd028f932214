//! # shelfcache
//!
//! An intercepting cache-aside proxy for catalog and recommendation traffic.
//!
//! Every outbound request passes through an [`Interceptor`], which either
//! serves it from a versioned cache namespace, forwards it to the origin and
//! stores the result, or answers with a degraded offline response when the
//! origin cannot be reached.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shelfcache::{HttpOrigin, Interceptor, LifecycleManager, MemoryStore, PolicyMatcher, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = LifecycleManager::new(Arc::new(MemoryStore::new()), "ai-recommendation-cache");
//!     manager.on_init("v1")?;
//!
//!     let origin = HttpOrigin::new("http://127.0.0.1:8000")?;
//!     let interceptor = Interceptor::from_lifecycle(&manager, PolicyMatcher::default(), origin);
//!
//!     Server::bind("127.0.0.1:8080").await?.serve(Arc::new(interceptor)).await?;
//!     Ok(())
//! }
//! ```

// ── Wire types ────────────────────────────────────────────────────────────────
pub mod http;

// ── Cache core ────────────────────────────────────────────────────────────────
pub mod interceptor;
pub mod lifecycle;
pub mod policy;
pub mod store;

// ── Host surfaces ─────────────────────────────────────────────────────────────
pub mod config;
pub mod origin;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{ConfigError, ProxyConfig};
pub use http::{Headers, Method, RequestDescriptor, Response, StatusCode};
pub use interceptor::{CacheOutcome, Interceptor, OfflineConfig};
pub use lifecycle::{ActiveNamespace, LifecycleError, LifecycleManager, LifecycleState};
pub use origin::{HttpOrigin, Origin, OriginError};
pub use policy::{Decision, PolicyMatcher, PolicyRules};
pub use server::{Server, ServerError};
pub use store::{CacheEntry, CacheStore, MemoryStore, NamespaceHandle, StoreError};
