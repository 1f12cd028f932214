//! The origin collaborator: where cache misses and pass-through requests go.
//!
//! [`Origin`] is the single outbound seam of the interceptor. Any
//! `Fn(RequestDescriptor) -> impl Future<Output = Result<Response, OriginError>>`
//! closure is an origin, which keeps the interceptor testable against a
//! scripted backend. [`HttpOrigin`] is the real one, built on `reqwest`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::http::{RequestDescriptor, Response};

mod client;

pub use client::HttpOrigin;

/// Failures reaching or talking to the origin. Every variant is a network
/// failure from the interceptor's point of view.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("invalid origin URL `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported URL scheme `{scheme}` (only http and https are supported)")]
    UnsupportedScheme { scheme: String },

    #[error("method `{method}` cannot be sent upstream")]
    InvalidMethod { method: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("origin request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("origin response exceeds {max_bytes} bytes")]
    TooLarge { max_bytes: usize },

    #[error("origin did not answer within {0:?}")]
    Timeout(Duration),

    #[error("origin unreachable: {reason}")]
    Unreachable { reason: String },
}

/// Boxed future returned by [`Origin::forward`].
pub type OriginFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Response, OriginError>> + Send + 'a>>;

/// An asynchronous `forward(descriptor) -> response | failure` function.
///
/// Dropping the returned future must abandon the call; the interceptor relies
/// on this to propagate cancellation of the inbound request.
///
/// # Examples
///
/// ```
/// use shelfcache::http::{RequestDescriptor, Response, StatusCode};
/// use shelfcache::origin::{Origin, OriginError};
///
/// let origin = |req: RequestDescriptor| async move {
///     Ok::<_, OriginError>(Response::new(StatusCode::OK).body(req.url().to_owned()))
/// };
/// # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// let response = rt.block_on(origin.forward(RequestDescriptor::get("/products"))).unwrap();
/// assert_eq!(response.body_bytes().as_ref(), b"/products");
/// ```
pub trait Origin: Send + Sync + 'static {
    fn forward(&self, request: RequestDescriptor) -> OriginFuture<'_>;
}

impl<T, F> Origin for T
where
    T: Fn(RequestDescriptor) -> F + Send + Sync + 'static,
    F: Future<Output = Result<Response, OriginError>> + Send + 'static,
{
    fn forward(&self, request: RequestDescriptor) -> OriginFuture<'_> {
        Box::pin((self)(request))
    }
}
