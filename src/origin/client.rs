//! HTTP origin client built on `reqwest`.

use std::time::Duration;

use bytes::BytesMut;
use tracing::debug;
use url::Url;

use super::{Origin, OriginError, OriginFuture};
use crate::http::{Headers, Method, RequestDescriptor, Response, StatusCode};

/// Largest origin response we will buffer (64 MiB).
const MAX_RESPONSE_SIZE: usize = 64 * 1024 * 1024;

/// How long an idle pooled origin connection is kept.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Forwards requests to an HTTP or HTTPS backend.
///
/// Relative descriptor URLs (`/products`) resolve against `base`; absolute
/// URLs are used as-is. Redirects are relayed to the caller rather than
/// followed, and no system proxy is consulted: the origin is contacted
/// directly.
///
/// # Examples
///
/// ```
/// use shelfcache::origin::HttpOrigin;
///
/// let origin = HttpOrigin::new("http://127.0.0.1:8000").unwrap();
/// assert_eq!(origin.base().as_str(), "http://127.0.0.1:8000/");
/// assert!(HttpOrigin::new("https://example.com").is_ok());
/// assert!(HttpOrigin::new("ftp://example.com").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    base: Url,
    client: reqwest::Client,
}

impl HttpOrigin {
    /// Creates an origin rooted at `base`.
    ///
    /// # Errors
    ///
    /// [`OriginError::InvalidUrl`] if `base` does not parse,
    /// [`OriginError::UnsupportedScheme`] if it is not `http` or `https`, or
    /// [`OriginError::Client`] if the HTTP client cannot be built.
    pub fn new(base: &str) -> Result<Self, OriginError> {
        let base = Url::parse(base).map_err(|source| OriginError::InvalidUrl {
            url: base.to_owned(),
            source,
        })?;
        check_scheme(&base)?;

        let client = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .build()
            .map_err(OriginError::Client)?;

        Ok(Self { base, client })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn resolve(&self, url: &str) -> Result<Url, OriginError> {
        let resolved = self.base.join(url).map_err(|source| OriginError::InvalidUrl {
            url: url.to_owned(),
            source,
        })?;
        check_scheme(&resolved)?;
        Ok(resolved)
    }

    async fn send(&self, request: RequestDescriptor) -> Result<Response, OriginError> {
        let url = self.resolve(request.url())?;
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|_| OriginError::InvalidMethod {
                method: request.method().to_string(),
            })?;

        let mut outbound = self.client.request(method, url.clone());
        for (name, value) in request.headers().iter() {
            if Headers::is_hop_by_hop(name)
                || name.eq_ignore_ascii_case("host")
                || name.eq_ignore_ascii_case("content-length")
            {
                continue;
            }
            outbound = outbound.header(name, value);
        }
        if !request.body_bytes().is_empty()
            || matches!(request.method(), Method::Post | Method::Put | Method::Patch)
        {
            outbound = outbound.body(request.body_bytes().clone());
        }

        debug!(origin = %url, method = %request.method(), "request forwarded");
        let mut upstream = outbound.send().await?;

        if upstream
            .content_length()
            .is_some_and(|len| len > MAX_RESPONSE_SIZE as u64)
        {
            return Err(OriginError::TooLarge {
                max_bytes: MAX_RESPONSE_SIZE,
            });
        }

        let status = StatusCode::from_u16(upstream.status().as_u16());
        let headers: Headers = upstream
            .headers()
            .iter()
            .filter(|(name, _)| !Headers::is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
            .collect();

        let mut body = BytesMut::new();
        while let Some(chunk) = upstream.chunk().await? {
            if body.len() + chunk.len() > MAX_RESPONSE_SIZE {
                return Err(OriginError::TooLarge {
                    max_bytes: MAX_RESPONSE_SIZE,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(
            origin = %url,
            status = status.as_u16(),
            bytes = body.len(),
            "origin responded"
        );
        Ok(Response::from_parts(status, headers, body.freeze()))
    }
}

impl Origin for HttpOrigin {
    fn forward(&self, request: RequestDescriptor) -> OriginFuture<'_> {
        Box::pin(self.send(request))
    }
}

fn check_scheme(url: &Url) -> Result<(), OriginError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(OriginError::UnsupportedScheme {
            scheme: other.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;
    use crate::http::request::RequestError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    // Reads one complete request off `socket`.
    async fn read_request(socket: &mut TcpStream) -> Request {
        let mut buf = BytesMut::new();
        loop {
            match Request::parse(&buf) {
                Ok((request, _)) => return request,
                Err(RequestError::Incomplete) => {
                    assert!(socket.read_buf(&mut buf).await.unwrap() > 0);
                }
                Err(e) => panic!("bad request from client: {e}"),
            }
        }
    }

    // Serves one connection: captures the request, replies with `reply`.
    async fn one_shot_backend(reply: &'static [u8]) -> (String, oneshot::Receiver<Request>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let _ = tx.send(request);
            socket.write_all(reply).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        (format!("http://{addr}"), rx)
    }

    #[test]
    fn resolves_relative_and_absolute() {
        let origin = HttpOrigin::new("http://127.0.0.1:8000").unwrap();
        assert_eq!(
            origin.resolve("/products?page=2").unwrap().as_str(),
            "http://127.0.0.1:8000/products?page=2"
        );
        assert_eq!(
            origin.resolve("https://cdn.local/logo.png").unwrap().as_str(),
            "https://cdn.local/logo.png"
        );
        assert!(matches!(
            origin.resolve("file:///etc/passwd"),
            Err(OriginError::UnsupportedScheme { .. })
        ));
    }

    #[tokio::test]
    async fn round_trip_against_local_backend() {
        let (base, seen) = one_shot_backend(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n[]",
        )
        .await;

        let origin = HttpOrigin::new(&base).unwrap();
        let response = origin
            .forward(RequestDescriptor::get("/products"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body_bytes().as_ref(), b"[]");
        assert_eq!(
            response.headers().get("content-type"),
            Some("application/json")
        );

        let request = seen.await.unwrap();
        assert_eq!(request.method(), &Method::Get);
        assert_eq!(request.target(), "/products");
    }

    #[tokio::test]
    async fn relays_headers_and_body_without_connection_headers() {
        let (base, seen) =
            one_shot_backend(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;

        let origin = HttpOrigin::new(&base).unwrap();
        let request = RequestDescriptor::post("/recommend")
            .header("Accept", "application/json")
            .header("Connection", "upgrade")
            .header("Upgrade", "websocket")
            .body(r#"{"product_id":1}"#);
        origin.forward(request).await.unwrap();

        let received = seen.await.unwrap();
        assert_eq!(received.method(), &Method::Post);
        assert_eq!(received.headers().get("accept"), Some("application/json"));
        assert!(received.headers().get("upgrade").is_none());
        assert_eq!(received.body().as_ref(), br#"{"product_id":1}"#);
    }

    #[tokio::test]
    async fn chunked_body_is_decoded() {
        let (base, _seen) = one_shot_backend(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
        )
        .await;

        let origin = HttpOrigin::new(&base).unwrap();
        let response = origin.forward(RequestDescriptor::get("/wiki")).await.unwrap();
        assert_eq!(response.body_bytes().as_ref(), b"Wikipedia");
        assert!(!response.headers().contains("transfer-encoding"));
    }

    #[tokio::test]
    async fn oversized_chunk_size_is_an_error() {
        let (base, _seen) = one_shot_backend(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nab\r\n0\r\n\r\n",
        )
        .await;

        let origin = HttpOrigin::new(&base).unwrap();
        let err = origin
            .forward(RequestDescriptor::get("/products"))
            .await
            .unwrap_err();
        assert!(matches!(err, OriginError::Http(_)));
    }

    #[tokio::test]
    async fn redirects_are_relayed() {
        let (base, _seen) = one_shot_backend(
            b"HTTP/1.1 302 Found\r\nLocation: /elsewhere\r\nContent-Length: 0\r\n\r\n",
        )
        .await;

        let origin = HttpOrigin::new(&base).unwrap();
        let response = origin.forward(RequestDescriptor::get("/old")).await.unwrap();
        assert_eq!(response.status().as_u16(), 302);
        assert_eq!(response.headers().get("location"), Some("/elsewhere"));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let origin = HttpOrigin::new(&format!("http://{addr}")).unwrap();
        let err = origin
            .forward(RequestDescriptor::get("/products"))
            .await
            .unwrap_err();
        assert!(matches!(err, OriginError::Http(ref e) if e.is_connect()));
    }
}
