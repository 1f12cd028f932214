//! Inbound HTTP/1.1 request parsing using the [`httparse`] crate.

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method, RequestDescriptor};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete: more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header: {value}")]
    InvalidContentLength { value: String },
}

/// A fully parsed inbound HTTP/1.1 request.
///
/// # Examples
///
/// ```
/// use shelfcache::http::Request;
///
/// let raw = b"GET /products?page=2 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, consumed) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.target(), "/products?page=2");
/// assert_eq!(request.path(), "/products");
/// assert_eq!(consumed, raw.len());
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    target: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parses one complete request (head and `Content-Length` body) from the
    /// front of `buf`.
    ///
    /// Returns the request and the number of bytes it occupied, so pipelined
    /// requests behind it stay in the buffer.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the head or the body has not fully arrived.
    /// - [`RequestError::Parse`]: the data is malformed.
    /// - [`RequestError::MissingField`]: method, path or version is absent.
    /// - [`RequestError::InvalidContentLength`]: `Content-Length` is not a number
    ///   or is too large to address.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw_req.method {
            Some(m) => match m.parse::<Method>() {
                Ok(method) => method,
                Err(never) => match never {},
            },
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?
            .to_owned();

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let content_length = match header_map.get("content-length") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|_| RequestError::InvalidContentLength {
                    value: v.to_owned(),
                })?,
            None => 0,
        };

        let total = body_offset.checked_add(content_length).ok_or_else(|| {
            RequestError::InvalidContentLength {
                value: content_length.to_string(),
            }
        })?;
        if buf.len() < total {
            return Err(RequestError::Incomplete);
        }
        let body = Bytes::copy_from_slice(&buf[body_offset..total]);

        Ok((
            Self {
                method,
                target,
                version,
                headers: header_map,
                body,
            },
            total,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the raw request target, query string included.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        super::url_path(&self.target)
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Converts the request into an interceptor descriptor.
    ///
    /// Hop-by-hop headers, `Host` and `Content-Length` belong to the inbound
    /// connection and are dropped; the origin connection writes its own.
    pub fn into_descriptor(self) -> RequestDescriptor {
        let headers: Headers = self
            .headers
            .iter()
            .filter(|(name, _)| {
                !Headers::is_hop_by_hop(name)
                    && !name.eq_ignore_ascii_case("host")
                    && !name.eq_ignore_ascii_case("content-length")
            })
            .collect();
        RequestDescriptor::new(self.method, self.target)
            .with_headers(headers)
            .body(self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, consumed) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn incomplete_head() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn incomplete_body() {
        let raw = b"POST /recommend HTTP/1.1\r\nContent-Length: 10\r\n\r\n{\"id\"";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn body_and_pipelined_tail() {
        let raw = b"POST /recommend HTTP/1.1\r\nContent-Length: 8\r\n\r\n{\"id\":1}GET / HTTP/1.1\r\n";
        let (req, consumed) = Request::parse(raw).unwrap();
        assert_eq!(req.body().as_ref(), b"{\"id\":1}");
        assert_eq!(&raw[consumed..], b"GET / HTTP/1.1\r\n");
    }

    #[test]
    fn bad_content_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::InvalidContentLength { .. })
        ));
    }

    #[test]
    fn content_length_past_address_space() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\n";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::InvalidContentLength { .. })
        ));
    }

    #[test]
    fn connection_close() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn descriptor_drops_connection_headers() {
        let raw = b"GET /logo.png?v=2 HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\nAccept: image/*\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        let desc = req.into_descriptor();
        assert_eq!(desc.url(), "/logo.png?v=2");
        assert_eq!(desc.headers().get("accept"), Some("image/*"));
        assert!(!desc.headers().contains("host"));
        assert!(!desc.headers().contains("connection"));
    }
}
