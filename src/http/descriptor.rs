//! The request descriptor seen by the interceptor, and the cache key derived from it.

use std::fmt;

use bytes::Bytes;

use super::{Headers, Method};

/// An outbound request as the application issued it.
///
/// The URL is kept as given: a path relative to the origin (`/products`) or an
/// absolute URL (`http://cdn.example.com/logo.png`). Only the method and URL
/// participate in the cache key; headers and body are forwarded untouched.
///
/// # Examples
///
/// ```
/// use shelfcache::http::{Method, RequestDescriptor};
///
/// let req = RequestDescriptor::get("/products").header("Accept", "application/json");
/// assert_eq!(req.method(), &Method::Get);
/// assert_eq!(req.key().to_string(), "GET /products");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    method: Method,
    url: String,
    headers: Headers,
    body: Bytes,
}

impl RequestDescriptor {
    /// Creates a descriptor with no headers and an empty body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for a `GET` descriptor.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Shorthand for a `POST` descriptor.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces the whole header map.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Returns the canonical `(method, URL)` identity of this request.
    pub fn key(&self) -> CacheKey {
        CacheKey::new(&self.method, &self.url)
    }
}

/// Canonical `(method, URL)` pair identifying a cached response.
///
/// The method is upper-cased by [`Method`] parsing; the URL keeps its query
/// string but drops any `#fragment`, which never reaches the origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    method: String,
    url: String,
}

impl CacheKey {
    pub fn new(method: &Method, url: &str) -> Self {
        let url = match url.find('#') {
            Some(pos) => &url[..pos],
            None => url,
        };
        Self {
            method: method.as_str().to_owned(),
            url: url.to_owned(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_headers_and_body() {
        let a = RequestDescriptor::get("/products").header("Accept", "*/*");
        let b = RequestDescriptor::get("/products").body("ignored");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn key_distinguishes_method_and_query() {
        let get = RequestDescriptor::get("/recommend/1");
        let post = RequestDescriptor::post("/recommend/1");
        let query = RequestDescriptor::get("/recommend/1?limit=3");
        assert_ne!(get.key(), post.key());
        assert_ne!(get.key(), query.key());
    }

    #[test]
    fn key_drops_fragment() {
        let plain = RequestDescriptor::get("/products");
        let anchored = RequestDescriptor::get("/products#shoes");
        assert_eq!(plain.key(), anchored.key());
    }

    #[test]
    fn hand_built_and_parsed_methods_agree() {
        let parsed: Method = "get".parse().unwrap();
        let a = RequestDescriptor::new(parsed, "/logo.png");
        let b = RequestDescriptor::get("/logo.png");
        assert_eq!(a.key(), b.key());
    }
}
