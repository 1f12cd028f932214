//! Request classification: decides which requests may be served from cache.
//!
//! [`PolicyMatcher::classify`] is a pure function of the request descriptor and
//! the configured [`PolicyRules`]. It never performs I/O, and the rule set is
//! fixed for the lifetime of the matcher.

use serde::Deserialize;

use crate::http::{Method, RequestDescriptor, url_path};

/// The outcome of classifying a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Serve from cache when possible; populate the cache on a miss.
    Cacheable,
    /// Always forward to the origin; never touch the cache.
    PassThrough,
}

/// Configured cacheability rules.
///
/// A request is cacheable when its method is in `cacheable_methods` and its
/// URL path either ends in one of `image_extensions` or contains one of
/// `api_path_fragments`.
///
/// # Examples
///
/// ```
/// use shelfcache::policy::PolicyRules;
///
/// let rules: PolicyRules = serde_json::from_str(
///     r#"{ "image_extensions": ["avif"], "api_path_fragments": ["/catalog"] }"#,
/// ).unwrap();
/// assert_eq!(rules.cacheable_methods, vec!["GET".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PolicyRules {
    /// File extensions, without the leading dot, matched case-insensitively.
    pub image_extensions: Vec<String>,
    /// Substrings matched against the URL path.
    pub api_path_fragments: Vec<String>,
    /// Methods eligible for caching.
    pub cacheable_methods: Vec<String>,
}

impl Default for PolicyRules {
    fn default() -> Self {
        Self {
            image_extensions: ["png", "jpg", "jpeg", "gif", "webp", "svg"]
                .into_iter()
                .map(String::from)
                .collect(),
            api_path_fragments: vec!["/products".to_owned(), "/recommend".to_owned()],
            cacheable_methods: vec!["GET".to_owned()],
        }
    }
}

/// Stateless request classifier built from [`PolicyRules`].
///
/// # Examples
///
/// ```
/// use shelfcache::http::RequestDescriptor;
/// use shelfcache::policy::{Decision, PolicyMatcher, PolicyRules};
///
/// let matcher = PolicyMatcher::new(PolicyRules::default());
/// assert_eq!(matcher.classify(&RequestDescriptor::get("/products")), Decision::Cacheable);
/// assert_eq!(matcher.classify(&RequestDescriptor::get("/logo.PNG")), Decision::Cacheable);
/// assert_eq!(matcher.classify(&RequestDescriptor::post("/recommend")), Decision::PassThrough);
/// assert_eq!(matcher.classify(&RequestDescriptor::get("/about")), Decision::PassThrough);
/// ```
#[derive(Debug, Clone)]
pub struct PolicyMatcher {
    // Stored as ".ext", lower-cased.
    suffixes: Vec<String>,
    fragments: Vec<String>,
    methods: Vec<Method>,
}

impl PolicyMatcher {
    pub fn new(rules: PolicyRules) -> Self {
        let suffixes = rules
            .image_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.'))
            .filter(|ext| !ext.is_empty())
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
            .collect();
        let fragments = rules
            .api_path_fragments
            .into_iter()
            .filter(|f| !f.is_empty())
            .collect();
        let methods = rules
            .cacheable_methods
            .iter()
            .filter_map(|m| m.parse::<Method>().ok())
            .collect();
        Self {
            suffixes,
            fragments,
            methods,
        }
    }

    /// Classifies a request as [`Decision::Cacheable`] or [`Decision::PassThrough`].
    pub fn classify(&self, request: &RequestDescriptor) -> Decision {
        if !self.methods.contains(request.method()) {
            return Decision::PassThrough;
        }
        let path = url_path(request.url());
        if self.is_image(path) || self.is_api(path) {
            Decision::Cacheable
        } else {
            Decision::PassThrough
        }
    }

    fn is_image(&self, path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        self.suffixes.iter().any(|suffix| lower.ends_with(suffix))
    }

    fn is_api(&self, path: &str) -> bool {
        self.fragments.iter().any(|fragment| path.contains(fragment))
    }
}

impl Default for PolicyMatcher {
    fn default() -> Self {
        Self::new(PolicyRules::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(req: RequestDescriptor) -> Decision {
        PolicyMatcher::default().classify(&req)
    }

    #[test]
    fn image_extensions_match_on_path_only() {
        assert_eq!(classify(RequestDescriptor::get("/img/shoe.webp")), Decision::Cacheable);
        assert_eq!(
            classify(RequestDescriptor::get("http://cdn.example.com/shoe.jpeg?w=200")),
            Decision::Cacheable
        );
        assert_eq!(classify(RequestDescriptor::get("/png")), Decision::PassThrough);
        assert_eq!(
            classify(RequestDescriptor::get("/download?file=a.png")),
            Decision::PassThrough
        );
    }

    #[test]
    fn api_fragments_are_substrings() {
        assert_eq!(classify(RequestDescriptor::get("/products")), Decision::Cacheable);
        assert_eq!(classify(RequestDescriptor::get("/api/products/12")), Decision::Cacheable);
        assert_eq!(classify(RequestDescriptor::get("/recommend/5")), Decision::Cacheable);
        assert_eq!(classify(RequestDescriptor::get("/users")), Decision::PassThrough);
    }

    #[test]
    fn host_never_matches_a_fragment() {
        assert_eq!(
            classify(RequestDescriptor::get("http://products.example.com/about")),
            Decision::PassThrough
        );
    }

    #[test]
    fn non_cacheable_methods_pass_through() {
        assert_eq!(classify(RequestDescriptor::post("/recommend")), Decision::PassThrough);
        assert_eq!(
            classify(RequestDescriptor::new(Method::Delete, "/products/1")),
            Decision::PassThrough
        );
    }

    #[test]
    fn custom_rules() {
        let matcher = PolicyMatcher::new(PolicyRules {
            image_extensions: vec![".AVIF".into(), String::new()],
            api_path_fragments: vec!["/catalog".into(), String::new()],
            cacheable_methods: vec!["get".into(), "head".into()],
        });
        assert_eq!(
            matcher.classify(&RequestDescriptor::new(Method::Head, "/a.avif")),
            Decision::Cacheable
        );
        assert_eq!(
            matcher.classify(&RequestDescriptor::get("/catalog/1")),
            Decision::Cacheable
        );
        // Empty fragments are ignored rather than matching everything.
        assert_eq!(
            matcher.classify(&RequestDescriptor::get("/products")),
            Decision::PassThrough
        );
    }
}
