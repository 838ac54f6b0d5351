use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CacheError;

/// An outgoing request as seen by the interceptor.
///
/// Only the method and URL take part in cache matching; headers are carried
/// so they reach the network unchanged on a miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }

    /// Resolve a relative URL (such as `/`) against `origin`.
    ///
    /// Absolute URLs are returned in their parsed, serialized form so that
    /// `https://host` and `https://host/` key the same entry.
    pub fn resolve(&self, origin: Option<&Url>) -> Result<Self, CacheError> {
        let resolved = match Url::parse(&self.url) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => match origin {
                Some(base) => base.join(&self.url).map_err(|e| CacheError::InvalidUrl {
                    url: self.url.clone(),
                    reason: e.to_string(),
                })?,
                // No origin configured: relative URLs are keyed verbatim
                None => return Ok(self.clone()),
            },
            Err(e) => {
                return Err(CacheError::InvalidUrl {
                    url: self.url.clone(),
                    reason: e.to_string(),
                })
            }
        };

        Ok(Self {
            method: self.method.clone(),
            url: resolved.to_string(),
            headers: self.headers.clone(),
        })
    }
}

/// Identity of a stored entry: method plus the exact URL string.
///
/// Query strings are part of the URL, so `/a?x=1` and `/a?x=2` never match
/// each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    /// Key for a request, or `None` for anything other than GET.
    pub fn for_request(request: &RequestDescriptor) -> Option<Self> {
        if !request.is_get() {
            return None;
        }
        Some(Self {
            method: "GET".to_string(),
            url: request.url.clone(),
        })
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
    fn test_key_only_for_get() {
        assert!(CacheKey::for_request(&RequestDescriptor::get("/")).is_some());
        assert!(CacheKey::for_request(&RequestDescriptor::new("get", "/")).is_some());
        assert!(CacheKey::for_request(&RequestDescriptor::new("POST", "/")).is_none());
    }

    #[test]
    fn test_key_distinguishes_query_strings() {
        let a = CacheKey::for_request(&RequestDescriptor::get("/a?x=1")).unwrap();
        let b = CacheKey::for_request(&RequestDescriptor::get("/a?x=2")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_ignores_headers() {
        let plain = RequestDescriptor::get("/logo.png");
        let with_header = RequestDescriptor::get("/logo.png").with_header("accept", "image/png");
        assert_eq!(
            CacheKey::for_request(&plain),
            CacheKey::for_request(&with_header)
        );
    }

    #[test]
    fn test_resolve_relative_against_origin() {
        let origin = Url::parse("https://uhoues.streamlit.app").unwrap();
        let resolved = RequestDescriptor::get("/").resolve(Some(&origin)).unwrap();
        assert_eq!(resolved.url, "https://uhoues.streamlit.app/");
    }

    #[test]
    fn test_resolve_without_origin_is_verbatim() {
        let resolved = RequestDescriptor::get("/logo.png").resolve(None).unwrap();
        assert_eq!(resolved.url, "/logo.png");
    }

    #[test]
    fn test_resolve_normalizes_absolute() {
        let resolved = RequestDescriptor::get("https://example.com")
            .resolve(None)
            .unwrap();
        assert_eq!(resolved.url, "https://example.com/");
    }

    #[test]
    fn test_resolve_keeps_method_and_headers() {
        let origin = Url::parse("https://example.com").unwrap();
        let request = RequestDescriptor::new("POST", "/submit").with_header("x-id", "7");
        let resolved = request.resolve(Some(&origin)).unwrap();
        assert_eq!(resolved.method, "POST");
        assert_eq!(resolved.headers, vec![("x-id".to_string(), "7".to_string())]);
    }

    #[test]
    fn test_key_display() {
        let key = CacheKey::for_request(&RequestDescriptor::get("/a")).unwrap();
        assert_eq!(key.to_string(), "GET /a");
    }
}
