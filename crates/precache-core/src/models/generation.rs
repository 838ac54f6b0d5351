use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Name of one generation of the cache store, e.g. `uhoues-v1.0`.
///
/// Changing the name is the only way to invalidate cached content: a new
/// name starts an unrelated, empty store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheGeneration(String);

impl CacheGeneration {
    pub fn new(name: impl Into<String>) -> Result<Self, CacheError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CacheError::InvalidConfig(
                "cache generation name is empty".to_string(),
            ));
        }
        Ok(Self(name))
    }

    /// For built-in names known to be non-empty.
    pub(crate) fn from_static(name: &'static str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CacheGeneration {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CacheGeneration> for String {
    fn from(generation: CacheGeneration) -> Self {
        generation.0
    }
}

impl fmt::Display for CacheGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered list of URLs to prefetch at install time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Manifest(Vec<String>);

impl Manifest {
    pub fn new<I, S>(urls: I) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        if let Some(pos) = urls.iter().position(|u| u.trim().is_empty()) {
            return Err(CacheError::InvalidConfig(format!(
                "manifest entry {} is empty",
                pos
            )));
        }
        Ok(Self(urls))
    }

    pub(crate) fn from_static(urls: &[&'static str]) -> Self {
        Self(urls.iter().map(|u| u.to_string()).collect())
    }

    pub fn urls(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<String>> for Manifest {
    type Error = CacheError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Manifest> for Vec<String> {
    fn from(manifest: Manifest) -> Self {
        manifest.0
    }
}
