use thiserror::Error;

/// Transport-level failure from the network capability.
///
/// A response with a non-2xx status is not a `FetchError`; it is handed back
/// to the caller like any other response.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Network unreachable: {0}")]
    Unreachable(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to open cache '{name}': {reason}")]
    StoreOpen { name: String, reason: String },

    #[error("Cache storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache entry file: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Bad response status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Request method {0} cannot be cached")]
    UnsupportedMethod(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid generation or manifest: {0}")]
    InvalidConfig(String),

    #[error("Cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },

    /// Network failure while forwarding an intercepted request. Carried
    /// through untouched.
    #[error(transparent)]
    Network(#[from] FetchError),
}
