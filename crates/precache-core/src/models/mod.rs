//! Domain types shared by the store, the network capability and the
//! interceptor.

pub mod generation;
pub mod request;
pub mod response;

pub use generation::{CacheGeneration, Manifest};
pub use request::{CacheKey, RequestDescriptor};
pub use response::HttpResponse;
