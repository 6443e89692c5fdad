//! Engine resolver
//!
//! Maps a logical driver name onto a concrete backend URL.
//!
//! # Overview
//!
//! - `Driver` - The closed set of supported backends
//! - `ConnectOptions` - Discrete connection fields, a DSN, or a full URL
//! - `BackendUrl` - The resolved URL handed to the engine factory
//! - `resolve` - Pure construction of a `BackendUrl` from options

mod types;
mod url;

pub use types::{Driver, UrlStrategy, UrlStyle};
pub use url::{resolve, BackendUrl, ConnectOptions};

#[cfg(test)]
mod tests;
