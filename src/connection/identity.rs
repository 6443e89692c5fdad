//! Connection identity

use crate::driver::{ConnectOptions, Driver};
use serde::Serialize;
use std::borrow::Borrow;
use std::fmt;

/// Registry key for a connection
///
/// `"{driver}+{database}"` for structured targets (the DSN stands in when no
/// database is given), or the raw connection string when one was supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity for options whose driver has already been resolved
    pub fn from_options(options: &ConnectOptions, driver: Driver) -> Self {
        if let Some(url) = &options.url {
            return Self(url.clone());
        }
        let target = options
            .database
            .as_deref()
            .or(options.dsn.as_deref())
            .unwrap_or_default();
        Self(format!("{driver}+{target}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
