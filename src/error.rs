//! Error types for unidb
//!
//! This module defines the error hierarchy for the whole crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.
//!
//! A registry lookup miss is not an error: `Registry::get` returns `None`.

use thiserror::Error;

/// The main error type for unidb
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Resolver Errors
    // ============================================================================
    #[error("Unsupported driver: {driver}")]
    UnsupportedDriver { driver: String },

    // ============================================================================
    // Connection Errors
    // ============================================================================
    #[error("Failed to connect to {target}: {message}")]
    ConnectFailed { target: String, message: String },

    #[error("Connection '{identity}' is closed")]
    ConnectionClosed { identity: String },

    #[error("Timed out after {timeout_ms}ms waiting for a session on '{identity}'")]
    PoolTimeout { identity: String, timeout_ms: u64 },

    // ============================================================================
    // Statement Errors
    // ============================================================================
    #[error("Statement failed: {message}")]
    Statement { message: String },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an unsupported driver error
    pub fn unsupported_driver(driver: impl Into<String>) -> Self {
        Self::UnsupportedDriver {
            driver: driver.into(),
        }
    }

    /// Create a connect error
    pub fn connect_failed(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a closed connection error
    pub fn connection_closed(identity: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            identity: identity.into(),
        }
    }

    /// Create a statement error carrying the backend diagnostic
    pub fn statement(message: impl Into<String>) -> Self {
        Self::Statement {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn is_unsupported_driver(&self) -> bool {
        matches!(self, Self::UnsupportedDriver { .. })
    }

    pub fn is_connect_failed(&self) -> bool {
        matches!(self, Self::ConnectFailed { .. })
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. })
    }

    pub fn is_statement(&self) -> bool {
        matches!(self, Self::Statement { .. })
    }

    pub fn is_pool_timeout(&self) -> bool {
        matches!(self, Self::PoolTimeout { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::statement(err.to_string())
    }
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        Self::statement(err.to_string())
    }
}

/// Result type alias for unidb
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::unsupported_driver("oracle");
        assert_eq!(err.to_string(), "Unsupported driver: oracle");

        let err = Error::connect_failed("postgresql://localhost/app", "connection refused");
        assert_eq!(
            err.to_string(),
            "Failed to connect to postgresql://localhost/app: connection refused"
        );

        let err = Error::connection_closed("sqlite+app.db");
        assert_eq!(err.to_string(), "Connection 'sqlite+app.db' is closed");
    }

    #[test]
    fn test_predicates() {
        assert!(Error::unsupported_driver("oracle").is_unsupported_driver());
        assert!(Error::statement("syntax error").is_statement());
        assert!(Error::connection_closed("x").is_connection_closed());
        assert!(!Error::config("bad").is_connection_closed());
        assert!(Error::PoolTimeout {
            identity: "x".to_string(),
            timeout_ms: 10
        }
        .is_pool_timeout());
    }

    #[test]
    fn test_native_error_keeps_diagnostic() {
        let native = rusqlite::Error::InvalidQuery;
        let expected = native.to_string();
        let err: Error = native.into();
        assert!(err.is_statement());
        assert!(err.to_string().contains(&expected));
    }

    #[test]
    fn test_result_context() {
        let result: Result<()> = Err(Error::config("inner"));
        let with_context = result.context("outer");
        assert!(with_context
            .unwrap_err()
            .to_string()
            .contains("outer: Configuration error: inner"));
    }
}
