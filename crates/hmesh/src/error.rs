// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every hmesh entity.
//!
//! Only caller bugs are reported as `Err`. Expected steady-state conditions of a
//! dynamic peer-to-peer system (no route yet, no server resolved, late replies)
//! are returned as data: `Ok(false)`, empty vectors, or a `CallState`.

/// Errors returned by hmesh operations.
///
/// # Example
///
/// ```rust
/// use hmesh::config::LayerPriority;
/// use hmesh::transport::TransportLayer::{SharedMemory, Tcp};
/// use hmesh::Error;
///
/// let result = LayerPriority::new(vec![SharedMemory, SharedMemory], vec![Tcp]);
/// assert!(matches!(result, Err(Error::InvalidConfig(_))));
/// ```
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration value is invalid (duplicate priority entry, zero capacity).
    InvalidConfig(String),
    /// Configuration file not found at specified path.
    ConfigFileNotFound(String),
    /// Configuration document could not be parsed.
    ConfigParse(String),

    // ========================================================================
    // Entity Errors
    // ========================================================================
    /// Operation on a publisher, subscriber, client or server after disposal.
    Disposed(String),
    /// Empty topic, service or method name.
    InvalidArgument(String),
    /// Method registered again with different request/response types.
    MethodConflict(String),
    /// Registry has been shut down; no new entities can be created.
    Shutdown,

    // ========================================================================
    // Runtime Errors
    // ========================================================================
    /// Failed to spawn a background worker.
    WorkerSpawn(std::io::Error),
    /// I/O error with underlying cause.
    IoError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::ConfigFileNotFound(path) => write!(f, "Config file not found: {}", path),
            Error::ConfigParse(msg) => write!(f, "Config parse error: {}", msg),
            Error::Disposed(what) => write!(f, "Operation on disposed entity: {}", what),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::MethodConflict(name) => write!(
                f,
                "Method '{}' already registered with different types",
                name
            ),
            Error::Shutdown => write!(f, "Registry shut down"),
            Error::WorkerSpawn(e) => write!(f, "Failed to spawn worker thread: {}", e),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::WorkerSpawn(e) | Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_context() {
        let err = Error::Disposed("publisher 'imu'".to_string());
        assert!(err.to_string().contains("imu"));

        let err = Error::MethodConflict("echo".to_string());
        assert!(err.to_string().contains("echo"));
    }

    #[test]
    fn io_error_has_source() {
        use std::error::Error as _;
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(err.source().is_some());
        assert!(Error::Shutdown.source().is_none());
    }
}
