//! Unified error types for querygate.
//!
//! Every fallible operation in the gateway resolves to [`GatewayError`].
//! Backend drivers surface their failures as [`GatewayError::Backend`]
//! records; the router maps errors onto wire status codes at the protocol
//! boundary.
//!
//! # Error Hierarchy
//!
//! ```text
//! GatewayError
//! ├── Backend          - errors reported by a database driver
//! ├── ConnectionFailed - connection establishment / pool shutdown
//! ├── NoConnection     - pool exhausted within the acquire deadline
//! ├── Timeout          - operation exceeded its deadline
//! ├── Authentication   - token rejected by the injected validator
//! ├── PermissionDenied - authenticated but not authorized
//! ├── RateLimited      - client exceeded its request budget
//! ├── InvalidQuery     - malformed or unclassifiable query
//! ├── NotFound         - requested resource does not exist
//! ├── Configuration    - invalid or missing configuration
//! └── Internal         - unexpected internal errors (bugs)
//! ```

// Error variants and fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Unified error type for all gateway subsystems.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Error reported by a database backend driver.
    #[error("Backend error ({code}): {message}")]
    Backend {
        /// Driver-specific error code.
        code:    i32,
        message: String,
        #[source]
        source:  Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("No connection available: {message}")]
    NoConnection { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source:  Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl GatewayError {
    /// Create a backend error without a source.
    #[must_use]
    pub fn backend(code: i32, message: impl Into<String>) -> Self {
        Self::Backend {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failure error.
    #[must_use]
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    /// Create a pool-exhaustion error.
    #[must_use]
    pub fn no_connection(message: impl Into<String>) -> Self {
        Self::NoConnection {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub const fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create an authentication error.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create an invalid-query error.
    #[must_use]
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source:  None,
        }
    }

    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Backend { .. } => "backend_error",
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::NoConnection { .. } => "no_connection",
            Self::Timeout { .. } => "timeout",
            Self::Authentication { .. } => "authentication_failed",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidQuery { .. } => "invalid_query",
            Self::NotFound { .. } => "not_found",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether retrying the failed operation may succeed.
    ///
    /// Connection-level failures and timeouts are transient; everything else
    /// fails the same way on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backend { .. }
                | Self::ConnectionFailed { .. }
                | Self::NoConnection { .. }
                | Self::Timeout { .. }
        )
    }

    /// Whether this error indicates a caller mistake rather than a
    /// gateway-side failure.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. }
                | Self::PermissionDenied { .. }
                | Self::RateLimited { .. }
                | Self::InvalidQuery { .. }
                | Self::NotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = GatewayError::backend(-3, "socket closed");
        assert_eq!(err.to_string(), "Backend error (-3): socket closed");
        assert_eq!(err.error_code(), "backend_error");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timeout_error() {
        let err = GatewayError::timeout(5000);
        assert_eq!(err.to_string(), "Operation timed out after 5000ms");
        assert!(err.is_retryable());
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_client_errors() {
        assert!(GatewayError::authentication("bad token").is_client_error());
        assert!(GatewayError::invalid_query("empty sql").is_client_error());
        assert!(
            GatewayError::RateLimited {
                retry_after_ms: Some(1000),
            }
            .is_client_error()
        );
        assert!(!GatewayError::no_connection("pool exhausted").is_client_error());
    }

    #[test]
    fn test_internal_not_retryable() {
        let err = GatewayError::internal("invariant violated");
        assert!(!err.is_retryable());
        assert_eq!(err.error_code(), "internal_error");
    }
}
