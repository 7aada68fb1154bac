//! Query and status enumerations shared across the gateway.

use querygate_error::GatewayError;
use serde::{Deserialize, Serialize};

/// Kinds of database queries the gateway processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    /// SELECT query - retrieves data
    Select,
    /// INSERT query - adds new data
    Insert,
    /// UPDATE query - modifies existing data
    Update,
    /// DELETE query - removes data
    Delete,
    /// EXECUTE query - runs a stored procedure
    Execute,
    /// BATCH query - multiple statements in one request
    Batch,
    /// PING - health check request
    Ping,
}

impl QueryType {
    /// Whether this query kind mutates backend data.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    /// Wire tag for this query kind.
    #[must_use]
    pub const fn wire_tag(self) -> u8 {
        match self {
            Self::Select => 1,
            Self::Insert => 2,
            Self::Update => 3,
            Self::Delete => 4,
            Self::Execute => 5,
            Self::Batch => 6,
            Self::Ping => 7,
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Select => write!(f, "SELECT"),
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
            Self::Execute => write!(f, "EXECUTE"),
            Self::Batch => write!(f, "BATCH"),
            Self::Ping => write!(f, "PING"),
        }
    }
}

/// Parse a query type from its wire name (case-insensitive).
#[must_use]
pub fn parse_query_type(s: &str) -> Option<QueryType> {
    match s.to_ascii_uppercase().as_str() {
        "SELECT" => Some(QueryType::Select),
        "INSERT" => Some(QueryType::Insert),
        "UPDATE" => Some(QueryType::Update),
        "DELETE" => Some(QueryType::Delete),
        "EXECUTE" => Some(QueryType::Execute),
        "BATCH" => Some(QueryType::Batch),
        "PING" => Some(QueryType::Ping),
        _ => None,
    }
}

/// Status codes for query responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// Query executed successfully
    Ok,
    /// General error occurred
    Error,
    /// Query execution timed out
    Timeout,
    /// Database connection failed
    ConnectionFailed,
    /// Authentication token invalid
    AuthFailed,
    /// Query syntax or structure invalid
    InvalidQuery,
    /// No available connection in pool
    NoConnection,
    /// Request rate limit exceeded
    RateLimited,
    /// Server is too busy to process
    ServerBusy,
    /// Requested resource not found
    NotFound,
    /// Insufficient permissions
    PermissionDenied,
}

impl StatusCode {
    /// Wire code for this status (stable, 0..=10).
    #[must_use]
    pub const fn wire_code(self) -> u16 {
        match self {
            Self::Ok => 0,
            Self::Error => 1,
            Self::Timeout => 2,
            Self::ConnectionFailed => 3,
            Self::AuthFailed => 4,
            Self::InvalidQuery => 5,
            Self::NoConnection => 6,
            Self::RateLimited => 7,
            Self::ServerBusy => 8,
            Self::NotFound => 9,
            Self::PermissionDenied => 10,
        }
    }

    /// Status corresponding to a wire code, if valid.
    #[must_use]
    pub const fn from_wire_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::Error),
            2 => Some(Self::Timeout),
            3 => Some(Self::ConnectionFailed),
            4 => Some(Self::AuthFailed),
            5 => Some(Self::InvalidQuery),
            6 => Some(Self::NoConnection),
            7 => Some(Self::RateLimited),
            8 => Some(Self::ServerBusy),
            9 => Some(Self::NotFound),
            10 => Some(Self::PermissionDenied),
            _ => None,
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Error => write!(f, "ERROR"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::ConnectionFailed => write!(f, "CONNECTION_FAILED"),
            Self::AuthFailed => write!(f, "AUTH_FAILED"),
            Self::InvalidQuery => write!(f, "INVALID_QUERY"),
            Self::NoConnection => write!(f, "NO_CONNECTION"),
            Self::RateLimited => write!(f, "RATE_LIMITED"),
            Self::ServerBusy => write!(f, "SERVER_BUSY"),
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::PermissionDenied => write!(f, "PERMISSION_DENIED"),
        }
    }
}

impl From<&GatewayError> for StatusCode {
    /// Map an internal error onto the wire taxonomy.
    ///
    /// Backend errors stay generic ERROR unless a more specific case applies.
    fn from(err: &GatewayError) -> Self {
        match err {
            GatewayError::Timeout { .. } => Self::Timeout,
            GatewayError::ConnectionFailed { .. } => Self::ConnectionFailed,
            GatewayError::NoConnection { .. } => Self::NoConnection,
            GatewayError::Authentication { .. } => Self::AuthFailed,
            GatewayError::PermissionDenied { .. } => Self::PermissionDenied,
            GatewayError::RateLimited { .. } => Self::RateLimited,
            GatewayError::InvalidQuery { .. } => Self::InvalidQuery,
            GatewayError::NotFound { .. } => Self::NotFound,
            GatewayError::Backend { .. }
            | GatewayError::Configuration { .. }
            | GatewayError::Internal { .. } => Self::Error,
        }
    }
}
