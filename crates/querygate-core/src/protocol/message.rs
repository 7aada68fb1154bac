//! Protocol message structures.
//!
//! Request/response model for query execution: a common header, token-based
//! authentication, parameterized queries, and result rows whose cells share
//! the parameter value model. All structs are plain data with serde codecs;
//! instances are not internally synchronized.

use chrono::Utc;
use querygate_error::{GatewayError, Result};
use serde::{Deserialize, Serialize};

use super::types::{QueryType, StatusCode};
use crate::pooling::ConnectionPriority;

/// Common header for all protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Protocol version.
    pub version: u32,
    /// Unique message identifier.
    pub message_id: u64,
    /// Message timestamp (Unix epoch milliseconds).
    pub timestamp_ms: u64,
    /// For request/response correlation.
    pub correlation_id: String,
}

impl MessageHeader {
    /// Create a header stamped with the current time.
    #[must_use]
    pub fn new(message_id: u64) -> Self {
        Self {
            version: 1,
            message_id,
            timestamp_ms: now_ms(),
            correlation_id: String::new(),
        }
    }
}

impl Default for MessageHeader {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Authentication token for client identification.
///
/// The gateway never decodes the token itself; validation is delegated to
/// the injected [`TokenValidator`](crate::gateway::TokenValidator).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    /// JWT or session token.
    pub token: String,
    /// Client identifier.
    pub client_id: String,
    /// Token expiration (Unix epoch milliseconds, 0 = no expiry recorded).
    pub expires_at_ms: u64,
}

impl AuthToken {
    /// Whether the token's recorded expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at_ms != 0 && now_ms() > self.expires_at_ms
    }

    /// Whether the token is present and not expired.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.token.is_empty() && !self.is_expired()
    }
}

/// Value of a query parameter or result cell.
///
/// Wire type tags: 0=null, 1=bool, 2=i64, 3=f64, 4=string, 5=bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl ParamValue {
    /// Wire type tag for this value.
    #[must_use]
    pub const fn type_tag(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::Text(_) => 4,
            Self::Bytes(_) => 5,
        }
    }
}

/// Cells share the parameter value model.
pub type CellValue = ParamValue;

/// Parameter for prepared statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParam {
    /// Parameter name (empty for positional parameters).
    pub name: String,
    /// Parameter value.
    pub value: ParamValue,
}

impl QueryParam {
    #[must_use]
    pub fn new(name: impl Into<String>, value: ParamValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Options for query execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Query timeout in milliseconds (0 = router default).
    pub timeout_ms: u32,
    /// Hint for read-only queries.
    pub read_only: bool,
    /// Transaction isolation level label.
    pub isolation_level: String,
    /// Maximum rows to return (0 = unlimited).
    pub max_rows: u32,
    /// Include column metadata in the response.
    pub include_metadata: bool,
    /// Explicit scheduling priority; overrides the per-kind default mapping.
    pub priority: Option<ConnectionPriority>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            read_only: false,
            isolation_level: String::new(),
            max_rows: 0,
            include_metadata: true,
            priority: None,
        }
    }
}

/// Request message for database queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub header: MessageHeader,
    pub token: AuthToken,
    pub query_type: QueryType,
    /// Query string or prepared statement identifier.
    pub sql: String,
    pub params: Vec<QueryParam>,
    pub options: QueryOptions,
}

impl QueryRequest {
    /// Create a simple query request.
    #[must_use]
    pub fn new(sql: impl Into<String>, query_type: QueryType) -> Self {
        Self {
            header: MessageHeader::default(),
            token: AuthToken::default(),
            query_type,
            sql: sql.into(),
            params: Vec::new(),
            options: QueryOptions::default(),
        }
    }

    /// Whether the request is structurally valid.
    ///
    /// PING carries no statement; every other kind requires one.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.query_type == QueryType::Ping || !self.sql.trim().is_empty()
    }

    /// Serialize for transport framing.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| GatewayError::Internal {
            message: format!("request serialization failed: {e}"),
            source:  Some(Box::new(e)),
        })
    }

    /// Deserialize from transport framing.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| GatewayError::invalid_query(format!("malformed request: {e}")))
    }
}

/// Metadata for a result column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Column name.
    pub name: String,
    /// Database type name.
    pub type_name: String,
    /// Database type identifier.
    pub type_id: u32,
    /// Whether the column can be NULL.
    pub nullable: bool,
    /// For numeric types.
    pub precision: u32,
    /// For numeric types.
    pub scale: u32,
}

/// A single row of query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Cell values in column order.
    pub cells: Vec<CellValue>,
}

/// Response message for database queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub header: MessageHeader,
    pub status: StatusCode,
    /// Column metadata (for SELECT).
    pub columns: Vec<ColumnMetadata>,
    /// Result rows (for SELECT).
    pub rows: Vec<ResultRow>,
    /// Affected count (for INSERT/UPDATE/DELETE).
    pub affected_rows: u64,
    /// Error details if status != OK.
    pub error_message: String,
    /// Query execution time in microseconds.
    pub execution_time_us: u64,
}

impl QueryResponse {
    /// Create a success response correlated to a request.
    #[must_use]
    pub fn success(request_id: u64) -> Self {
        Self {
            header: MessageHeader::new(request_id),
            status: StatusCode::Ok,
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: 0,
            error_message: String::new(),
            execution_time_us: 0,
        }
    }

    /// Create an error response correlated to a request.
    #[must_use]
    pub fn error(request_id: u64, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            error_message: message.into(),
            ..Self::success(request_id)
        }
    }

    /// Whether the response indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == StatusCode::Ok
    }

    /// Serialize for transport framing.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| GatewayError::Internal {
            message: format!("response serialization failed: {e}"),
            source:  Some(Box::new(e)),
        })
    }

    /// Deserialize from transport framing.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| GatewayError::invalid_query(format!("malformed response: {e}")))
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
