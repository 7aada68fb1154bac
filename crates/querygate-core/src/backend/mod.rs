//! Database driver contract consumed by the gateway.
//!
//! The gateway never talks to a database directly; it drives an injected
//! [`DatabaseBackend`] implementation. Concrete drivers (PostgreSQL, MySQL,
//! ...) live outside the core and only need to satisfy this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use querygate_error::Result;
use serde::{Deserialize, Serialize};

use crate::protocol::{ColumnMetadata, ResultRow};

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

/// Kind of backend engine behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Mysql,
    Sqlite,
    /// Scripted in-memory backend for tests.
    Mock,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::Mysql => write!(f, "mysql"),
            Self::Sqlite => write!(f, "sqlite"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

/// Connection parameters handed to [`DatabaseBackend::initialize`].
///
/// Stored by the resilience layer so a dropped connection can be
/// re-established with identical parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Driver-specific connection string.
    pub connection_string: String,
    /// Time allowed for connection establishment.
    pub connect_timeout_ms: u32,
    /// Name reported to the backend for observability.
    pub application_name: String,
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            connect_timeout_ms: 10_000,
            application_name: "querygate".to_string(),
        }
    }
}

/// Result set of a SELECT query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectResult {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<ResultRow>,
}

/// Contract every database driver implements.
///
/// All query methods take `&mut self`: a backend connection is a serial
/// resource, and callers (the resilience layer) own exclusive access for the
/// duration of each call.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Engine kind behind this connection.
    fn kind(&self) -> BackendKind;

    /// Establish the connection.
    async fn initialize(&mut self, config: &ConnectionConfig) -> Result<()>;

    /// Close the connection. Idempotent.
    async fn shutdown(&mut self) -> Result<()>;

    /// Whether the connection has been established and not shut down.
    fn is_initialized(&self) -> bool;

    /// Execute an INSERT statement, returning the number of rows inserted.
    async fn insert_query(&mut self, sql: &str) -> Result<u64>;

    /// Execute an UPDATE statement, returning the number of rows updated.
    async fn update_query(&mut self, sql: &str) -> Result<u64>;

    /// Execute a DELETE statement, returning the number of rows deleted.
    async fn delete_query(&mut self, sql: &str) -> Result<u64>;

    /// Execute a SELECT statement.
    async fn select_query(&mut self, sql: &str) -> Result<SelectResult>;

    /// Execute a statement with no result set (DDL, procedure call).
    async fn execute_query(&mut self, sql: &str) -> Result<()>;

    async fn begin_transaction(&mut self) -> Result<()>;

    async fn commit_transaction(&mut self) -> Result<()>;

    async fn rollback_transaction(&mut self) -> Result<()>;

    /// Whether a transaction is currently open on this connection.
    fn in_transaction(&self) -> bool;

    /// Most recent error reported by the driver, if any.
    fn last_error(&self) -> Option<String>;

    /// Driver-reported connection properties.
    fn connection_info(&self) -> HashMap<String, String>;
}
