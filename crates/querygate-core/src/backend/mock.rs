//! Scripted in-memory backend for tests.
//!
//! `MockBackend` lets tests script failures, latency, and canned result
//! sets, and inspect call counts after the backend has been moved into a
//! pool via a shared [`MockHandle`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use querygate_error::{GatewayError, Result};

use super::{BackendKind, ConnectionConfig, DatabaseBackend, SelectResult};
use crate::protocol::{CellValue, ColumnMetadata, ResultRow};

#[derive(Debug, Default)]
struct MockState {
    initialized: bool,
    in_transaction: bool,
    /// Number of upcoming query operations that fail before succeeding again.
    failing_ops: u32,
    /// Number of upcoming initialize calls that fail.
    failing_initializations: u32,
    latency: Duration,
    select_result: SelectResult,
    affected_rows: u64,
    last_error: Option<String>,

    // Call counters for assertions.
    initialize_calls: u64,
    shutdown_calls: u64,
    query_calls: u64,
}

/// Shared inspection/scripting handle for a [`MockBackend`].
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    pub fn initialize_calls(&self) -> u64 {
        self.state.lock().initialize_calls
    }

    pub fn shutdown_calls(&self) -> u64 {
        self.state.lock().shutdown_calls
    }

    pub fn query_calls(&self) -> u64 {
        self.state.lock().query_calls
    }

    /// Make the next `n` query operations fail with a backend error.
    pub fn fail_next_ops(&self, n: u32) {
        self.state.lock().failing_ops = n;
    }

    /// Make the next `n` initialize calls fail.
    pub fn fail_next_initializations(&self, n: u32) {
        self.state.lock().failing_initializations = n;
    }
}

/// Scripted backend implementing [`DatabaseBackend`].
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for scripting and post-hoc inspection.
    #[must_use]
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Canned result for SELECT queries.
    #[must_use]
    pub fn with_select_result(self, result: SelectResult) -> Self {
        self.state.lock().select_result = result;
        self
    }

    /// Affected-row count reported by write queries.
    #[must_use]
    pub fn with_affected_rows(self, rows: u64) -> Self {
        self.state.lock().affected_rows = rows;
        self
    }

    /// Artificial latency applied to every query operation.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    /// Convenience: a three-row `(id, name)` result set.
    #[must_use]
    pub fn sample_rows() -> SelectResult {
        SelectResult {
            columns: vec![
                ColumnMetadata {
                    name: "id".to_string(),
                    type_name: "int8".to_string(),
                    ..ColumnMetadata::default()
                },
                ColumnMetadata {
                    name: "name".to_string(),
                    type_name: "text".to_string(),
                    ..ColumnMetadata::default()
                },
            ],
            rows: (1..=3)
                .map(|i| ResultRow {
                    cells: vec![CellValue::Int(i), CellValue::Text(format!("row-{i}"))],
                })
                .collect(),
        }
    }

    async fn run_query(&self) -> Result<()> {
        let latency = {
            let mut state = self.state.lock();
            state.query_calls += 1;
            if !state.initialized {
                state.last_error = Some("not initialized".to_string());
                return Err(GatewayError::connection_failed("backend not initialized"));
            }
            if state.failing_ops > 0 {
                state.failing_ops -= 1;
                state.last_error = Some("scripted failure".to_string());
                return Err(GatewayError::backend(-3, "scripted failure"));
            }
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    async fn initialize(&mut self, _config: &ConnectionConfig) -> Result<()> {
        let mut state = self.state.lock();
        state.initialize_calls += 1;
        if state.failing_initializations > 0 {
            state.failing_initializations -= 1;
            state.last_error = Some("scripted connect failure".to_string());
            return Err(GatewayError::connection_failed("scripted connect failure"));
        }
        state.initialized = true;
        state.in_transaction = false;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.shutdown_calls += 1;
        state.initialized = false;
        state.in_transaction = false;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    async fn insert_query(&mut self, _sql: &str) -> Result<u64> {
        self.run_query().await?;
        Ok(self.state.lock().affected_rows)
    }

    async fn update_query(&mut self, _sql: &str) -> Result<u64> {
        self.run_query().await?;
        Ok(self.state.lock().affected_rows)
    }

    async fn delete_query(&mut self, _sql: &str) -> Result<u64> {
        self.run_query().await?;
        Ok(self.state.lock().affected_rows)
    }

    async fn select_query(&mut self, _sql: &str) -> Result<SelectResult> {
        self.run_query().await?;
        Ok(self.state.lock().select_result.clone())
    }

    async fn execute_query(&mut self, _sql: &str) -> Result<()> {
        self.run_query().await
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        self.run_query().await?;
        let mut state = self.state.lock();
        if state.in_transaction {
            return Err(GatewayError::backend(-10, "transaction already open"));
        }
        state.in_transaction = true;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        self.run_query().await?;
        self.state.lock().in_transaction = false;
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        self.run_query().await?;
        self.state.lock().in_transaction = false;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state.lock().in_transaction
    }

    fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    fn connection_info(&self) -> HashMap<String, String> {
        let state = self.state.lock();
        let mut info = HashMap::new();
        info.insert("backend".to_string(), "mock".to_string());
        info.insert("initialized".to_string(), state.initialized.to_string());
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requires_initialization() {
        let mut backend = MockBackend::new();
        let err = backend.select_query("SELECT 1").await.unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionFailed { .. }));
    }

    #[tokio::test]
    async fn test_scripted_failures_then_recovery() {
        let mut backend = MockBackend::new();
        let handle = backend.handle();
        backend
            .initialize(&ConnectionConfig::new("mock://"))
            .await
            .unwrap();

        handle.fail_next_ops(2);
        assert!(backend.select_query("SELECT 1").await.is_err());
        assert!(backend.select_query("SELECT 1").await.is_err());
        assert!(backend.select_query("SELECT 1").await.is_ok());
        assert_eq!(handle.query_calls(), 3);
    }

    #[tokio::test]
    async fn test_transaction_flags() {
        let mut backend = MockBackend::new();
        backend
            .initialize(&ConnectionConfig::new("mock://"))
            .await
            .unwrap();

        backend.begin_transaction().await.unwrap();
        assert!(backend.in_transaction());
        backend.commit_transaction().await.unwrap();
        assert!(!backend.in_transaction());
    }
}
