//! Resilient database connection.
//!
//! Wraps a [`DatabaseBackend`] with automatic reconnection (exponential
//! backoff), a [`HealthMonitor`], and transparent one-shot retry of
//! idempotent operations. A transaction in progress disables the retry path
//! entirely: a mid-transaction reconnect cannot preserve backend state, so
//! correctness takes precedence over resilience.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use querygate_error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::health::{HealthConfig, HealthMonitor};
use super::SharedBackend;
use crate::backend::{ConnectionConfig, DatabaseBackend, SelectResult};

/// Configuration for automatic reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_retries: u32,
    pub enable_auto_reconnect: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            max_retries: 10,
            enable_auto_reconnect: true,
        }
    }
}

/// State of a resilient connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Failed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            4 => Self::Failed,
            _ => unreachable!("invalid connection state encoding"),
        }
    }

    /// Check if a transition is valid.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Failed, Reconnecting};

        matches!(
            (self, next),
            (Disconnected | Failed, Connecting)
                | (Connecting | Reconnecting, Connected | Failed)
                | (Connected | Reconnecting | Failed | Disconnected, Reconnecting)
                | (_, Disconnected)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Idempotent operations eligible for retry-with-reconnect.
enum Operation<'q> {
    Insert(&'q str),
    Update(&'q str),
    Delete(&'q str),
    Select(&'q str),
    Execute(&'q str),
}

enum Outcome {
    Rows(u64),
    Select(SelectResult),
    Unit,
}

impl Operation<'_> {
    async fn run(&self, backend: &mut Box<dyn DatabaseBackend>) -> Result<Outcome> {
        match self {
            Self::Insert(sql) => backend.insert_query(sql).await.map(Outcome::Rows),
            Self::Update(sql) => backend.update_query(sql).await.map(Outcome::Rows),
            Self::Delete(sql) => backend.delete_query(sql).await.map(Outcome::Rows),
            Self::Select(sql) => backend.select_query(sql).await.map(Outcome::Select),
            Self::Execute(sql) => backend.execute_query(sql).await.map(|()| Outcome::Unit),
        }
    }
}

/// Database connection wrapper with automatic reconnection.
pub struct ResilientConnection {
    backend: SharedBackend,
    config: ReconnectConfig,
    monitor: HealthMonitor,
    stored_config: Mutex<Option<ConnectionConfig>>,
    state: AtomicU8,
    retry_count: AtomicU32,
    in_txn: AtomicBool,
    last_error: Mutex<String>,
}

impl ResilientConnection {
    /// Wrap a backend with default health monitoring.
    #[must_use]
    pub fn new(backend: Box<dyn DatabaseBackend>, config: ReconnectConfig) -> Self {
        Self::with_health_config(backend, config, HealthConfig::default())
    }

    /// Wrap a backend with explicit health monitoring configuration.
    #[must_use]
    pub fn with_health_config(
        backend: Box<dyn DatabaseBackend>,
        config: ReconnectConfig,
        health: HealthConfig,
    ) -> Self {
        let backend: SharedBackend = Arc::new(tokio::sync::Mutex::new(backend));
        let monitor = HealthMonitor::new(Arc::clone(&backend), health);
        Self {
            backend,
            config,
            monitor,
            stored_config: Mutex::new(None),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            retry_count: AtomicU32::new(0),
            in_txn: AtomicBool::new(false),
            last_error: Mutex::new(String::new()),
        }
    }

    /// Establish the connection and start health monitoring.
    ///
    /// The configuration is stored so later reconnect attempts can
    /// re-establish the session with identical parameters.
    pub async fn initialize(&self, config: &ConnectionConfig) -> Result<()> {
        *self.stored_config.lock() = Some(config.clone());
        self.set_state(ConnectionState::Connecting);

        let result = {
            let mut backend = self.backend.lock().await;
            backend.initialize(config).await
        };

        match result {
            Err(e) => {
                self.set_state(ConnectionState::Failed);
                *self.last_error.lock() = e.to_string();
                Err(e)
            }
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                self.retry_count.store(0, Ordering::Relaxed);
                self.monitor.start_monitoring();
                Ok(())
            }
        }
    }

    /// Close the connection and stop monitoring.
    pub async fn shutdown(&self) -> Result<()> {
        self.monitor.stop_monitoring().await;
        let result = {
            let mut backend = self.backend.lock().await;
            backend.shutdown().await
        };
        self.set_state(ConnectionState::Disconnected);
        result
    }

    /// Whether the connection is currently established.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub async fn insert_query(&self, sql: &str) -> Result<u64> {
        match self.execute_with_retry(Operation::Insert(sql)).await? {
            Outcome::Rows(n) => Ok(n),
            _ => unreachable!("insert yields a row count"),
        }
    }

    pub async fn update_query(&self, sql: &str) -> Result<u64> {
        match self.execute_with_retry(Operation::Update(sql)).await? {
            Outcome::Rows(n) => Ok(n),
            _ => unreachable!("update yields a row count"),
        }
    }

    pub async fn delete_query(&self, sql: &str) -> Result<u64> {
        match self.execute_with_retry(Operation::Delete(sql)).await? {
            Outcome::Rows(n) => Ok(n),
            _ => unreachable!("delete yields a row count"),
        }
    }

    pub async fn select_query(&self, sql: &str) -> Result<SelectResult> {
        match self.execute_with_retry(Operation::Select(sql)).await? {
            Outcome::Select(result) => Ok(result),
            _ => unreachable!("select yields a result set"),
        }
    }

    pub async fn execute_query(&self, sql: &str) -> Result<()> {
        match self.execute_with_retry(Operation::Execute(sql)).await? {
            Outcome::Unit => Ok(()),
            _ => unreachable!("execute yields no result"),
        }
    }

    /// Begin a transaction, reconnecting first if needed.
    ///
    /// Transactions require a stable connection; once open, no operation on
    /// this connection is retried until commit or rollback.
    pub async fn begin_transaction(&self) -> Result<()> {
        self.ensure_connected().await?;
        let result = {
            let mut backend = self.backend.lock().await;
            backend.begin_transaction().await
        };
        if result.is_ok() {
            self.in_txn.store(true, Ordering::Release);
        }
        result
    }

    /// Commit the open transaction. Never retried: a reissued commit after a
    /// connection drop risks committing twice.
    pub async fn commit_transaction(&self) -> Result<()> {
        let result = {
            let mut backend = self.backend.lock().await;
            backend.commit_transaction().await
        };
        if result.is_ok() {
            self.in_txn.store(false, Ordering::Release);
        }
        result
    }

    /// Roll back the open transaction. Never retried.
    pub async fn rollback_transaction(&self) -> Result<()> {
        let result = {
            let mut backend = self.backend.lock().await;
            backend.rollback_transaction().await
        };
        if result.is_ok() {
            self.in_txn.store(false, Ordering::Release);
        }
        result
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_txn.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }

    /// Backend connection properties enriched with resilience state.
    pub async fn connection_info(&self) -> HashMap<String, String> {
        let mut info = {
            let backend = self.backend.lock().await;
            backend.connection_info()
        };

        info.insert(
            "resilience_enabled".to_string(),
            self.config.enable_auto_reconnect.to_string(),
        );
        info.insert("connection_state".to_string(), self.state().to_string());
        info.insert(
            "retry_count".to_string(),
            self.retry_count().to_string(),
        );

        let health = self.monitor.status();
        info.insert("health_score".to_string(), health.health_score.to_string());
        info.insert("is_healthy".to_string(), self.monitor.is_healthy().to_string());

        info
    }

    /// Reconnect unless already connected.
    pub async fn ensure_connected(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        self.attempt_reconnect().await
    }

    /// Run a heartbeat probe immediately.
    pub async fn check_health(&self) -> Result<super::HealthStatus> {
        self.monitor.check_now().await
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Reconnection attempts since the last successful operation.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Run an idempotent operation, reconnecting and retrying once on
    /// failure.
    ///
    /// 1. A transaction in progress bypasses retry entirely.
    /// 2. Success records latency with the monitor and resets the retry
    ///    counter.
    /// 3. Failure records the failure; with auto-reconnect disabled the
    ///    error returns verbatim.
    /// 4. Otherwise one reconnect is attempted; on reconnect success the
    ///    operation runs exactly once more. Reconnect failure surfaces the
    ///    original operation error, never the reconnect error.
    async fn execute_with_retry(&self, operation: Operation<'_>) -> Result<Outcome> {
        if self.in_transaction() {
            let mut backend = self.backend.lock().await;
            return operation.run(&mut backend).await;
        }

        let started = Instant::now();
        let result = {
            let mut backend = self.backend.lock().await;
            operation.run(&mut backend).await
        };

        match result {
            Ok(outcome) => {
                self.monitor.record_success(started.elapsed());
                self.retry_count.store(0, Ordering::Relaxed);
                Ok(outcome)
            }
            Err(original) => {
                self.monitor.record_failure(&original.to_string());

                if !self.config.enable_auto_reconnect {
                    *self.last_error.lock() = original.to_string();
                    return Err(original);
                }

                if self.attempt_reconnect().await.is_err() {
                    return Err(original);
                }

                let retry_started = Instant::now();
                let retry = {
                    let mut backend = self.backend.lock().await;
                    operation.run(&mut backend).await
                };
                match retry {
                    Ok(outcome) => {
                        self.monitor.record_success(retry_started.elapsed());
                        self.retry_count.store(0, Ordering::Relaxed);
                        Ok(outcome)
                    }
                    Err(e) => {
                        self.monitor.record_failure(&e.to_string());
                        *self.last_error.lock() = e.to_string();
                        Err(e)
                    }
                }
            }
        }
    }

    /// One reconnection attempt with exponential backoff.
    async fn attempt_reconnect(&self) -> Result<()> {
        if !self.config.enable_auto_reconnect {
            return Err(GatewayError::connection_failed("auto reconnect disabled"));
        }

        self.set_state(ConnectionState::Reconnecting);

        let attempts = self.retry_count.load(Ordering::Relaxed);
        if attempts >= self.config.max_retries {
            self.set_state(ConnectionState::Failed);
            *self.last_error.lock() = "max reconnection retries exceeded".to_string();
            return Err(GatewayError::connection_failed(
                "max reconnection retries exceeded",
            ));
        }

        let delay = self.next_delay(attempts);
        warn!(
            attempt = attempts + 1,
            delay_ms = delay.as_millis() as u64,
            "reconnecting to backend"
        );
        tokio::time::sleep(delay).await;

        let Some(config) = self.stored_config.lock().clone() else {
            self.set_state(ConnectionState::Failed);
            return Err(GatewayError::internal("no stored connection config"));
        };

        let result = {
            let mut backend = self.backend.lock().await;
            // The old session is assumed gone; shutdown failures are moot.
            let _ = backend.shutdown().await;
            backend.initialize(&config).await
        };

        match result {
            Err(e) => {
                self.retry_count.fetch_add(1, Ordering::Relaxed);
                *self.last_error.lock() = e.to_string();
                self.set_state(ConnectionState::Failed);
                Err(e)
            }
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                self.retry_count.store(0, Ordering::Relaxed);
                self.monitor.reset_statistics();
                self.monitor.start_monitoring();
                debug!("backend reconnected");
                Ok(())
            }
        }
    }

    /// `min(initial_delay * multiplier^attempts, max_delay)`.
    fn next_delay(&self, attempts: u32) -> Duration {
        let delay_ms = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi(attempts as i32);
        let capped = delay_ms.min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn set_state(&self, next: ConnectionState) {
        let current = self.state();
        assert!(
            current.can_transition_to(next),
            "invalid connection state transition: {current} -> {next}"
        );
        self.state.store(next as u8, Ordering::Release);
    }
}

impl std::fmt::Debug for ResilientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientConnection")
            .field("state", &self.state())
            .field("retry_count", &self.retry_count())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBackend, MockHandle};

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            max_retries: 3,
            enable_auto_reconnect: true,
        }
    }

    fn no_heartbeat() -> HealthConfig {
        HealthConfig {
            enable_heartbeat: false,
            ..HealthConfig::default()
        }
    }

    async fn connected(config: ReconnectConfig) -> (ResilientConnection, MockHandle) {
        let backend = MockBackend::new().with_affected_rows(1);
        let handle = backend.handle();
        let conn = ResilientConnection::with_health_config(
            Box::new(backend),
            config,
            no_heartbeat(),
        );
        conn.initialize(&ConnectionConfig::new("mock://resilient"))
            .await
            .unwrap();
        (conn, handle)
    }

    #[tokio::test]
    async fn test_initialize_transitions_to_connected() {
        let (conn, handle) = connected(fast_reconnect()).await;
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.is_initialized());
        assert_eq!(handle.initialize_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_initialize_transitions_to_failed() {
        let backend = MockBackend::new();
        backend.handle().fail_next_initializations(1);
        let conn = ResilientConnection::with_health_config(
            Box::new(backend),
            fast_reconnect(),
            no_heartbeat(),
        );

        let err = conn
            .initialize(&ConnectionConfig::new("mock://bad"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionFailed { .. }));
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let (conn, handle) = connected(fast_reconnect()).await;
        handle.fail_next_ops(1);

        let result = conn.select_query("SELECT * FROM users").await.unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(conn.retry_count(), 0, "retry count resets on success");
        assert_eq!(conn.state(), ConnectionState::Connected);
        // initialize + reconnect initialize
        assert_eq!(handle.initialize_calls(), 2);
        assert!(conn.monitor().status().successful_queries >= 1);
    }

    #[tokio::test]
    async fn test_original_error_surfaces_when_reconnect_fails() {
        let (conn, handle) = connected(fast_reconnect()).await;
        handle.fail_next_ops(1);
        handle.fail_next_initializations(5);

        let err = conn.select_query("SELECT 1").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Backend error (-3): scripted failure",
            "caller sees the operation error, not the reconnect error"
        );
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert_eq!(conn.retry_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_max_retries_returns_original_error() {
        let config = ReconnectConfig {
            max_retries: 0,
            ..fast_reconnect()
        };
        let (conn, handle) = connected(config).await;
        handle.fail_next_ops(1);

        let err = conn.select_query("SELECT 1").await.unwrap_err();
        assert!(matches!(err, GatewayError::Backend { .. }));
        assert_eq!(handle.initialize_calls(), 1, "no reconnect attempted");
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_disabled_auto_reconnect_returns_error_verbatim() {
        let config = ReconnectConfig {
            enable_auto_reconnect: false,
            ..fast_reconnect()
        };
        let (conn, handle) = connected(config).await;
        handle.fail_next_ops(1);

        let err = conn.update_query("UPDATE t SET x = 1").await.unwrap_err();
        assert!(matches!(err, GatewayError::Backend { .. }));
        assert_eq!(handle.initialize_calls(), 1);
        assert_eq!(conn.last_error(), err.to_string());
    }

    #[tokio::test]
    async fn test_transaction_bypasses_retry() {
        let (conn, handle) = connected(fast_reconnect()).await;
        conn.begin_transaction().await.unwrap();
        assert!(conn.in_transaction());

        handle.fail_next_ops(1);
        let err = conn.update_query("UPDATE t SET x = 1").await.unwrap_err();
        assert!(matches!(err, GatewayError::Backend { .. }));
        assert_eq!(handle.initialize_calls(), 1, "no reconnect inside a transaction");

        conn.rollback_transaction().await.unwrap();
        assert!(!conn.in_transaction());
    }

    #[tokio::test]
    async fn test_commit_clears_transaction_flag() {
        let (conn, _) = connected(fast_reconnect()).await;
        conn.begin_transaction().await.unwrap();
        conn.insert_query("INSERT INTO t VALUES (1)").await.unwrap();
        conn.commit_transaction().await.unwrap();
        assert!(!conn.in_transaction());
    }

    #[tokio::test]
    async fn test_backoff_delays() {
        let conn = ResilientConnection::with_health_config(
            Box::new(MockBackend::new()),
            ReconnectConfig {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(350),
                backoff_multiplier: 2.0,
                max_retries: 10,
                enable_auto_reconnect: true,
            },
            no_heartbeat(),
        );

        assert_eq!(conn.next_delay(0), Duration::from_millis(100));
        assert_eq!(conn.next_delay(1), Duration::from_millis(200));
        assert_eq!(conn.next_delay(2), Duration::from_millis(350), "capped");
        assert_eq!(conn.next_delay(10), Duration::from_millis(350), "capped");
    }

    #[tokio::test]
    async fn test_shutdown_transitions_to_disconnected() {
        let (conn, handle) = connected(fast_reconnect()).await;
        conn.shutdown().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_initialized());
        assert_eq!(handle.shutdown_calls(), 1);
    }

    #[tokio::test]
    async fn test_connection_info_carries_resilience_fields() {
        let (conn, _) = connected(fast_reconnect()).await;
        let info = conn.connection_info().await;
        assert_eq!(info.get("resilience_enabled").unwrap(), "true");
        assert_eq!(info.get("connection_state").unwrap(), "connected");
        assert_eq!(info.get("retry_count").unwrap(), "0");
        assert!(info.contains_key("health_score"));
    }

    #[test]
    fn test_state_transition_table() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Failed));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connected));
        assert!(Reconnecting.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Connecting));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
    }
}
