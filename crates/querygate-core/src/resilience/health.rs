//! Connection health monitoring.
//!
//! Each resilient connection owns a monitor that runs a heartbeat probe
//! (`SELECT 1`) at a configurable cadence and folds every probe and user
//! operation into a rolling health picture:
//!
//! - consecutive success/failure streaks (each resets the other)
//! - a moving window of the last 10 operation latencies
//! - lifetime success/failure counters
//! - a weighted health score on a 0..=100 scale:
//!   40% success rate, 30% latency, 20% success streak, 10% uptime,
//!   minus 10 points per consecutive failure

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use querygate_error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::SharedBackend;

/// Number of latency samples kept in the moving window.
const MAX_LATENCY_SAMPLES: usize = 10;

/// Configuration for health monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    pub heartbeat_interval: Duration,
    /// Deadline for a single heartbeat probe.
    pub timeout: Duration,
    /// Consecutive failures before the connection counts as unhealthy.
    pub failure_threshold: u32,
    /// Minimum acceptable health score.
    pub min_health_score: u32,
    pub enable_heartbeat: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(5000),
            timeout: Duration::from_millis(2000),
            failure_threshold: 3,
            min_health_score: 50,
            enable_heartbeat: true,
        }
    }
}

/// Current health status of a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    /// 0..=100 scale.
    pub health_score: u32,
    /// Latency of the most recent probe or operation.
    pub latency: Duration,
    pub successful_queries: u64,
    pub failed_queries: u64,
    pub last_check_time: DateTime<Utc>,
    pub message: String,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            is_healthy: false,
            health_score: 0,
            latency: Duration::ZERO,
            successful_queries: 0,
            failed_queries: 0,
            last_check_time: Utc::now(),
            message: String::new(),
        }
    }
}

impl HealthStatus {
    /// Fraction of recorded operations that succeeded; 1.0 with no traffic.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.successful_queries + self.failed_queries;
        if total == 0 {
            return 1.0;
        }
        self.successful_queries as f64 / total as f64
    }
}

struct WindowState {
    latencies: VecDeque<Duration>,
    status: HealthStatus,
    started_at: Instant,
}

struct MonitorShared {
    backend: SharedBackend,
    config: HealthConfig,
    window: Mutex<WindowState>,
    total_queries: AtomicU64,
    successful_queries: AtomicU64,
    failed_queries: AtomicU64,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
}

/// Heartbeat-driven health monitor for one backend connection.
pub struct HealthMonitor {
    shared: Arc<MonitorShared>,
    monitoring: AtomicBool,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl HealthMonitor {
    pub(crate) fn new(backend: SharedBackend, config: HealthConfig) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                backend,
                config,
                window: Mutex::new(WindowState {
                    latencies: VecDeque::with_capacity(MAX_LATENCY_SAMPLES),
                    status: HealthStatus::default(),
                    started_at: Instant::now(),
                }),
                total_queries: AtomicU64::new(0),
                successful_queries: AtomicU64::new(0),
                failed_queries: AtomicU64::new(0),
                consecutive_failures: AtomicU32::new(0),
                consecutive_successes: AtomicU32::new(0),
            }),
            monitoring: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.shared.config
    }

    /// Launch the heartbeat loop. No-op when already running or when
    /// heartbeats are disabled.
    pub fn start_monitoring(&self) {
        if !self.shared.config.enable_heartbeat {
            return;
        }
        if self.monitoring.swap(true, Ordering::AcqRel) {
            return;
        }

        let token = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                let _ = MonitorShared::check_now(&shared).await;
                // Cancellation interrupts the sleep, so stop latency stays
                // well under the 100ms requirement.
                tokio::select! {
                    () = loop_token.cancelled() => break,
                    () = tokio::time::sleep(shared.config.heartbeat_interval) => {}
                }
            }
        });
        *self.task.lock() = Some((token, handle));
    }

    /// Stop the heartbeat loop, waiting at most 5 seconds for it to exit.
    pub async fn stop_monitoring(&self) {
        if !self.monitoring.swap(false, Ordering::AcqRel) {
            return;
        }
        let task = self.task.lock().take();
        if let Some((token, handle)) = task {
            token.cancel();
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("health monitor loop did not stop within 5s");
            }
        }
    }

    /// Run one probe immediately and return the resulting status.
    pub async fn check_now(&self) -> Result<HealthStatus> {
        MonitorShared::check_now(&self.shared).await
    }

    /// Fold a successful operation into the health picture.
    pub fn record_success(&self, latency: Duration) {
        self.shared.record_success(latency);
    }

    /// Fold a failed operation into the health picture.
    pub fn record_failure(&self, error_message: &str) {
        self.shared.record_failure(error_message);
    }

    /// Latest status snapshot.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        self.shared.window.lock().status.clone()
    }

    /// Healthy ⟺ failure streak below threshold and score at or above the
    /// configured minimum.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        let failures = self.shared.consecutive_failures.load(Ordering::Relaxed);
        failures < self.shared.config.failure_threshold
            && self.health_score() >= self.shared.config.min_health_score
    }

    #[must_use]
    pub fn health_score(&self) -> u32 {
        self.shared.window.lock().status.health_score
    }

    /// Advisory signal that the connection is trending toward failure.
    ///
    /// True when the failure streak is one short of the threshold, the score
    /// has dropped below 60, or the latest latency is more than twice the
    /// window average.
    #[must_use]
    pub fn predict_failure(&self) -> bool {
        let failures = self.shared.consecutive_failures.load(Ordering::Relaxed);
        if failures >= self.shared.config.failure_threshold.saturating_sub(1) {
            return true;
        }

        let window = self.shared.window.lock();
        if window.status.health_score < 60 {
            return true;
        }
        if !window.latencies.is_empty() {
            let avg = window.latencies.iter().sum::<Duration>() / window.latencies.len() as u32;
            if window.status.latency > avg * 2 {
                return true;
            }
        }
        false
    }

    /// Clear all counters, the latency window, and the uptime clock.
    pub fn reset_statistics(&self) {
        self.shared.total_queries.store(0, Ordering::Relaxed);
        self.shared.successful_queries.store(0, Ordering::Relaxed);
        self.shared.failed_queries.store(0, Ordering::Relaxed);
        self.shared.consecutive_failures.store(0, Ordering::Relaxed);
        self.shared.consecutive_successes.store(0, Ordering::Relaxed);

        let mut window = self.shared.window.lock();
        window.latencies.clear();
        window.status = HealthStatus::default();
        window.started_at = Instant::now();
    }
}

impl MonitorShared {
    async fn check_now(shared: &Arc<Self>) -> Result<HealthStatus> {
        if !shared.config.enable_heartbeat {
            return Ok(shared.window.lock().status.clone());
        }

        let started = Instant::now();
        let probe = {
            let mut backend = shared.backend.lock().await;
            if !backend.is_initialized() {
                let mut window = shared.window.lock();
                window.status.is_healthy = false;
                window.status.health_score = 0;
                window.status.message = "backend not initialized".to_string();
                window.status.last_check_time = Utc::now();
                return Err(GatewayError::connection_failed("backend not initialized"));
            }
            tokio::time::timeout(shared.config.timeout, backend.select_query("SELECT 1")).await
        };

        match probe {
            Ok(Ok(_)) => {
                shared.record_success(started.elapsed());
                debug!("heartbeat ok");
            }
            Ok(Err(e)) => shared.record_failure(&e.to_string()),
            Err(_) => shared.record_failure("heartbeat probe timed out"),
        }
        Ok(shared.window.lock().status.clone())
    }

    fn record_success(&self, latency: Duration) {
        self.consecutive_successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.successful_queries.fetch_add(1, Ordering::Relaxed);
        self.total_queries.fetch_add(1, Ordering::Relaxed);

        let mut window = self.window.lock();
        window.latencies.push_back(latency);
        if window.latencies.len() > MAX_LATENCY_SAMPLES {
            window.latencies.pop_front();
        }
        window.status.latency = latency;
        window.status.message = "connection healthy".to_string();
        self.refresh_status(&mut window);
    }

    fn record_failure(&self, error_message: &str) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.failed_queries.fetch_add(1, Ordering::Relaxed);
        self.total_queries.fetch_add(1, Ordering::Relaxed);

        let mut window = self.window.lock();
        window.status.message = error_message.to_string();
        self.refresh_status(&mut window);
    }

    fn refresh_status(&self, window: &mut WindowState) {
        window.status.successful_queries = self.successful_queries.load(Ordering::Relaxed);
        window.status.failed_queries = self.failed_queries.load(Ordering::Relaxed);
        window.status.health_score = self.calculate_health_score(window);
        window.status.is_healthy = self.consecutive_failures.load(Ordering::Relaxed)
            < self.config.failure_threshold
            && window.status.health_score >= self.config.min_health_score;
        window.status.last_check_time = Utc::now();
    }

    fn calculate_health_score(&self, window: &WindowState) -> u32 {
        let total = self.total_queries.load(Ordering::Relaxed);
        let successful = self.successful_queries.load(Ordering::Relaxed);
        let success_score = ((successful as f64 / total.max(1) as f64) * 40.0) as u32;

        let latency_score = if window.latencies.is_empty() {
            30
        } else {
            let avg = window.latencies.iter().sum::<Duration>() / window.latencies.len() as u32;
            match avg.as_millis() {
                0..=9 => 30,
                10..=49 => 25,
                50..=99 => 15,
                _ => 5,
            }
        };

        let streak_score = 2 * self.consecutive_successes.load(Ordering::Relaxed).min(10);

        let uptime_minutes = window.started_at.elapsed().as_secs() / 60;
        let uptime_score = (uptime_minutes / 6).min(10) as u32;

        let penalty = 10 * self.consecutive_failures.load(Ordering::Relaxed);

        (success_score + latency_score + streak_score + uptime_score)
            .saturating_sub(penalty)
            .min(100)
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("monitoring", &self.monitoring.load(Ordering::Relaxed))
            .field("status", &self.shared.window.lock().status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::backend::{ConnectionConfig, DatabaseBackend};

    async fn monitor_with_backend(config: HealthConfig) -> (HealthMonitor, crate::backend::mock::MockHandle) {
        let mut backend = MockBackend::new();
        let handle = backend.handle();
        backend
            .initialize(&ConnectionConfig::new("mock://health"))
            .await
            .unwrap();
        let shared: SharedBackend = Arc::new(tokio::sync::Mutex::new(Box::new(backend)));
        (HealthMonitor::new(shared, config), handle)
    }

    fn no_heartbeat() -> HealthConfig {
        HealthConfig {
            enable_heartbeat: false,
            ..HealthConfig::default()
        }
    }

    #[tokio::test]
    async fn test_score_after_successes() {
        let (monitor, _) = monitor_with_backend(no_heartbeat()).await;
        for _ in 0..10 {
            monitor.record_success(Duration::from_millis(5));
        }

        // 40 (all successful) + 30 (fast) + 20 (streak) + 0 (fresh uptime)
        assert_eq!(monitor.health_score(), 90);
        assert!(monitor.is_healthy());
    }

    #[tokio::test]
    async fn test_failures_reset_streak_and_penalize() {
        let (monitor, _) = monitor_with_backend(no_heartbeat()).await;
        for _ in 0..5 {
            monitor.record_success(Duration::from_millis(5));
        }
        monitor.record_failure("boom");
        monitor.record_failure("boom");

        let status = monitor.status();
        assert_eq!(status.failed_queries, 2);
        // Streak zeroed and 20 points of penalty: the score falls under the
        // minimum even though the failure streak is still below threshold.
        assert!(status.health_score < 50);
        assert!(!monitor.is_healthy());
    }

    #[tokio::test]
    async fn test_failure_threshold_alone_flips_health() {
        // Score requirement disabled: only the streak matters.
        let (monitor, _) = monitor_with_backend(HealthConfig {
            min_health_score: 0,
            enable_heartbeat: false,
            ..HealthConfig::default()
        })
        .await;

        monitor.record_failure("boom");
        monitor.record_failure("boom");
        assert!(monitor.is_healthy(), "two failures stay below threshold 3");

        monitor.record_failure("boom");
        assert!(!monitor.is_healthy(), "threshold reached");

        monitor.record_success(Duration::from_millis(5));
        assert!(monitor.is_healthy(), "a success clears the streak");
    }

    #[tokio::test]
    async fn test_latency_window_is_bounded() {
        let (monitor, _) = monitor_with_backend(no_heartbeat()).await;
        for _ in 0..50 {
            monitor.record_success(Duration::from_millis(200));
        }
        // Slow average caps the latency contribution at 5:
        // 40 + 5 + 20 + 0 = 65.
        assert_eq!(monitor.health_score(), 65);
    }

    #[tokio::test]
    async fn test_predict_failure_on_streak() {
        let (monitor, _) = monitor_with_backend(no_heartbeat()).await;
        monitor.record_success(Duration::from_millis(5));
        assert!(!monitor.predict_failure());

        monitor.record_failure("boom");
        monitor.record_failure("boom");
        assert!(monitor.predict_failure(), "streak one short of threshold");
    }

    #[tokio::test]
    async fn test_predict_failure_on_latency_spike() {
        let (monitor, _) = monitor_with_backend(no_heartbeat()).await;
        for _ in 0..9 {
            monitor.record_success(Duration::from_millis(2));
        }
        monitor.record_success(Duration::from_millis(100));
        assert!(monitor.predict_failure(), "latest latency over 2x average");
    }

    #[tokio::test]
    async fn test_heartbeat_loop_probes_backend() {
        let config = HealthConfig {
            heartbeat_interval: Duration::from_millis(20),
            ..HealthConfig::default()
        };
        let (monitor, handle) = monitor_with_backend(config).await;

        monitor.start_monitoring();
        tokio::time::sleep(Duration::from_millis(90)).await;
        monitor.stop_monitoring().await;

        assert!(handle.query_calls() >= 2, "heartbeat probes ran");
        assert!(monitor.is_healthy());

        let probes_after_stop = handle.query_calls();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(handle.query_calls(), probes_after_stop, "loop stopped");
    }

    #[tokio::test]
    async fn test_check_now_records_failure() {
        let (monitor, handle) = monitor_with_backend(HealthConfig::default()).await;
        handle.fail_next_ops(1);

        let status = monitor.check_now().await.unwrap();
        assert_eq!(status.failed_queries, 1);
        assert!(status.message.contains("scripted failure"));
    }

    #[tokio::test]
    async fn test_reset_statistics() {
        let (monitor, _) = monitor_with_backend(no_heartbeat()).await;
        monitor.record_success(Duration::from_millis(5));
        monitor.record_failure("boom");

        monitor.reset_statistics();
        let status = monitor.status();
        assert_eq!(status.successful_queries, 0);
        assert_eq!(status.failed_queries, 0);
        assert_eq!(status.health_score, 0);
    }

    #[test]
    fn test_success_rate() {
        let status = HealthStatus {
            successful_queries: 3,
            failed_queries: 1,
            ..HealthStatus::default()
        };
        assert!((status.success_rate() - 0.75).abs() < 1e-9);
        assert!((HealthStatus::default().success_rate() - 1.0).abs() < 1e-9);
    }
}
