//! Authentication middleware.
//!
//! Validates client tokens through an injected [`TokenValidator`], applies
//! per-client rate limiting, and keeps an audit trail of security events.
//! Token contents are opaque to the gateway.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::session::ClientSession;
use crate::protocol::{AuthToken, QueryRequest, StatusCode};

/// Most recent audit events retained in memory.
const EVENT_BUFFER_CAP: usize = 1024;

/// Configuration for authentication middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Re-validate the token on every request instead of once per session.
    pub validate_on_each_request: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            validate_on_each_request: false,
        }
    }
}

/// Configuration for per-client rate limiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Sustained request budget per second.
    pub requests_per_second: u32,
    /// Transient spike allowance within the window.
    pub burst_size: u32,
    pub window_size_ms: u32,
    /// How long a client stays blocked after exceeding its budget.
    pub block_duration_ms: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 100,
            burst_size: 200,
            window_size_ms: 1000,
            block_duration_ms: 60_000,
        }
    }
}

/// Result of validating a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub success: bool,
    pub status: StatusCode,
    pub message: String,
    pub client_id: String,
    pub permissions: Vec<String>,
}

impl AuthOutcome {
    /// A successful validation for `client_id`.
    #[must_use]
    pub fn ok(client_id: impl Into<String>) -> Self {
        Self {
            success: true,
            status: StatusCode::Ok,
            message: String::new(),
            client_id: client_id.into(),
            permissions: Vec::new(),
        }
    }

    /// A rejected validation.
    #[must_use]
    pub fn rejected(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status,
            message: message.into(),
            client_id: String::new(),
            permissions: Vec::new(),
        }
    }
}

/// Pluggable token validation; the gateway never decodes tokens itself.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &AuthToken) -> AuthOutcome;
}

/// Pluggable per-client admission control.
pub trait RateLimiter: Send + Sync {
    /// Whether `client_id` may issue one more request now.
    fn allow(&self, client_id: &str) -> bool;
}

struct ClientWindow {
    timestamps: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

/// Sliding-window rate limiter keyed by client id.
///
/// A request is admitted while the window holds fewer than `burst_size`
/// requests and the trailing second holds fewer than `requests_per_second`.
/// A violation blocks the client for `block_duration_ms`.
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    clients: DashMap<String, ClientWindow>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn allow(&self, client_id: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        let now = Instant::now();
        let window = Duration::from_millis(u64::from(self.config.window_size_ms));

        let mut entry = self
            .clients
            .entry(client_id.to_string())
            .or_insert_with(|| ClientWindow {
                timestamps: VecDeque::new(),
                blocked_until: None,
            });

        if let Some(blocked_until) = entry.blocked_until {
            if now < blocked_until {
                return false;
            }
            entry.blocked_until = None;
            entry.timestamps.clear();
        }

        while entry
            .timestamps
            .front()
            .is_some_and(|t| now.duration_since(*t) > window)
        {
            entry.timestamps.pop_front();
        }

        let in_window = entry.timestamps.len();
        let in_last_second = entry
            .timestamps
            .iter()
            .rev()
            .take_while(|t| now.duration_since(**t) <= Duration::from_secs(1))
            .count();

        if in_window >= self.config.burst_size as usize
            || in_last_second >= self.config.requests_per_second as usize
        {
            entry.blocked_until =
                Some(now + Duration::from_millis(u64::from(self.config.block_duration_ms)));
            warn!(client_id, "client exceeded rate limit; blocking");
            return false;
        }

        entry.timestamps.push_back(now);
        true
    }
}

/// Kinds of authentication events for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventKind {
    AuthSuccess,
    AuthFailure,
    TokenExpired,
    RateLimited,
    PermissionDenied,
}

/// One audit-trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub client_id: String,
    pub session_id: String,
    pub details: String,
    /// Unix epoch milliseconds.
    pub timestamp_ms: u64,
}

/// Lock-free authentication counters.
#[derive(Debug, Default)]
pub struct AuthMetrics {
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub expired_tokens: AtomicU64,
    pub rate_limited: AtomicU64,
}

impl AuthMetrics {
    #[must_use]
    pub fn snapshot(&self) -> AuthMetricsSnapshot {
        AuthMetricsSnapshot {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            expired_tokens: self.expired_tokens.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of [`AuthMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMetricsSnapshot {
    pub successes: u64,
    pub failures: u64,
    pub expired_tokens: u64,
    pub rate_limited: u64,
}

/// Verdict on one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    Denied { status: StatusCode, message: String },
}

/// Authentication and admission pipeline in front of the router.
pub struct AuthMiddleware {
    config: AuthConfig,
    validator: Arc<dyn TokenValidator>,
    limiter: Arc<dyn RateLimiter>,
    metrics: AuthMetrics,
    events: Mutex<VecDeque<AuthEvent>>,
}

impl AuthMiddleware {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        validator: Arc<dyn TokenValidator>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            validator,
            limiter,
            metrics: AuthMetrics::default(),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Authenticate and admit one request for `session`.
    ///
    /// On first success the session is marked authenticated; later requests
    /// skip validation unless `validate_on_each_request` is set. Rate
    /// limiting applies to every admitted request.
    pub fn authenticate(
        &self,
        session: &mut ClientSession,
        request: &QueryRequest,
    ) -> AuthDecision {
        if !self.config.enabled {
            return self.admit(session);
        }

        if session.authenticated && !self.config.validate_on_each_request {
            return self.admit(session);
        }

        if request.token.is_expired() {
            self.metrics.expired_tokens.fetch_add(1, Ordering::Relaxed);
            self.push_event(
                AuthEventKind::TokenExpired,
                &request.token.client_id,
                session,
                "token expired",
            );
            return AuthDecision::Denied {
                status: StatusCode::AuthFailed,
                message: "authentication token expired".to_string(),
            };
        }

        let outcome = self.validator.validate(&request.token);
        if !outcome.success {
            self.metrics.failures.fetch_add(1, Ordering::Relaxed);
            self.push_event(
                AuthEventKind::AuthFailure,
                &request.token.client_id,
                session,
                &outcome.message,
            );
            return AuthDecision::Denied {
                status: outcome.status,
                message: outcome.message,
            };
        }

        session.authenticate(outcome.client_id);
        self.metrics.successes.fetch_add(1, Ordering::Relaxed);
        let client_id = session.client_id.clone();
        self.push_event(AuthEventKind::AuthSuccess, &client_id, session, "authenticated");

        self.admit(session)
    }

    /// Rate-limit admission for an already-authenticated session.
    fn admit(&self, session: &ClientSession) -> AuthDecision {
        let client_id = if session.client_id.is_empty() {
            session.session_id.as_str()
        } else {
            &session.client_id
        };

        if self.limiter.allow(client_id) {
            debug!(client_id, "request admitted");
            return AuthDecision::Allowed;
        }

        self.metrics.rate_limited.fetch_add(1, Ordering::Relaxed);
        self.push_event(
            AuthEventKind::RateLimited,
            client_id,
            session,
            "rate limit exceeded",
        );
        AuthDecision::Denied {
            status: StatusCode::RateLimited,
            message: "rate limit exceeded".to_string(),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &AuthMetrics {
        &self.metrics
    }

    /// Most recent audit events, newest last.
    #[must_use]
    pub fn recent_events(&self, limit: usize) -> Vec<AuthEvent> {
        let events = self.events.lock();
        events
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    fn push_event(
        &self,
        kind: AuthEventKind,
        client_id: &str,
        session: &ClientSession,
        details: &str,
    ) {
        let mut events = self.events.lock();
        if events.len() >= EVENT_BUFFER_CAP {
            events.pop_front();
        }
        events.push_back(AuthEvent {
            kind,
            client_id: client_id.to_string(),
            session_id: session.session_id.to_string(),
            details: details.to_string(),
            timestamp_ms: Utc::now().timestamp_millis().max(0) as u64,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QueryType;

    struct StaticValidator {
        accept: &'static str,
    }

    impl TokenValidator for StaticValidator {
        fn validate(&self, token: &AuthToken) -> AuthOutcome {
            if token.token == self.accept {
                AuthOutcome::ok(token.client_id.clone())
            } else {
                AuthOutcome::rejected(StatusCode::AuthFailed, "invalid token")
            }
        }
    }

    struct AllowAll;

    impl RateLimiter for AllowAll {
        fn allow(&self, _client_id: &str) -> bool {
            true
        }
    }

    fn request_with_token(token: &str) -> QueryRequest {
        let mut request = QueryRequest::new("SELECT 1", QueryType::Select);
        request.token = AuthToken {
            token: token.to_string(),
            client_id: "client-1".to_string(),
            expires_at_ms: 0,
        };
        request
    }

    fn middleware(config: AuthConfig) -> AuthMiddleware {
        AuthMiddleware::new(
            config,
            Arc::new(StaticValidator { accept: "good" }),
            Arc::new(AllowAll),
        )
    }

    #[test]
    fn test_valid_token_authenticates_session() {
        let auth = middleware(AuthConfig::default());
        let mut session = ClientSession::new();

        let decision = auth.authenticate(&mut session, &request_with_token("good"));
        assert_eq!(decision, AuthDecision::Allowed);
        assert!(session.authenticated);
        assert_eq!(session.client_id, "client-1");
        assert_eq!(auth.metrics().snapshot().successes, 1);
    }

    #[test]
    fn test_invalid_token_denied() {
        let auth = middleware(AuthConfig::default());
        let mut session = ClientSession::new();

        let decision = auth.authenticate(&mut session, &request_with_token("bad"));
        assert!(matches!(
            decision,
            AuthDecision::Denied {
                status: StatusCode::AuthFailed,
                ..
            }
        ));
        assert!(!session.authenticated);
        assert_eq!(auth.metrics().snapshot().failures, 1);
    }

    #[test]
    fn test_expired_token_denied() {
        let auth = middleware(AuthConfig::default());
        let mut session = ClientSession::new();
        let mut request = request_with_token("good");
        request.token.expires_at_ms = 1;

        let decision = auth.authenticate(&mut session, &request);
        assert!(matches!(decision, AuthDecision::Denied { .. }));
        assert_eq!(auth.metrics().snapshot().expired_tokens, 1);
    }

    #[test]
    fn test_authenticated_session_skips_validation() {
        let auth = middleware(AuthConfig::default());
        let mut session = ClientSession::new();
        auth.authenticate(&mut session, &request_with_token("good"));

        // A bad token on an authenticated session passes: validation runs
        // once per session unless configured otherwise.
        let decision = auth.authenticate(&mut session, &request_with_token("bad"));
        assert_eq!(decision, AuthDecision::Allowed);

        let strict = middleware(AuthConfig {
            validate_on_each_request: true,
            ..AuthConfig::default()
        });
        let mut session = ClientSession::new();
        strict.authenticate(&mut session, &request_with_token("good"));
        let decision = strict.authenticate(&mut session, &request_with_token("bad"));
        assert!(matches!(decision, AuthDecision::Denied { .. }));
    }

    #[test]
    fn test_disabled_auth_admits_everyone() {
        let auth = middleware(AuthConfig {
            enabled: false,
            ..AuthConfig::default()
        });
        let mut session = ClientSession::new();
        let decision = auth.authenticate(&mut session, &request_with_token("anything"));
        assert_eq!(decision, AuthDecision::Allowed);
    }

    #[test]
    fn test_audit_events_recorded() {
        let auth = middleware(AuthConfig::default());
        let mut session = ClientSession::new();
        auth.authenticate(&mut session, &request_with_token("bad"));
        auth.authenticate(&mut session, &request_with_token("good"));

        let events = auth.recent_events(10);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, AuthEventKind::AuthFailure);
        assert_eq!(events[1].kind, AuthEventKind::AuthSuccess);
    }

    #[test]
    fn test_sliding_window_blocks_and_recovers() {
        let limiter = SlidingWindowLimiter::new(RateLimitConfig {
            enabled: true,
            requests_per_second: 3,
            burst_size: 10,
            window_size_ms: 1000,
            block_duration_ms: 50,
        });

        assert!(limiter.allow("c1"));
        assert!(limiter.allow("c1"));
        assert!(limiter.allow("c1"));
        assert!(!limiter.allow("c1"), "fourth request in the second blocks");
        assert!(!limiter.allow("c1"), "blocked for block_duration");

        std::thread::sleep(Duration::from_millis(70));
        assert!(limiter.allow("c1"), "block expired");
    }

    #[test]
    fn test_rate_limits_are_per_client() {
        let limiter = SlidingWindowLimiter::new(RateLimitConfig {
            requests_per_second: 1,
            burst_size: 5,
            block_duration_ms: 10_000,
            ..RateLimitConfig::default()
        });

        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"), "other clients are unaffected");
    }

    #[test]
    fn test_disabled_limiter_allows_all() {
        let limiter = SlidingWindowLimiter::new(RateLimitConfig {
            enabled: false,
            requests_per_second: 0,
            ..RateLimitConfig::default()
        });
        for _ in 0..100 {
            assert!(limiter.allow("c"));
        }
    }

    #[test]
    fn test_rate_limited_denial_through_middleware() {
        struct DenyAll;
        impl RateLimiter for DenyAll {
            fn allow(&self, _: &str) -> bool {
                false
            }
        }

        let auth = AuthMiddleware::new(
            AuthConfig::default(),
            Arc::new(StaticValidator { accept: "good" }),
            Arc::new(DenyAll),
        );
        let mut session = ClientSession::new();
        let decision = auth.authenticate(&mut session, &request_with_token("good"));
        assert!(matches!(
            decision,
            AuthDecision::Denied {
                status: StatusCode::RateLimited,
                ..
            }
        ));
        assert_eq!(auth.metrics().snapshot().rate_limited, 1);
    }
}
