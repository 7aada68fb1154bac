//! Client-facing gateway concerns: authentication, rate limiting, sessions.
//!
//! The gateway core never decodes tokens or implements a credential store;
//! it trusts an injected [`TokenValidator`] and [`RateLimiter`] and records
//! the outcomes for auditing.

mod auth;
mod session;

pub use auth::{
    AuthConfig, AuthDecision, AuthEvent, AuthEventKind, AuthMetrics, AuthMetricsSnapshot,
    AuthMiddleware, AuthOutcome, RateLimitConfig, RateLimiter, SlidingWindowLimiter,
    TokenValidator,
};
pub use session::{ClientSession, SessionId};
