//! Client session identity.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh, unguessable identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("sess-{}", Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A connected client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSession {
    pub session_id: SessionId,
    /// Authenticated client id; empty until authentication succeeds.
    pub client_id: String,
    pub authenticated: bool,
    /// Connection timestamp (Unix epoch milliseconds).
    pub connected_at_ms: u64,
    pub last_activity_ms: u64,
    pub requests_count: u64,
}

impl ClientSession {
    #[must_use]
    pub fn new() -> Self {
        let now = now_ms();
        Self {
            session_id: SessionId::generate(),
            client_id: String::new(),
            authenticated: false,
            connected_at_ms: now,
            last_activity_ms: now,
            requests_count: 0,
        }
    }

    /// Record one processed request.
    pub fn record_request(&mut self) {
        self.requests_count += 1;
        self.last_activity_ms = now_ms();
    }

    /// Mark the session authenticated as `client_id`.
    pub fn authenticate(&mut self, client_id: impl Into<String>) {
        self.client_id = client_id.into();
        self.authenticated = true;
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("sess-"));
    }

    #[test]
    fn test_session_lifecycle() {
        let mut session = ClientSession::new();
        assert!(!session.authenticated);

        session.authenticate("client-7");
        session.record_request();
        session.record_request();

        assert!(session.authenticated);
        assert_eq!(session.client_id, "client-7");
        assert_eq!(session.requests_count, 2);
        assert!(session.last_activity_ms >= session.connected_at_ms);
    }
}
