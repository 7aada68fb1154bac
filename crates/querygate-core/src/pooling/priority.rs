//! Priority levels and the aging policy that modulates them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::QueryType;

/// Priority levels for connection acquisition requests.
///
/// Higher priority requests are serviced first when multiple requests are
/// pending; the aging sweeper boosts long-waiting entries upward so the
/// lowest band is never starved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPriority {
    /// Lowest priority - background maintenance.
    HealthCheck = 0,
    /// Default priority - standard queries.
    NormalQuery = 1,
    /// High priority - active transactions.
    Transaction = 2,
    /// Highest priority - time-critical operations.
    Critical = 3,
}

impl ConnectionPriority {
    /// All bands, lowest to highest.
    pub const ALL: [Self; 4] = [
        Self::HealthCheck,
        Self::NormalQuery,
        Self::Transaction,
        Self::Critical,
    ];

    /// Numeric band value (0 = lowest).
    #[must_use]
    pub const fn value(self) -> u32 {
        self as u32
    }

    /// Band for a numeric value, saturating at [`Self::Critical`].
    #[must_use]
    pub const fn from_value_saturating(value: u32) -> Self {
        match value {
            0 => Self::HealthCheck,
            1 => Self::NormalQuery,
            2 => Self::Transaction,
            _ => Self::Critical,
        }
    }

    /// Default scheduling priority for a query kind.
    ///
    /// SELECT runs at normal priority, writes and procedure/batch execution
    /// at transaction priority, and health-check pings at the lowest band.
    #[must_use]
    pub const fn default_for(query_type: QueryType) -> Self {
        match query_type {
            QueryType::Select => Self::NormalQuery,
            QueryType::Insert
            | QueryType::Update
            | QueryType::Delete
            | QueryType::Execute
            | QueryType::Batch => Self::Transaction,
            QueryType::Ping => Self::HealthCheck,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HealthCheck => "health_check",
            Self::NormalQuery => "normal_query",
            Self::Transaction => "transaction",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ConnectionPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the boost curve applied to waiting entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgingCurve {
    /// Boost grows proportionally to wait time.
    #[default]
    Linear,
    /// Boost accelerates the longer an entry waits.
    Exponential,
    /// Boost grows quickly at first, then flattens.
    Logarithmic,
}

impl AgingCurve {
    /// Scale factor for an entry that has waited `intervals` aging intervals.
    #[must_use]
    pub fn scale(self, intervals: f64) -> f64 {
        match self {
            Self::Linear => intervals,
            Self::Exponential => intervals * intervals,
            Self::Logarithmic => (1.0 + intervals).ln(),
        }
    }
}

/// Configuration for the aging sweeper.
#[derive(Debug, Clone, PartialEq)]
pub struct AgingConfig {
    /// Sweeper cadence; entries waiting longer than one interval are boosted.
    pub interval: Duration,
    /// Priority units added per unit of curve output.
    pub boost_increment: u32,
    pub curve: AgingCurve,
    /// Cap on boost above an entry's original band.
    pub max_boost: u32,
    /// Wait time beyond which a starvation event is emitted.
    pub starvation_threshold: Duration,
}

impl Default for AgingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            boost_increment: 1,
            curve: AgingCurve::Linear,
            max_boost: 3,
            starvation_threshold: Duration::from_secs(5),
        }
    }
}

impl AgingConfig {
    /// Boost (in priority units) for an entry that has waited `waited`.
    ///
    /// Entries waiting less than one interval are not boosted; beyond that
    /// the configured curve scales the increment, capped at `max_boost`.
    #[must_use]
    pub fn boost_for_wait(&self, waited: Duration) -> u32 {
        if self.interval.is_zero() || waited < self.interval {
            return 0;
        }
        let intervals = waited.as_secs_f64() / self.interval.as_secs_f64();
        let boost = (self.curve.scale(intervals) * f64::from(self.boost_increment)).floor();
        (boost as u32).min(self.max_boost)
    }
}
