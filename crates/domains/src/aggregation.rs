//! # Aggregation outcomes
//!
//! Statistics are advisory. Instead of catching failures and quietly
//! returning defaults, stats computations return an `Aggregation` so a caller
//! can tell a true empty state from a suppressed failure.

use thiserror::Error;

/// Why a statistics value is degraded or missing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatsFault {
    /// One sub-query failed; its field holds the documented default.
    #[error("partial aggregation failure on `{field}`: {reason}")]
    PartialAggregationFailure { field: &'static str, reason: String },

    /// The computation as a whole could not run.
    #[error("total aggregation failure: {0}")]
    TotalAggregationFailure(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation<T> {
    Ok(T),
    /// A usable value with defaults substituted for the listed causes.
    Degraded(T, Vec<StatsFault>),
    Fatal(StatsFault),
}

impl<T> Aggregation<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Aggregation::Ok(value) | Aggregation::Degraded(value, _) => Some(value),
            Aggregation::Fatal(_) => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Aggregation::Fatal(_))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Aggregation::Degraded(..))
    }

    /// Every fault behind this outcome, empty for `Ok`.
    pub fn causes(&self) -> Vec<&StatsFault> {
        match self {
            Aggregation::Ok(_) => Vec::new(),
            Aggregation::Degraded(_, causes) => causes.iter().collect(),
            Aggregation::Fatal(cause) => vec![cause],
        }
    }

    /// The carried value, or `fallback()` when the computation was fatal.
    pub fn value_or_else(self, fallback: impl FnOnce() -> T) -> T {
        match self {
            Aggregation::Ok(value) | Aggregation::Degraded(value, _) => value,
            Aggregation::Fatal(_) => fallback(),
        }
    }
}

impl<T: Default> Aggregation<T> {
    pub fn value_or_default(self) -> T {
        self.value_or_else(T::default)
    }
}
