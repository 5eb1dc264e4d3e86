//! Learned values and their durable update records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::StateActionKey;

/// Learned value plus visit statistics for one state-action key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEntry {
    pub key: StateActionKey,
    /// Q-value or bandit statistic, depending on the active policy.
    pub value: f64,
    pub visit_count: u64,
    pub last_updated: DateTime<Utc>,
    /// Magnitude of the most recent update.
    pub convergence_score: f64,
}

impl ValueEntry {
    /// Default entry for a key that has never been observed.
    pub fn unseen(key: StateActionKey) -> Self {
        Self {
            key,
            value: 0.0,
            visit_count: 0,
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
            convergence_score: 0.0,
        }
    }

    pub fn is_unseen(&self) -> bool {
        self.visit_count == 0
    }

    /// Whether the last update moved the value by less than `tolerance`.
    pub fn has_converged(&self, tolerance: f64) -> bool {
        self.visit_count > 0 && self.convergence_score < tolerance
    }

    pub fn to_record(&self) -> ValueRecord {
        ValueRecord {
            key: self.key.clone(),
            value: self.value,
            visit_count: self.visit_count,
            convergence_score: self.convergence_score,
            recorded_at: self.last_updated,
        }
    }
}

/// One append-only durable record per value update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub key: StateActionKey,
    pub value: f64,
    pub visit_count: u64,
    pub convergence_score: f64,
    pub recorded_at: DateTime<Utc>,
}

impl ValueRecord {
    /// Replay ordering: later timestamp wins, higher visit count breaks ties.
    pub fn supersedes(&self, other: &ValueRecord) -> bool {
        (self.recorded_at, self.visit_count) >= (other.recorded_at, other.visit_count)
    }

    pub fn into_entry(self) -> ValueEntry {
        ValueEntry {
            key: self.key,
            value: self.value,
            visit_count: self.visit_count,
            last_updated: self.recorded_at,
            convergence_score: self.convergence_score,
        }
    }
}

/// Degraded-mode signal exposed by the value store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHealth {
    pub degraded: bool,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    /// Records accepted in memory but not yet durably written.
    pub buffered_records: usize,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_record_supersedes_by_timestamp_then_visits() {
        let key = StateActionKey::new("A", "x", "v");
        let now = Utc::now();
        let older = ValueRecord {
            key: key.clone(),
            value: 0.1,
            visit_count: 5,
            convergence_score: 0.0,
            recorded_at: now - Duration::seconds(1),
        };
        let newer = ValueRecord {
            visit_count: 2,
            recorded_at: now,
            ..older.clone()
        };
        assert!(newer.supersedes(&older));
        assert!(!older.supersedes(&newer));

        let same_time_more_visits = ValueRecord {
            visit_count: 3,
            ..newer.clone()
        };
        assert!(same_time_more_visits.supersedes(&newer));
    }

    #[test]
    fn test_unseen_entry_defaults() {
        let entry = ValueEntry::unseen(StateActionKey::new("A", "x", "v"));
        assert!(entry.is_unseen());
        assert_eq!(entry.value, 0.0);
        assert!(!entry.has_converged(1.0));
    }
}
