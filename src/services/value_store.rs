//! Shared value store for every selection policy.
//!
//! Values live in a concurrent in-memory map. Every mutation is also appended
//! to a durable [`ValueLog`] by a background writer task, so the decision path
//! never waits on I/O. Restart recovery replays the log.

use backoff::ExponentialBackoff;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{DecisionState, StateActionKey, StoreHealth, ValueEntry, ValueRecord};
use crate::domain::ports::ValueLog;

/// Largest batch the writer hands to the log in one call.
const MAX_BATCH: usize = 256;

enum LogCommand {
    Append(ValueRecord),
    Flush(oneshot::Sender<DomainResult<()>>),
}

/// Retry settings for durable appends.
#[derive(Debug, Clone)]
pub struct WriterRetry {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Give up on a batch after this long and keep it buffered.
    pub max_elapsed: Duration,
}

impl Default for WriterRetry {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(2),
            max_elapsed: Duration::from_secs(5),
        }
    }
}

impl WriterRetry {
    fn policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: Some(self.max_elapsed),
            ..ExponentialBackoff::default()
        }
    }
}

/// Thread-safe store of learned values keyed by [`StateActionKey`].
pub struct ValueStore {
    entries: DashMap<StateActionKey, ValueEntry>,
    writer: Option<mpsc::UnboundedSender<LogCommand>>,
    health: Arc<Mutex<StoreHealth>>,
}

impl ValueStore {
    /// A store with no durable log. Used for tests and ephemeral runs.
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            writer: None,
            health: Arc::new(Mutex::new(StoreHealth::default())),
        }
    }

    /// Open a store backed by `log`, replaying its history first.
    ///
    /// Must be called from within a tokio runtime; the writer task is spawned
    /// onto it.
    pub async fn open(log: Arc<dyn ValueLog>) -> DomainResult<Self> {
        Self::open_with_retry(log, WriterRetry::default()).await
    }

    pub async fn open_with_retry(log: Arc<dyn ValueLog>, retry: WriterRetry) -> DomainResult<Self> {
        let records = log.replay().await?;
        let replayed = records.len();
        let entries = DashMap::new();
        for (key, entry) in Self::fold_records(records) {
            entries.insert(key, entry);
        }
        info!(records = replayed, keys = entries.len(), "Value store replayed");

        let health = Arc::new(Mutex::new(StoreHealth::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(log, rx, Arc::clone(&health), retry));

        Ok(Self {
            entries,
            writer: Some(tx),
            health,
        })
    }

    /// Last-writer-wins reduction of a record sequence.
    fn fold_records(records: Vec<ValueRecord>) -> Vec<(StateActionKey, ValueEntry)> {
        let mut latest: std::collections::HashMap<StateActionKey, ValueRecord> =
            std::collections::HashMap::new();
        for record in records {
            match latest.get(&record.key) {
                Some(current) if !record.supersedes(current) => {}
                _ => {
                    latest.insert(record.key.clone(), record);
                }
            }
        }
        latest
            .into_iter()
            .map(|(key, record)| (key, record.into_entry()))
            .collect()
    }

    /// Current entry for `key`, or the unseen default.
    pub fn get(&self, key: &StateActionKey) -> ValueEntry {
        self.entries
            .get(key)
            .map(|e| e.value().clone())
            .unwrap_or_else(|| ValueEntry::unseen(key.clone()))
    }

    /// Overwrite the value for `key`.
    pub fn update(&self, key: &StateActionKey, new_value: f64, increment_visit: bool) -> ValueEntry {
        self.apply(key, increment_visit, |_| new_value)
    }

    /// Apply an update rule under the key's write lock and count a visit.
    ///
    /// The rule sees the current entry (unseen default when absent) and
    /// returns the new value.
    pub fn update_with<F>(&self, key: &StateActionKey, rule: F) -> ValueEntry
    where
        F: FnOnce(&ValueEntry) -> f64,
    {
        self.apply(key, true, rule)
    }

    fn apply<F>(&self, key: &StateActionKey, increment_visit: bool, rule: F) -> ValueEntry
    where
        F: FnOnce(&ValueEntry) -> f64,
    {
        let updated = {
            let mut slot = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| ValueEntry::unseen(key.clone()));
            let entry = slot.value_mut();
            let new_value = rule(entry);
            entry.convergence_score = (new_value - entry.value).abs();
            entry.value = new_value;
            if increment_visit {
                entry.visit_count += 1;
            }
            // Keep per-key timestamps monotonic so replay ordering is stable.
            entry.last_updated = Utc::now().max(entry.last_updated);
            entry.clone()
        };

        self.enqueue(updated.to_record());
        updated
    }

    /// Write a warm-start value on a key that has never been visited.
    ///
    /// Returns `false` and leaves the entry untouched otherwise.
    pub fn seed(&self, key: &StateActionKey, value: f64) -> bool {
        let seeded = {
            let mut slot = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| ValueEntry::unseen(key.clone()));
            let entry = slot.value_mut();
            if !entry.is_unseen() {
                return false;
            }
            entry.value = value;
            entry.last_updated = Utc::now().max(entry.last_updated);
            entry.clone()
        };

        debug!(key = %key, value, "Seeded value");
        self.enqueue(seeded.to_record());
        true
    }

    /// All entries ordered by key.
    pub fn snapshot(&self) -> Vec<ValueEntry> {
        let mut all: Vec<ValueEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Entries of one `(agent, task_type)` state, ordered by variant id.
    pub fn entries_for_state(&self, state: &DecisionState) -> Vec<ValueEntry> {
        let mut found: Vec<ValueEntry> = self
            .entries
            .iter()
            .filter(|e| {
                e.key().agent_name() == state.agent_name && e.key().task_type() == &state.task_type
            })
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
    }

    /// Total visits recorded for a state across its variants.
    pub fn state_visits(&self, state: &DecisionState) -> u64 {
        self.entries_for_state(state)
            .iter()
            .map(|e| e.visit_count)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wait until every queued record has been written.
    ///
    /// Returns `StoreUnavailable` when records remain buffered after retries.
    pub async fn flush(&self) -> DomainResult<()> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        writer
            .send(LogCommand::Flush(tx))
            .map_err(|_| DomainError::StoreUnavailable("value log writer stopped".to_string()))?;
        rx.await
            .map_err(|_| DomainError::StoreUnavailable("value log writer stopped".to_string()))?
    }

    pub fn health(&self) -> StoreHealth {
        self.health.lock().clone()
    }

    fn enqueue(&self, record: ValueRecord) {
        let Some(writer) = &self.writer else {
            return;
        };
        if writer.send(LogCommand::Append(record)).is_err() {
            let mut health = self.health.lock();
            health.degraded = true;
            health.total_failures += 1;
            health.last_error = Some("value log writer stopped".to_string());
            warn!("Value log writer stopped; update kept in memory only");
        }
    }
}

/// Background writer: batches appends and retries with exponential backoff.
///
/// Records that still fail after retries stay in `pending` and are retried
/// with the next batch; the store reports itself degraded meanwhile.
async fn run_writer(
    log: Arc<dyn ValueLog>,
    mut rx: mpsc::UnboundedReceiver<LogCommand>,
    health: Arc<Mutex<StoreHealth>>,
    retry: WriterRetry,
) {
    let mut pending: Vec<ValueRecord> = Vec::new();

    while let Some(command) = rx.recv().await {
        let mut flush_waiters = Vec::new();
        match command {
            LogCommand::Append(record) => pending.push(record),
            LogCommand::Flush(tx) => flush_waiters.push(tx),
        }

        // Drain whatever else is already queued into the same batch.
        while pending.len() < MAX_BATCH {
            match rx.try_recv() {
                Ok(LogCommand::Append(record)) => pending.push(record),
                Ok(LogCommand::Flush(tx)) => flush_waiters.push(tx),
                Err(_) => break,
            }
        }

        let result = write_pending(&log, &mut pending, &health, &retry).await;
        for waiter in flush_waiters {
            let _ = waiter.send(result.clone());
        }
    }

    if !pending.is_empty() {
        let _ = write_pending(&log, &mut pending, &health, &retry).await;
    }
    debug!("Value log writer stopped");
}

async fn write_pending(
    log: &Arc<dyn ValueLog>,
    pending: &mut Vec<ValueRecord>,
    health: &Mutex<StoreHealth>,
    retry: &WriterRetry,
) -> DomainResult<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let batch: &[ValueRecord] = pending;
    let outcome = backoff::future::retry(retry.policy(), || {
        let log = Arc::clone(log);
        async move {
            log.append(batch)
                .await
                .map_err(backoff::Error::transient)
        }
    })
    .await;

    match outcome {
        Ok(()) => {
            let written = pending.len();
            pending.clear();
            let mut h = health.lock();
            if h.degraded {
                info!(written, "Value log recovered");
            }
            h.degraded = false;
            h.consecutive_failures = 0;
            h.buffered_records = 0;
            Ok(())
        }
        Err(err) => {
            let message = err.to_string();
            let mut h = health.lock();
            h.degraded = true;
            h.consecutive_failures += 1;
            h.total_failures += 1;
            h.buffered_records = pending.len();
            h.last_error = Some(message.clone());
            warn!(
                buffered = pending.len(),
                consecutive_failures = h.consecutive_failures,
                error = %message,
                "Value log append failed; serving from memory"
            );
            Err(DomainError::StoreUnavailable(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::InMemoryValueLog;

    fn key(variant: &str) -> StateActionKey {
        StateActionKey::new("A", "x", variant)
    }

    fn fast_retry() -> WriterRetry {
        WriterRetry {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            max_elapsed: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_get_returns_unseen_default() {
        let store = ValueStore::in_memory();
        let entry = store.get(&key("v"));
        assert_eq!(entry.value, 0.0);
        assert_eq!(entry.visit_count, 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_tracks_visits_and_convergence() {
        let store = ValueStore::in_memory();
        store.update(&key("v"), 0.4, true);
        let entry = store.update(&key("v"), 0.1, true);
        assert_eq!(entry.visit_count, 2);
        assert!((entry.convergence_score - 0.3).abs() < 1e-12);

        let entry = store.update(&key("v"), 0.2, false);
        assert_eq!(entry.visit_count, 2);
    }

    #[test]
    fn test_seed_only_applies_to_unvisited_keys() {
        let store = ValueStore::in_memory();
        assert!(store.seed(&key("v"), 0.7));
        assert_eq!(store.get(&key("v")).value, 0.7);
        assert_eq!(store.get(&key("v")).visit_count, 0);

        store.update_with(&key("v"), |e| e.value + 0.1);
        assert!(!store.seed(&key("v"), -1.0));
        assert!((store.get(&key("v")).value - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_snapshot_and_state_queries_are_ordered() {
        let store = ValueStore::in_memory();
        store.update(&StateActionKey::new("B", "x", "v"), 0.1, true);
        store.update(&key("z"), 0.2, true);
        store.update(&key("a"), 0.3, true);
        store.update(&StateActionKey::new("A", "y", "a"), 0.4, true);

        let snapshot: Vec<String> = store.snapshot().iter().map(|e| e.key.to_string()).collect();
        assert_eq!(snapshot, vec!["A/x/a", "A/x/z", "A/y/a", "B/x/v"]);

        let state = DecisionState::new("A", "x");
        let in_state = store.entries_for_state(&state);
        assert_eq!(in_state.len(), 2);
        assert_eq!(store.state_visits(&state), 2);
    }

    #[tokio::test]
    async fn test_updates_reach_the_log_and_replay() {
        let log = Arc::new(InMemoryValueLog::new());
        let store = ValueStore::open(log.clone()).await.unwrap();
        store.update(&key("a"), 0.5, true);
        store.update(&key("a"), 0.6, true);
        store.update(&key("b"), -0.2, true);
        store.flush().await.unwrap();
        assert_eq!(log.len(), 3);

        let reopened = ValueStore::open(log.clone()).await.unwrap();
        assert_eq!(reopened.snapshot(), store.snapshot());
    }

    #[tokio::test]
    async fn test_failing_log_degrades_then_recovers() {
        let log = Arc::new(InMemoryValueLog::new());
        let store = ValueStore::open_with_retry(log.clone(), fast_retry())
            .await
            .unwrap();

        log.set_failing(true);
        store.update(&key("a"), 0.5, true);
        assert!(matches!(
            store.flush().await,
            Err(DomainError::StoreUnavailable(_))
        ));
        let health = store.health();
        assert!(health.degraded);
        assert_eq!(health.buffered_records, 1);
        assert!(health.consecutive_failures >= 1);
        // Reads still served from memory.
        assert_eq!(store.get(&key("a")).value, 0.5);

        log.set_failing(false);
        store.flush().await.unwrap();
        let health = store.health();
        assert!(!health.degraded);
        assert_eq!(health.buffered_records, 0);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_replay_is_last_writer_wins() {
        let now = Utc::now();
        let base = ValueRecord {
            key: key("a"),
            value: 0.1,
            visit_count: 1,
            convergence_score: 0.1,
            recorded_at: now,
        };
        let later = ValueRecord {
            value: 0.3,
            visit_count: 2,
            recorded_at: now + chrono::Duration::milliseconds(5),
            ..base.clone()
        };
        // Out-of-order delivery still lands on the later record.
        let folded = ValueStore::fold_records(vec![later.clone(), base.clone()]);
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].1.value, 0.3);

        // Replaying twice is idempotent.
        let folded = ValueStore::fold_records(vec![base.clone(), later.clone(), base, later]);
        assert_eq!(folded[0].1.visit_count, 2);
    }
}
