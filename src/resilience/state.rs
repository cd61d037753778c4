//! Circuit breaker state store.
//!
//! # States
//! - Closed: no record stored for the key
//! - Open: calls fail fast until the break duration elapses
//! - HalfOpen: a single probe at a time tests recovery
//!
//! # Design Decisions
//! - A missing record *is* the Closed state; closing deletes the record
//! - Every mutation runs under the DashMap shard lock for its key, so
//!   read-modify-write sequences on one key never lose updates
//! - The half-open admission gate lives here, one per key, shared by all callers

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::resilience::error::CapturedFailure;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitBreakerState::Closed => "closed",
            CircuitBreakerState::Open => "open",
            CircuitBreakerState::HalfOpen => "half_open",
        }
    }
}

/// Per-key circuit breaker bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CircuitBreakerRecord {
    pub state: CircuitBreakerState,
    /// Failures recorded since the key was last reset.
    pub exception_attempts: u32,
    /// Successful probes while HalfOpen.
    pub success_attempts: u32,
    pub last_state_changed_at: Option<Instant>,
    pub last_error: Option<CapturedFailure>,
}

impl CircuitBreakerRecord {
    pub fn is_closed(&self) -> bool {
        self.state == CircuitBreakerState::Closed
    }

    /// Whether the break duration has elapsed since the last state change.
    /// A record without a timestamp is treated as expired.
    pub fn break_elapsed(&self, break_duration: Duration, now: Instant) -> bool {
        match self.last_state_changed_at {
            Some(changed_at) => changed_at
                .checked_add(break_duration)
                .is_some_and(|until| now >= until),
            None => true,
        }
    }

    /// Time left until a probe is allowed. A break too long to represent as
    /// an instant never elapses and reports `Duration::MAX`.
    pub fn remaining_break(&self, break_duration: Duration, now: Instant) -> Duration {
        match self.last_state_changed_at {
            Some(changed_at) => changed_at
                .checked_add(break_duration)
                .map_or(Duration::MAX, |until| until.saturating_duration_since(now)),
            None => Duration::ZERO,
        }
    }
}

/// Outcome of recording a failure against a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub exception_attempts: u32,
    /// The state before the failure was recorded.
    pub previous_state: CircuitBreakerState,
    /// True when this failure moved (or kept) the key in Open.
    pub tripped: bool,
}

/// Outcome of recording a successful half-open probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// More successful probes are needed.
    Pending { success_attempts: u32 },
    /// The threshold was reached and the record was deleted.
    Closed,
    /// The record vanished before the success could be recorded.
    Missing,
}

/// Serializable view of a record for reports.
#[derive(Debug, Clone, Serialize)]
pub struct RecordSnapshot {
    pub key: String,
    pub state: CircuitBreakerState,
    pub exception_attempts: u32,
    pub success_attempts: u32,
    /// Milliseconds since the last state change, if any.
    pub since_state_change_ms: Option<u128>,
    pub last_error: Option<CapturedFailure>,
}

/// Exclusive right to run a half-open probe for one key.
///
/// Released on drop.
#[derive(Debug)]
pub struct ProbePermit {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl ProbePermit {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// A thread-safe keyed store of circuit breaker records.
///
/// Cloning is cheap and clones share the same underlying maps.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    records: Arc<DashMap<String, CircuitBreakerRecord>>,
    gates: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl StateStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record if the key has none yet. Returns false if one existed.
    pub fn add(&self, key: &str, record: CircuitBreakerRecord) -> bool {
        match self.records.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Delete the record for a key, returning it to the Closed state.
    pub fn remove(&self, key: &str) -> Option<CircuitBreakerRecord> {
        self.records.remove(key).map(|(_, record)| record)
    }

    /// Snapshot of the record, or Closed defaults if the key is unknown.
    pub fn get(&self, key: &str) -> CircuitBreakerRecord {
        self.records
            .get(key)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn is_closed(&self, key: &str) -> bool {
        self.records.get(key).map_or(true, |r| r.is_closed())
    }

    pub fn set_state(&self, key: &str, state: CircuitBreakerState) {
        self.update(key, |record| record.state = state);
    }

    pub fn set_last_state_changed_at(&self, key: &str, at: Instant) {
        self.update(key, |record| record.last_state_changed_at = Some(at));
    }

    pub fn set_last_error(&self, key: &str, failure: CapturedFailure) {
        self.update(key, |record| record.last_error = Some(failure));
    }

    /// Increment the failure count, creating the record if needed.
    pub fn increment_exception_attempts(&self, key: &str) -> u32 {
        let mut record = self.records.entry(key.to_string()).or_default();
        record.exception_attempts = record.exception_attempts.saturating_add(1);
        record.exception_attempts
    }

    /// Increment the success count. Unknown keys stay unknown and report 0.
    pub fn increment_success_attempts(&self, key: &str) -> u32 {
        self.update(key, |record| {
            record.success_attempts = record.success_attempts.saturating_add(1);
            record.success_attempts
        })
        .unwrap_or(0)
    }

    /// Record a failure and trip to Open once `threshold` is reached.
    ///
    /// Increment, comparison and transition happen under one lock.
    pub fn record_failure(
        &self,
        key: &str,
        threshold: u32,
        failure: CapturedFailure,
        now: Instant,
    ) -> FailureOutcome {
        let mut record = self.records.entry(key.to_string()).or_default();
        let previous_state = record.state;
        record.exception_attempts = record.exception_attempts.saturating_add(1);

        let tripped = record.exception_attempts >= threshold;
        if tripped {
            record.last_error = Some(failure);
            record.state = CircuitBreakerState::Open;
            record.last_state_changed_at = Some(now);
            if previous_state == CircuitBreakerState::HalfOpen {
                record.success_attempts = 0;
            }
        }

        FailureOutcome {
            exception_attempts: record.exception_attempts,
            previous_state,
            tripped,
        }
    }

    /// Move an existing, non-closed record to HalfOpen. Returns false if the
    /// key is Closed (the record was deleted by another prober).
    pub fn begin_half_open(&self, key: &str, now: Instant) -> bool {
        self.update(key, |record| {
            if record.is_closed() {
                return false;
            }
            record.state = CircuitBreakerState::HalfOpen;
            record.last_state_changed_at = Some(now);
            true
        })
        .unwrap_or(false)
    }

    /// Record a successful probe, deleting the record once `threshold` is reached.
    pub fn record_probe_success(&self, key: &str, threshold: u32) -> ProbeOutcome {
        let mut success_attempts = None;
        let removed = self.records.remove_if_mut(key, |_, record| {
            record.success_attempts = record.success_attempts.saturating_add(1);
            success_attempts = Some(record.success_attempts);
            record.success_attempts >= threshold
        });

        match (removed, success_attempts) {
            (Some(_), _) => ProbeOutcome::Closed,
            (None, Some(success_attempts)) => ProbeOutcome::Pending { success_attempts },
            (None, None) => ProbeOutcome::Missing,
        }
    }

    /// Try to take the half-open admission gate for a key without waiting.
    ///
    /// The gate is created on first use and shared by every later caller.
    pub fn try_acquire_probe(&self, key: &str) -> Option<ProbePermit> {
        let gate = self
            .gates
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        gate.try_lock_owned().ok().map(|guard| ProbePermit {
            key: key.to_string(),
            _guard: guard,
        })
    }

    /// Give back a probe permit. The key's gate is dropped once the record is
    /// gone and nobody else holds or waits on the gate.
    pub fn release_probe(&self, permit: ProbePermit) {
        let ProbePermit { key, _guard: guard } = permit;
        drop(guard);
        if !self.records.contains_key(&key) {
            self.gates.remove_if(&key, |_, gate| Arc::strong_count(gate) == 1);
        }
    }

    /// Number of keys with a live half-open gate.
    pub fn probe_gate_count(&self) -> usize {
        self.gates.len()
    }

    /// Number of keys not in the Closed-and-forgotten state.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    /// Serializable view of every stored record, sorted by key.
    pub fn snapshot(&self) -> Vec<RecordSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<RecordSnapshot> = self
            .records
            .iter()
            .map(|r| RecordSnapshot {
                key: r.key().clone(),
                state: r.state,
                exception_attempts: r.exception_attempts,
                success_attempts: r.success_attempts,
                since_state_change_ms: r
                    .last_state_changed_at
                    .map(|at| now.saturating_duration_since(at).as_millis()),
                last_error: r.last_error.clone(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    /// Mutate an existing record under its shard lock.
    fn update<R>(&self, key: &str, f: impl FnOnce(&mut CircuitBreakerRecord) -> R) -> Option<R> {
        self.records.get_mut(key).map(|mut record| f(record.value_mut()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(message: &str) -> CapturedFailure {
        CapturedFailure::capture(&message.to_string())
    }

    #[test]
    fn test_unknown_key_defaults() {
        let store = StateStore::new();
        let record = store.get("missing");
        assert!(store.is_closed("missing"));
        assert!(record.is_closed());
        assert_eq!(record.exception_attempts, 0);
        assert_eq!(record.success_attempts, 0);
        assert!(record.last_error.is_none());
        assert!(record.last_state_changed_at.is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_field_setters_ignore_unknown_keys() {
        let store = StateStore::new();
        store.set_state("k", CircuitBreakerState::Open);
        store.set_last_error("k", failure("boom"));
        assert_eq!(store.increment_success_attempts("k"), 0);
        assert!(!store.contains("k"));
    }

    #[test]
    fn test_add_and_remove() {
        let store = StateStore::new();
        let record = CircuitBreakerRecord {
            state: CircuitBreakerState::Open,
            exception_attempts: 3,
            ..Default::default()
        };
        assert!(store.add("k", record.clone()));
        assert!(!store.add("k", CircuitBreakerRecord::default()));
        assert_eq!(store.get("k"), record);
        assert!(!store.is_closed("k"));

        assert_eq!(store.remove("k"), Some(record));
        assert!(store.is_closed("k"));
        assert_eq!(store.remove("k"), None);
    }

    #[test]
    fn test_increment_exception_creates_record() {
        let store = StateStore::new();
        assert_eq!(store.increment_exception_attempts("k"), 1);
        assert_eq!(store.increment_exception_attempts("k"), 2);
        let record = store.get("k");
        assert!(record.is_closed());
        assert_eq!(record.exception_attempts, 2);
    }

    #[test]
    fn test_record_failure_trips_at_threshold() {
        let store = StateStore::new();
        let now = Instant::now();

        let first = store.record_failure("k", 2, failure("one"), now);
        assert!(!first.tripped);
        assert!(store.is_closed("k"));
        assert!(store.get("k").last_error.is_none());

        let second = store.record_failure("k", 2, failure("two"), now);
        assert!(second.tripped);
        assert_eq!(second.exception_attempts, 2);

        let record = store.get("k");
        assert_eq!(record.state, CircuitBreakerState::Open);
        assert_eq!(record.last_state_changed_at, Some(now));
        assert_eq!(record.last_error.map(|e| e.message), Some("two".to_string()));
    }

    #[test]
    fn test_probe_success_closes_at_threshold() {
        let store = StateStore::new();
        let now = Instant::now();
        store.record_failure("k", 1, failure("down"), now);
        assert!(store.begin_half_open("k", now));
        assert_eq!(store.get("k").state, CircuitBreakerState::HalfOpen);

        assert_eq!(
            store.record_probe_success("k", 2),
            ProbeOutcome::Pending { success_attempts: 1 }
        );
        assert_eq!(store.record_probe_success("k", 2), ProbeOutcome::Closed);
        assert!(!store.contains("k"));
        assert_eq!(store.record_probe_success("k", 2), ProbeOutcome::Missing);
    }

    #[test]
    fn test_half_open_failure_resets_successes() {
        let store = StateStore::new();
        let now = Instant::now();
        store.record_failure("k", 1, failure("down"), now);
        store.begin_half_open("k", now);
        store.record_probe_success("k", 3);

        let outcome = store.record_failure("k", 1, failure("still down"), now);
        assert!(outcome.tripped);
        assert_eq!(outcome.previous_state, CircuitBreakerState::HalfOpen);
        assert_eq!(store.get("k").success_attempts, 0);
    }

    #[test]
    fn test_begin_half_open_on_closed_key() {
        let store = StateStore::new();
        assert!(!store.begin_half_open("k", Instant::now()));
        store.increment_exception_attempts("k");
        assert!(!store.begin_half_open("k", Instant::now()));
    }

    #[test]
    fn test_probe_gate_is_exclusive_per_key() {
        let store = StateStore::new();
        let permit = store.try_acquire_probe("a").unwrap();
        assert_eq!(permit.key(), "a");

        // A clone shares the same gates.
        let other = store.clone();
        assert!(other.try_acquire_probe("a").is_none());
        assert!(other.try_acquire_probe("b").is_some());

        drop(permit);
        assert!(other.try_acquire_probe("a").is_some());
    }

    #[test]
    fn test_break_elapsed() {
        let now = Instant::now();
        let record = CircuitBreakerRecord {
            state: CircuitBreakerState::Open,
            last_state_changed_at: Some(now),
            ..Default::default()
        };
        let window = Duration::from_secs(5);
        assert!(!record.break_elapsed(window, now));
        assert_eq!(record.remaining_break(window, now), window);
        assert!(record.break_elapsed(window, now + window));
        assert!(CircuitBreakerRecord::default().break_elapsed(window, now));
    }

    #[test]
    fn test_unrepresentable_break_never_elapses() {
        let now = Instant::now();
        let record = CircuitBreakerRecord {
            state: CircuitBreakerState::Open,
            last_state_changed_at: Some(now),
            ..Default::default()
        };
        let forever = Duration::from_secs(u64::MAX);
        assert!(!record.break_elapsed(forever, now));
        assert!(!record.break_elapsed(forever, now + Duration::from_secs(86_400 * 365)));
        assert_eq!(record.remaining_break(forever, now), Duration::MAX);
    }

    #[test]
    fn test_released_gate_is_dropped_once_closed() {
        let store = StateStore::new();
        let now = Instant::now();
        store.record_failure("k", 1, failure("down"), now);

        let permit = store.try_acquire_probe("k").unwrap();
        store.release_probe(permit);
        // Record still open: the gate stays for the next probe.
        assert_eq!(store.probe_gate_count(), 1);

        let permit = store.try_acquire_probe("k").unwrap();
        store.begin_half_open("k", now);
        assert_eq!(store.record_probe_success("k", 1), ProbeOutcome::Closed);
        store.release_probe(permit);
        assert_eq!(store.probe_gate_count(), 0);
    }

    #[test]
    fn test_release_keeps_gate_while_shared() {
        let store = StateStore::new();
        let permit = store.try_acquire_probe("k").unwrap();
        let gate = store.gates.get("k").unwrap().value().clone();

        store.release_probe(permit);
        assert_eq!(store.probe_gate_count(), 1);

        drop(gate);
        let permit = store.try_acquire_probe("k").unwrap();
        store.release_probe(permit);
        assert_eq!(store.probe_gate_count(), 0);
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let store = StateStore::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store.increment_exception_attempts("shared");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get("shared").exception_attempts, 2000);
    }

    #[test]
    fn test_snapshot_sorted() {
        let store = StateStore::new();
        let now = Instant::now();
        store.record_failure("b", 1, failure("b down"), now);
        store.increment_exception_attempts("a");
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].key, "a");
        assert_eq!(snapshot[1].state, CircuitBreakerState::Open);
        assert_eq!(store.keys().len(), 2);
    }
}
