//! Checkpoint store — persists [`PipelineState`] across an interrupt
//! boundary (spec §6, §7, §4.7).
//!
//! Keyed by `(userId, turnId)`. The default implementation is an in-memory
//! map guarded by a `std::sync::Mutex` with an explicit `sweep_expired`
//! pass, the same shape as the approval-queue's pending-request map with
//! its periodic `cleanup_expired` sweep — here driven by access-time LRU
//! plus a fixed TTL (default 30 minutes) instead of a per-request timeout.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::PipelineState;

/// Composite key identifying one in-flight (possibly suspended) turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    pub user_id: String,
    pub turn_id: String,
}

impl CheckpointKey {
    pub fn new(user_id: impl Into<String>, turn_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            turn_id: turn_id.into(),
        }
    }
}

/// Errors a checkpoint store can report.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint store poisoned")]
    Poisoned,
}

/// Pluggable checkpoint persistence (spec §6).
pub trait CheckpointStore: Send + Sync {
    fn save(&self, key: &CheckpointKey, state: PipelineState) -> Result<(), CheckpointError>;
    fn load(&self, key: &CheckpointKey) -> Result<Option<PipelineState>, CheckpointError>;
    fn delete(&self, key: &CheckpointKey) -> Result<(), CheckpointError>;
}

struct Entry {
    state: PipelineState,
    last_touched: DateTime<Utc>,
}

/// Default in-process implementation: a map with LRU eviction over
/// `max_entries` and a TTL of inactivity (spec §6 default: 30 minutes).
pub struct InMemoryCheckpointStore {
    entries: Mutex<HashMap<CheckpointKey, Entry>>,
    ttl: Duration,
    max_entries: usize,
}

impl InMemoryCheckpointStore {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// The spec default: 30-minute TTL, unbounded-in-practice but capped
    /// to a generous number of entries so a pathological client can't
    /// grow the map forever.
    pub fn with_default_policy() -> Self {
        Self::new(Duration::from_secs(30 * 60), 10_000)
    }

    /// Number of checkpoints currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove entries whose last access exceeds the TTL. Returns the
    /// number removed. Intended to run on a periodic background tick
    /// (spec_full §11 idle-sweep task).
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let ttl = chrono::TimeDelta::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::TimeDelta::minutes(30));
        let mut guard = match self.entries.lock() {
            Ok(g) => g,
            Err(_) => return 0,
        };
        let expired: Vec<CheckpointKey> = guard
            .iter()
            .filter(|(_, e)| now.signed_duration_since(e.last_touched) > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        let count = expired.len();
        for key in expired {
            guard.remove(&key);
        }
        count
    }

    fn evict_lru_if_full(&self, guard: &mut HashMap<CheckpointKey, Entry>) {
        if guard.len() < self.max_entries {
            return;
        }
        if let Some(oldest_key) = guard
            .iter()
            .min_by_key(|(_, e)| e.last_touched)
            .map(|(k, _)| k.clone())
        {
            guard.remove(&oldest_key);
        }
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, key: &CheckpointKey, state: PipelineState) -> Result<(), CheckpointError> {
        let mut guard = self.entries.lock().map_err(|_| CheckpointError::Poisoned)?;
        if !guard.contains_key(key) {
            self.evict_lru_if_full(&mut guard);
        }
        guard.insert(
            key.clone(),
            Entry {
                state,
                last_touched: Utc::now(),
            },
        );
        Ok(())
    }

    fn load(&self, key: &CheckpointKey) -> Result<Option<PipelineState>, CheckpointError> {
        let mut guard = self.entries.lock().map_err(|_| CheckpointError::Poisoned)?;
        if let Some(entry) = guard.get_mut(key) {
            entry.last_touched = Utc::now();
            Ok(Some(entry.state.clone()))
        } else {
            Ok(None)
        }
    }

    fn delete(&self, key: &CheckpointKey) -> Result<(), CheckpointError> {
        let mut guard = self.entries.lock().map_err(|_| CheckpointError::Poisoned)?;
        guard.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InputContext, Language, UserCapabilities, UserContext};

    fn sample_state() -> PipelineState {
        PipelineState::new(
            UserContext {
                id: "u1".to_string(),
                phone: "+100".to_string(),
                language: Language::En,
                capabilities: UserCapabilities::default(),
            },
            InputContext {
                message: "hi".to_string(),
                enhanced_message: None,
                request_id: "r1".to_string(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn save_then_load_roundtrips() {
        let store = InMemoryCheckpointStore::with_default_policy();
        let key = CheckpointKey::new("u1", "t1");
        store.save(&key, sample_state()).unwrap();
        let loaded = store.load(&key).unwrap();
        assert!(loaded.is_some());
        assert_eq!(loaded.unwrap().user.id, "u1");
    }

    #[test]
    fn load_missing_key_returns_none() {
        let store = InMemoryCheckpointStore::with_default_policy();
        let key = CheckpointKey::new("u1", "missing");
        assert!(store.load(&key).unwrap().is_none());
    }

    #[test]
    fn delete_removes_entry() {
        let store = InMemoryCheckpointStore::with_default_policy();
        let key = CheckpointKey::new("u1", "t1");
        store.save(&key, sample_state()).unwrap();
        store.delete(&key).unwrap();
        assert!(store.load(&key).unwrap().is_none());
    }

    #[test]
    fn sweep_expired_removes_stale_entries() {
        let store = InMemoryCheckpointStore::new(Duration::from_secs(0), 10);
        let key = CheckpointKey::new("u1", "t1");
        store.save(&key, sample_state()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let removed = store.sweep_expired();
        assert_eq!(removed, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn lru_eviction_drops_oldest_when_full() {
        let store = InMemoryCheckpointStore::new(Duration::from_secs(1800), 2);
        store
            .save(&CheckpointKey::new("u1", "t1"), sample_state())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store
            .save(&CheckpointKey::new("u1", "t2"), sample_state())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store
            .save(&CheckpointKey::new("u1", "t3"), sample_state())
            .unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.load(&CheckpointKey::new("u1", "t1")).unwrap().is_none());
    }
}
