use crate::model::JsonRecord;
use crate::sinks::{Record, Sink, SinkError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

pub const CURRENT_KEY: &str = "current_system_monitor";
pub const HISTORY_KEY: &str = "system_monitor_history";

/// Key-value store with capped lists.
pub trait HistoryStore: Send + Sync + 'static {
    fn set(&self, key: &str, value: String) -> Result<(), SinkError>;

    /// Inserts at the head of the list at `key`, then trims the tail to `capacity`.
    fn push_capped(&self, key: &str, value: String, capacity: usize) -> Result<(), SinkError>;
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    values: HashMap<String, String>,
    lists: HashMap<String, VecDeque<String>>,
}

/// In-process store, shared between the history sink and the HTTP API.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        guard.values.get(key).cloned()
    }

    /// Newest-first slice of the list at `key`.
    pub fn range(&self, key: &str, limit: usize) -> Vec<String> {
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        guard
            .lists
            .get(key)
            .map(|list| list.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn list_len(&self, key: &str) -> usize {
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        guard.lists.get(key).map_or(0, VecDeque::len)
    }
}

impl HistoryStore for MemoryStore {
    fn set(&self, key: &str, value: String) -> Result<(), SinkError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| SinkError::Store("history store lock poisoned".to_string()))?;
        guard.values.insert(key.to_string(), value);
        Ok(())
    }

    fn push_capped(&self, key: &str, value: String, capacity: usize) -> Result<(), SinkError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| SinkError::Store("history store lock poisoned".to_string()))?;
        let list = guard.lists.entry(key.to_string()).or_default();
        list.push_front(value);
        list.truncate(capacity);
        Ok(())
    }
}

/// Keeps the latest record under [`CURRENT_KEY`] and a capped newest-first
/// history under [`HISTORY_KEY`].
pub struct HistorySink<S> {
    store: S,
    capacity: usize,
}

impl<S: HistoryStore> HistorySink<S> {
    pub fn new(store: S, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
        }
    }
}

impl<S: HistoryStore> Sink for HistorySink<S> {
    fn name(&self) -> &'static str {
        "history"
    }

    fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        let json = match record {
            Record::Sample(sample) => JsonRecord::from(sample.as_ref()),
            Record::Rollup(rollup) => JsonRecord::from(rollup.as_ref()),
            Record::Alert(_) => return Ok(()),
        };
        let text = serde_json::to_string(&json)?;
        self.store.set(CURRENT_KEY, text.clone())?;
        self.store.push_capped(HISTORY_KEY, text, self.capacity)
    }
}
