use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::JobDescriptor;

/// The durable queue record: all three lists in one named document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStateRecord {
    #[serde(default)]
    pub ongoing: Vec<JobDescriptor>,
    #[serde(default)]
    pub next: Vec<JobDescriptor>,
    #[serde(default)]
    pub completed: Vec<JobDescriptor>,
}

impl QueueStateRecord {
    /// Rehydrate from a raw JSON document, list by list.
    ///
    /// Each list is parsed independently: a missing or corrupt list falls
    /// back to empty without discarding the other two.
    pub fn from_value(raw: &Value) -> Self {
        fn parse_list(raw: &Value, key: &str) -> Vec<JobDescriptor> {
            match raw.get(key) {
                Some(list) => serde_json::from_value(list.clone()).unwrap_or_else(|e| {
                    tracing::warn!(list = key, error = %e, "discarding corrupt queue list");
                    Vec::new()
                }),
                None => Vec::new(),
            }
        }
        Self {
            ongoing: parse_list(raw, "ongoing"),
            next: parse_list(raw, "next"),
            completed: parse_list(raw, "completed"),
        }
    }
}

/// Durable storage port for the queue state.
///
/// The store writes through this on every mutation, so implementations
/// should be cheap. A `None` from `load` means no prior state exists.
pub trait StatePersistence: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<Value>>;
    fn save(&self, record: &QueueStateRecord) -> anyhow::Result<()>;
}

/// Queue state persisted as a single JSON document on disk.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StatePersistence for JsonFileStore {
    fn load(&self) -> anyhow::Result<Option<Value>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // An unreadable document is treated as absent state, not a
                // boot failure.
                tracing::warn!(path = %self.path.display(), error = %e, "queue state file unreadable");
                Ok(None)
            }
        }
    }

    fn save(&self, record: &QueueStateRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string(record)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

/// In-memory persistence, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the stored document (e.g. with a corrupt record in tests).
    pub fn with_value(value: Value) -> Self {
        Self {
            slot: Mutex::new(Some(value)),
        }
    }
}

impl StatePersistence for MemoryStore {
    fn load(&self) -> anyhow::Result<Option<Value>> {
        Ok(self
            .slot
            .lock()
            .map_err(|e| anyhow::anyhow!("{}", e))?
            .clone())
    }

    fn save(&self, record: &QueueStateRecord) -> anyhow::Result<()> {
        let value = serde_json::to_value(record)?;
        *self.slot.lock().map_err(|e| anyhow::anyhow!("{}", e))? = Some(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobMode;
    use serde_json::json;

    fn job(desc: &str) -> JobDescriptor {
        JobDescriptor::new(JobMode::Standard, "m.safetensors", json!({"steps": 10}), desc)
    }

    #[test]
    fn test_memory_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_none());

        let record = QueueStateRecord {
            ongoing: vec![job("a")],
            next: vec![],
            completed: vec![job("b"), job("c")],
        };
        store.save(&record).unwrap();

        let raw = store.load().unwrap().unwrap();
        let loaded = QueueStateRecord::from_value(&raw);
        assert_eq!(loaded.ongoing.len(), 1);
        assert!(loaded.next.is_empty());
        assert_eq!(loaded.completed.len(), 2);
        assert_eq!(loaded.completed[1].desc, "c");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("queue.json"));
        assert!(store.load().unwrap().is_none());

        let record = QueueStateRecord {
            ongoing: vec![job("a"), job("b")],
            ..Default::default()
        };
        store.save(&record).unwrap();

        let loaded = QueueStateRecord::from_value(&store.load().unwrap().unwrap());
        assert_eq!(loaded.ongoing.len(), 2);
        assert_eq!(loaded.ongoing[0].desc, "a");
    }

    #[test]
    fn test_corrupt_list_does_not_discard_others() {
        let raw = json!({
            "ongoing": [{"not": "a job"}],
            "next": [],
            "completed": []
        });
        let record = QueueStateRecord::from_value(&raw);
        assert!(record.ongoing.is_empty());

        let raw = json!({
            "ongoing": "garbage",
            "completed": [serde_json::to_value(job("kept")).unwrap()]
        });
        let record = QueueStateRecord::from_value(&raw);
        assert!(record.ongoing.is_empty());
        assert!(record.next.is_empty());
        assert_eq!(record.completed.len(), 1);
        assert_eq!(record.completed[0].desc, "kept");
    }

    #[test]
    fn test_unreadable_file_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(store.load().unwrap().is_none());
    }
}
