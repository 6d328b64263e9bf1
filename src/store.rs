use std::sync::{Arc, Mutex};

use crate::storage::{QueueStateRecord, StatePersistence};
use crate::types::JobDescriptor;

/// The three queue buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueList {
    /// FIFO execution order; index 0 is running or next to run.
    Ongoing,
    /// Staging area; items move to ongoing only by explicit user action.
    Next,
    /// Finished jobs, append-only from the engine's perspective.
    Completed,
}

/// The three ordered job lists, persisted on every mutation.
///
/// The store is shared between the runner (draining) and the UI
/// (reordering/removing) and tolerates interleaved edits: callers must
/// re-read rather than cache indices, and every mutation writes through the
/// persistence port before returning, so the two actors never diverge for
/// more than one tick.
pub struct QueueStore {
    lists: Mutex<QueueStateRecord>,
    persistence: Arc<dyn StatePersistence>,
}

impl QueueStore {
    /// Create a store and rehydrate it from the persistence port.
    ///
    /// Absent or corrupt persisted lists default to empty; a corrupt list
    /// never discards the other two.
    pub fn load(persistence: Arc<dyn StatePersistence>) -> anyhow::Result<Self> {
        let record = match persistence.load()? {
            Some(raw) => QueueStateRecord::from_value(&raw),
            None => QueueStateRecord::default(),
        };
        Ok(Self {
            lists: Mutex::new(record),
            persistence,
        })
    }

    fn with_lists<T>(
        &self,
        f: impl FnOnce(&mut QueueStateRecord) -> T,
    ) -> anyhow::Result<T> {
        let mut lists = self.lists.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let out = f(&mut lists);
        self.persistence.save(&lists)?;
        Ok(out)
    }

    fn list_of<'a>(record: &'a mut QueueStateRecord, list: QueueList) -> &'a mut Vec<JobDescriptor> {
        match list {
            QueueList::Ongoing => &mut record.ongoing,
            QueueList::Next => &mut record.next,
            QueueList::Completed => &mut record.completed,
        }
    }

    /// Append a job to the tail of a list.
    pub fn enqueue(&self, list: QueueList, job: JobDescriptor) -> anyhow::Result<()> {
        self.with_lists(|record| Self::list_of(record, list).push(job))
    }

    /// Remove the job at `index`. Out-of-range indices are a no-op (the UI
    /// may race a drain that already popped the head).
    pub fn remove(&self, list: QueueList, index: usize) -> anyhow::Result<Option<JobDescriptor>> {
        self.with_lists(|record| {
            let jobs = Self::list_of(record, list);
            if index < jobs.len() {
                Some(jobs.remove(index))
            } else {
                None
            }
        })
    }

    /// Move the job at `index` in `from` to the tail of `to`. The only
    /// cross-list transition.
    pub fn move_job(&self, from: QueueList, index: usize, to: QueueList) -> anyhow::Result<bool> {
        if from == to {
            return Ok(false);
        }
        self.with_lists(|record| {
            let source = Self::list_of(record, from);
            if index >= source.len() {
                return false;
            }
            let job = source.remove(index);
            Self::list_of(record, to).push(job);
            true
        })
    }

    /// Reorder within a list: take the job at `from_index` and re-insert it
    /// at `to_index`.
    pub fn reorder(&self, list: QueueList, from_index: usize, to_index: usize) -> anyhow::Result<bool> {
        self.with_lists(|record| {
            let jobs = Self::list_of(record, list);
            if from_index >= jobs.len() || to_index >= jobs.len() {
                return false;
            }
            let job = jobs.remove(from_index);
            jobs.insert(to_index, job);
            true
        })
    }

    /// Empty a list.
    pub fn clear(&self, list: QueueList) -> anyhow::Result<()> {
        self.with_lists(|record| Self::list_of(record, list).clear())
    }

    /// Pop the head of `ongoing`, stamp it finished, and append it to
    /// `completed`. Called by the runner after a successful job.
    pub fn complete_head(&self) -> anyhow::Result<Option<JobDescriptor>> {
        self.with_lists(|record| {
            if record.ongoing.is_empty() {
                return None;
            }
            let mut job = record.ongoing.remove(0);
            job.finished_at = Some(chrono::Utc::now().to_rfc3339());
            record.completed.push(job.clone());
            Some(job)
        })
    }

    /// The job at the head of `ongoing`, freshly read.
    pub fn ongoing_head(&self) -> Option<JobDescriptor> {
        self.lists.lock().ok()?.ongoing.first().cloned()
    }

    pub fn ongoing_len(&self) -> usize {
        self.lists.lock().map(|l| l.ongoing.len()).unwrap_or(0)
    }

    /// Pending work across both runnable buckets. Derived, never stored.
    pub fn pending_count(&self) -> usize {
        self.lists
            .lock()
            .map(|l| l.ongoing.len() + l.next.len())
            .unwrap_or(0)
    }

    /// Cloned contents of a list.
    pub fn snapshot(&self, list: QueueList) -> Vec<JobDescriptor> {
        self.lists
            .lock()
            .map(|mut record| Self::list_of(&mut record, list).clone())
            .unwrap_or_default()
    }
}
