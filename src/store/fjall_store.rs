use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use super::error::{Result, StoreError};
use super::partitions::{TASK_PREFIX, encode_meta_key, encode_task_key};
use super::{Page, TaskFilter, TaskPage, TaskStore};
use crate::task::{Task, TaskId, TaskPatch, TaskState};

const META_SCHEMA_VERSION: &str = "schema_version";
const SCHEMA_VERSION: &str = "1";

/// Fjall-backed task store
///
/// Every write runs under a single write lock, which turns the
/// read-check-write sequence of [`TaskStore::update`] into an atomic
/// compare-and-set on the task's state.
pub struct FjallTaskStore {
    keyspace: Keyspace,
    tasks: PartitionHandle,
    metadata: PartitionHandle,
    write_lock: Mutex<()>,
}

impl FjallTaskStore {
    /// Open or create a Fjall store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening task store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let tasks = keyspace.open_partition("tasks", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        metadata.insert(encode_meta_key(META_SCHEMA_VERSION), SCHEMA_VERSION.as_bytes())?;

        info!("Task store opened successfully");
        Ok(Self {
            keyspace,
            tasks,
            metadata,
            write_lock: Mutex::new(()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| StoreError::Poisoned)
    }

    fn read(&self, id: &TaskId) -> Result<Option<Task>> {
        match self.tasks.get(encode_task_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn write(&self, task: &Task) -> Result<()> {
        let value = serde_json::to_vec(task)?;
        self.tasks.insert(encode_task_key(&task.id), value)?;
        Ok(())
    }

    /// Iterate tasks in creation order (oldest first)
    fn scan(&self) -> impl DoubleEndedIterator<Item = Result<Task>> + '_ {
        self.tasks.prefix(TASK_PREFIX).map(|item| {
            let (_, value) = item?;
            Ok(serde_json::from_slice::<Task>(&value)?)
        })
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

impl TaskStore for FjallTaskStore {
    fn create(&self, task: &Task) -> Result<TaskId> {
        let _guard = self.lock()?;

        if self.tasks.contains_key(encode_task_key(&task.id))? {
            return Err(StoreError::AlreadyExists(task.id));
        }

        self.write(task)?;
        debug!(task_id = %task.id, "Task created");
        Ok(task.id)
    }

    fn get(&self, id: &TaskId) -> Result<Task> {
        self.read(id)?.ok_or(StoreError::NotFound(*id))
    }

    fn update(&self, id: &TaskId, expected: TaskState, patch: TaskPatch) -> Result<Task> {
        let _guard = self.lock()?;

        let mut task = self.read(id)?.ok_or(StoreError::NotFound(*id))?;
        if task.state != expected {
            return Err(StoreError::Conflict {
                id: *id,
                expected,
                actual: task.state,
            });
        }

        task.apply(patch)
            .map_err(|err| StoreError::transition(*id, err))?;
        self.write(&task)?;

        debug!(task_id = %id, state = %task.state, "Task updated");
        Ok(task)
    }

    fn list(&self, filter: &TaskFilter, page: &Page) -> Result<TaskPage> {
        let mut total = 0;
        let mut tasks = Vec::with_capacity(page.page_size);
        // Past the addressable range: count matches, return no records
        let skip = page.offset().unwrap_or(usize::MAX);

        // Newest first
        for item in self.scan().rev() {
            let task = item?;
            if !filter.matches(&task) {
                continue;
            }
            if total >= skip && tasks.len() < page.page_size {
                tasks.push(task);
            }
            total += 1;
        }

        Ok(TaskPage {
            total,
            page: page.page,
            page_size: page.page_size,
            tasks,
        })
    }

    fn scan_state(&self, state: TaskState) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for item in self.scan() {
            let task = item?;
            if task.state == state {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    fn delete(&self, id: &TaskId) -> Result<Task> {
        let _guard = self.lock()?;

        let task = self.read(id)?.ok_or(StoreError::NotFound(*id))?;
        if !task.state.is_terminal() {
            return Err(StoreError::InvalidState {
                id: *id,
                reason: format!("cannot delete a {} task", task.state),
            });
        }

        self.tasks.remove(encode_task_key(id))?;
        debug!(task_id = %id, "Task deleted");
        Ok(task)
    }

    fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(encode_meta_key(META_SCHEMA_VERSION))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ErrorKind, Progress, TaskFailure, TaskResult};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (FjallTaskStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallTaskStore::open(temp_dir.path().join("tasks")).unwrap();
        (store, temp_dir)
    }

    fn create_test_task() -> Task {
        Task::new("https://example.com/video.mp4", None)
    }

    fn sample_result() -> TaskResult {
        TaskResult {
            file_path: "downloads/a/video.mp4".to_string(),
            size_bytes: 42,
            checksum: "sha256:00".to_string(),
        }
    }

    #[test]
    fn test_create_and_get() {
        let (store, _temp) = create_test_store();
        let task = create_test_task();

        let id = store.create(&task).unwrap();
        let retrieved = store.get(&id).unwrap();

        assert_eq!(retrieved.id, task.id);
        assert_eq!(retrieved.state, TaskState::Pending);
        assert_eq!(retrieved.source_url, "https://example.com/video.mp4");
    }

    #[test]
    fn test_create_never_reuses_id() {
        let (store, _temp) = create_test_store();
        let task = create_test_task();
        store.create(&task).unwrap();

        let err = store.create(&task).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn test_get_nonexistent_task() {
        let (store, _temp) = create_test_store();
        let err = store.get(&TaskId::generate()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_update_with_wrong_expected_state_conflicts() {
        let (store, _temp) = create_test_store();
        let task = create_test_task();
        store.create(&task).unwrap();
        store
            .update(&task.id, TaskState::Pending, TaskPatch::cancel())
            .unwrap();

        // A worker racing the cancellation loses
        let err = store
            .update(&task.id, TaskState::Pending, TaskPatch::claim())
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get(&task.id).unwrap().state, TaskState::Canceled);
    }

    #[test]
    fn test_canceled_task_cannot_be_completed() {
        let (store, _temp) = create_test_store();
        let task = create_test_task();
        store.create(&task).unwrap();
        store
            .update(&task.id, TaskState::Pending, TaskPatch::claim())
            .unwrap();
        store
            .update(&task.id, TaskState::Running, TaskPatch::cancel())
            .unwrap();

        let err = store
            .update(&task.id, TaskState::Running, TaskPatch::complete(sample_result()))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_illegal_transition_is_invalid_state() {
        let (store, _temp) = create_test_store();
        let task = create_test_task();
        store.create(&task).unwrap();

        let err = store
            .update(&task.id, TaskState::Pending, TaskPatch::complete(sample_result()))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { .. }));
    }

    #[test]
    fn test_concurrent_claims_exactly_one_wins() {
        let (store, _temp) = create_test_store();
        let store = Arc::new(store);
        let task = create_test_task();
        store.create(&task).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let id = task.id;
                std::thread::spawn(move || store.update(&id, TaskState::Pending, TaskPatch::claim()))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_conflict()))
            .count();

        assert_eq!(wins, 1);
        assert_eq!(conflicts, 7);
    }

    #[test]
    fn test_progress_update_persists() {
        let (store, _temp) = create_test_store();
        let task = create_test_task();
        store.create(&task).unwrap();
        store
            .update(&task.id, TaskState::Pending, TaskPatch::claim())
            .unwrap();

        let updated = store
            .update(
                &task.id,
                TaskState::Running,
                TaskPatch::progress(Progress::from_sample(250, Some(1000))),
            )
            .unwrap();
        assert_eq!(updated.progress.percent, 25.0);
        assert_eq!(store.get(&task.id).unwrap().progress.downloaded_bytes, 250);
    }

    #[test]
    fn test_list_newest_first_with_pagination() {
        let (store, _temp) = create_test_store();
        let ids: Vec<TaskId> = (0..5)
            .map(|_| store.create(&create_test_task()).unwrap())
            .collect();

        let first = store
            .list(&TaskFilter::default(), &Page::new(1, 2))
            .unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.tasks.len(), 2);
        assert_eq!(first.tasks[0].id, ids[4]);
        assert_eq!(first.tasks[1].id, ids[3]);

        let last = store
            .list(&TaskFilter::default(), &Page::new(3, 2))
            .unwrap();
        assert_eq!(last.tasks.len(), 1);
        assert_eq!(last.tasks[0].id, ids[0]);
    }

    #[test]
    fn test_list_page_beyond_addressable_range_is_empty() {
        let (store, _temp) = create_test_store();
        store.create(&create_test_task()).unwrap();

        let page = Page::new(usize::MAX, 100);
        assert_eq!(page.offset(), None);
        assert_eq!(Page::new(3, 20).offset(), Some(40));

        let listed = store.list(&TaskFilter::default(), &page).unwrap();
        assert_eq!(listed.total, 1);
        assert!(listed.tasks.is_empty());
    }

    #[test]
    fn test_list_filters_by_state() {
        let (store, _temp) = create_test_store();
        let a = store.create(&create_test_task()).unwrap();
        store.create(&create_test_task()).unwrap();
        store.update(&a, TaskState::Pending, TaskPatch::cancel()).unwrap();

        let canceled = store
            .list(&TaskFilter::state(TaskState::Canceled), &Page::default())
            .unwrap();
        assert_eq!(canceled.total, 1);
        assert_eq!(canceled.tasks[0].id, a);
    }

    #[test]
    fn test_scan_state_is_oldest_first() {
        let (store, _temp) = create_test_store();
        let first = store.create(&create_test_task()).unwrap();
        let second = store.create(&create_test_task()).unwrap();

        let pending = store.scan_state(TaskState::Pending).unwrap();
        let ids: Vec<_> = pending.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_delete_non_terminal_is_rejected() {
        let (store, _temp) = create_test_store();
        let task = create_test_task();
        store.create(&task).unwrap();
        store
            .update(&task.id, TaskState::Pending, TaskPatch::claim())
            .unwrap();

        let err = store.delete(&task.id).unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { .. }));
        assert!(store.get(&task.id).is_ok());
    }

    #[test]
    fn test_delete_terminal_task() {
        let (store, _temp) = create_test_store();
        let task = create_test_task();
        store.create(&task).unwrap();
        store
            .update(&task.id, TaskState::Pending, TaskPatch::claim())
            .unwrap();
        store
            .update(
                &task.id,
                TaskState::Running,
                TaskPatch::fail(TaskFailure::new(ErrorKind::ExecutionError, "boom")),
            )
            .unwrap();

        let deleted = store.delete(&task.id).unwrap();
        assert_eq!(deleted.state, TaskState::Failed);
        assert!(store.get(&task.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_persistence_across_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tasks");

        let id = {
            let store = FjallTaskStore::open(&path).unwrap();
            let id = store.create(&create_test_task()).unwrap();
            store.persist().unwrap();
            id
        };

        let store = FjallTaskStore::open(&path).unwrap();
        assert_eq!(store.get(&id).unwrap().state, TaskState::Pending);
    }

    #[test]
    fn test_health_check() {
        let (store, _temp) = create_test_store();
        store.health_check().unwrap();
    }
}
