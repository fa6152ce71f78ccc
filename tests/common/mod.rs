#![allow(dead_code)]

use std::collections::HashMap;
use std::future::pending;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use fetchdeck::callback::{HttpNotifier, RetryPolicy};
use fetchdeck::executor::{
    ExecutionFailure, ExecutionOutput, ExecutionRequest, Executor, Limits,
};
use fetchdeck::orchestrator::{Orchestrator, OrchestratorConfig};
use fetchdeck::progress::ProgressSink;
use fetchdeck::scheduler::SchedulerConfig;
use fetchdeck::store::{FjallTaskStore, TaskStore};
use fetchdeck::task::{Task, TaskId, TaskState};

/// What the scripted executor does for a given source URL
#[derive(Clone)]
pub enum Behavior {
    /// Write `size` bytes and succeed
    Complete { size: u64 },
    /// Write `written` bytes, report `reported`, then succeed if the sink allows it
    Report { written: u64, reported: u64 },
    Fail(ExecutionFailure),
    /// Hold until `gate` is notified, then write `size` bytes
    Gate { gate: Arc<Notify>, size: u64 },
    /// Return a canceled failure once the token fires
    WaitForCancel,
    /// Never return
    Hang,
    Panic,
}

pub struct ScriptedExecutor {
    behaviors: Mutex<HashMap<String, Behavior>>,
    started: Mutex<Vec<String>>,
    cancellable: bool,
}

impl ScriptedExecutor {
    pub fn new(cancellable: bool) -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
            cancellable,
        }
    }

    pub fn script(&self, url: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(url.to_string(), behavior);
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

async fn write_artifact(dir: &PathBuf, size: u64) -> ExecutionOutput {
    tokio::fs::create_dir_all(dir).await.unwrap();
    let body = vec![7u8; size as usize];
    let file_path = dir.join("file.bin");
    tokio::fs::write(&file_path, &body).await.unwrap();
    ExecutionOutput {
        file_path,
        size_bytes: size,
        checksum: format!("sha256:{:x}", Sha256::digest(&body)),
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn run(
        &self,
        request: ExecutionRequest,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutput, ExecutionFailure> {
        self.started.lock().unwrap().push(request.source_url.clone());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&request.source_url)
            .cloned()
            .unwrap_or(Behavior::Complete { size: 16 });

        match behavior {
            Behavior::Complete { size } => {
                progress.report(size / 2, Some(size))?;
                Ok(write_artifact(&request.dest_dir, size).await)
            }
            Behavior::Report { written, reported } => {
                let output = write_artifact(&request.dest_dir, written).await;
                progress.report(reported, None)?;
                Ok(output)
            }
            Behavior::Fail(failure) => Err(failure),
            Behavior::Gate { gate, size } => {
                gate.notified().await;
                Ok(write_artifact(&request.dest_dir, size).await)
            }
            Behavior::WaitForCancel => {
                write_artifact(&request.dest_dir, 4).await;
                cancel.cancelled().await;
                Err(ExecutionFailure::canceled())
            }
            Behavior::Hang => pending().await,
            Behavior::Panic => panic!("scripted executor panicked"),
        }
    }

    fn supports_cancellation(&self) -> bool {
        self.cancellable
    }
}

pub struct HarnessOptions {
    pub workers: usize,
    pub max_file_size: u64,
    pub timeout: Duration,
    pub cancel_grace: Duration,
    pub cancellable: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            max_file_size: 1_000_000,
            timeout: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(5),
            cancellable: true,
        }
    }
}

pub struct Harness {
    pub temp: TempDir,
    pub store: Arc<FjallTaskStore>,
    pub executor: Arc<ScriptedExecutor>,
    pub orchestrator: Arc<Orchestrator>,
    pub download_dir: PathBuf,
}

impl Harness {
    /// Build without starting the workers
    pub fn build(options: HarnessOptions) -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FjallTaskStore::open(temp.path().join("tasks")).unwrap());
        let executor = Arc::new(ScriptedExecutor::new(options.cancellable));
        let download_dir = temp.path().join("downloads");

        let config = OrchestratorConfig {
            scheduler: SchedulerConfig {
                workers: options.workers,
                limits: Limits {
                    timeout: options.timeout,
                    max_file_size: options.max_file_size,
                },
                download_dir: download_dir.clone(),
                cancel_grace: options.cancel_grace,
                progress_flush_interval: Duration::from_millis(20),
            },
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            },
            callback_drain: Duration::from_secs(5),
            default_page_size: 20,
            max_page_size: 100,
        };
        let notifier = Arc::new(HttpNotifier::new(Duration::from_secs(2), "fetchdeck-test").unwrap());
        let orchestrator = Arc::new(Orchestrator::new(
            config,
            store.clone(),
            executor.clone(),
            notifier,
        ));

        Self {
            temp,
            store,
            executor,
            orchestrator,
            download_dir,
        }
    }

    pub async fn start(options: HarnessOptions) -> Self {
        let harness = Self::build(options);
        harness.orchestrator.start().await.unwrap();
        harness
    }

    pub fn artifact_dir(&self, id: &TaskId) -> PathBuf {
        self.download_dir.join(id.to_string())
    }

    pub fn get(&self, id: &TaskId) -> Task {
        self.store.get(id).unwrap()
    }

    /// Poll until `predicate` holds or panic after five seconds
    pub async fn wait_for(&self, id: &TaskId, predicate: impl Fn(&Task) -> bool) -> Task {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let task = self.get(id);
            if predicate(&task) {
                return task;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for task {id}, last seen: {task:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn wait_for_state(&self, id: &TaskId, state: TaskState) -> Task {
        self.wait_for(id, |task| task.state == state).await
    }
}
