//! Priority task queue executed by a fixed pool of tokio workers
//!
//! Submissions wait for a free queue slot when the queue is full
//! ([`TaskQueue::try_submit`] rejects instead). Each payload runs in its own
//! spawned task so that a panic is recorded as a failure and never takes a
//! worker down.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::config::AsyncProcessorConfig;
use crate::error::{PerfError, PerfResult};
use super::lock;
use super::priority_queue::{PriorityQueue, TaskPriority};

/// Boxed payload accepted by the executors
pub type Job<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'static>>;

/// Unique task identifier, generated at submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public view of a task record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub name: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskQueueStats {
    pub total_tasks: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub active: usize,
    pub queued: usize,
    pub workers: usize,
    pub queue_capacity: usize,
    pub avg_duration_ms: f64,
    /// Percentage of finished, non-cancelled tasks that completed
    pub success_rate: f64,
}

enum TaskOutcome<T> {
    Completed(T),
    Failed(Arc<anyhow::Error>),
    Cancelled,
}

struct TaskEntry<T> {
    info: TaskInfo,
    started: Option<Instant>,
    result: Option<T>,
    error: Option<Arc<anyhow::Error>>,
    status_tx: watch::Sender<TaskStatus>,
}

/// Task records plus a bounded ring of finished ids
struct TaskTable<T> {
    tasks: HashMap<TaskId, TaskEntry<T>>,
    history: VecDeque<TaskId>,
    history_size: usize,
    total_tasks: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    running: usize,
    total_duration: Duration,
}

impl<T: Clone> TaskTable<T> {
    fn new(history_size: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            history: VecDeque::new(),
            history_size: history_size.max(1),
            total_tasks: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            running: 0,
            total_duration: Duration::ZERO,
        }
    }

    fn insert_pending(&mut self, name: &str, priority: TaskPriority) -> TaskId {
        let task_id = TaskId::new();
        let (status_tx, _) = watch::channel(TaskStatus::Pending);
        self.tasks.insert(task_id, TaskEntry {
            info: TaskInfo {
                task_id,
                name: name.to_string(),
                priority,
                status: TaskStatus::Pending,
                submitted_at: Utc::now(),
                started_at: None,
                finished_at: None,
                duration_ms: None,
                error: None,
            },
            started: None,
            result: None,
            error: None,
            status_tx,
        });
        self.total_tasks += 1;
        task_id
    }

    /// Drop a record that never made it into the queue
    fn discard(&mut self, task_id: &TaskId) {
        if self.tasks.remove(task_id).is_some() {
            self.total_tasks = self.total_tasks.saturating_sub(1);
        }
    }

    /// Pending -> running. Returns false if the task left pending already.
    fn mark_running(&mut self, task_id: &TaskId) -> bool {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if entry.info.status != TaskStatus::Pending {
            return false;
        }
        entry.info.status = TaskStatus::Running;
        entry.info.started_at = Some(Utc::now());
        entry.started = Some(Instant::now());
        entry.status_tx.send_replace(TaskStatus::Running);
        self.running += 1;
        true
    }

    fn finish(&mut self, task_id: &TaskId, outcome: TaskOutcome<T>) {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return;
        };
        if entry.info.status.is_finished() {
            return;
        }
        if entry.info.status == TaskStatus::Running {
            self.running = self.running.saturating_sub(1);
        }

        let elapsed = entry.started.map(|s| s.elapsed());
        entry.info.finished_at = Some(Utc::now());
        entry.info.duration_ms = elapsed.map(|d| d.as_secs_f64() * 1000.0);

        let status = match outcome {
            TaskOutcome::Completed(value) => {
                entry.result = Some(value);
                self.completed += 1;
                TaskStatus::Completed
            }
            TaskOutcome::Failed(error) => {
                entry.info.error = Some(format!("{:#}", error));
                entry.error = Some(error);
                self.failed += 1;
                TaskStatus::Failed
            }
            TaskOutcome::Cancelled => {
                self.cancelled += 1;
                TaskStatus::Cancelled
            }
        };
        if let Some(elapsed) = elapsed {
            self.total_duration += elapsed;
        }
        entry.info.status = status;
        entry.status_tx.send_replace(status);

        self.history.push_back(*task_id);
        while self.history.len() > self.history_size {
            if let Some(evicted) = self.history.pop_front() {
                self.tasks.remove(&evicted);
            }
        }
    }

    fn status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.tasks.get(task_id).map(|e| e.info.status)
    }

    fn info(&self, task_id: &TaskId) -> Option<TaskInfo> {
        self.tasks.get(task_id).map(|e| e.info.clone())
    }

    fn result(&self, task_id: &TaskId) -> PerfResult<T> {
        let entry = self.tasks.get(task_id).ok_or_else(|| PerfError::NotFound {
            resource: "task".to_string(),
            id: task_id.to_string(),
        })?;

        match entry.info.status {
            TaskStatus::Completed => entry.result.clone().ok_or_else(|| PerfError::NotFound {
                resource: "task result".to_string(),
                id: task_id.to_string(),
            }),
            TaskStatus::Failed => {
                let error = entry
                    .error
                    .clone()
                    .unwrap_or_else(|| Arc::new(anyhow::anyhow!("task failed")));
                Err(PerfError::task_failed(&task_id.to_string(), error))
            }
            TaskStatus::Cancelled => Err(PerfError::TaskCancelled { task_id: task_id.to_string() }),
            status => Err(PerfError::NotReady {
                task_id: task_id.to_string(),
                status: status.to_string(),
            }),
        }
    }

    fn subscribe(&self, task_id: &TaskId) -> PerfResult<watch::Receiver<TaskStatus>> {
        self.tasks
            .get(task_id)
            .map(|e| e.status_tx.subscribe())
            .ok_or_else(|| PerfError::NotFound {
                resource: "task".to_string(),
                id: task_id.to_string(),
            })
    }

    fn purge(&mut self) -> usize {
        let purged = self.history.len();
        for task_id in self.history.drain(..) {
            self.tasks.remove(&task_id);
        }
        purged
    }

    fn stats(&self, queued: usize, workers: usize, queue_capacity: usize) -> TaskQueueStats {
        let finished = self.completed + self.failed;
        TaskQueueStats {
            total_tasks: self.total_tasks,
            completed: self.completed,
            failed: self.failed,
            cancelled: self.cancelled,
            active: self.running,
            queued,
            workers,
            queue_capacity,
            avg_duration_ms: if finished == 0 {
                0.0
            } else {
                self.total_duration.as_secs_f64() * 1000.0 / finished as f64
            },
            success_rate: if finished == 0 {
                100.0
            } else {
                self.completed as f64 / finished as f64 * 100.0
            },
        }
    }
}

async fn wait_for_result<T: Clone>(
    table: &Mutex<TaskTable<T>>,
    task_id: &TaskId,
    timeout: Duration,
) -> PerfResult<T> {
    let mut rx = lock(table).subscribe(task_id)?;
    let finished = tokio::time::timeout(timeout, rx.wait_for(|status| status.is_finished()))
        .await
        .map(|changed| changed.is_ok());

    match finished {
        Ok(_) => lock(table).result(task_id),
        Err(_) => Err(PerfError::timeout(&format!("task_queue.wait({})", task_id), timeout)),
    }
}

/// Run a payload in its own task and turn panics into failures
async fn run_isolated<T: Send + 'static>(job: Job<T>) -> TaskOutcome<T> {
    let handle = tokio::spawn(job);
    join_outcome(handle).await
}

async fn join_outcome<T: Send + 'static>(handle: JoinHandle<anyhow::Result<T>>) -> TaskOutcome<T> {
    match handle.await {
        Ok(Ok(value)) => TaskOutcome::Completed(value),
        Ok(Err(e)) => TaskOutcome::Failed(Arc::new(e)),
        Err(join_error) if join_error.is_panic() => {
            let message = panic_message(join_error.into_panic());
            TaskOutcome::Failed(Arc::new(anyhow::anyhow!("task panicked: {}", message)))
        }
        Err(_) => TaskOutcome::Failed(Arc::new(anyhow::anyhow!("task aborted during shutdown"))),
    }
}

pub(super) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Submission and lookup surface shared by [`TaskQueue`] and [`InlineExecutor`]
#[async_trait]
pub trait TaskExecutor<T>: Send + Sync {
    /// Enqueue a job, waiting for a free slot if the queue is full
    async fn submit_job(&self, name: &str, priority: TaskPriority, job: Job<T>) -> PerfResult<TaskId>;

    /// Enqueue a job or fail with `CapacityExceeded` if the queue is full
    async fn try_submit_job(&self, name: &str, priority: TaskPriority, job: Job<T>) -> PerfResult<TaskId>;

    fn status(&self, task_id: &TaskId) -> Option<TaskStatus>;

    fn info(&self, task_id: &TaskId) -> Option<TaskInfo>;

    fn result(&self, task_id: &TaskId) -> PerfResult<T>;

    async fn wait(&self, task_id: &TaskId, timeout: Duration) -> PerfResult<T>;

    /// Cancel a pending task. Returns false if it already started or finished.
    fn cancel(&self, task_id: &TaskId) -> PerfResult<bool>;

    fn stats(&self) -> TaskQueueStats;

    /// Drop records of finished tasks
    fn purge_history(&self) -> usize;

    async fn shutdown(&self, drain_timeout: Duration);

    fn is_async(&self) -> bool;
}

struct QueuedTask<T> {
    task_id: TaskId,
    job: Job<T>,
    // Frees a queue slot when the task leaves the queue
    _slot: OwnedSemaphorePermit,
}

struct QueueShared<T> {
    pending: Mutex<PriorityQueue<QueuedTask<T>>>,
    table: Mutex<TaskTable<T>>,
    running: Mutex<HashMap<TaskId, AbortHandle>>,
    slots: Arc<Semaphore>,
    work_ready: Notify,
    idle: Notify,
    shutdown: CancellationToken,
}

impl<T: Clone + Send + 'static> QueueShared<T> {
    fn outstanding(&self) -> usize {
        lock(&self.pending).len() + lock(&self.table).running
    }

    /// Pop the next task and mark it running
    fn next_task(&self) -> Option<QueuedTask<T>> {
        let mut pending = lock(&self.pending);
        let mut table = lock(&self.table);
        while let Some(task) = pending.pop() {
            if table.mark_running(&task.task_id) {
                return Some(task);
            }
        }
        None
    }

    fn finish(&self, task_id: &TaskId, outcome: TaskOutcome<T>) {
        lock(&self.table).finish(task_id, outcome);
        if self.outstanding() == 0 {
            self.idle.notify_waiters();
        }
    }
}

async fn worker_loop<T: Clone + Send + 'static>(worker_id: usize, shared: Arc<QueueShared<T>>) {
    debug!(worker_id, "Task worker started");
    loop {
        let notified = shared.work_ready.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match shared.next_task() {
            Some(task) => {
                let QueuedTask { task_id, job, _slot } = task;
                drop(_slot);

                let handle = tokio::spawn(job);
                lock(&shared.running).insert(task_id, handle.abort_handle());
                let outcome = join_outcome(handle).await;
                lock(&shared.running).remove(&task_id);

                if let TaskOutcome::Failed(e) = &outcome {
                    warn!(worker_id, task_id = %task_id, error = %e, "Task failed");
                } else {
                    debug!(worker_id, task_id = %task_id, "Task completed");
                }
                shared.finish(&task_id, outcome);
            }
            None => {
                tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    _ = &mut notified => {}
                }
            }
        }
    }
    debug!(worker_id, "Task worker stopped");
}

/// Bounded priority queue drained by `max_workers` tokio tasks.
///
/// Must be created inside a tokio runtime.
pub struct TaskQueue<T> {
    shared: Arc<QueueShared<T>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    queue_capacity: usize,
    accepting: AtomicBool,
}

impl<T> fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("workers", &self.worker_count)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl<T: Clone + Send + 'static> TaskQueue<T> {
    pub fn new(config: &AsyncProcessorConfig) -> Self {
        let worker_count = config.max_workers.max(1);
        let queue_capacity = config.queue_size.max(1);
        let shared = Arc::new(QueueShared {
            pending: Mutex::new(PriorityQueue::new()),
            table: Mutex::new(TaskTable::new(config.history_size)),
            running: Mutex::new(HashMap::new()),
            slots: Arc::new(Semaphore::new(queue_capacity)),
            work_ready: Notify::new(),
            idle: Notify::new(),
            shutdown: CancellationToken::new(),
        });

        let workers = (0..worker_count)
            .map(|worker_id| tokio::spawn(worker_loop(worker_id, Arc::clone(&shared))))
            .collect();

        info!(workers = worker_count, queue_capacity, "Task queue started");

        Self {
            shared,
            workers: Mutex::new(workers),
            worker_count,
            queue_capacity,
            accepting: AtomicBool::new(true),
        }
    }

    fn ensure_accepting(&self) -> PerfResult<()> {
        if self.accepting.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(PerfError::ShuttingDown { component: "task_queue".to_string() })
        }
    }

    fn enqueue(&self, slot: OwnedSemaphorePermit, name: &str, priority: TaskPriority, job: Job<T>) -> PerfResult<TaskId> {
        let mut pending = lock(&self.shared.pending);
        let task_id = lock(&self.shared.table).insert_pending(name, priority);
        // Re-check under the queue lock so shutdown cannot miss this task
        if let Err(e) = self.ensure_accepting() {
            lock(&self.shared.table).discard(&task_id);
            return Err(e);
        }
        pending.push(priority, QueuedTask { task_id, job, _slot: slot });
        drop(pending);

        self.shared.work_ready.notify_one();
        debug!(task_id = %task_id, name, priority = %priority, "Task submitted");
        Ok(task_id)
    }

    /// Submit a future, waiting for queue space if the queue is full
    pub async fn submit<Fut>(&self, name: &str, priority: TaskPriority, future: Fut) -> PerfResult<TaskId>
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.submit_boxed(name, priority, Box::pin(future)).await
    }

    async fn submit_boxed(&self, name: &str, priority: TaskPriority, job: Job<T>) -> PerfResult<TaskId> {
        self.ensure_accepting()?;
        let slot = Arc::clone(&self.shared.slots)
            .acquire_owned()
            .await
            .map_err(|_| PerfError::ShuttingDown { component: "task_queue".to_string() })?;
        self.enqueue(slot, name, priority, job)
    }

    /// Submit without waiting; fails with `CapacityExceeded` when the queue is full
    pub fn try_submit<Fut>(&self, name: &str, priority: TaskPriority, future: Fut) -> PerfResult<TaskId>
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.try_submit_boxed(name, priority, Box::pin(future))
    }

    fn try_submit_boxed(&self, name: &str, priority: TaskPriority, job: Job<T>) -> PerfResult<TaskId> {
        self.ensure_accepting()?;
        let slot = match Arc::clone(&self.shared.slots).try_acquire_owned() {
            Ok(slot) => slot,
            Err(TryAcquireError::NoPermits) => {
                return Err(PerfError::CapacityExceeded {
                    resource: "task_queue".to_string(),
                    capacity: self.queue_capacity,
                })
            }
            Err(TryAcquireError::Closed) => {
                return Err(PerfError::ShuttingDown { component: "task_queue".to_string() })
            }
        };
        self.enqueue(slot, name, priority, job)
    }

    /// Submit a blocking closure; it runs on tokio's blocking thread pool
    pub async fn submit_blocking<F>(&self, name: &str, priority: TaskPriority, f: F) -> PerfResult<TaskId>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.submit(name, priority, async move {
            tokio::task::spawn_blocking(f)
                .await
                .map_err(|e| anyhow::anyhow!("blocking task did not complete: {}", e))?
        })
        .await
    }

    pub fn status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        lock(&self.shared.table).status(task_id)
    }

    pub fn info(&self, task_id: &TaskId) -> Option<TaskInfo> {
        lock(&self.shared.table).info(task_id)
    }

    pub fn result(&self, task_id: &TaskId) -> PerfResult<T> {
        lock(&self.shared.table).result(task_id)
    }

    pub async fn wait(&self, task_id: &TaskId, timeout: Duration) -> PerfResult<T> {
        wait_for_result(&self.shared.table, task_id, timeout).await
    }

    pub fn cancel(&self, task_id: &TaskId) -> PerfResult<bool> {
        let mut pending = lock(&self.shared.pending);
        let status = lock(&self.shared.table).status(task_id).ok_or_else(|| PerfError::NotFound {
            resource: "task".to_string(),
            id: task_id.to_string(),
        })?;
        if status != TaskStatus::Pending {
            return Ok(false);
        }

        // Removing the queued task drops its slot permit
        pending.remove_first(|task| task.task_id == *task_id);
        drop(pending);

        self.shared.finish(task_id, TaskOutcome::Cancelled);
        debug!(task_id = %task_id, "Task cancelled");
        Ok(true)
    }

    pub fn queue_depth(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    pub fn stats(&self) -> TaskQueueStats {
        let queued = self.queue_depth();
        lock(&self.shared.table).stats(queued, self.worker_count, self.queue_capacity)
    }

    pub fn purge_history(&self) -> usize {
        lock(&self.shared.table).purge()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting work and let queued and running tasks finish.
    ///
    /// Whatever is still pending after `drain_timeout` is cancelled, and
    /// running payloads are aborted and recorded as failed. Idempotent.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        {
            let _pending = lock(&self.shared.pending);
            if !self.accepting.swap(false, Ordering::AcqRel) {
                return;
            }
        }
        self.shared.slots.close();
        info!(outstanding = self.shared.outstanding(), "Task queue draining");

        let drained = tokio::time::timeout(drain_timeout, async {
            loop {
                let idle = self.shared.idle.notified();
                tokio::pin!(idle);
                idle.as_mut().enable();
                if self.shared.outstanding() == 0 {
                    break;
                }
                idle.await;
            }
        })
        .await
        .is_ok();

        if !drained {
            let leftover = lock(&self.shared.pending).drain();
            warn!(
                cancelled = leftover.len(),
                timeout_ms = drain_timeout.as_millis() as u64,
                "Drain timeout reached, cancelling remaining tasks"
            );
            for task in leftover {
                self.shared.finish(&task.task_id, TaskOutcome::Cancelled);
            }
            for handle in lock(&self.shared.running).values() {
                handle.abort();
            }
        }

        self.shared.shutdown.cancel();
        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Task worker exited abnormally");
            }
        }
        info!("Task queue stopped");
    }
}

impl<T> Drop for TaskQueue<T> {
    fn drop(&mut self) {
        // Idle workers exit; a running payload finishes first
        self.shared.shutdown.cancel();
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> TaskExecutor<T> for TaskQueue<T> {
    async fn submit_job(&self, name: &str, priority: TaskPriority, job: Job<T>) -> PerfResult<TaskId> {
        self.submit_boxed(name, priority, job).await
    }

    async fn try_submit_job(&self, name: &str, priority: TaskPriority, job: Job<T>) -> PerfResult<TaskId> {
        self.try_submit_boxed(name, priority, job)
    }

    fn status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        TaskQueue::status(self, task_id)
    }

    fn info(&self, task_id: &TaskId) -> Option<TaskInfo> {
        TaskQueue::info(self, task_id)
    }

    fn result(&self, task_id: &TaskId) -> PerfResult<T> {
        TaskQueue::result(self, task_id)
    }

    async fn wait(&self, task_id: &TaskId, timeout: Duration) -> PerfResult<T> {
        TaskQueue::wait(self, task_id, timeout).await
    }

    fn cancel(&self, task_id: &TaskId) -> PerfResult<bool> {
        TaskQueue::cancel(self, task_id)
    }

    fn stats(&self) -> TaskQueueStats {
        TaskQueue::stats(self)
    }

    fn purge_history(&self) -> usize {
        TaskQueue::purge_history(self)
    }

    async fn shutdown(&self, drain_timeout: Duration) {
        TaskQueue::shutdown(self, drain_timeout).await
    }

    fn is_async(&self) -> bool {
        true
    }
}

/// Stand-in used when async processing is disabled: each job runs to
/// completion inside `submit`, and its record is kept for later lookup
pub struct InlineExecutor<T> {
    table: Mutex<TaskTable<T>>,
}

impl<T: Clone + Send + 'static> InlineExecutor<T> {
    pub fn new(history_size: usize) -> Self {
        Self {
            table: Mutex::new(TaskTable::new(history_size)),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> TaskExecutor<T> for InlineExecutor<T> {
    async fn submit_job(&self, name: &str, priority: TaskPriority, job: Job<T>) -> PerfResult<TaskId> {
        let task_id = {
            let mut table = lock(&self.table);
            let task_id = table.insert_pending(name, priority);
            table.mark_running(&task_id);
            task_id
        };

        let outcome = run_isolated(job).await;
        lock(&self.table).finish(&task_id, outcome);
        Ok(task_id)
    }

    async fn try_submit_job(&self, name: &str, priority: TaskPriority, job: Job<T>) -> PerfResult<TaskId> {
        self.submit_job(name, priority, job).await
    }

    fn status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        lock(&self.table).status(task_id)
    }

    fn info(&self, task_id: &TaskId) -> Option<TaskInfo> {
        lock(&self.table).info(task_id)
    }

    fn result(&self, task_id: &TaskId) -> PerfResult<T> {
        lock(&self.table).result(task_id)
    }

    async fn wait(&self, task_id: &TaskId, timeout: Duration) -> PerfResult<T> {
        wait_for_result(&self.table, task_id, timeout).await
    }

    fn cancel(&self, task_id: &TaskId) -> PerfResult<bool> {
        lock(&self.table).status(task_id).map(|_| false).ok_or_else(|| PerfError::NotFound {
            resource: "task".to_string(),
            id: task_id.to_string(),
        })
    }

    fn stats(&self) -> TaskQueueStats {
        lock(&self.table).stats(0, 0, 0)
    }

    fn purge_history(&self) -> usize {
        lock(&self.table).purge()
    }

    async fn shutdown(&self, _drain_timeout: Duration) {}

    fn is_async(&self) -> bool {
        false
    }
}
