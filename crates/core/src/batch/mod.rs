use crate::render::{RenderRequest, RenderResult, Renderer};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

const LOG_TARGET: &str = "batch";
const QUEUE_POP_TIMEOUT: Duration = Duration::from_secs(1);
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("task queue is full")]
    QueueFull,
}

/// Seam between the scheduler and the render dispatcher, so scheduling
/// behavior is testable with stub handlers.
pub trait RenderHandler: Send + Sync {
    fn handle(
        &self,
        request: &RenderRequest,
        output_stem: &str,
        cancel: &AtomicBool,
    ) -> RenderResult;
}

impl RenderHandler for Renderer {
    fn handle(
        &self,
        request: &RenderRequest,
        output_stem: &str,
        cancel: &AtomicBool,
    ) -> RenderResult {
        self.render_as(request, output_stem, cancel)
    }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Debug)]
pub struct BatchTask {
    pub task_id: String,
    pub request: RenderRequest,
    pub priority: i32,
    pub state: TaskState,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
    pub result: Option<RenderResult>,
}

#[derive(Clone, Debug)]
pub struct TaskStatus {
    pub state: TaskState,
    pub progress: f64,
    pub result: Option<RenderResult>,
}

#[derive(Clone, Debug, Serialize)]
pub struct WorkerStats {
    pub worker_id: String,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_busy_seconds: f64,
    pub current_task_id: Option<String>,
}

impl WorkerStats {
    fn new(worker_id: String) -> Self {
        Self {
            worker_id,
            tasks_completed: 0,
            tasks_failed: 0,
            total_busy_seconds: 0.0,
            current_task_id: None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SchedulerMetrics {
    pub runtime_seconds: f64,
    pub total_tasks_processed: u64,
    pub total_busy_seconds: f64,
    pub avg_task_seconds: f64,
    pub throughput_per_second: f64,
    pub efficiency_percent: f64,
    pub workers: Vec<WorkerStats>,
}

struct QueuedWork {
    task_id: String,
    request: RenderRequest,
    cancel: Arc<AtomicBool>,
}

enum QueueItem {
    Work(QueuedWork),
    Shutdown,
}

/// Bounded FIFO with a timed pop, shared by all workers. Control items
/// (shutdown sentinels) bypass the capacity check so `stop` always gets
/// through a full queue.
struct BoundedQueue {
    items: Mutex<VecDeque<QueueItem>>,
    capacity: usize,
    available: Condvar,
}

impl BoundedQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
            available: Condvar::new(),
        }
    }

    fn try_push(&self, work: QueuedWork) -> Result<(), SchedulerError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let queued = items
            .iter()
            .filter(|i| matches!(i, QueueItem::Work(_)))
            .count();
        if queued >= self.capacity {
            return Err(SchedulerError::QueueFull);
        }
        items.push_back(QueueItem::Work(work));
        self.available.notify_one();
        Ok(())
    }

    fn push_sentinel(&self) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.push_back(QueueItem::Shutdown);
        self.available.notify_one();
    }

    /// Drop leftover sentinels so a later `start` does not feed them to
    /// fresh workers.
    fn clear_sentinels(&self) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.retain(|i| matches!(i, QueueItem::Work(_)));
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<QueueItem> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, result) = self
                .available
                .wait_timeout(items, remaining)
                .unwrap_or_else(|e| e.into_inner());
            items = guard;
            if result.timed_out() && items.is_empty() {
                return None;
            }
        }
    }
}

struct TaskEntry {
    task: BatchTask,
    cancel: Arc<AtomicBool>,
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<String, TaskEntry>,
    completed: HashMap<String, BatchTask>,
    worker_stats: BTreeMap<String, WorkerStats>,
    total_tasks_processed: u64,
    total_busy_seconds: f64,
    started_at: Option<Instant>,
}

/// Fixed-size pool of OS worker threads over one bounded FIFO queue.
/// Task bookkeeping lives behind a single mutex; holders only do O(1) work
/// inside it. The `priority` field is advisory: the queue stays FIFO.
pub struct Scheduler {
    handler: Arc<dyn RenderHandler>,
    worker_count: usize,
    queue: Arc<BoundedQueue>,
    state: Arc<Mutex<SchedulerState>>,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(handler: Arc<dyn RenderHandler>, worker_count: usize, queue_capacity: usize) -> Self {
        Self {
            handler,
            worker_count: worker_count.max(1),
            queue: Arc::new(BoundedQueue::new(queue_capacity.max(1))),
            state: Arc::new(Mutex::new(SchedulerState::default())),
            running: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Idempotent. Worker stats are initialized for every worker before any
    /// thread spawns, so the first popped task never races its own stats
    /// entry.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.started_at.get_or_insert_with(Instant::now);
            for i in 0..self.worker_count {
                let worker_id = format!("worker_{}", i + 1);
                state
                    .worker_stats
                    .entry(worker_id.clone())
                    .or_insert_with(|| WorkerStats::new(worker_id));
            }
        }

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for i in 0..self.worker_count {
            let worker_id = format!("worker_{}", i + 1);
            let queue = Arc::clone(&self.queue);
            let state = Arc::clone(&self.state);
            let running = Arc::clone(&self.running);
            let handler = Arc::clone(&self.handler);
            handles.push(
                std::thread::Builder::new()
                    .name(worker_id.clone())
                    .spawn(move || worker_loop(worker_id, queue, state, running, handler))
                    .expect("spawn worker thread"),
            );
        }
        tracing::info!(target: LOG_TARGET, workers = self.worker_count, "scheduler started");
    }

    /// Enqueue a request. Rejected when the queue is at capacity.
    pub fn submit(&self, request: RenderRequest, priority: i32) -> Result<String, SchedulerError> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let cancel = Arc::new(AtomicBool::new(false));

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.tasks.insert(
                task_id.clone(),
                TaskEntry {
                    task: BatchTask {
                        task_id: task_id.clone(),
                        request: request.clone(),
                        priority,
                        state: TaskState::Queued,
                        created_at: SystemTime::now(),
                        started_at: None,
                        completed_at: None,
                        result: None,
                    },
                    cancel: Arc::clone(&cancel),
                },
            );
        }

        let work = QueuedWork {
            task_id: task_id.clone(),
            request,
            cancel,
        };
        if let Err(e) = self.queue.try_push(work) {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.tasks.remove(&task_id);
            return Err(e);
        }

        tracing::debug!(target: LOG_TARGET, task_id = %task_id, "task submitted");
        Ok(task_id)
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = state.completed.get(task_id) {
            return Some(TaskStatus {
                state: task.state,
                progress: 100.0,
                result: task.result.clone(),
            });
        }
        state.tasks.get(task_id).map(|entry| TaskStatus {
            state: entry.task.state,
            progress: if entry.task.state == TaskState::Running {
                50.0
            } else {
                0.0
            },
            result: None,
        })
    }

    /// Cooperative cancel. A queued task goes terminal immediately; a
    /// running task finishes its synthesis, after which the worker discards
    /// the result and records `cancelled`.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = state.tasks.get_mut(task_id) else {
            return false;
        };
        entry.cancel.store(true, Ordering::Relaxed);
        if entry.task.state == TaskState::Queued {
            if let Some(mut entry) = state.tasks.remove(task_id) {
                entry.task.state = TaskState::Cancelled;
                entry.task.completed_at = Some(SystemTime::now());
                state.completed.insert(task_id.to_owned(), entry.task);
            }
        }
        tracing::info!(target: LOG_TARGET, task_id = %task_id, "task cancelled");
        true
    }

    /// Send one sentinel per worker, then wait for each thread. Tasks queued
    /// ahead of the sentinels drain first.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for _ in 0..self.worker_count {
            self.queue.push_sentinel();
        }

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for handle in handles.drain(..) {
            let deadline = Instant::now() + WORKER_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                handle.join().ok();
            } else {
                tracing::warn!(target: LOG_TARGET, "worker did not stop within the join timeout");
            }
        }
        self.queue.clear_sentinels();
        tracing::info!(target: LOG_TARGET, "scheduler stopped");
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let runtime_seconds = state
            .started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let processed = state.total_tasks_processed;
        let busy = state.total_busy_seconds;
        let denominator = runtime_seconds * self.worker_count as f64;
        SchedulerMetrics {
            runtime_seconds,
            total_tasks_processed: processed,
            total_busy_seconds: busy,
            avg_task_seconds: busy / processed.max(1) as f64,
            throughput_per_second: processed as f64 / runtime_seconds.max(f64::EPSILON),
            efficiency_percent: if denominator > 0.0 {
                (busy / denominator * 100.0).min(100.0)
            } else {
                0.0
            },
            workers: state.worker_stats.values().cloned().collect(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    worker_id: String,
    queue: Arc<BoundedQueue>,
    state: Arc<Mutex<SchedulerState>>,
    running: Arc<AtomicBool>,
    handler: Arc<dyn RenderHandler>,
) {
    loop {
        let work = match queue.pop_timeout(QUEUE_POP_TIMEOUT) {
            Some(QueueItem::Shutdown) => break,
            Some(QueueItem::Work(work)) => work,
            None => {
                if running.load(Ordering::Relaxed) {
                    continue;
                }
                break;
            }
        };

        // A queued task cancelled before pop has already gone terminal.
        {
            let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = guard.tasks.get_mut(&work.task_id) else {
                continue;
            };
            entry.task.state = TaskState::Running;
            entry.task.started_at = Some(SystemTime::now());
            if let Some(stats) = guard.worker_stats.get_mut(&worker_id) {
                stats.current_task_id = Some(work.task_id.clone());
            }
        }

        let started = Instant::now();
        let result = handler.handle(&work.request, &work.task_id, &work.cancel);
        let busy = started.elapsed().as_secs_f64();

        {
            let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
            let cancelled = work.cancel.load(Ordering::Relaxed);
            let succeeded = result.success;
            if let Some(mut entry) = guard.tasks.remove(&work.task_id) {
                entry.task.completed_at = Some(SystemTime::now());
                if cancelled {
                    entry.task.state = TaskState::Cancelled;
                    entry.task.result = None;
                } else if succeeded {
                    entry.task.state = TaskState::Succeeded;
                    entry.task.result = Some(result);
                } else {
                    entry.task.state = TaskState::Failed;
                    entry.task.result = Some(result);
                }
                tracing::info!(
                    target: LOG_TARGET,
                    task_id = %work.task_id,
                    worker = %worker_id,
                    state = ?entry.task.state,
                    busy_seconds = busy,
                    "task finished"
                );
                guard.completed.insert(work.task_id.clone(), entry.task);
            }
            if let Some(stats) = guard.worker_stats.get_mut(&worker_id) {
                stats.current_task_id = None;
                stats.total_busy_seconds += busy;
                if cancelled {
                    // neither a success nor a failure for the worker ledger
                } else if succeeded {
                    stats.tasks_completed += 1;
                } else {
                    stats.tasks_failed += 1;
                }
            }
            guard.total_tasks_processed += 1;
            guard.total_busy_seconds += busy;
        }
    }
    tracing::debug!(target: LOG_TARGET, worker = %worker_id, "worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct InstantHandler;

    impl RenderHandler for InstantHandler {
        fn handle(
            &self,
            _request: &RenderRequest,
            output_stem: &str,
            _cancel: &AtomicBool,
        ) -> RenderResult {
            RenderResult {
                success: true,
                output_path: Some(format!("/tmp/{output_stem}.wav").into()),
                duration_seconds: 1.0,
                provider_used: Some("stub".into()),
                device_used: Some("cpu".into()),
                warnings: Vec::new(),
                error_kind: None,
                error_message: None,
            }
        }
    }

    struct SlowHandler {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl RenderHandler for SlowHandler {
        fn handle(
            &self,
            request: &RenderRequest,
            output_stem: &str,
            cancel: &AtomicBool,
        ) -> RenderResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            InstantHandler.handle(request, output_stem, cancel)
        }
    }

    fn request(text: &str) -> RenderRequest {
        RenderRequest {
            text: text.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn batch_of_ten_reaches_ten_terminal_states() {
        let scheduler = Scheduler::new(Arc::new(InstantHandler), 4, 100);
        scheduler.start();
        let ids: Vec<String> = (0..10)
            .map(|i| scheduler.submit(request(&format!("task {i}")), 0).expect("submit"))
            .collect();
        scheduler.stop();

        for id in &ids {
            let status = scheduler.status(id).expect("status");
            assert!(status.state.is_terminal(), "{id} is {:?}", status.state);
            assert_eq!(status.state, TaskState::Succeeded);
            assert_eq!(status.progress, 100.0);
            assert!(status.result.is_some());
        }

        let metrics = scheduler.metrics();
        assert_eq!(metrics.total_tasks_processed, 10);
        assert!(metrics.throughput_per_second > 0.0);
        assert!(metrics.efficiency_percent <= 100.0);
        let completed: u64 = metrics.workers.iter().map(|w| w.tasks_completed).sum();
        assert_eq!(completed, 10);
    }

    #[test]
    fn start_is_idempotent() {
        let scheduler = Scheduler::new(Arc::new(InstantHandler), 2, 10);
        scheduler.start();
        scheduler.start();
        let id = scheduler.submit(request("once"), 0).expect("submit");
        scheduler.stop();
        assert_eq!(scheduler.status(&id).unwrap().state, TaskState::Succeeded);
        assert_eq!(scheduler.metrics().workers.len(), 2);
    }

    #[test]
    fn submit_rejects_when_queue_is_full() {
        // No workers started, so the queue only fills.
        let scheduler = Scheduler::new(Arc::new(InstantHandler), 1, 2);
        scheduler.submit(request("a"), 0).expect("first");
        scheduler.submit(request("b"), 0).expect("second");
        let err = scheduler.submit(request("c"), 0).unwrap_err();
        assert_eq!(err, SchedulerError::QueueFull);
    }

    #[test]
    fn queued_task_cancel_goes_terminal_without_running() {
        let handler = Arc::new(SlowHandler {
            delay: Duration::from_millis(200),
            calls: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(handler.clone(), 1, 10);
        scheduler.start();
        let blocker = scheduler.submit(request("blocker"), 0).expect("submit");
        std::thread::sleep(Duration::from_millis(50));
        let victim = scheduler.submit(request("victim"), 0).expect("submit");
        assert!(scheduler.cancel(&victim));
        scheduler.stop();

        assert_eq!(scheduler.status(&victim).unwrap().state, TaskState::Cancelled);
        assert!(scheduler.status(&victim).unwrap().result.is_none());
        assert_eq!(scheduler.status(&blocker).unwrap().state, TaskState::Succeeded);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn running_task_cancel_discards_the_result() {
        let scheduler = Scheduler::new(
            Arc::new(SlowHandler {
                delay: Duration::from_millis(300),
                calls: AtomicUsize::new(0),
            }),
            1,
            10,
        );
        scheduler.start();
        let id = scheduler.submit(request("long"), 0).expect("submit");
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(scheduler.status(&id).unwrap().state, TaskState::Running);
        assert!(scheduler.cancel(&id));
        scheduler.stop();

        let status = scheduler.status(&id).expect("status");
        assert_eq!(status.state, TaskState::Cancelled);
        assert!(status.result.is_none());
    }

    #[test]
    fn cancel_of_unknown_or_finished_task_returns_false() {
        let scheduler = Scheduler::new(Arc::new(InstantHandler), 1, 10);
        scheduler.start();
        let id = scheduler.submit(request("quick"), 0).expect("submit");
        scheduler.stop();
        assert!(!scheduler.cancel(&id));
        assert!(!scheduler.cancel("no-such-task"));
    }

    #[test]
    fn stop_drains_queued_tasks_before_exiting() {
        let scheduler = Scheduler::new(
            Arc::new(SlowHandler {
                delay: Duration::from_millis(20),
                calls: AtomicUsize::new(0),
            }),
            2,
            50,
        );
        scheduler.start();
        let ids: Vec<String> = (0..20)
            .map(|i| scheduler.submit(request(&format!("t{i}")), 0).expect("submit"))
            .collect();
        scheduler.stop();
        for id in ids {
            assert!(scheduler.status(&id).unwrap().state.is_terminal());
        }
    }

    #[test]
    fn worker_stats_exist_before_first_task_runs() {
        let scheduler = Scheduler::new(Arc::new(InstantHandler), 3, 10);
        scheduler.start();
        let metrics = scheduler.metrics();
        assert_eq!(metrics.workers.len(), 3);
        scheduler.stop();
    }
}
