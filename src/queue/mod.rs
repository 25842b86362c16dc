//! Async learning queue: fire-and-forget ingestion.
//!
//! Two bounded crossbeam channels (one per priority) feed a small pool of
//! named worker threads. Submission never blocks: a full normal lane drops
//! its oldest task with a warning. Task execution is wrapped in
//! `catch_unwind`, so a panicking task marks itself failed and the worker
//! survives.

use crate::models::{TaskId, TaskPriority, TaskStatus};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How often waiting workers and `wait` poll.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Bounded retries when making room in a full lane.
const DROP_RETRIES: usize = 4;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Worker thread count.
    pub workers: usize,
    /// Bounded depth per priority lane.
    pub max_queue: usize,
    /// How long terminal task statuses stay queryable.
    pub task_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_queue: 256,
            task_ttl: Duration::from_secs(300),
        }
    }
}

/// A queued learning task.
#[derive(Debug, Clone)]
pub struct LearnTask {
    /// Task identifier.
    pub id: TaskId,
    /// Raw text to ingest.
    pub text: String,
    /// Origin tag passed through to the stored memories.
    pub source: String,
    /// Optional user scope.
    pub user_id: Option<String>,
    /// Optional session scope.
    pub session_id: Option<String>,
    /// Queue priority.
    pub priority: TaskPriority,
}

/// The work a task performs; returns a short summary or a failure reason.
pub type TaskHandler = Arc<dyn Fn(&LearnTask) -> Result<String, String> + Send + Sync>;

#[derive(Debug)]
struct StatusEntry {
    status: TaskStatus,
    updated_at: Instant,
}

type StatusMap = Arc<RwLock<HashMap<TaskId, StatusEntry>>>;

fn set_status(statuses: &StatusMap, id: &TaskId, status: TaskStatus) {
    if let Ok(mut map) = statuses.write() {
        map.insert(
            id.clone(),
            StatusEntry {
                status,
                updated_at: Instant::now(),
            },
        );
    }
}

/// Bounded FIFO learning queue with a worker pool.
pub struct LearningQueue {
    normal_tx: Option<Sender<LearnTask>>,
    high_tx: Option<Sender<LearnTask>>,
    normal_rx: Receiver<LearnTask>,
    high_rx: Receiver<LearnTask>,
    statuses: StatusMap,
    cancel_rest: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    task_ttl: Duration,
}

impl LearningQueue {
    /// Starts the worker pool.
    #[must_use]
    pub fn new(config: &QueueConfig, handler: TaskHandler) -> Self {
        let (normal_tx, normal_rx) = bounded(config.max_queue.max(1));
        let (high_tx, high_rx) = bounded(config.max_queue.max(1));
        let statuses: StatusMap = Arc::new(RwLock::new(HashMap::new()));
        let cancel_rest = Arc::new(AtomicBool::new(false));

        let workers = (0..config.workers.max(1))
            .map(|i| {
                let normal_rx = normal_rx.clone();
                let high_rx = high_rx.clone();
                let statuses = Arc::clone(&statuses);
                let cancel_rest = Arc::clone(&cancel_rest);
                let handler = Arc::clone(&handler);
                #[allow(clippy::expect_used)]
                std::thread::Builder::new()
                    .name(format!("kuzu-memory-learner-{i}"))
                    .spawn(move || {
                        worker_loop(&high_rx, &normal_rx, &statuses, &handler, &cancel_rest);
                    })
                    .expect("failed to spawn learner thread")
            })
            .collect();

        Self {
            normal_tx: Some(normal_tx),
            high_tx: Some(high_tx),
            normal_rx,
            high_rx,
            statuses,
            cancel_rest,
            workers,
            task_ttl: config.task_ttl,
        }
    }

    /// Submits a task without blocking.
    ///
    /// When the normal lane is full, its oldest task is dropped (status
    /// `Dropped`, a warning logged) to make room. A full high lane drops
    /// its own oldest entry. Returns the new task's id regardless; if no
    /// room could be made the new task itself reports `Dropped`.
    pub fn submit(
        &self,
        text: impl Into<String>,
        source: impl Into<String>,
        priority: TaskPriority,
        user_id: Option<String>,
        session_id: Option<String>,
    ) -> TaskId {
        self.purge_stale();

        let task = LearnTask {
            id: TaskId::generate(),
            text: text.into(),
            source: source.into(),
            user_id,
            session_id,
            priority,
        };
        let id = task.id.clone();
        set_status(&self.statuses, &id, TaskStatus::Pending);

        let (tx, rx) = match priority {
            TaskPriority::Normal => (self.normal_tx.as_ref(), &self.normal_rx),
            TaskPriority::High => (self.high_tx.as_ref(), &self.high_rx),
        };
        let Some(tx) = tx else {
            // Queue already drained.
            set_status(&self.statuses, &id, TaskStatus::Dropped);
            return id;
        };

        let mut task = task;
        for _ in 0..=DROP_RETRIES {
            match tx.try_send(task) {
                Ok(()) => {
                    metrics::gauge!("learning_queue_depth", "priority" => priority_label(priority))
                        .set(tx.len() as f64);
                    return id;
                },
                Err(TrySendError::Full(returned)) => {
                    task = returned;
                    if let Ok(victim) = rx.try_recv() {
                        set_status(&self.statuses, &victim.id, TaskStatus::Dropped);
                        tracing::warn!(
                            dropped = %victim.id,
                            "learning queue full, dropped oldest task"
                        );
                        metrics::counter!("learning_queue_dropped_total").increment(1);
                    }
                },
                Err(TrySendError::Disconnected(_)) => break,
            }
        }

        set_status(&self.statuses, &id, TaskStatus::Dropped);
        tracing::warn!(task = %id, "learning queue full, new task dropped");
        id
    }

    /// Current status of a task, if still tracked.
    #[must_use]
    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.statuses
            .read()
            .ok()
            .and_then(|map| map.get(id).map(|entry| entry.status.clone()))
    }

    /// Polls until the task reaches a terminal status or the timeout
    /// passes, returning the last observed status.
    #[must_use]
    pub fn wait(&self, id: &TaskId, timeout: Duration) -> Option<TaskStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status(id);
            match &status {
                Some(s) if s.is_terminal() => return status,
                None => return None,
                Some(_) => {},
            }
            if Instant::now() >= deadline {
                return status;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Cancels a task that has not started. Running tasks run to
    /// completion.
    pub fn cancel(&self, id: &TaskId) -> bool {
        if let Ok(mut map) = self.statuses.write() {
            if let Some(entry) = map.get_mut(id) {
                if entry.status == TaskStatus::Pending {
                    entry.status = TaskStatus::Cancelled;
                    entry.updated_at = Instant::now();
                    return true;
                }
            }
        }
        false
    }

    /// Count of tasks not yet terminal.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.statuses
            .read()
            .map(|map| {
                map.values()
                    .filter(|entry| !entry.status.is_terminal())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Stops intake, processes pending tasks until the deadline, cancels
    /// the rest, and joins the workers.
    pub fn drain(&mut self, timeout: Duration) {
        // Closing the lanes lets workers run down the buffered tasks.
        self.normal_tx = None;
        self.high_tx = None;

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline && self.pending_count() > 0 {
            std::thread::sleep(POLL_INTERVAL);
        }

        self.cancel_rest.store(true, Ordering::Relaxed);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        tracing::debug!("learning queue drained");
    }

    /// Evicts terminal statuses older than the TTL.
    fn purge_stale(&self) {
        if let Ok(mut map) = self.statuses.write() {
            map.retain(|_, entry| {
                !(entry.status.is_terminal() && entry.updated_at.elapsed() > self.task_ttl)
            });
        }
    }
}

impl Drop for LearningQueue {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.drain(Duration::from_millis(200));
        }
    }
}

const fn priority_label(priority: TaskPriority) -> &'static str {
    match priority {
        TaskPriority::Normal => "normal",
        TaskPriority::High => "high",
    }
}

fn worker_loop(
    high_rx: &Receiver<LearnTask>,
    normal_rx: &Receiver<LearnTask>,
    statuses: &StatusMap,
    handler: &TaskHandler,
    cancel_rest: &AtomicBool,
) {
    let mut high_open = true;
    let mut normal_open = true;

    while high_open || normal_open {
        // Prefer the high lane.
        if high_open {
            match high_rx.try_recv() {
                Ok(task) => {
                    run_task(&task, statuses, handler, cancel_rest);
                    continue;
                },
                Err(TryRecvError::Empty) => {},
                Err(TryRecvError::Disconnected) => {
                    high_open = false;
                    continue;
                },
            }
        }
        if normal_open {
            match normal_rx.try_recv() {
                Ok(task) => {
                    run_task(&task, statuses, handler, cancel_rest);
                    continue;
                },
                Err(TryRecvError::Empty) => {},
                Err(TryRecvError::Disconnected) => {
                    normal_open = false;
                    continue;
                },
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn run_task(
    task: &LearnTask,
    statuses: &StatusMap,
    handler: &TaskHandler,
    cancel_rest: &AtomicBool,
) {
    // Skip tasks cancelled or dropped before start; cancel instead of run
    // once a drain deadline has passed.
    let should_run = {
        match statuses.write() {
            Ok(mut map) => match map.get_mut(&task.id) {
                Some(entry) if entry.status.is_terminal() => false,
                Some(entry) => {
                    if cancel_rest.load(Ordering::Relaxed) {
                        entry.status = TaskStatus::Cancelled;
                        entry.updated_at = Instant::now();
                        false
                    } else {
                        entry.status = TaskStatus::Running;
                        entry.updated_at = Instant::now();
                        true
                    }
                },
                None => !cancel_rest.load(Ordering::Relaxed),
            },
            Err(_) => false,
        }
    };
    if !should_run {
        return;
    }

    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| handler(task)));
    let status = match outcome {
        Ok(Ok(summary)) => TaskStatus::Done(summary),
        Ok(Err(reason)) => {
            tracing::warn!(task = %task.id, reason, "learning task failed");
            TaskStatus::Failed(reason)
        },
        Err(_) => {
            tracing::error!(task = %task.id, "learning task panicked");
            metrics::counter!("learning_task_panics_total").increment(1);
            TaskStatus::Failed("task panicked".to_string())
        },
    };
    metrics::histogram!("learning_task_duration_ms").record(started.elapsed().as_millis() as f64);
    set_status(statuses, &task.id, status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_handler(counter: Arc<AtomicUsize>) -> TaskHandler {
        Arc::new(move |task: &LearnTask| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("processed {}", task.text.len()))
        })
    }

    #[test]
    fn test_submit_and_complete() {
        let counter = Arc::new(AtomicUsize::new(0));
        let queue = LearningQueue::new(&QueueConfig::default(), counting_handler(counter.clone()));

        let id = queue.submit("hello world", "test", TaskPriority::Normal, None, None);
        let status = queue.wait(&id, Duration::from_secs(5)).unwrap();

        assert!(matches!(status, TaskStatus::Done(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fifo_within_priority() {
        let order = Arc::new(RwLock::new(Vec::new()));
        let order_clone = Arc::clone(&order);
        let handler: TaskHandler = Arc::new(move |task: &LearnTask| {
            order_clone.write().unwrap().push(task.text.clone());
            Ok(String::new())
        });

        // Single worker makes ordering observable.
        let config = QueueConfig {
            workers: 1,
            ..QueueConfig::default()
        };
        let queue = LearningQueue::new(&config, handler);
        let ids: Vec<_> = (0..5)
            .map(|i| queue.submit(format!("t{i}"), "test", TaskPriority::Normal, None, None))
            .collect();
        for id in &ids {
            let _ = queue.wait(id, Duration::from_secs(5));
        }

        assert_eq!(
            *order.read().unwrap(),
            vec!["t0", "t1", "t2", "t3", "t4"]
        );
    }

    #[test]
    fn test_failed_task_reports_reason() {
        let handler: TaskHandler = Arc::new(|_| Err("storage offline".to_string()));
        let queue = LearningQueue::new(&QueueConfig::default(), handler);

        let id = queue.submit("x", "test", TaskPriority::Normal, None, None);
        let status = queue.wait(&id, Duration::from_secs(5)).unwrap();
        assert_eq!(status, TaskStatus::Failed("storage offline".to_string()));
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let handler: TaskHandler = Arc::new(move |task: &LearnTask| {
            if task.text == "boom" {
                panic!("intentional test panic");
            }
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(String::new())
        });

        let config = QueueConfig {
            workers: 1,
            ..QueueConfig::default()
        };
        let queue = LearningQueue::new(&config, handler);

        let bad = queue.submit("boom", "test", TaskPriority::Normal, None, None);
        let good = queue.submit("fine", "test", TaskPriority::Normal, None, None);

        assert!(matches!(
            queue.wait(&bad, Duration::from_secs(5)).unwrap(),
            TaskStatus::Failed(_)
        ));
        assert!(matches!(
            queue.wait(&good, Duration::from_secs(5)).unwrap(),
            TaskStatus::Done(_)
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_before_start() {
        // A handler that stalls keeps the lone worker busy so the second
        // task stays pending long enough to cancel.
        let handler: TaskHandler = Arc::new(|task: &LearnTask| {
            if task.text == "slow" {
                std::thread::sleep(Duration::from_millis(150));
            }
            Ok(String::new())
        });
        let config = QueueConfig {
            workers: 1,
            ..QueueConfig::default()
        };
        let queue = LearningQueue::new(&config, handler);

        let _busy = queue.submit("slow", "test", TaskPriority::Normal, None, None);
        let victim = queue.submit("later", "test", TaskPriority::Normal, None, None);

        assert!(queue.cancel(&victim));
        let status = queue.wait(&victim, Duration::from_secs(5)).unwrap();
        assert_eq!(status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_overflow_drops_oldest_normal() {
        // Stall the worker so the lane actually fills.
        let handler: TaskHandler = Arc::new(|_| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(String::new())
        });
        let config = QueueConfig {
            workers: 1,
            max_queue: 2,
            ..QueueConfig::default()
        };
        let queue = LearningQueue::new(&config, handler);

        let first = queue.submit("t0", "test", TaskPriority::Normal, None, None);
        let ids: Vec<_> = (1..8)
            .map(|i| queue.submit(format!("t{i}"), "test", TaskPriority::Normal, None, None))
            .collect();

        // The first queued task (or an early one) must have been evicted.
        let mut dropped = 0;
        for id in std::iter::once(&first).chain(ids.iter()) {
            if queue.status(id) == Some(TaskStatus::Dropped) {
                dropped += 1;
            }
        }
        assert!(dropped > 0, "overflow must drop tasks");
    }

    #[test]
    fn test_submit_latency_is_bounded() {
        let handler: TaskHandler = Arc::new(|_| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(String::new())
        });
        let queue = LearningQueue::new(&QueueConfig::default(), handler);

        let mut worst = Duration::ZERO;
        for i in 0..100 {
            let start = Instant::now();
            let _ = queue.submit(format!("t{i}"), "test", TaskPriority::Normal, None, None);
            worst = worst.max(start.elapsed());
        }
        // Generous CI bound; the contract is "non-blocking".
        assert!(worst < Duration::from_millis(50), "worst submit {worst:?}");
    }

    #[test]
    fn test_drain_completes_pending() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut queue =
            LearningQueue::new(&QueueConfig::default(), counting_handler(counter.clone()));

        for i in 0..10 {
            let _ = queue.submit(format!("t{i}"), "test", TaskPriority::Normal, None, None);
        }
        queue.drain(Duration::from_secs(5));

        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_submit_after_drain_is_dropped() {
        let mut queue = LearningQueue::new(
            &QueueConfig::default(),
            Arc::new(|_: &LearnTask| Ok(String::new())),
        );
        queue.drain(Duration::from_secs(1));

        let id = queue.submit("late", "test", TaskPriority::Normal, None, None);
        assert_eq!(queue.status(&id), Some(TaskStatus::Dropped));
    }

    #[test]
    fn test_high_priority_preferred() {
        let order = Arc::new(RwLock::new(Vec::new()));
        let order_clone = Arc::clone(&order);
        let handler: TaskHandler = Arc::new(move |task: &LearnTask| {
            if task.text == "warmup" {
                std::thread::sleep(Duration::from_millis(100));
            } else {
                order_clone.write().unwrap().push(task.text.clone());
            }
            Ok(String::new())
        });
        let config = QueueConfig {
            workers: 1,
            ..QueueConfig::default()
        };
        let queue = LearningQueue::new(&config, handler);

        // Occupy the worker, then enqueue normal before high.
        let _warm = queue.submit("warmup", "test", TaskPriority::Normal, None, None);
        std::thread::sleep(Duration::from_millis(20));
        let normal = queue.submit("normal", "test", TaskPriority::Normal, None, None);
        let high = queue.submit("high", "test", TaskPriority::High, None, None);

        let _ = queue.wait(&normal, Duration::from_secs(5));
        let _ = queue.wait(&high, Duration::from_secs(5));

        let observed = order.read().unwrap().clone();
        assert_eq!(observed, vec!["high", "normal"]);
    }
}
