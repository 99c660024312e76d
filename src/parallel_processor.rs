// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Bounded concurrency runner for cache warm-up work.
//!
//! Tasks wait in an unbounded FIFO queue until one of the run slots frees
//! up. A slot is a semaphore permit, so admission and completion are
//! signaled rather than polled. A task that errors or panics is logged,
//! recorded as a failed [`TaskOutcome`] and counted as finished.

use crate::lock_unpoisoned;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore, mpsc, watch};
use tracing::{debug, error, info, warn};

pub trait ParallelTask: Send + 'static {
    /// Names the work for logs, e.g. which cache and time range it loads.
    fn describe(&self) -> String;

    fn run(self: Box<Self>) -> BoxFuture<'static, anyhow::Result<()>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded,
    Failed(String),
    Panicked(String),
}

#[derive(Clone, Debug)]
pub struct TaskOutcome {
    pub task_number: u64,
    pub description: String,
    pub status: TaskStatus,
    pub elapsed: Duration,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

struct QueuedTask {
    task_number: u64,
    task: Box<dyn ParallelTask>,
}

/// Counters and results shared between the processor handle, the
/// dispatcher and the workers.
struct Shared {
    /// Queued plus running. Admission leaves it unchanged.
    pending: AtomicUsize,
    running: AtomicUsize,
    outcomes: Mutex<Vec<TaskOutcome>>,
    current: Mutex<Vec<(u64, String)>>,
    finished: Notify,
}

impl Shared {
    fn queued(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// A queued task that will never run.
    fn discarded(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
        self.finished.notify_waiters();
    }

    fn admitted(&self) {
        self.running.fetch_add(1, Ordering::AcqRel);
    }

    fn completed(&self) {
        self.running.fetch_sub(1, Ordering::AcqRel);
        self.pending.fetch_sub(1, Ordering::AcqRel);
        self.finished.notify_waiters();
    }

    fn waiting(&self) -> usize {
        self.pending
            .load(Ordering::Acquire)
            .saturating_sub(self.running.load(Ordering::Acquire))
    }

    fn is_done(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }
}

pub struct ParallelProcessor {
    threads: usize,
    sender: mpsc::UnboundedSender<QueuedTask>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<QueuedTask>>>,
    slots: Arc<Semaphore>,
    shared: Arc<Shared>,
    next_task_number: AtomicU64,
    shutdown: watch::Sender<bool>,
    started_at: Mutex<Option<Instant>>,
}

impl ParallelProcessor {
    /// `threads` run slots; values below one are treated as one.
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        Self {
            threads,
            sender,
            receiver: Mutex::new(Some(receiver)),
            slots: Arc::new(Semaphore::new(threads)),
            shared: Arc::new(Shared {
                pending: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                outcomes: Mutex::new(Vec::new()),
                current: Mutex::new(Vec::new()),
                finished: Notify::new(),
            }),
            next_task_number: AtomicU64::new(0),
            shutdown,
            started_at: Mutex::new(None),
        }
    }

    /// Queues a task. Tasks may be queued before or after [`Self::startup`].
    /// Returns the task's sequence number.
    pub fn enqueue(&self, task: Box<dyn ParallelTask>) -> u64 {
        let task_number = self.next_task_number.fetch_add(1, Ordering::Relaxed);
        self.shared.queued();

        if let Err(rejected) = self.sender.send(QueuedTask { task_number, task }) {
            self.shared.discarded();
            warn!(
                "Parallel processor no longer accepting work, dropping task {} {}",
                task_number,
                rejected.0.task.describe()
            );
        }
        task_number
    }

    /// Starts the dispatcher. Must be called from within a tokio runtime.
    /// Calling it twice has no effect.
    pub fn startup(&self) {
        let Some(mut receiver) = lock_unpoisoned(&self.receiver).take() else {
            warn!("Parallel processor already started");
            return;
        };
        *lock_unpoisoned(&self.started_at) = Some(Instant::now());

        let slots = Arc::clone(&self.slots);
        let shared = Arc::clone(&self.shared);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }

                let queued = tokio::select! {
                    changed = shutdown.changed() => match changed {
                        Ok(()) => continue,
                        Err(_) => break,
                    },
                    queued = receiver.recv() => queued,
                };
                let Some(queued) = queued else {
                    break;
                };

                let permit = tokio::select! {
                    _ = shutdown.changed() => {
                        shared.discarded();
                        break;
                    }
                    permit = Arc::clone(&slots).acquire_owned() => permit,
                };
                let Ok(permit) = permit else {
                    break;
                };

                shared.admitted();
                debug!("inserted running task {}", queued.task_number);

                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    run_task(queued, &shared).await;
                    drop(permit);
                    shared.completed();
                });
            }
            info!("Parallel processor dispatcher exiting");
        });
    }

    /// Stops admitting queued tasks. Tasks already running are left to
    /// finish.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.shared.finished.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Nothing waiting and nothing running.
    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    pub fn wait_queue_size(&self) -> usize {
        self.shared.waiting()
    }

    pub fn run_queue_size(&self) -> usize {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Time since [`Self::startup`], zero before it.
    pub fn runtime(&self) -> Duration {
        let started_at = *lock_unpoisoned(&self.started_at);
        started_at
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    /// Oldest running task, or `(none)`.
    pub fn debug_info(&self) -> String {
        lock_unpoisoned(&self.shared.current)
            .first()
            .map(|(number, description)| format!("{}-{}", description, number))
            .unwrap_or_else(|| String::from("(none)"))
    }

    /// Results of every finished task so far, in completion order.
    pub fn outcomes(&self) -> Vec<TaskOutcome> {
        lock_unpoisoned(&self.shared.outcomes).clone()
    }

    /// Resolves once [`Self::is_done`] holds, or right after a shutdown
    /// once running tasks have finished.
    pub async fn wait_until_done(&self) {
        loop {
            let notified = self.shared.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_done() || (self.is_shutdown() && self.run_queue_size() == 0) {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for ParallelProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelProcessor")
            .field("threads", &self.threads)
            .field("waiting", &self.wait_queue_size())
            .field("running", &self.run_queue_size())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

async fn run_task(queued: QueuedTask, shared: &Shared) {
    let QueuedTask { task_number, task } = queued;
    let description = task.describe();
    lock_unpoisoned(&shared.current).push((task_number, description.clone()));

    debug!("starting task {} {}", task_number, description);
    let started = Instant::now();

    // the inner spawn turns a panic into a JoinError instead of unwinding here
    let status = match tokio::spawn(task.run()).await {
        Ok(Ok(())) => TaskStatus::Succeeded,
        Ok(Err(err)) => {
            error!("task {} {} failed: {:#}", task_number, description, err);
            TaskStatus::Failed(format!("{:#}", err))
        }
        Err(join_error) => {
            error!("task {} {} panicked: {}", task_number, description, join_error);
            TaskStatus::Panicked(join_error.to_string())
        }
    };
    let elapsed = started.elapsed();
    debug!("task {} complete in {:?}", task_number, elapsed);

    lock_unpoisoned(&shared.current).retain(|(number, _)| *number != task_number);
    lock_unpoisoned(&shared.outcomes).push(TaskOutcome {
        task_number,
        description,
        status,
        elapsed,
    });
}
