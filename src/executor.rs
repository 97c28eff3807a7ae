//! An async task executor for batches sharing a bounded resource pool.
//!
//! The tasks in a batch can be many and possibly long running, while the
//! resource they all need (a connection pool, a rate-limited service) is
//! limited. The executor starts the tasks in submission order and never
//! lets more than the configured number of bodies run at once.
//!
//! A waiting caller can also demand a result early:
//! [`wait_for`](BoundedTaskExecutor::wait_for) promotes a task that is still
//! queued to be the next one started, then waits for its future to resolve.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{Mutex, Semaphore};

use crate::error::ExecutorError;

/// The future of a submitted task body.
pub type TaskFuture<T> = BoxFuture<'static, Result<T, ExecutorError>>;

/// A shareable channel resolving to a task's result.
type CompletionChannel<T> = Shared<oneshot::Receiver<Result<T, ExecutorError>>>;

/// Executes batches of tasks with a global parallelism cap and support for
/// priority jumps.
///
/// One batch runs at a time. Within a batch, tasks *start* in submission
/// order unless a caller promotes one, and at most `resource_limit` task
/// bodies execute concurrently. Tasks may still *complete* out of order
/// because their bodies run in parallel.
///
/// Ordering rests on two semaphores. A resource semaphore with
/// `resource_limit` permits is held for the duration of a task's body. A
/// start semaphore with a single permit serializes start events: it is
/// acquired when a task is handed to the runner and released by the task
/// itself the moment it holds (or failed to get) a resource permit. Starting
/// and promoting both happen under one lock, so a promotion either removes
/// its task from the queue before the drainer pops it, or finds it already
/// started and simply waits on it.
///
/// Task keys identify tasks in the batch and must be unique; results are
/// kept until the next batch is submitted or [`clear`](Self::clear) is
/// called.
pub struct BoundedTaskExecutor<K, T> {
    runner: tokio::runtime::Handle,
    resource_sem: Arc<Semaphore>,
    start_sem: Arc<Semaphore>,
    handler: parking_lot::Mutex<Option<Arc<BatchHandler<K, T>>>>,
}

impl<K, T> fmt::Debug for BoundedTaskExecutor<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedTaskExecutor")
            .field("available_resources", &self.resource_sem.available_permits())
            .finish_non_exhaustive()
    }
}

impl<K, T> BoundedTaskExecutor<K, T>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates an executor running task bodies on the given runtime, with at
    /// most `resource_limit` of them executing concurrently.
    pub fn new(
        runner: tokio::runtime::Handle,
        resource_limit: usize,
    ) -> Result<Self, ExecutorError> {
        if resource_limit == 0 {
            return Err(ExecutorError::InvalidArgument(
                "the resource limit must be positive".into(),
            ));
        }

        Ok(Self {
            runner,
            resource_sem: Arc::new(Semaphore::new(resource_limit)),
            start_sem: Arc::new(Semaphore::new(1)),
            handler: parking_lot::Mutex::new(None),
        })
    }

    /// Submits a batch of distinct tasks for execution.
    ///
    /// The tasks are started in the order in which they are provided. Fails
    /// with [`ExecutorError::Busy`] while a previous batch still has queued
    /// tasks, and with [`ExecutorError::DuplicateTask`] if a key occurs more
    /// than once. Submitting a new batch drops the previous batch's results.
    pub fn execute(&self, tasks: Vec<(K, TaskFuture<T>)>) -> Result<(), ExecutorError> {
        let mut slot = self.handler.lock();
        if slot.as_ref().is_some_and(|handler| handler.is_running()) {
            return Err(ExecutorError::Busy);
        }

        let handler = Arc::new(BatchHandler::new(
            tasks,
            self.runner.clone(),
            Arc::clone(&self.resource_sem),
            Arc::clone(&self.start_sem),
        )?);

        self.runner.spawn(Arc::clone(&handler).drain());
        *slot = Some(handler);
        Ok(())
    }

    /// Returns the result of the given task, waiting for it if necessary.
    ///
    /// - If the task already completed, its result (or failure) is returned
    ///   immediately.
    /// - If the task is running, this waits for it to complete.
    /// - If the task is still queued, it is promoted: removed from its FIFO
    ///   position and started next, subject to the resource cap.
    ///
    /// Fails with [`ExecutorError::UnknownTask`] for a task that is not part
    /// of the current batch, and with [`ExecutorError::NoBatch`] if no batch
    /// was submitted or the state was cleared.
    pub async fn wait_for(&self, task: &K) -> Result<T, ExecutorError> {
        let handler = self.current_handler()?;
        let channel = handler.promote(task).await?;

        match channel.await {
            Ok(result) => result,
            // the sender was dropped without resolving, e.g. by a panicking
            // task body
            Err(oneshot::Canceled) => {
                Err(ExecutorError::TaskFailed("task completion channel dropped".into()))
            }
        }
    }

    /// Whether the current batch still has tasks to start.
    pub fn is_running(&self) -> bool {
        // clone the handle out of the slot so a concurrent `clear` cannot
        // pull it from under us
        let handler = self.handler.lock().clone();
        handler.is_some_and(|handler| handler.is_running())
    }

    /// Whether every task of the current batch has been started.
    pub fn is_completed(&self) -> Result<bool, ExecutorError> {
        Ok(self.current_handler()?.is_completed())
    }

    /// Prevents any further queued task from starting. Running tasks are not
    /// interrupted and complete normally.
    pub fn stop(&self) -> Result<(), ExecutorError> {
        self.current_handler()?.stop();
        Ok(())
    }

    /// Drops all internal state, including the completed results of the
    /// current batch.
    pub fn clear(&self) {
        *self.handler.lock() = None;
    }

    fn current_handler(&self) -> Result<Arc<BatchHandler<K, T>>, ExecutorError> {
        self.handler.lock().clone().ok_or(ExecutorError::NoBatch)
    }
}

/// The state of one submitted batch: the FIFO of tasks still to start and
/// the per-task slots tracking queued futures and completion channels.
struct BatchHandler<K, T> {
    runner: tokio::runtime::Handle,
    resource_sem: Arc<Semaphore>,
    start_sem: Arc<Semaphore>,
    stopped: Arc<AtomicBool>,
    /// Number of tasks not yet started, kept outside the lock for the
    /// observers.
    queued: AtomicUsize,
    state: Mutex<BatchState<K, T>>,
}

struct BatchState<K, T> {
    queue: VecDeque<K>,
    tasks: HashMap<K, TaskSlot<T>>,
}

enum TaskSlot<T> {
    Queued(TaskFuture<T>),
    Started(CompletionChannel<T>),
}

impl<K, T> BatchHandler<K, T>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn new(
        tasks: Vec<(K, TaskFuture<T>)>,
        runner: tokio::runtime::Handle,
        resource_sem: Arc<Semaphore>,
        start_sem: Arc<Semaphore>,
    ) -> Result<Self, ExecutorError> {
        if tasks.is_empty() {
            return Err(ExecutorError::InvalidArgument(
                "the task batch must not be empty".into(),
            ));
        }

        let mut queue = VecDeque::with_capacity(tasks.len());
        let mut slots = HashMap::with_capacity(tasks.len());
        for (key, task) in tasks {
            if slots.contains_key(&key) {
                tracing::error!(task = %key, "Task submitted multiple times in one batch");
                return Err(ExecutorError::DuplicateTask(key.to_string()));
            }

            queue.push_back(key.clone());
            slots.insert(key, TaskSlot::Queued(task));
        }

        Ok(Self {
            runner,
            resource_sem,
            start_sem,
            stopped: Arc::new(AtomicBool::new(false)),
            queued: AtomicUsize::new(queue.len()),
            state: Mutex::new(BatchState { queue, tasks: slots }),
        })
    }

    /// Starts the queued tasks in order until the queue is drained or the
    /// execution is stopped.
    async fn drain(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::Relaxed) {
                break;
            }

            let mut state = self.state.lock().await;
            let Some(key) = state.queue.pop_front() else {
                break;
            };
            self.queued.fetch_sub(1, Ordering::Relaxed);

            let Some(TaskSlot::Queued(task)) = state.tasks.remove(&key) else {
                continue;
            };
            self.start_task(&mut state, key, task).await;
        }

        if self.is_completed() {
            tracing::debug!("Task queue fully dispatched");
        } else {
            tracing::debug!("Task queue dispatch stopped early");
        }
    }

    /// Returns the completion channel for the given task, starting it ahead
    /// of the queue if it was not started yet.
    async fn promote(&self, key: &K) -> Result<CompletionChannel<T>, ExecutorError> {
        let mut state = self.state.lock().await;

        match state.tasks.get(key) {
            None => return Err(ExecutorError::UnknownTask(key.to_string())),
            Some(TaskSlot::Started(channel)) => return Ok(channel.clone()),
            Some(TaskSlot::Queued(_)) => {}
        }

        if self.stopped.load(Ordering::Relaxed) {
            return Err(ExecutorError::Stopped);
        }

        let Some(TaskSlot::Queued(task)) = state.tasks.remove(key) else {
            return Err(ExecutorError::UnknownTask(key.to_string()));
        };

        if let Some(position) = state.queue.iter().position(|queued| queued == key) {
            state.queue.remove(position);
            self.queued.fetch_sub(1, Ordering::Relaxed);
        }

        tracing::debug!(task = %key, "Promoting queued task to run next");
        Ok(self.start_task(&mut state, key.clone(), task).await)
    }

    /// Hands a task over to the runner.
    ///
    /// Waits for the start permit, which serializes start events: the permit
    /// travels into the task wrapper and is released there once the wrapper
    /// holds a resource permit, so no other task can start in between.
    async fn start_task(
        &self,
        state: &mut BatchState<K, T>,
        key: K,
        task: TaskFuture<T>,
    ) -> CompletionChannel<T> {
        tracing::trace!(task = %key, "Starting next task");
        let start_permit = Arc::clone(&self.start_sem)
            .acquire_owned()
            .await
            .expect("the start semaphore is never closed");

        let (sender, receiver) = oneshot::channel();
        let channel = receiver.shared();
        state
            .tasks
            .insert(key.clone(), TaskSlot::Started(channel.clone()));

        let resource_sem = Arc::clone(&self.resource_sem);
        let stopped = Arc::clone(&self.stopped);

        self.runner.spawn(async move {
            tracing::trace!(task = %key, "Acquiring resource for task");
            let permit = resource_sem.acquire_owned().await;

            // Started, for better or worse: let the next start proceed.
            drop(start_permit);

            let Ok(permit) = permit else {
                sender.send(Err(ExecutorError::Cancelled)).ok();
                return;
            };

            // stopped while waiting for the resource, do not run the body
            if stopped.load(Ordering::Relaxed) {
                tracing::trace!(task = %key, "Task cancelled, execution was stopped");
                sender.send(Err(ExecutorError::Cancelled)).ok();
                return;
            }

            tracing::trace!(task = %key, "Executing task");
            let result = task.await;
            drop(permit);

            tracing::trace!(task = %key, "Task completed");
            sender.send(result).ok();
        });

        channel
    }

    fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Relaxed) && !self.is_completed()
    }

    fn is_completed(&self) -> bool {
        self.queued.load(Ordering::Relaxed) == 0
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}
