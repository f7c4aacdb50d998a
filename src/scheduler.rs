use std::{
    fmt,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, error, trace, warn};

use crate::{
    clock::{Clock, MonotonicClock},
    config::SchedConfig,
    message::{MessageType, Messenger},
    queue::TaskQueue,
    task::{Entry, SchedType, Task, TaskHandle, TaskId},
    worker::{self, WorkerController},
};

/// Everything guarded by the scheduler lock.
pub(crate) struct State<C: Clock> {
    pub(crate) queue: TaskQueue<C::TimePoint>,
    pub(crate) workers: usize,
    pub(crate) shutdown: bool,
    next_id: u64,
    implicit: Option<JoinHandle<()>>,
    implicit_controller: Option<Arc<WorkerController<C>>>,
}

pub(crate) struct Shared<C: Clock> {
    pub(crate) state: Mutex<State<C>>,
    /// Signalled whenever the head of the queue, the worker count, a worker's
    /// cancel flag or the shutdown flag changes.
    pub(crate) changed: Condvar,
    pub(crate) clock: C,
    pub(crate) messenger: Messenger,
    config: SchedConfig,
}

impl<C: Clock> Shared<C> {
    /// Starts a background worker with a fresh controller. The previous
    /// implicit thread, if any, has already left its loop and is detached.
    pub(crate) fn spawn_implicit(self: &Arc<Self>, state: &mut State<C>) {
        let controller = Arc::new(WorkerController::new(
            Arc::downgrade(self),
            self.config.idle_timeout,
        ));
        let name = self.config.worker_thread_name();
        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(size) = self.config.stack_size {
            builder = builder.stack_size(size);
        }

        let shared = self.clone();
        let worker_controller = controller.clone();
        // the new thread blocks on the lock held here, so counting it after
        // the spawn succeeds is still seen before it runs
        match builder.spawn(move || worker::run(&shared, &worker_controller)) {
            Ok(handle) => {
                state.workers += 1;
                trace!(thread = %name, "spawned implicit worker");
                state.implicit = Some(handle);
                state.implicit_controller = Some(controller);
            }
            Err(err) => {
                error!(error = %err, "failed to spawn worker thread, tasks stay pending");
            }
        }
    }

    /// Puts a repeating task back in the queue. Hands it back if the
    /// scheduler is shutting down so the caller can release it.
    pub(crate) fn rearm(&self, entry: Entry<C::TimePoint>) -> Option<Entry<C::TimePoint>> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Some(entry);
        }
        if state.queue.insert(entry) {
            self.changed.notify_all();
        }
        None
    }

    pub(crate) fn remove(&self, id: TaskId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.queue.remove_by_identity(id);
            if let Some((_, true)) = removed {
                // workers may be sleeping until its deadline
                self.changed.notify_all();
            }
            removed
        };
        match removed {
            Some((entry, _)) => {
                debug!(task = %id, "task cancelled");
                self.messenger.send(|t| MessageType::Cancel(id, t));
                drop(entry);
                true
            }
            None => {
                trace!(task = %id, "cancel found no pending task");
                false
            }
        }
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.state.lock().queue.contains(id)
    }
}

/// Runs tasks on a background thread, and on any thread donated through
/// [`Scheduler::join`], in deadline order.
///
/// The background worker is started by the first submission and leaves again
/// once it has been idle for [`SchedConfig::idle_timeout`]; the next
/// submission starts a new one. Dropping the scheduler stops every worker
/// between tasks, waits for the background thread, and releases all tasks
/// still pending.
pub struct Scheduler<C: Clock = MonotonicClock> {
    shared: Arc<Shared<C>>,
}

impl Scheduler<MonotonicClock> {
    pub fn new() -> Self {
        Self::with_config(SchedConfig::default())
    }

    pub fn with_config(config: SchedConfig) -> Self {
        Self::with_clock(MonotonicClock::new(), config)
    }

    /// Like [`Scheduler::with_config`], also returning a stream of lifecycle
    /// events.
    pub fn with_events(config: SchedConfig) -> (Self, UnboundedReceiver<MessageType>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sched = Self::build(MonotonicClock::new(), config, Messenger::new(tx));
        (sched, rx)
    }
}

impl Default for Scheduler<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Scheduler<C> {
    pub fn with_clock(clock: C, config: SchedConfig) -> Self {
        Self::build(clock, config, Messenger::default())
    }

    fn build(clock: C, config: SchedConfig, messenger: Messenger) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: TaskQueue::new(),
                    workers: 0,
                    shutdown: false,
                    next_id: 1,
                    implicit: None,
                    implicit_controller: None,
                }),
                changed: Condvar::new(),
                clock,
                messenger,
                config,
            }),
        }
    }

    pub fn schedule_now<P: Send + 'static>(&self, task: Task<P>) -> TaskHandle<C> {
        self.add(SchedType::Now, task)
    }

    pub fn schedule_after<P: Send + 'static>(&self, delay: Duration, task: Task<P>) -> TaskHandle<C> {
        self.add(SchedType::Delay(delay), task)
    }

    /// Runs the task once `at` is reached on this scheduler's clock.
    ///
    /// Time points must come from this scheduler, via [`Scheduler::now`] or
    /// [`Scheduler::clock`]. A [`MonoTime`](crate::clock::MonoTime) is an
    /// offset from one particular [`MonotonicClock`] and means something
    /// else on any other scheduler.
    pub fn schedule_at<P: Send + 'static>(&self, at: C::TimePoint, task: Task<P>) -> TaskHandle<C> {
        self.add(SchedType::Timestamp(at), task)
    }

    /// Runs the task `count` times, `interval` apart.
    pub fn schedule_every<P: Send + 'static>(
        &self,
        interval: Duration,
        count: usize,
        task: Task<P>,
    ) -> TaskHandle<C> {
        self.add(SchedType::Repeat(interval, count), task)
    }

    /// Submits a task. Never fails; if no worker is alive one is started.
    ///
    /// A `Repeat` with a count of zero never runs: the task is released right
    /// away and the returned handle is not pending.
    pub fn add<P: Send + 'static>(&self, sched: SchedType<C::TimePoint>, task: Task<P>) -> TaskHandle<C> {
        let never_runs = matches!(sched, SchedType::Repeat(_, 0));
        let clock = &self.shared.clock;
        let (deadline, repeat) = match sched {
            SchedType::Now => (clock.epoch(), None),
            SchedType::Delay(delay) => (clock.add(clock.now(), delay), None),
            SchedType::Timestamp(at) => (at, None),
            SchedType::Repeat(interval, count) => (
                clock.add(clock.now(), interval),
                count.checked_sub(1).map(|left| (interval, left)),
            ),
        };

        let mut state = self.shared.state.lock();
        let id = TaskId(state.next_id);
        state.next_id += 1;
        let handle = TaskHandle::new(id, Arc::downgrade(&self.shared));

        if never_runs {
            drop(state);
            debug!(task = %id, "repeat count is zero, releasing task");
            drop(task);
            return handle;
        }

        let entry = Entry::new(id, deadline, repeat, Box::new(task), self.shared.messenger.clone());
        let is_head = state.queue.insert(entry);
        trace!(task = %id, ?deadline, is_head, "task scheduled");
        self.shared.messenger.send(|t| MessageType::Add(id, t));

        if state.workers > 0 {
            if is_head {
                self.shared.changed.notify_all();
            }
        } else {
            self.shared.spawn_implicit(&mut state);
        }
        handle
    }

    /// Creates a controller for a worker that will run through
    /// [`Scheduler::join_with`]. Keep a clone (or a `Weak`) of it to cancel
    /// that worker or change its idle timeout from another thread.
    pub fn controller(&self) -> Arc<WorkerController<C>> {
        Arc::new(WorkerController::new(
            Arc::downgrade(&self.shared),
            self.shared.config.join_idle_timeout,
        ))
    }

    /// Turns the calling thread into a worker until it idles out or the
    /// scheduler shuts down.
    pub fn join(&self) {
        self.join_with(self.controller());
    }

    /// Turns the calling thread into a worker driven by `controller`.
    ///
    /// Returns when the controller is cancelled, the worker idles out, or the
    /// scheduler shuts down. A panic raised by a task's failure handler
    /// propagates out of this call.
    pub fn join_with(&self, controller: Arc<WorkerController<C>>) {
        if !controller.belongs_to(&self.shared) {
            warn!("worker controller belongs to another scheduler, not joining");
            return;
        }
        {
            let mut state = self.shared.state.lock();
            state.workers += 1;
            self.shared.changed.notify_all();
        }
        worker::run(&self.shared, &controller);
    }

    /// Controller of the current background worker, if one has been started.
    pub fn implicit_controller(&self) -> Option<Arc<WorkerController<C>>> {
        self.shared.state.lock().implicit_controller.clone()
    }

    /// Current time on this scheduler's clock; the base for
    /// [`Scheduler::schedule_at`] deadlines.
    pub fn now(&self) -> C::TimePoint {
        self.shared.clock.now()
    }

    pub fn clock(&self) -> &C {
        &self.shared.clock
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().queue.is_empty()
    }

    /// Number of threads currently running the worker loop.
    pub fn worker_count(&self) -> usize {
        self.shared.state.lock().workers
    }
}

impl<C: Clock> fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Scheduler")
            .field("pending", &state.queue.len())
            .field("workers", &state.workers)
            .finish()
    }
}

impl<C: Clock> Drop for Scheduler<C> {
    fn drop(&mut self) {
        let implicit = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.changed.notify_all();
            state.implicit_controller = None;
            state.implicit.take()
        };

        if let Some(handle) = implicit {
            if handle.thread().id() == thread::current().id() {
                warn!("scheduler dropped from its own worker thread, detaching it");
            } else if handle.join().is_err() {
                warn!("implicit worker had panicked");
            }
        }

        let leftover = self.shared.state.lock().queue.take_all();
        if !leftover.is_empty() {
            debug!(count = leftover.len(), "releasing pending tasks");
        }
        drop(leftover);
    }
}
