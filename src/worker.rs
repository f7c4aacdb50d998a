use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant},
};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, trace};

use crate::{
    clock::Clock,
    message::{MessageType, StopReason},
    scheduler::{Shared, State},
    task::{Entry, TaskId},
};

/// Per-worker control block.
///
/// Every worker loop runs against exactly one controller. The scheduler owns
/// the controller of its implicit worker; threads donated through
/// `Scheduler::join_with` bring their own, and any thread holding a reference
/// can ask that worker to stop. The request is honored between tasks: a task
/// that is already running always finishes.
pub struct WorkerController<C: Clock> {
    shared: Weak<Shared<C>>,
    cancelled: AtomicBool,
    idle_timeout: Mutex<Option<Duration>>,
}

impl<C: Clock> WorkerController<C> {
    pub(crate) fn new(shared: Weak<Shared<C>>, idle_timeout: Option<Duration>) -> Self {
        Self {
            shared,
            cancelled: AtomicBool::new(false),
            idle_timeout: Mutex::new(idle_timeout),
        }
    }

    /// True once the worker is stopping or stopped.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(shared) = self.shared.upgrade() {
            // taking the lock orders this wake after the worker's flag check
            let _state = shared.state.lock();
            shared.changed.notify_all();
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        *self.idle_timeout.lock()
    }

    /// How long the worker may sit with an empty queue before it leaves.
    /// `None` keeps it resident. An idle worker picks up the new value
    /// immediately, still measured from when it went idle.
    pub fn set_idle_timeout(&self, timeout: Option<Duration>) {
        *self.idle_timeout.lock() = timeout;
        if let Some(shared) = self.shared.upgrade() {
            let _state = shared.state.lock();
            shared.changed.notify_all();
        }
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared<C>>) -> bool {
        std::ptr::eq(self.shared.as_ptr(), Arc::as_ptr(shared))
    }
}

impl<C: Clock> fmt::Debug for WorkerController<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerController")
            .field("cancelled", &self.is_cancelled())
            .field("idle_timeout", &self.idle_timeout())
            .finish()
    }
}

/// Releases the worker slot however the loop ends, including by unwinding
/// out of a failure handler.
struct WorkerGuard<'a, C: Clock> {
    shared: &'a Arc<Shared<C>>,
    reason: Option<StopReason>,
}

impl<C: Clock> Drop for WorkerGuard<'_, C> {
    fn drop(&mut self) {
        let reason = self.reason.unwrap_or(StopReason::Panicked);
        let mut state = self.shared.state.lock();
        state.workers -= 1;
        // a task inserted while this worker was on its way out would
        // otherwise wait for the next submission
        if state.workers == 0 && !state.shutdown && !state.queue.is_empty() {
            debug!(?reason, "last worker left with tasks pending, respawning");
            self.shared.spawn_implicit(&mut state);
        }
        self.shared.changed.notify_all();
        drop(state);

        match reason {
            StopReason::Panicked => error!("worker unwound out of a failure handler"),
            _ => debug!(?reason, "worker stopped"),
        }
        self.shared
            .messenger
            .send(|t| MessageType::WorkerStop(reason, t));
    }
}

/// Runs the worker loop on the current thread until the worker is cancelled,
/// idles out, or the scheduler shuts down.
///
/// The caller must already have counted this worker in `State::workers`.
pub(crate) fn run<C: Clock>(shared: &Arc<Shared<C>>, controller: &WorkerController<C>) {
    let mut guard = WorkerGuard {
        shared,
        reason: None,
    };
    debug!(idle_timeout = ?controller.idle_timeout(), "worker started");
    shared.messenger.send(MessageType::WorkerStart);

    loop {
        let entry = {
            let mut state = shared.state.lock();
            match next_due(shared, controller, &mut state) {
                Ok(entry) => entry,
                Err(reason) => {
                    guard.reason = Some(reason);
                    break;
                }
            }
        };
        execute(shared, entry);
    }
}

/// Blocks until the earliest task is due and pops it.
///
/// Every wake re-reads the head of the queue: an insert may have put an
/// earlier task in front, a cancel may have removed the one being waited on,
/// or another worker may have taken it.
fn next_due<C: Clock>(
    shared: &Shared<C>,
    controller: &WorkerController<C>,
    state: &mut MutexGuard<'_, State<C>>,
) -> Result<Entry<C::TimePoint>, StopReason> {
    let mut idle_since: Option<Instant> = None;
    let mut waiting_on: Option<TaskId> = None;

    loop {
        if state.shutdown {
            return Err(StopReason::Shutdown);
        }
        if controller.is_cancelled() {
            return Err(StopReason::Cancelled);
        }

        let Some((id, deadline)) = state.queue.peek_earliest() else {
            let since = *idle_since.get_or_insert_with(Instant::now);
            // re-read every wake so set_idle_timeout applies to an idle worker
            let until = controller
                .idle_timeout()
                .and_then(|timeout| since.checked_add(timeout));
            match until {
                Some(until) => {
                    let timed_out = shared.changed.wait_until(state, until).timed_out();
                    if timed_out && state.queue.is_empty() && !state.shutdown {
                        return Err(StopReason::Idle);
                    }
                }
                None => shared.changed.wait(state),
            }
            continue;
        };
        idle_since = None;

        let remaining = shared.clock.until(deadline);
        if remaining.is_zero() {
            if let Some(entry) = state.queue.pop_earliest() {
                return Ok(entry);
            }
            continue;
        }

        if waiting_on != Some(id) {
            waiting_on = Some(id);
            trace!(task = %id, ?remaining, "waiting for deadline");
            shared.messenger.send(|t| MessageType::WaitStart(id, t));
        }
        shared.changed.wait_for(state, remaining);
    }
}

/// Runs one task outside the lock, routes a failure to its handler, then
/// either re-arms the task or releases it.
fn execute<C: Clock>(shared: &Shared<C>, mut entry: Entry<C::TimePoint>) {
    let id = entry.id;
    trace!(task = %id, "running task");
    shared
        .messenger
        .send(|t| MessageType::ExecuteCallback(id, t));

    if let Err(err) = entry.job.execute() {
        shared.messenger.send(|t| MessageType::Failed(id, t));
        if entry.job.fail(&err) {
            debug!(task = %id, error = %err, "task failed, passed to failure handler");
        } else {
            debug!(task = %id, error = %err, "task failed with no failure handler");
        }
    }

    match entry.repeat {
        Some((interval, left)) if left > 0 => {
            entry.deadline = shared.clock.add(shared.clock.now(), interval);
            entry.repeat = Some((interval, left - 1));
            if let Some(stale) = shared.rearm(entry) {
                debug!(task = %id, "scheduler shut down, releasing repeating task");
                drop(stale);
            }
        }
        _ => drop(entry),
    }
}
