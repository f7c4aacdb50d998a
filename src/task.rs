use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Weak,
    time::Duration,
};

use crate::{
    clock::Clock,
    error::{TaskError, TaskResult},
    message::{MessageType, Messenger},
    scheduler::Shared,
};

type Work<P> = Box<dyn FnMut(&mut P) -> TaskResult + Send + 'static>;
type OnFailure<P> = Box<dyn FnMut(&mut P, &TaskError) + Send + 'static>;
type OnDestroy<P> = Box<dyn FnOnce(P) + Send + 'static>;

/// When a task becomes due.
#[derive(Clone, Debug)]
pub enum SchedType<T> {
    /// Due at the clock's epoch, i.e. as soon as a worker is free
    Now,
    Delay(Duration),
    Timestamp(T),
    /// Due after the interval, then re-armed `count - 1` more times, each
    /// interval measured from the end of the previous run
    Repeat(Duration, usize),
}

/// Stable identity of a submitted task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// A unit of work together with the payload it owns.
///
/// The payload moves into the task and stays there until the task is
/// released, whichever way that happens: after its last run, on
/// cancellation, or when the scheduler is dropped with the task still
/// pending. At that point the `on_destroy` callback, if any, receives the
/// payload by value. Without one the payload is simply dropped.
///
/// `on_destroy` runs inside `Drop` and must not panic.
pub struct Task<P: Send + 'static> {
    payload: Option<P>,
    work: Work<P>,
    on_failure: Option<OnFailure<P>>,
    on_destroy: Option<OnDestroy<P>>,
}

impl<P: Send + 'static> Task<P> {
    pub fn new<F>(payload: P, work: F) -> Self
    where
        F: FnMut(&mut P) -> TaskResult + Send + 'static,
    {
        Self {
            payload: Some(payload),
            work: Box::new(work),
            on_failure: None,
            on_destroy: None,
        }
    }

    /// Called with the payload when `work` returns an error or panics.
    ///
    /// A panic raised by this callback is not caught: it unwinds the worker
    /// thread that was running the task.
    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut P, &TaskError) + Send + 'static,
    {
        self.on_failure = Some(Box::new(f));
        self
    }

    pub fn on_destroy<F>(mut self, f: F) -> Self
    where
        F: FnOnce(P) + Send + 'static,
    {
        self.on_destroy = Some(Box::new(f));
        self
    }
}

impl<P: Send + 'static> Drop for Task<P> {
    fn drop(&mut self) {
        if let (Some(payload), Some(on_destroy)) = (self.payload.take(), self.on_destroy.take()) {
            on_destroy(payload);
        }
    }
}

/// Type-erased view of a [`Task`] so tasks with different payloads can share
/// one queue.
pub(crate) trait Job: Send {
    /// Runs `work`, turning both `Err` returns and panics into a `TaskError`.
    fn execute(&mut self) -> Result<(), TaskError>;

    /// Hands the failure to `on_failure`. Returns false when none is set.
    fn fail(&mut self, err: &TaskError) -> bool;
}

impl<P: Send + 'static> Job for Task<P> {
    fn execute(&mut self) -> Result<(), TaskError> {
        let Some(payload) = self.payload.as_mut() else {
            return Ok(());
        };
        let work = &mut self.work;
        match panic::catch_unwind(AssertUnwindSafe(|| work(payload))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TaskError::Failed(e)),
            Err(panic) => Err(TaskError::from_panic(panic)),
        }
    }

    fn fail(&mut self, err: &TaskError) -> bool {
        match (self.on_failure.as_mut(), self.payload.as_mut()) {
            (Some(on_failure), Some(payload)) => {
                on_failure(payload, err);
                true
            }
            _ => false,
        }
    }
}

/// A task as stored in the queue.
pub(crate) struct Entry<T> {
    pub(crate) id: TaskId,
    pub(crate) deadline: T,
    /// Interval and number of runs left after the current one
    pub(crate) repeat: Option<(Duration, usize)>,
    pub(crate) job: Box<dyn Job>,
    messenger: Messenger,
}

impl<T> Entry<T> {
    pub(crate) fn new(
        id: TaskId,
        deadline: T,
        repeat: Option<(Duration, usize)>,
        job: Box<dyn Job>,
        messenger: Messenger,
    ) -> Self {
        Self {
            id,
            deadline,
            repeat,
            job,
            messenger,
        }
    }
}

impl<T> Drop for Entry<T> {
    fn drop(&mut self) {
        let id = self.id;
        self.messenger.send(|t| MessageType::Destroy(id, t));
    }
}

/// Caller-side reference to a submitted task.
///
/// Dropping the handle does not cancel the task, and the handle does not keep
/// the scheduler alive.
pub struct TaskHandle<C: Clock> {
    id: TaskId,
    shared: Weak<Shared<C>>,
}

impl<C: Clock> TaskHandle<C> {
    pub(crate) fn new(id: TaskId, shared: Weak<Shared<C>>) -> Self {
        Self { id, shared }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Removes the task if it is still pending.
    ///
    /// Returns false if the task is running, has finished, was already
    /// cancelled, or the scheduler is gone. On success the task's payload is
    /// released before this returns and its `work` never runs.
    pub fn cancel(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.remove(self.id),
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.contains(self.id),
            None => false,
        }
    }
}

impl<C: Clock> Clone for TaskHandle<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            shared: self.shared.clone(),
        }
    }
}

impl<C: Clock> fmt::Debug for TaskHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn work_sees_payload() {
        let mut task = Task::new(1u32, |n: &mut u32| {
            *n += 1;
            Ok(())
        });
        assert!(task.execute().is_ok());
        assert!(task.execute().is_ok());
        assert_eq!(task.payload, Some(3));
    }

    #[test]
    fn error_and_panic_become_failures() {
        let mut task = Task::new((), |_: &mut ()| Err("nope".into()));
        assert!(matches!(task.execute(), Err(TaskError::Failed(_))));

        let mut task = Task::new((), |_: &mut ()| -> TaskResult { panic!("boom") });
        match task.execute() {
            Err(TaskError::Panicked(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn fail_reaches_handler_with_payload() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let mut task = Task::new(7usize, |_: &mut usize| Err("x".into()))
            .on_failure(move |p, _| s.store(*p, Ordering::SeqCst));
        let err = task.execute().unwrap_err();
        assert!(task.fail(&err));
        assert_eq!(seen.load(Ordering::SeqCst), 7);

        let mut bare = Task::new((), |_: &mut ()| Ok(()));
        assert!(!bare.fail(&err));
    }

    #[test]
    fn destroy_runs_once_with_payload() {
        let released = Arc::new(AtomicUsize::new(0));
        let r = released.clone();
        let mut task = Task::new(String::from("abc"), |_: &mut String| Ok(()))
            .on_destroy(move |s| {
                r.fetch_add(s.len(), Ordering::SeqCst);
            });
        task.execute().unwrap();
        drop(task);
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }
}
