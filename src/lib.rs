//! # sched-thread
//! A scheduler that runs callbacks on worker threads at a certain point in time.
//!
//! ## Overview
//! - Tasks run immediately, after a delay, at a time point, or repeatedly.
//! - A background worker thread is started on demand and leaves once idle.
//! - Any thread can donate itself as an additional worker with `join`.
//!
//! ## Usage
//! Create a scheduler using `scheduler::Scheduler`
//! ```rust,no_run
//! let sched = Scheduler::new();
//! ```
//!
//! A task owns its payload and hands it to `work` when it fires:
//! ```rust,no_run
//! let handle = sched.schedule_after(Duration::from_secs(1), Task::new(String::from("hello"), |msg| {
//!     println!("{msg}");
//!     Ok(())
//! }));
//! ```
//!
//! Failures returned (or panics raised) by `work` go to the optional failure
//! handler; the payload is released exactly once through `on_destroy`, whether
//! the task ran, was cancelled, or was still pending when the scheduler was
//! dropped.
//! ```rust,no_run
//! sched.schedule_now(
//!     Task::new(conn, |conn| conn.flush().map_err(Into::into))
//!         .on_failure(|conn, err| eprintln!("flush failed for {}: {err}", conn.peer()))
//!         .on_destroy(|conn| conn.close()),
//! );
//! ```
//!
//! A pending task can be cancelled through its handle:
//! ```rust,no_run
//! assert!(handle.cancel());
//! ```
//!
//! Donate the current thread as an extra worker:
//! ```rust,no_run
//! let controller = sched.controller();
//! controller.set_idle_timeout(None);
//! let remote = Arc::downgrade(&controller);
//! sched.join_with(controller);
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod message;
mod queue;
pub mod scheduler;
pub mod task;
pub mod worker;

pub use clock::{Clock, MonoTime, MonotonicClock, SystemClock};
pub use config::SchedConfig;
pub use error::{BoxError, TaskError, TaskResult};
pub use message::{MessageType, StopReason};
pub use scheduler::Scheduler;
pub use task::{SchedType, Task, TaskHandle, TaskId};
pub use worker::WorkerController;
