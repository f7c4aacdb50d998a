use std::time::Duration;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_THREAD_NAME: &str = "sched-worker";

/// Scheduler settings.
///
/// An idle timeout of `None` means the worker never leaves on its own; it
/// only stops when cancelled or when the scheduler is dropped.
#[derive(Clone, Debug)]
pub struct SchedConfig {
    pub idle_timeout: Option<Duration>,
    pub join_idle_timeout: Option<Duration>,
    pub thread_name: String,
    pub stack_size: Option<usize>,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            join_idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            stack_size: None,
        }
    }
}

impl SchedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idle timeout of the implicit background worker.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Default idle timeout for threads donated through `join`.
    pub fn join_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.join_idle_timeout = timeout;
        self
    }

    /// Name of the implicit worker thread. NUL bytes are stripped, and an
    /// empty result falls back to the default name.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self.thread_name = self.worker_thread_name();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Thread name safe to hand to the OS; the field is public and may have
    /// been set without going through the builder.
    pub(crate) fn worker_thread_name(&self) -> String {
        let name: String = self.thread_name.chars().filter(|&c| c != '\0').collect();
        if name.is_empty() {
            DEFAULT_THREAD_NAME.to_string()
        } else {
            name
        }
    }
}
