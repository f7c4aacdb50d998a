//! Failure types produced while executing scheduled work.
//!
//! Scheduling and cancellation never return errors; the only failures the
//! crate reports are the ones raised by a task's own `work` callback.

use std::any::Any;

use thiserror::Error;

/// Error type a `work` callback may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Return type of a `work` callback.
pub type TaskResult = Result<(), BoxError>;

/// Why a task's `work` callback did not complete normally.
#[derive(Debug, Error)]
pub enum TaskError {
    /// `work` returned `Err`
    #[error("task failed: {0}")]
    Failed(#[source] BoxError),

    /// `work` panicked; carries the panic message when it was a string
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub(crate) fn from_panic(panic: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = panic.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskError::Panicked(msg)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads() {
        let e = TaskError::from_panic(Box::new("static"));
        assert!(e.is_panic());
        assert_eq!(e.to_string(), "task panicked: static");

        let e = TaskError::from_panic(Box::new(String::from("owned")));
        assert_eq!(e.to_string(), "task panicked: owned");

        let e = TaskError::from_panic(Box::new(42u32));
        assert_eq!(e.to_string(), "task panicked: non-string panic payload");
    }

    #[test]
    fn failed_keeps_source() {
        let e = TaskError::Failed("disk full".into());
        assert!(!e.is_panic());
        assert_eq!(e.to_string(), "task failed: disk full");
        assert!(std::error::Error::source(&e).is_some());
    }
}
