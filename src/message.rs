use std::time::SystemTime;

use tokio::sync::mpsc::UnboundedSender;

use crate::task::TaskId;

/// Why a worker left its loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// No task arrived within the idle timeout
    Idle,
    /// Its controller was cancelled
    Cancelled,
    /// The scheduler was dropped
    Shutdown,
    /// A failure handler panicked and unwound the thread
    Panicked,
}

/// Lifecycle events emitted by a scheduler created with `Scheduler::with_events`.
#[derive(Debug)]
pub enum MessageType {
    Add(TaskId, SystemTime),
    Cancel(TaskId, SystemTime),
    WaitStart(TaskId, SystemTime),
    ExecuteCallback(TaskId, SystemTime),
    Failed(TaskId, SystemTime),
    Destroy(TaskId, SystemTime),
    WorkerStart(SystemTime),
    WorkerStop(StopReason, SystemTime),
}

#[derive(Clone, Default)]
pub(crate) struct Messenger {
    tx: Option<UnboundedSender<MessageType>>,
}

impl Messenger {
    pub(crate) fn new(tx: UnboundedSender<MessageType>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) fn send(&self, make: impl FnOnce(SystemTime) -> MessageType) {
        if let Some(tx) = &self.tx {
            // receiver may be gone; events are best effort
            let _ = tx.send(make(SystemTime::now()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{config::SchedConfig, scheduler::Scheduler, task::Task};

    #[test]
    fn silent_without_channel() {
        let messenger = Messenger::default();
        messenger.send(MessageType::WorkerStart);
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let messenger = Messenger::new(tx);
        drop(rx);
        messenger.send(|t| MessageType::WorkerStop(StopReason::Idle, t));
    }

    #[tokio::test]
    async fn message_test() {
        let config = SchedConfig::new().idle_timeout(Some(Duration::from_millis(50)));
        let (sched, mut rx) = Scheduler::with_events(config);

        for i in 0..5u64 {
            sched.schedule_after(Duration::from_millis(10 * i), Task::new(i, |_| Ok(())));
        }
        sched.schedule_now(Task::new((), |_| Err("broken".into())));
        let cancelled = sched.schedule_after(Duration::from_secs(10), Task::new((), |_| Ok(())));
        assert!(cancelled.cancel());

        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(sched);

        let mut messages = Vec::new();
        while let Some(msg) = rx.recv().await {
            messages.push(msg);
        }

        // add, cancel, execute, failed, destroy, worker start, worker stop
        let mut length = (0, 0, 0, 0, 0, 0, 0);
        for msg in &messages {
            match msg {
                MessageType::Add(_, _) => length.0 += 1,
                MessageType::Cancel(_, _) => length.1 += 1,
                MessageType::ExecuteCallback(_, _) => length.2 += 1,
                MessageType::Failed(_, _) => length.3 += 1,
                MessageType::Destroy(_, _) => length.4 += 1,
                MessageType::WorkerStart(_) => length.5 += 1,
                MessageType::WorkerStop(reason, _) => {
                    assert_eq!(*reason, StopReason::Idle);
                    length.6 += 1
                }
                MessageType::WaitStart(_, _) => {}
            }
        }
        assert_eq!(length, (7, 1, 6, 1, 7, 1, 1));
    }
}
