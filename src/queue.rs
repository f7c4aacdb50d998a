use std::collections::BTreeMap;

use crate::task::{Entry, TaskId};

/// Pending tasks ordered by deadline.
///
/// The queue itself is not synchronized; the scheduler keeps it behind the
/// same mutex that guards its worker bookkeeping so that every operation here
/// is atomic with respect to the others. Tasks with equal deadlines come out
/// in an unspecified order.
pub(crate) struct TaskQueue<T> {
    tasks: BTreeMap<(T, TaskId), Entry<T>>,
}

impl<T: Ord + Copy> TaskQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }

    /// Returns true if the task is now the earliest pending one.
    pub(crate) fn insert(&mut self, entry: Entry<T>) -> bool {
        let key = (entry.deadline, entry.id);
        self.tasks.insert(key, entry);
        self.tasks.first_key_value().map(|(k, _)| *k) == Some(key)
    }

    pub(crate) fn peek_earliest(&self) -> Option<(TaskId, T)> {
        self.tasks.first_key_value().map(|(&(deadline, id), _)| (id, deadline))
    }

    pub(crate) fn pop_earliest(&mut self) -> Option<Entry<T>> {
        self.tasks.pop_first().map(|(_, entry)| entry)
    }

    /// Removes the task with the given identity. The flag tells whether it
    /// was the earliest pending task.
    pub(crate) fn remove_by_identity(&mut self, id: TaskId) -> Option<(Entry<T>, bool)> {
        let (position, key) = self
            .tasks
            .keys()
            .enumerate()
            .find(|(_, key)| key.1 == id)
            .map(|(i, key)| (i, *key))?;
        self.tasks.remove(&key).map(|entry| (entry, position == 0))
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.tasks.keys().any(|key| key.1 == id)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Empties the queue, handing the entries back so they can be released
    /// outside the lock.
    pub(crate) fn take_all(&mut self) -> Vec<Entry<T>> {
        std::mem::take(&mut self.tasks).into_values().collect()
    }
}
