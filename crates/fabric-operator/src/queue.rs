//! Per-resource queue of pending [`Update`]s.
//!
//! Predicates run concurrently with the reconciler, so every operation takes
//! the single queue lock for its whole read-modify-write sequence. Nothing in
//! here performs I/O while the lock is held.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::update::Update;

/// Process-local, in-memory FIFO of [`Update`]s keyed by resource name.
///
/// The queue is not persisted. After an operator restart the create predicate
/// reconstructs the relevant update by diffing against the last saved spec.
#[derive(Debug, Default)]
pub struct UpdateQueue {
    pending: Mutex<HashMap<String, VecDeque<Update>>>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Update>>> {
        // A panic while holding the lock cannot leave a half-written entry
        // behind, so the data is still consistent.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `update` to the queue of `name`, unless an equal update is
    /// already pending for it.
    ///
    /// Returns `true` if the update was enqueued.
    pub fn push(&self, name: &str, update: Update) -> bool {
        let mut pending = self.lock();
        let queue = pending.entry(name.to_owned()).or_default();

        if queue.contains(&update) {
            return false;
        }

        queue.push_back(update);
        true
    }

    /// Puts `update` back at the head of the queue of `name`, so it is popped
    /// next. Like [`Self::push`], an update that is already pending is not
    /// added again.
    ///
    /// Returns `true` if the update was enqueued.
    pub fn requeue(&self, name: &str, update: Update) -> bool {
        let mut pending = self.lock();
        let queue = pending.entry(name.to_owned()).or_default();

        if queue.contains(&update) {
            return false;
        }

        queue.push_front(update);
        true
    }

    /// Removes and returns the oldest pending update of `name`.
    ///
    /// Returns an empty [`Update`] if nothing is pending.
    pub fn pop(&self, name: &str) -> Update {
        let mut pending = self.lock();

        let Some(queue) = pending.get_mut(name) else {
            return Update::default();
        };

        let update = queue.pop_front().unwrap_or_default();
        if queue.is_empty() {
            pending.remove(name);
        }

        update
    }

    /// Returns a copy of the update at `index` without removing it, or an
    /// empty [`Update`] if `index` is out of range.
    pub fn peek_at(&self, name: &str, index: usize) -> Update {
        self.lock()
            .get(name)
            .and_then(|queue| queue.get(index))
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, name: &str) -> bool {
        self.len(name) == 0
    }

    /// Drops all pending updates of `name`, returning how many there were.
    pub fn discard(&self, name: &str) -> usize {
        self.lock().remove(name).map_or(0, |queue| queue.len())
    }
}
