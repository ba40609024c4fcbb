use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::abstractions::Timestamp;

/// FIFO of raw timestamps received by the listener and not yet processed by the event loop.
///
/// Clones share the same underlying queue.
#[derive(Clone, Debug, Default)]
pub struct InboundQueue {
    inner: Arc<Mutex<VecDeque<Timestamp>>>,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, timestamp: Timestamp) {
        self.lock().push_back(timestamp);
    }

    /// Non-blocking: returns `None` when nothing is pending.
    pub fn pop(&self) -> Option<Timestamp> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Timestamp>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
