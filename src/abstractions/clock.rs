use crate::abstractions::Timestamp;

/// Lamport logical clock of one virtual machine.
///
/// Only the event loop owns a `LogicalClock`; the listener hands it raw timestamps through
/// the inbound queue, so no lock is needed around the counter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogicalClock {
    value: Timestamp,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> Timestamp {
        self.value
    }

    /// Local event rule: advance by exactly one.
    pub fn tick(&mut self) -> Timestamp {
        self.value = self.value.saturating_add(1);
        self.value
    }

    /// Receive rule: `max(local, received) + 1`.
    pub fn merge(&mut self, received: Timestamp) -> Timestamp {
        self.value = self.value.max(received).saturating_add(1);
        self.value
    }
}
