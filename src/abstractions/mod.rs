use std::fmt;
use std::str::FromStr;

use crate::error::LogParseError;

pub mod clock;
pub mod communication;
pub mod distributed_system;
pub mod event_loop;
pub mod event_selection;
pub mod logging;
pub mod process;
pub mod queue;

/// Identity of a virtual machine within one run. Its listening port is `base_port + id`.
pub type VmId = usize;

/// A Lamport logical clock value, as carried on the wire.
pub type Timestamp = u64;

/// Kind of an event recorded in a virtual machine's event log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    Internal,
    Receive,
    Send,
    SendAll,
    SendError,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::Internal,
        EventType::Receive,
        EventType::Send,
        EventType::SendAll,
        EventType::SendError,
    ];

    /// The label written in the second column of a log line.
    pub fn label(&self) -> &'static str {
        match self {
            EventType::Internal => "Internal",
            EventType::Receive => "Receive",
            EventType::Send => "Send",
            EventType::SendAll => "Send-All",
            EventType::SendError => "Send-Error",
        }
    }

    /// Whether the event was generated locally by the event selection policy.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            EventType::Internal | EventType::Send | EventType::SendAll
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EventType {
    type Err = LogParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|event_type| event_type.label() == s)
            .ok_or_else(|| LogParseError::EventType(s.to_string()))
    }
}
