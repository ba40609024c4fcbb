//! Error types for the virtual machine runtime, its links and the log analyzer.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::abstractions::VmId;

/// Errors raised while configuring or starting a virtual machine.
///
/// Every variant is fatal for startup only; once a VM is running, per-event
/// failures are recorded in its event log instead.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("internal event probability must be in [0, 1), got {0}")]
    InvalidProbability(f64),

    #[error("clock rate must be a positive number of ticks per second")]
    InvalidClockRate,

    #[error("vm {id} cannot list itself as a peer")]
    SelfPeer { id: VmId },

    #[error("vm {id} lists peer {peer} more than once")]
    DuplicatePeer { id: VmId, peer: VmId },

    #[error("port for vm {id} overflows base port {base_port}")]
    PortOutOfRange { base_port: u16, id: VmId },

    #[error("base port {base_port} leaves no room for sweep run {run}")]
    SweepPortOutOfRange { base_port: u16, run: usize },

    #[error("invalid clock rate range {min}..={max}")]
    InvalidClockRateRange { min: u32, max: u32 },

    #[error("cannot open event log {path}: {source}")]
    LogOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot bind listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("vm {id} cannot start from the {state:?} state")]
    IllegalTransition {
        id: VmId,
        state: crate::abstractions::process::Lifecycle,
    },
}

/// Failure to deliver one timestamp to a peer. The message is considered lost.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("no port for vm {target} above base port {base_port}")]
    PortOutOfRange { base_port: u16, target: VmId },

    #[error("connect to vm {target} failed: {source}")]
    Connect {
        target: VmId,
        #[source]
        source: io::Error,
    },

    #[error("connect to vm {target} timed out after {after:?}")]
    Timeout { target: VmId, after: Duration },

    #[error("write to vm {target} failed: {source}")]
    Write {
        target: VmId,
        #[source]
        source: io::Error,
    },
}

/// A runtime task of a virtual machine ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{role} task of vm {id} crashed: {reason}")]
    Crash {
        id: VmId,
        role: &'static str,
        reason: String,
    },
}

/// A line of an event log does not follow the positional format.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum LogParseError {
    #[error("expected 5 tab-separated fields, found {0}")]
    FieldCount(usize),

    #[error("invalid elapsed seconds {0:?}")]
    Elapsed(String),

    #[error("unknown event type {0:?}")]
    EventType(String),

    #[error("expected \"{label}: <int>\", found {found:?}")]
    Counter { label: &'static str, found: String },
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: LogParseError,
    },
}
