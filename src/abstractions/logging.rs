use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::abstractions::{EventType, Timestamp, VmId};
use crate::error::{LogParseError, VmError};

const CLOCK_LABEL: &str = "Logical Clock";
const QUEUE_LABEL: &str = "Queue Length";

/// One line of a virtual machine's event log.
///
/// Renders as `<elapsed:.3>\t<event>\tLogical Clock: <n>\tQueue Length: <n>\t<details>`.
/// Analysis tooling reads these fields positionally.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub elapsed: Duration,
    pub event_type: EventType,
    pub logical_clock: Timestamp,
    pub queue_length: usize,
    pub details: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3}\t{}\t{CLOCK_LABEL}: {}\t{QUEUE_LABEL}: {}\t{}",
            self.elapsed.as_secs_f64(),
            self.event_type,
            self.logical_clock,
            self.queue_length,
            self.details
        )
    }
}

impl FromStr for LogEntry {
    type Err = LogParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).splitn(5, '\t').collect();
        let &[elapsed, event_type, clock, queue, details] = fields.as_slice() else {
            return Err(LogParseError::FieldCount(fields.len()));
        };

        let elapsed = elapsed
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .ok_or_else(|| LogParseError::Elapsed(elapsed.to_string()))?;

        Ok(Self {
            elapsed,
            event_type: event_type.trim().parse()?,
            logical_clock: parse_counter(CLOCK_LABEL, clock)?,
            queue_length: parse_counter(QUEUE_LABEL, queue)?,
            details: details.to_string(),
        })
    }
}

fn parse_counter<T: FromStr>(label: &'static str, field: &str) -> Result<T, LogParseError> {
    field
        .trim()
        .strip_prefix(label)
        .and_then(|rest| rest.strip_prefix(':'))
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| LogParseError::Counter {
            label,
            found: field.to_string(),
        })
}

/// Append-only event log of one virtual machine.
///
/// The event loop and the listener share one `EventLog`; the mutex around the writer keeps
/// lines whole, and elapsed times are taken under it so they never go backwards in the
/// file. Each line is flushed as soon as it is written.
#[derive(Debug)]
pub struct EventLog {
    vm_id: VmId,
    path: PathBuf,
    started: Instant,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl EventLog {
    /// Opens the log at `path`, truncating what a previous run left behind.
    pub fn create(vm_id: VmId, path: impl AsRef<Path>) -> Result<Self, VmError> {
        let path = path.as_ref().to_path_buf();
        let open_error = |source| VmError::LogOpen {
            path: path.clone(),
            source,
        };

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(open_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(open_error)?;

        Ok(Self {
            vm_id,
            path,
            started: Instant::now(),
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry and returns it. After [`EventLog::close`] nothing is written, but
    /// the entry is still returned to the caller.
    pub fn record(
        &self,
        event_type: EventType,
        logical_clock: Timestamp,
        queue_length: usize,
        details: impl Into<String>,
    ) -> LogEntry {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = LogEntry {
            elapsed: self.started.elapsed(),
            event_type,
            logical_clock,
            queue_length,
            details: single_line(details.into()),
        };

        if let Some(writer) = writer.as_mut() {
            if let Err(err) = writeln!(writer, "{entry}").and_then(|()| writer.flush()) {
                tracing::warn!(vm = self.vm_id, path = %self.path.display(), %err, "event log write failed");
            }
        }

        entry
    }

    /// Flushes and closes the file. Safe to call more than once.
    pub fn close(&self) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut writer) = writer.take() {
            if let Err(err) = writer.flush() {
                tracing::warn!(vm = self.vm_id, path = %self.path.display(), %err, "event log flush on close failed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

fn single_line(details: String) -> String {
    if details.contains(['\t', '\n', '\r']) {
        details.replace(['\t', '\n', '\r'], " ")
    } else {
        details
    }
}
