//! Offline summaries of event logs written by virtual machines.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::abstractions::logging::LogEntry;
use crate::abstractions::{EventType, Timestamp};
use crate::error::AnalysisError;

/// Reads a whole event log, failing on the first line that does not parse.
pub fn parse_log(path: impl AsRef<Path>) -> Result<Vec<LogEntry>, AnalysisError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| AnalysisError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            line.parse().map_err(|source| AnalysisError::Parse {
                path: path.to_path_buf(),
                line: index + 1,
                source,
            })
        })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogSummary {
    pub path: Option<PathBuf>,
    pub entries: usize,
    pub event_counts: HashMap<EventType, usize>,
    pub final_clock: Timestamp,
    /// Largest clock increase between two consecutive entries.
    pub max_jump: Timestamp,
    pub mean_jump: f64,
    /// Sample standard deviation of the clock jumps.
    pub std_jump: f64,
    pub max_queue_length: usize,
    pub mean_queue_length: f64,
    /// Share of internal events among locally generated ones.
    pub internal_fraction: f64,
}

impl LogSummary {
    pub fn from_entries(entries: &[LogEntry]) -> Self {
        let mut event_counts = HashMap::new();
        for entry in entries {
            *event_counts.entry(entry.event_type).or_insert(0) += 1;
        }

        let jumps: Vec<Timestamp> = entries
            .windows(2)
            .map(|pair| pair[1].logical_clock.saturating_sub(pair[0].logical_clock))
            .collect();
        let mean_jump = mean(jumps.iter().map(|&jump| jump as f64));
        let std_jump = if jumps.len() < 2 {
            0.0
        } else {
            let squares: f64 = jumps
                .iter()
                .map(|&jump| (jump as f64 - mean_jump).powi(2))
                .sum();
            (squares / (jumps.len() - 1) as f64).sqrt()
        };

        let local: usize = EventType::ALL
            .iter()
            .filter(|event_type| event_type.is_local())
            .map(|event_type| event_counts.get(event_type).copied().unwrap_or(0))
            .sum();
        let internal = event_counts.get(&EventType::Internal).copied().unwrap_or(0);

        Self {
            path: None,
            entries: entries.len(),
            final_clock: entries.last().map_or(0, |entry| entry.logical_clock),
            max_jump: jumps.iter().copied().max().unwrap_or(0),
            mean_jump,
            std_jump,
            mean_queue_length: mean(entries.iter().map(|entry| entry.queue_length as f64)),
            max_queue_length: entries
                .iter()
                .map(|entry| entry.queue_length)
                .max()
                .unwrap_or(0),
            internal_fraction: if local == 0 {
                0.0
            } else {
                internal as f64 / local as f64
            },
            event_counts,
        }
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.event_counts.get(&event_type).copied().unwrap_or(0)
    }
}

impl fmt::Display for LogSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = &self.path {
            writeln!(f, "{}", path.display())?;
        }
        writeln!(
            f,
            "  entries: {}  final clock: {}  max jump: {}  mean jump: {:.2}  jump std: {:.2}",
            self.entries, self.final_clock, self.max_jump, self.mean_jump, self.std_jump
        )?;
        writeln!(
            f,
            "  max queue: {}  mean queue: {:.2}",
            self.max_queue_length, self.mean_queue_length
        )?;
        let counts: Vec<String> = EventType::ALL
            .iter()
            .map(|event_type| format!("{event_type}: {}", self.count(*event_type)))
            .collect();
        write!(
            f,
            "  {}  internal fraction: {:.3}",
            counts.join("  "),
            self.internal_fraction
        )
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Number of shared time points clocks are compared at.
pub const DRIFT_SAMPLE_POINTS: usize = 200;

/// How far apart the clocks of different machines were at the same elapsed time.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Drift {
    /// Mean absolute difference over every pair of machines and every sample point.
    pub avg_drift: f64,
    pub max_drift: f64,
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "average drift: {:.2}  max drift: {:.2}",
            self.avg_drift, self.max_drift
        )
    }
}

/// Clock of one log at `at` seconds, interpolated linearly between the surrounding entries
/// and held constant before the first and after the last one.
fn clock_at(points: &[(f64, f64)], at: f64) -> f64 {
    let upper = points.partition_point(|&(elapsed, _)| elapsed < at);
    match (upper.checked_sub(1).map(|lower| points[lower]), points.get(upper)) {
        (Some((x0, y0)), Some(&(x1, y1))) => y0 + (y1 - y0) * (at - x0) / (x1 - x0),
        (None, Some(&(_, clock))) | (Some((_, clock)), None) => clock,
        (None, None) => 0.0,
    }
}

/// Samples every log's clock at `num_points` evenly spaced elapsed times spanning all logs
/// and compares each pair of machines at each sample. Empty logs are ignored.
pub fn clock_drift(logs: &[Vec<LogEntry>], num_points: usize) -> Drift {
    let series: Vec<Vec<(f64, f64)>> = logs
        .iter()
        .filter(|entries| !entries.is_empty())
        .map(|entries| {
            let mut points: Vec<(f64, f64)> = entries
                .iter()
                .map(|entry| (entry.elapsed.as_secs_f64(), entry.logical_clock as f64))
                .collect();
            points.sort_by(|a, b| a.0.total_cmp(&b.0));
            points
        })
        .collect();
    if series.len() < 2 || num_points == 0 {
        return Drift::default();
    }

    let times = series.iter().flatten().map(|&(elapsed, _)| elapsed);
    let start = times.clone().fold(f64::INFINITY, f64::min);
    let end = times.fold(f64::NEG_INFINITY, f64::max);
    let step = if num_points > 1 {
        (end - start) / (num_points - 1) as f64
    } else {
        0.0
    };

    let mut total = 0.0;
    let mut samples = 0usize;
    let mut max_drift: f64 = 0.0;
    for index in 0..num_points {
        let at = start + step * index as f64;
        let clocks: Vec<f64> = series.iter().map(|points| clock_at(points, at)).collect();
        for (i, a) in clocks.iter().enumerate() {
            for b in &clocks[i + 1..] {
                let difference = (a - b).abs();
                total += difference;
                samples += 1;
                max_drift = max_drift.max(difference);
            }
        }
    }

    Drift {
        avg_drift: total / samples as f64,
        max_drift,
    }
}

/// Summaries and drift of all logs written by one run of a cluster.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunAnalysis {
    pub summaries: Vec<LogSummary>,
    pub drift: Drift,
}

impl RunAnalysis {
    pub fn from_entries(logs: &[Vec<LogEntry>]) -> Self {
        Self {
            summaries: logs.iter().map(|entries| LogSummary::from_entries(entries)).collect(),
            drift: clock_drift(logs, DRIFT_SAMPLE_POINTS),
        }
    }

    pub fn from_files(paths: &[PathBuf]) -> Result<Self, AnalysisError> {
        let logs = paths.iter().map(parse_log).collect::<Result<Vec<_>, _>>()?;
        let mut analysis = Self::from_entries(&logs);
        for (summary, path) in analysis.summaries.iter_mut().zip(paths) {
            summary.path = Some(path.clone());
        }
        Ok(analysis)
    }

    /// Mean of one per-machine metric over the machines of this run.
    pub fn mean_over_vms(&self, metric: impl Fn(&LogSummary) -> f64) -> f64 {
        mean(self.summaries.iter().map(metric))
    }
}

impl fmt::Display for RunAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for summary in &self.summaries {
            writeln!(f, "{summary}")?;
        }
        write!(f, "{}", self.drift)
    }
}

/// Metrics of several runs at one internal event probability, each averaged over machines
/// and then over runs.
#[derive(Clone, Debug, PartialEq)]
pub struct SweepPoint {
    pub internal_event_probability: f64,
    pub runs: usize,
    pub mean_jump: f64,
    pub max_jump: f64,
    pub std_jump: f64,
    pub mean_queue_length: f64,
    pub avg_drift: f64,
    pub max_drift: f64,
}

impl SweepPoint {
    pub fn from_runs(internal_event_probability: f64, runs: &[RunAnalysis]) -> Self {
        Self {
            internal_event_probability,
            runs: runs.len(),
            mean_jump: mean_over_runs(runs, |run| run.mean_over_vms(|summary| summary.mean_jump)),
            max_jump: mean_over_runs(runs, |run| {
                run.mean_over_vms(|summary| summary.max_jump as f64)
            }),
            std_jump: mean_over_runs(runs, |run| run.mean_over_vms(|summary| summary.std_jump)),
            mean_queue_length: mean_over_runs(runs, |run| {
                run.mean_over_vms(|summary| summary.mean_queue_length)
            }),
            avg_drift: mean_over_runs(runs, |run| run.drift.avg_drift),
            max_drift: mean_over_runs(runs, |run| run.drift.max_drift),
        }
    }
}

fn mean_over_runs(runs: &[RunAnalysis], metric: impl Fn(&RunAnalysis) -> f64) -> f64 {
    mean(runs.iter().map(metric))
}

impl fmt::Display for SweepPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p={} over {} runs: mean jump {:.2}  max jump {:.2}  jump std {:.2}  mean queue {:.2}  average drift {:.2}  max drift {:.2}",
            self.internal_event_probability,
            self.runs,
            self.mean_jump,
            self.max_jump,
            self.std_jump,
            self.mean_queue_length,
            self.avg_drift,
            self.max_drift
        )
    }
}
