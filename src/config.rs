//! Configuration of a single virtual machine and of a whole simulated cluster.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::abstractions::communication::port_for;
use crate::abstractions::VmId;
use crate::error::VmError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_BASE_PORT: u16 = 5000;
pub const DEFAULT_INTERNAL_EVENT_PROBABILITY: f64 = 0.7;
pub const DEFAULT_CLOCK_RATES: RangeInclusive<u32> = 1..=6;
/// Base port shift between consecutive runs of a sweep.
pub const SWEEP_PORT_STRIDE: u16 = 100;

/// Everything one virtual machine needs to start.
#[derive(Clone, Debug)]
pub struct VmConfig {
    pub id: VmId,
    /// Peers in the order the event selection policy addresses them.
    pub peers: Vec<VmId>,
    /// Ticks per second.
    pub clock_rate: u32,
    pub base_port: u16,
    pub internal_event_probability: f64,
    pub host: String,
    pub log_dir: PathBuf,
    /// Upper bound on reading one inbound payload.
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    /// Seeds event selection; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl VmConfig {
    pub fn new(id: VmId, peers: Vec<VmId>, clock_rate: u32, base_port: u16) -> Self {
        Self {
            id,
            peers,
            clock_rate,
            base_port,
            internal_event_probability: DEFAULT_INTERNAL_EVENT_PROBABILITY,
            host: DEFAULT_HOST.to_string(),
            log_dir: PathBuf::from("."),
            read_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
            seed: None,
        }
    }

    pub fn with_internal_event_probability(mut self, probability: f64) -> Self {
        self.internal_event_probability = probability;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl AsRef<Path>) -> Self {
        self.log_dir = log_dir.as_ref().to_path_buf();
        self
    }

    pub fn with_timeouts(mut self, read_timeout: Duration, connect_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), VmError> {
        if !(0.0..1.0).contains(&self.internal_event_probability) {
            return Err(VmError::InvalidProbability(self.internal_event_probability));
        }
        if self.clock_rate == 0 {
            return Err(VmError::InvalidClockRate);
        }
        self.listen_port()?;

        let mut seen = HashSet::new();
        for &peer in &self.peers {
            if peer == self.id {
                return Err(VmError::SelfPeer { id: self.id });
            }
            if !seen.insert(peer) {
                return Err(VmError::DuplicatePeer { id: self.id, peer });
            }
        }
        Ok(())
    }

    pub fn listen_port(&self) -> Result<u16, VmError> {
        port_for(self.base_port, self.id).ok_or(VmError::PortOutOfRange {
            base_port: self.base_port,
            id: self.id,
        })
    }

    /// Wall time between two ticks of the event loop.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.clock_rate.max(1)
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(format!("vm_{}.log", self.id))
    }
}

/// A cluster of fully connected virtual machines with ids `0..num_vms`.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub num_vms: usize,
    pub base_port: u16,
    pub internal_event_probability: f64,
    /// Each VM gets a clock rate from this range, distinct while the range allows it.
    pub clock_rates: RangeInclusive<u32>,
    pub duration: Duration,
    pub host: String,
    pub log_dir: PathBuf,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_vms: 3,
            base_port: DEFAULT_BASE_PORT,
            internal_event_probability: DEFAULT_INTERNAL_EVENT_PROBABILITY,
            clock_rates: DEFAULT_CLOCK_RATES,
            duration: Duration::from_secs(60),
            host: DEFAULT_HOST.to_string(),
            log_dir: PathBuf::from("."),
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), VmError> {
        let (min, max) = (*self.clock_rates.start(), *self.clock_rates.end());
        if min == 0 || min > max {
            return Err(VmError::InvalidClockRateRange { min, max });
        }
        if !(0.0..1.0).contains(&self.internal_event_probability) {
            return Err(VmError::InvalidProbability(self.internal_event_probability));
        }
        if let Some(last) = self.num_vms.checked_sub(1) {
            port_for(self.base_port, last).ok_or(VmError::PortOutOfRange {
                base_port: self.base_port,
                id: last,
            })?;
        }
        Ok(())
    }

    /// Per-VM configuration; every VM is peered with all others in id order.
    pub fn vm_config(&self, id: VmId, clock_rate: u32) -> VmConfig {
        let peers = (0..self.num_vms).filter(|&peer| peer != id).collect();
        let config = VmConfig::new(id, peers, clock_rate, self.base_port)
            .with_internal_event_probability(self.internal_event_probability)
            .with_host(self.host.clone())
            .with_log_dir(&self.log_dir);

        match self.seed {
            Some(seed) => config.with_seed(seed.wrapping_add(id as u64)),
            None => config,
        }
    }

    /// Configuration of run `run` (counted from 1) of a sweep at the given probability.
    ///
    /// Logs go to `<log_dir>/prob_<p>_run_<run>/` and the base port moves up by
    /// [`SWEEP_PORT_STRIDE`] per run, so a run never reuses the ports of the one before it.
    pub fn sweep_run(&self, internal_event_probability: f64, run: usize) -> Result<Self, VmError> {
        let base_port = u16::try_from(run)
            .ok()
            .and_then(|run| run.checked_mul(SWEEP_PORT_STRIDE))
            .and_then(|offset| self.base_port.checked_add(offset))
            .ok_or(VmError::SweepPortOutOfRange {
                base_port: self.base_port,
                run,
            })?;

        Ok(Self {
            base_port,
            internal_event_probability,
            log_dir: self
                .log_dir
                .join(format!("prob_{internal_event_probability}_run_{run}")),
            seed: self
                .seed
                .map(|seed| seed.wrapping_add((run as u64).wrapping_mul(self.num_vms as u64))),
            ..self.clone()
        })
    }
}
