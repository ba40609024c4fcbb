use std::ops::RangeInclusive;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::abstractions::process::VirtualMachine;
use crate::config::SimulationConfig;
use crate::error::VmError;

/// Picks one clock rate per machine, all distinct while the range has enough values.
pub fn assign_clock_rates<R: Rng>(
    num_vms: usize,
    rates: &RangeInclusive<u32>,
    rng: &mut R,
) -> Vec<u32> {
    let candidates: Vec<u32> = rates.clone().collect();
    let mut assigned: Vec<u32> = candidates
        .choose_multiple(rng, num_vms)
        .copied()
        .collect();

    while assigned.len() < num_vms {
        assigned.push(rng.gen_range(rates.clone()));
    }
    assigned
}

/// A fully connected group of virtual machines started and stopped together.
pub struct Cluster {
    vms: Vec<VirtualMachine>,
}

impl Cluster {
    /// Starts every machine. If one fails, those already running are stopped again.
    pub async fn start(config: &SimulationConfig) -> Result<Self, VmError> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let rates = assign_clock_rates(config.num_vms, &config.clock_rates, &mut rng);

        let mut cluster = Self { vms: Vec::new() };
        for (id, clock_rate) in rates.into_iter().enumerate() {
            let started = match VirtualMachine::new(config.vm_config(id, clock_rate)) {
                Ok(mut vm) => vm.start().await.map(|()| vm),
                Err(err) => Err(err),
            };

            match started {
                Ok(vm) => cluster.vms.push(vm),
                Err(err) => {
                    cluster.stop().await;
                    return Err(err);
                }
            }
        }

        info!(
            num_vms = config.num_vms,
            base_port = config.base_port,
            "cluster started"
        );
        Ok(cluster)
    }

    /// Starts the cluster, lets it run for the configured duration, stops it and returns
    /// the log paths.
    pub async fn run_for(config: &SimulationConfig) -> Result<Vec<PathBuf>, VmError> {
        let mut cluster = Self::start(config).await?;
        tokio::time::sleep(config.duration).await;
        Ok(cluster.stop().await)
    }

    pub fn vms(&self) -> &[VirtualMachine] {
        &self.vms
    }

    /// Stops every machine and returns their log paths in id order.
    pub async fn stop(&mut self) -> Vec<PathBuf> {
        let mut log_paths = Vec::with_capacity(self.vms.len());
        for vm in &mut self.vms {
            if let Err(err) = vm.stop().await {
                warn!(vm = vm.id(), %err, "virtual machine did not stop cleanly");
            }
            log_paths.push(vm.log_path());
        }
        log_paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_are_distinct_when_possible() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut rates = assign_clock_rates(6, &(1..=6), &mut rng);
        rates.sort_unstable();
        assert_eq!(rates, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn rates_repeat_when_range_is_too_small() {
        let mut rng = StdRng::seed_from_u64(3);
        let rates = assign_clock_rates(5, &(2..=3), &mut rng);
        assert_eq!(rates.len(), 5);
        assert!(rates.iter().all(|rate| (2..=3).contains(rate)));
    }
}
