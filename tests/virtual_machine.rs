use std::fs;
use std::path::Path;
use std::time::Duration;

use logical_clock_simulation::abstractions::communication::fair_loss_point_to_point_links::TcpLinkSender;
use logical_clock_simulation::abstractions::communication::LinkSender;
use logical_clock_simulation::abstractions::distributed_system::Cluster;
use logical_clock_simulation::abstractions::logging::LogEntry;
use logical_clock_simulation::abstractions::process::{Lifecycle, VirtualMachine};
use logical_clock_simulation::abstractions::EventType;
use logical_clock_simulation::analysis::parse_log;
use logical_clock_simulation::config::{SimulationConfig, VmConfig};

const HOST: &str = "127.0.0.1";

fn entries(path: &Path) -> Vec<LogEntry> {
    parse_log(path).unwrap()
}

/// Polls a live log until `found` matches one of its entries. A line still being written
/// is skipped.
async fn wait_for_entry(path: &Path, found: impl Fn(&LogEntry) -> bool) -> LogEntry {
    for _ in 0..100 {
        let contents = fs::read_to_string(path).unwrap_or_default();
        let matched = contents
            .lines()
            .filter_map(|line| line.parse::<LogEntry>().ok())
            .find(|entry| found(entry));
        if let Some(entry) = matched {
            return entry;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("no matching entry in {}", path.display());
}

fn received_timestamp(entry: &LogEntry) -> u64 {
    entry
        .details
        .rsplit(' ')
        .next()
        .and_then(|value| value.parse().ok())
        .unwrap()
}

#[tokio::test]
async fn receive_from_peer_advances_past_sent_clock() {
    let dir = tempfile::tempdir().unwrap();
    let base_port = 48_100;
    // B has no peers, so every local event is a plain +1 and only the message below
    // reaches it.
    let config_b = VmConfig::new(1, vec![], 1, base_port).with_log_dir(dir.path());
    let mut vm_b = VirtualMachine::new(config_b).unwrap();
    vm_b.start().await.unwrap();

    // One tick per second: B is at 2 after its second tick and stays there for a second.
    let second = wait_for_entry(&vm_b.log_path(), |entry| entry.logical_clock == 2).await;
    assert_ne!(second.event_type, EventType::Receive);

    // A, at clock 5, sends to B.
    let link = TcpLinkSender::new(HOST, base_port, Duration::from_secs(1));
    link.send(1, 5).await.unwrap();

    let receive = wait_for_entry(&vm_b.log_path(), |entry| {
        entry.event_type == EventType::Receive
    })
    .await;
    assert_eq!(received_timestamp(&receive), 5);
    assert_eq!(receive.logical_clock, 6);

    let line = fs::read_to_string(vm_b.log_path()).unwrap();
    assert!(line.contains("\tReceive\tLogical Clock: 6\t"));

    vm_b.stop().await.unwrap();
}

#[tokio::test]
async fn cluster_logs_respect_lamport_rules() {
    let dir = tempfile::tempdir().unwrap();
    let config = SimulationConfig {
        num_vms: 3,
        base_port: 48_200,
        internal_event_probability: 0.2,
        clock_rates: 8..=12,
        duration: Duration::from_secs(2),
        log_dir: dir.path().to_path_buf(),
        seed: Some(42),
        ..SimulationConfig::default()
    };

    let logs = Cluster::run_for(&config).await.unwrap();
    assert_eq!(logs.len(), 3);

    let mut receives = 0;
    for path in &logs {
        let entries = entries(path);
        assert!(!entries.is_empty());

        for pair in entries.windows(2) {
            assert!(pair[0].logical_clock <= pair[1].logical_clock);
            assert!(pair[0].elapsed <= pair[1].elapsed);
        }
        for entry in entries.iter().filter(|entry| entry.event_type == EventType::Receive) {
            assert!(entry.logical_clock >= received_timestamp(entry) + 1);
            receives += 1;
        }
    }
    assert!(receives > 0, "no messages were exchanged");
}

#[tokio::test]
async fn stop_is_idempotent_and_releases_port() {
    let dir = tempfile::tempdir().unwrap();
    let config = VmConfig::new(0, vec![], 20, 48_300)
        .with_internal_event_probability(0.5)
        .with_log_dir(dir.path().join("first"));

    let mut vm = VirtualMachine::new(config.clone()).unwrap();
    vm.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    vm.stop().await.unwrap();
    let logged = entries(&vm.log_path()).len();
    assert!(logged > 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    vm.stop().await.unwrap();
    assert_eq!(vm.state(), Lifecycle::Stopped);
    assert_eq!(entries(&vm.log_path()).len(), logged);

    let mut replacement =
        VirtualMachine::new(config.with_log_dir(dir.path().join("second"))).unwrap();
    replacement.start().await.unwrap();
    replacement.stop().await.unwrap();
}

#[tokio::test]
async fn unreachable_peer_produces_send_errors() {
    let dir = tempfile::tempdir().unwrap();
    // Nothing listens on the port of vm 7.
    let config = VmConfig::new(0, vec![7], 20, 48_400)
        .with_internal_event_probability(0.0)
        .with_log_dir(dir.path());

    let mut vm = VirtualMachine::new(config).unwrap();
    vm.start().await.unwrap();

    let error = wait_for_entry(&vm.log_path(), |entry| {
        entry.event_type == EventType::SendError
    })
    .await;
    assert!(error.details.starts_with("To VM 7: "));

    vm.stop().await.unwrap();

    // Every failed send shares the clock value of the event that attempted it.
    let entries = entries(&vm.log_path());
    for (index, entry) in entries.iter().enumerate() {
        if entry.event_type == EventType::SendError {
            let next = &entries[index + 1];
            assert_eq!(next.logical_clock, entry.logical_clock);
        }
    }
}
