use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::abstractions::clock::LogicalClock;
use crate::abstractions::communication::LinkSender;
use crate::abstractions::event_selection::{Action, EventPolicy};
use crate::abstractions::logging::{EventLog, LogEntry};
use crate::abstractions::process::Runnable;
use crate::abstractions::queue::InboundQueue;
use crate::abstractions::{EventType, Timestamp, VmId};
use crate::config::VmConfig;
use crate::error::VmError;

/// Main task of a virtual machine.
///
/// Owns the logical clock. Every tick it either processes one pending inbound timestamp or
/// generates a local event chosen by the [`EventPolicy`], and records the result.
pub struct EventLoop<S> {
    vm_id: VmId,
    clock: LogicalClock,
    peers: Vec<VmId>,
    tick_interval: Duration,
    policy: EventPolicy,
    rng: StdRng,
    inbound: InboundQueue,
    log: Arc<EventLog>,
    link_sender: S,
}

impl<S> EventLoop<S>
where
    S: 'static + LinkSender<VmId, Timestamp> + Send + Sync,
{
    pub fn new(
        config: &VmConfig,
        inbound: InboundQueue,
        log: Arc<EventLog>,
        link_sender: S,
    ) -> Result<Self, VmError> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            vm_id: config.id,
            clock: LogicalClock::new(),
            peers: config.peers.clone(),
            tick_interval: config.tick_interval(),
            policy: EventPolicy::new(config.internal_event_probability)?,
            rng,
            inbound,
            log,
            link_sender,
        })
    }

    pub fn clock(&self) -> Timestamp {
        self.clock.value()
    }

    /// Runs one tick without waiting for it. At most one inbound message is processed per
    /// tick, and a tick that processes one generates no local event.
    pub async fn step(&mut self) -> LogEntry {
        if let Some(received) = self.inbound.pop() {
            let clock = self.clock.merge(received);
            return self.record(
                EventType::Receive,
                clock,
                format!("From network, timestamp {received}"),
            );
        }

        let action = self.policy.select(self.rng.gen::<f64>());
        self.apply(action).await
    }

    async fn apply(&mut self, action: Action) -> LogEntry {
        match action {
            Action::Internal => {
                let clock = self.clock.tick();
                self.record(EventType::Internal, clock, "No external communication")
            }
            Action::SendToPeer(index) => match self.peers.get(index).copied() {
                Some(peer) => {
                    let clock = self.clock.tick();
                    self.send(peer, clock).await;
                    self.record(EventType::Send, clock, format!("To VM {peer}"))
                }
                None => {
                    let clock = self.clock.tick();
                    self.record(EventType::Internal, clock, "Fallback event")
                }
            },
            Action::SendAll => {
                let clock = self.clock.tick();
                for &peer in &self.peers {
                    self.send(peer, clock).await;
                }
                self.record(EventType::SendAll, clock, format!("To VMs {:?}", self.peers))
            }
        }
    }

    /// A failed send is recorded and dropped; the clock has already advanced.
    async fn send(&self, peer: VmId, clock: Timestamp) {
        if let Err(err) = self.link_sender.send(peer, clock).await {
            debug!(vm = self.vm_id, peer, %err, "send failed");
            self.record(EventType::SendError, clock, format!("To VM {peer}: {err}"));
        }
    }

    fn record(
        &self,
        event_type: EventType,
        clock: Timestamp,
        details: impl Into<String>,
    ) -> LogEntry {
        self.log
            .record(event_type, clock, self.inbound.len(), details)
    }
}

impl<S> Runnable for EventLoop<S>
where
    S: 'static + LinkSender<VmId, Timestamp> + Send + Sync,
{
    fn run(mut self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = tokio::time::sleep(self.tick_interval) => {}
                }
                self.step().await;
            }
            debug!(vm = self.vm_id, clock = self.clock(), "event loop stopped");
        })
    }
}
