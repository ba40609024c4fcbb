use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::abstractions::communication::fair_loss_point_to_point_links::{
    Listener, TcpLinkReceiver, TcpLinkSender,
};
use crate::abstractions::event_loop::EventLoop;
use crate::abstractions::logging::EventLog;
use crate::abstractions::queue::InboundQueue;
use crate::abstractions::VmId;
use crate::config::VmConfig;
use crate::error::{ProcessError, VmError};

/// A task that runs until its cancellation token fires.
pub trait Runnable {
    fn run(self, cancel_token: CancellationToken) -> JoinHandle<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Running,
    /// Terminal.
    Stopped,
}

/// One simulated machine: a listener task and an event loop task sharing an inbound queue
/// and an event log.
///
/// `Created -> Running -> Stopped`; a stopped machine never runs again. Dropping a running
/// machine cancels its tasks.
pub struct VirtualMachine {
    config: VmConfig,
    state: Lifecycle,
    inbound: InboundQueue,
    cancel_token: CancellationToken,
    log: Option<Arc<EventLog>>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl VirtualMachine {
    pub fn new(config: VmConfig) -> Result<Self, VmError> {
        config.validate()?;

        Ok(Self {
            config,
            state: Lifecycle::Created,
            inbound: InboundQueue::new(),
            cancel_token: CancellationToken::new(),
            log: None,
            tasks: Vec::new(),
        })
    }

    /// Binds the listening port, opens the event log and launches both tasks.
    ///
    /// On error nothing is left running and the machine stays `Created`.
    pub async fn start(&mut self) -> Result<(), VmError> {
        if self.state != Lifecycle::Created {
            return Err(VmError::IllegalTransition {
                id: self.config.id,
                state: self.state,
            });
        }
        let config = &self.config;

        let receiver = TcpLinkReceiver::bind(
            &config.host,
            config.base_port,
            config.id,
            config.read_timeout,
        )
        .await?;
        let log = Arc::new(EventLog::create(config.id, config.log_path())?);
        let link_sender =
            TcpLinkSender::new(config.host.clone(), config.base_port, config.connect_timeout);
        let event_loop = EventLoop::new(config, self.inbound.clone(), log.clone(), link_sender)?;
        let listener = Listener::new(config.id, receiver, self.inbound.clone());

        self.tasks = vec![
            ("listener", listener.run(self.cancel_token.clone())),
            ("event loop", event_loop.run(self.cancel_token.clone())),
        ];
        self.log = Some(log);
        self.state = Lifecycle::Running;

        info!(
            vm = self.config.id,
            clock_rate = self.config.clock_rate,
            peers = ?self.config.peers,
            "virtual machine started"
        );
        Ok(())
    }

    /// Cancels both tasks, waits for them to exit (which releases the port) and closes the
    /// event log. Calling it again does nothing.
    pub async fn stop(&mut self) -> Result<(), ProcessError> {
        match self.state {
            Lifecycle::Stopped => return Ok(()),
            Lifecycle::Created => {
                self.state = Lifecycle::Stopped;
                return Ok(());
            }
            Lifecycle::Running => self.state = Lifecycle::Stopped,
        }
        self.cancel_token.cancel();

        let mut result = Ok(());
        for (role, handle) in std::mem::take(&mut self.tasks) {
            if let Err(err) = handle.await {
                error!(vm = self.config.id, role, %err, "task ended abnormally");
                result = Err(ProcessError::Crash {
                    id: self.config.id,
                    role,
                    reason: err.to_string(),
                });
            }
        }

        if let Some(log) = self.log.take() {
            log.close();
        }
        info!(vm = self.config.id, "virtual machine stopped");
        result
    }

    pub fn id(&self) -> VmId {
        self.config.id
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn log_path(&self) -> PathBuf {
        self.config.log_path()
    }
}

impl Drop for VirtualMachine {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_invalid_config() {
        let config = VmConfig::new(0, vec![0], 1, 47_500);
        assert!(matches!(
            VirtualMachine::new(config),
            Err(VmError::SelfPeer { id: 0 })
        ));
    }

    #[tokio::test]
    async fn stopped_before_start_cannot_start() {
        let dir = tempfile::tempdir().unwrap();
        let config = VmConfig::new(0, vec![], 1, 47_510).with_log_dir(dir.path());
        let mut vm = VirtualMachine::new(config).unwrap();

        vm.stop().await.unwrap();
        assert_eq!(vm.state(), Lifecycle::Stopped);

        let err = vm.start().await.unwrap_err();
        assert!(matches!(
            err,
            VmError::IllegalTransition {
                state: Lifecycle::Stopped,
                ..
            }
        ));
        assert!(!vm.log_path().exists());
    }

    #[tokio::test]
    async fn failed_bind_leaves_machine_created() {
        let dir = tempfile::tempdir().unwrap();
        let config = VmConfig::new(1, vec![], 1, 47_520).with_log_dir(dir.path());
        let _squatter = tokio::net::TcpListener::bind(("127.0.0.1", 47_521))
            .await
            .unwrap();

        let mut vm = VirtualMachine::new(config).unwrap();
        let err = vm.start().await.unwrap_err();

        assert!(matches!(err, VmError::Bind { port: 47_521, .. }));
        assert_eq!(vm.state(), Lifecycle::Created);
        assert!(!vm.log_path().exists());
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = VmConfig::new(0, vec![], 10, 47_530).with_log_dir(dir.path());
        let mut vm = VirtualMachine::new(config).unwrap();

        vm.start().await.unwrap();
        assert_eq!(vm.state(), Lifecycle::Running);
        assert!(matches!(
            vm.start().await,
            Err(VmError::IllegalTransition {
                state: Lifecycle::Running,
                ..
            })
        ));

        vm.stop().await.unwrap();
        assert_eq!(vm.state(), Lifecycle::Stopped);
    }
}
