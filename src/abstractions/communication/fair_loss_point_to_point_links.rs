use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::abstractions::communication::{
    decode_timestamp, encode_timestamp, port_for, LinkReceiver, LinkSender, MAX_PAYLOAD_BYTES,
};
use crate::abstractions::process::Runnable;
use crate::abstractions::queue::InboundQueue;
use crate::abstractions::{Timestamp, VmId};
use crate::error::{LinkError, VmError};

/// Pause after a failed accept, so a persistent error such as running out of file
/// descriptors does not spin the listener.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Sends each timestamp over its own short-lived TCP connection.
///
/// Failures are reported and never retried, so a lost message stays lost.
#[derive(Clone, Debug)]
pub struct TcpLinkSender {
    host: String,
    base_port: u16,
    connect_timeout: Duration,
}

impl TcpLinkSender {
    pub fn new(host: impl Into<String>, base_port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            base_port,
            connect_timeout,
        }
    }
}

impl LinkSender<VmId, Timestamp> for TcpLinkSender {
    async fn send(&self, id: VmId, timestamp: Timestamp) -> Result<(), LinkError> {
        let port = port_for(self.base_port, id).ok_or(LinkError::PortOutOfRange {
            base_port: self.base_port,
            target: id,
        })?;

        let mut stream = timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), port)),
        )
        .await
        .map_err(|_| LinkError::Timeout {
            target: id,
            after: self.connect_timeout,
        })?
        .map_err(|source| LinkError::Connect { target: id, source })?;

        stream
            .write_all(&encode_timestamp(timestamp))
            .await
            .map_err(|source| LinkError::Write { target: id, source })?;
        stream
            .shutdown()
            .await
            .map_err(|source| LinkError::Write { target: id, source })?;

        Ok(())
    }
}

/// Accepts one connection at a time on a virtual machine's port and decodes the single
/// timestamp it carries.
#[derive(Debug)]
pub struct TcpLinkReceiver {
    vm_id: VmId,
    listener: TcpListener,
    read_timeout: Duration,
}

impl TcpLinkReceiver {
    /// Binds `(host, base_port + vm_id)`. The port is the machine's identity, so failing to
    /// bind it is fatal.
    pub async fn bind(
        host: &str,
        base_port: u16,
        vm_id: VmId,
        read_timeout: Duration,
    ) -> Result<Self, VmError> {
        let port = port_for(base_port, vm_id).ok_or(VmError::PortOutOfRange {
            base_port,
            id: vm_id,
        })?;
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| VmError::Bind { port, source })?;
        info!(vm = vm_id, port, "listener bound");

        Ok(Self {
            vm_id,
            listener,
            read_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    async fn read_payload(&self, stream: &mut TcpStream) -> Option<Timestamp> {
        let mut payload = Vec::new();
        let mut limited = stream.take(MAX_PAYLOAD_BYTES + 1);

        let read = timeout(self.read_timeout, limited.read_to_end(&mut payload)).await;

        match read {
            Ok(Ok(len)) if len as u64 <= MAX_PAYLOAD_BYTES => decode_timestamp(&payload),
            _ => None,
        }
    }
}

impl LinkReceiver<Timestamp> for TcpLinkReceiver {
    /// Skips connections whose payload is not a timestamp; they are indistinguishable from
    /// line noise.
    async fn recv(&mut self) -> io::Result<Timestamp> {
        loop {
            let (mut stream, peer) = self.listener.accept().await?;
            let received = self.read_payload(&mut stream).await;
            drop(stream);

            match received {
                Some(timestamp) => return Ok(timestamp),
                None => debug!(vm = self.vm_id, %peer, "dropped malformed payload"),
            }
        }
    }
}

/// Listener task of a virtual machine: feeds received timestamps into the inbound queue.
/// It never touches the logical clock.
pub struct Listener<R> {
    vm_id: VmId,
    receiver: R,
    inbound: InboundQueue,
}

impl<R> Listener<R>
where
    R: 'static + LinkReceiver<Timestamp> + Send,
{
    pub fn new(vm_id: VmId, receiver: R, inbound: InboundQueue) -> Self {
        Self {
            vm_id,
            receiver,
            inbound,
        }
    }
}

impl<R> Runnable for Listener<R>
where
    R: 'static + LinkReceiver<Timestamp> + Send,
{
    fn run(mut self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    received = self.receiver.recv() => received,
                };

                match received {
                    Ok(timestamp) => self.inbound.push(timestamp),
                    Err(err) => {
                        debug!(vm = self.vm_id, %err, "accept failed");
                        tokio::select! {
                            _ = cancel_token.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        }
                    }
                }
            }
            // Dropping the receiver here closes the listening socket.
            debug!(vm = self.vm_id, "listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    const HOST: &str = "127.0.0.1";

    /// Fails every accept, like a listener out of file descriptors.
    struct FailingReceiver {
        calls: Arc<AtomicUsize>,
    }

    impl LinkReceiver<Timestamp> for FailingReceiver {
        async fn recv(&mut self) -> io::Result<Timestamp> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::Other, "too many open files"))
        }
    }

    #[tokio::test]
    async fn sender_delivers_to_listener_queue() {
        let base_port = 46_100;
        let receiver = TcpLinkReceiver::bind(HOST, base_port, 1, Duration::from_secs(1))
            .await
            .unwrap();
        let inbound = InboundQueue::new();
        let cancel_token = CancellationToken::new();
        let handle = Listener::new(1, receiver, inbound.clone()).run(cancel_token.clone());

        let sender = TcpLinkSender::new(HOST, base_port, Duration::from_secs(1));
        sender.send(1, 7).await.unwrap();
        sender.send(1, 12).await.unwrap();

        for _ in 0..100 {
            if inbound.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(inbound.pop(), Some(7));
        assert_eq!(inbound.pop(), Some(12));

        cancel_token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_payloads_are_dropped() {
        let base_port = 46_200;
        let mut receiver = TcpLinkReceiver::bind(HOST, base_port, 0, Duration::from_secs(1))
            .await
            .unwrap();
        let addr = receiver.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let payloads: [&[u8]; 4] = [b"not a clock", b"-4", b"", b"31"];
            for payload in payloads {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                stream.write_all(payload).await.unwrap();
                stream.shutdown().await.unwrap();
            }
        });

        assert_eq!(receiver.recv().await.unwrap(), 31);
        client.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_payload_is_dropped() {
        let base_port = 46_300;
        let mut receiver = TcpLinkReceiver::bind(HOST, base_port, 0, Duration::from_secs(1))
            .await
            .unwrap();
        let addr = receiver.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut padded = vec![b'0'; MAX_PAYLOAD_BYTES as usize + 8];
            padded.push(b'5');

            // The receiver hangs up after the limit, so this side may see a reset.
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let _ = stream.write_all(&padded).await;
            let _ = stream.shutdown().await;

            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"8").await.unwrap();
            stream.shutdown().await.unwrap();
        });

        assert_eq!(receiver.recv().await.unwrap(), 8);
        client.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failing_accept_backs_off() {
        let calls = Arc::new(AtomicUsize::new(0));
        let receiver = FailingReceiver {
            calls: calls.clone(),
        };
        let inbound = InboundQueue::new();
        let cancel_token = CancellationToken::new();
        let handle = Listener::new(0, receiver, inbound.clone()).run(cancel_token.clone());

        tokio::time::sleep(ACCEPT_BACKOFF * 4 + ACCEPT_BACKOFF / 2).await;
        cancel_token.cancel();
        handle.await.unwrap();

        let calls = calls.load(Ordering::SeqCst);
        assert!((4..=6).contains(&calls), "{calls} accepts");
        assert!(inbound.is_empty());
    }

    #[tokio::test]
    async fn bind_fails_when_port_taken() {
        let base_port = 46_400;
        let _held = TcpLinkReceiver::bind(HOST, base_port, 2, Duration::from_secs(1))
            .await
            .unwrap();

        let err = TcpLinkReceiver::bind(HOST, base_port, 2, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::Bind { port: 46_402, .. }));
    }

    #[tokio::test]
    async fn send_to_absent_peer_fails() {
        let sender = TcpLinkSender::new(HOST, 46_500, Duration::from_secs(1));
        let err = sender.send(9, 3).await.unwrap_err();
        assert!(matches!(err, LinkError::Connect { target: 9, .. }));

        let err = sender.send(usize::MAX, 3).await.unwrap_err();
        assert!(matches!(err, LinkError::PortOutOfRange { .. }));
    }
}
