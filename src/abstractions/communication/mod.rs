use std::future::Future;
use std::io::Result;

use crate::abstractions::{Timestamp, VmId};
use crate::error::LinkError;

pub mod fair_loss_point_to_point_links;

/// Largest payload a listener accepts; anything longer is not a timestamp.
pub const MAX_PAYLOAD_BYTES: u64 = 1024;

/// Delivers one message to the process with the given id.
///
/// Delivery is at most once: an `Err` means the message is lost and must not be retried.
pub trait LinkSender<I, T: 'static + Send> {
    // https://stackoverflow.com/questions/78134843/future-cannot-be-sent-between-threads-safely-error
    fn send(&self, id: I, t: T) -> impl Future<Output = std::result::Result<(), LinkError>> + Send;
}

/// Yields the next message delivered to this process.
pub trait LinkReceiver<T>
where
    T: 'static + Send,
{
    fn recv(&mut self) -> impl Future<Output = Result<T>> + Send;
}

/// Port a virtual machine listens on, or `None` if it does not fit in a `u16`.
pub fn port_for(base_port: u16, id: VmId) -> Option<u16> {
    u16::try_from(id)
        .ok()
        .and_then(|offset| base_port.checked_add(offset))
}

/// Wire encoding of a timestamp: its ASCII decimal digits, nothing else.
pub fn encode_timestamp(timestamp: Timestamp) -> Vec<u8> {
    timestamp.to_string().into_bytes()
}

/// Inverse of [`encode_timestamp`]. Surrounding ASCII whitespace is tolerated; anything else
/// that is not a non-negative integer yields `None`.
pub fn decode_timestamp(payload: &[u8]) -> Option<Timestamp> {
    std::str::from_utf8(payload).ok()?.trim().parse().ok()
}
