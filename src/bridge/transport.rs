//! Message transport abstraction
//!
//! The call channel only needs to post client messages and receive worker
//! messages; where the worker lives is the transport's business.

use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::error::BridgeError;
use super::host::HostEvent;
use super::protocol::{ClientMessage, WorkerMessage};

/// Trait for abstracting the client side of the isolation boundary
pub trait Transport {
    /// Post a message to the worker. Ownership of any buffers moves with it.
    fn post(&self, message: ClientMessage) -> Result<(), BridgeError>;

    /// Wait up to `timeout` for the next worker message
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<WorkerMessage>, BridgeError>;

    /// Take the next worker message if one is already queued
    fn try_recv(&self) -> Result<Option<WorkerMessage>, BridgeError>;
}

/// Transport to an engine host running on a thread of this process
pub struct InProcessTransport {
    to_host: Sender<HostEvent>,
    from_host: Receiver<WorkerMessage>,
}

impl InProcessTransport {
    pub(crate) fn new(to_host: Sender<HostEvent>, from_host: Receiver<WorkerMessage>) -> Self {
        Self { to_host, from_host }
    }
}

impl Transport for InProcessTransport {
    fn post(&self, message: ClientMessage) -> Result<(), BridgeError> {
        self.to_host
            .send(HostEvent::Client(message))
            .map_err(|_| BridgeError::Disconnected)
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<WorkerMessage>, BridgeError> {
        match self.from_host.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Disconnected),
        }
    }

    fn try_recv(&self) -> Result<Option<WorkerMessage>, BridgeError> {
        match self.from_host.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BridgeError::Disconnected),
        }
    }
}
