//! Duplex connection to the streaming endpoint
//!
//! A connection is a task with two channels: a bounded outbound queue the
//! capture path writes frames into, and an event channel carrying
//! open / message / error / close notifications back to the session.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::EncodedAudioChunk;
use crate::error::ConnectionError;
use crate::protocol::ServerMessage;

pub mod gemini;

pub use gemini::GeminiConnector;

/// Notifications from a connection task
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Handshake finished; media may be sent
    Open,
    Message(ServerMessage),
    Error(ConnectionError),
    Closed { reason: Option<String> },
}

/// Messages queued for the socket
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Audio(EncodedAudioChunk),
}

/// Writer side of the outbound queue
pub type OutboundSender = mpsc::Sender<OutboundMessage>;

/// Opens connections
pub trait Connector: Send + Sync {
    /// Start connecting in the background. Progress is reported on `events`,
    /// beginning with `Open` or `Error`.
    fn open(
        &self,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<ConnectionHandle, ConnectionError>;
}

/// Owner's handle on a connection task. Closing or dropping it ends the task.
pub struct ConnectionHandle {
    /// Bounded queue the capture callback feeds
    outbound: OutboundSender,
    /// Fired once by `close`
    shutdown: Option<oneshot::Sender<()>>,
    /// `None` for connections without a task of their own
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    pub fn new(
        outbound: OutboundSender,
        shutdown: oneshot::Sender<()>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Sender for the outbound queue
    pub fn sender(&self) -> OutboundSender {
        self.outbound.clone()
    }

    /// Ask the task to close the socket. Returns false if already closed.
    pub fn close(&mut self) -> bool {
        // The task finishes on its own; it is not awaited here
        self.task.take();
        match self.shutdown.take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.shutdown.is_some()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_signals_once() {
        let (outbound, _outbound_rx) = mpsc::channel(1);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let mut handle = ConnectionHandle::new(outbound, shutdown_tx, None);

        assert!(handle.is_open());
        assert!(handle.close());
        assert!(!handle.close());
        assert!(!handle.is_open());
        assert_eq!(shutdown_rx.try_recv(), Ok(()));
    }

    #[test]
    fn test_drop_closes() {
        let (outbound, _outbound_rx) = mpsc::channel(1);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        drop(ConnectionHandle::new(outbound, shutdown_tx, None));
        assert_eq!(shutdown_rx.try_recv(), Ok(()));
    }
}
