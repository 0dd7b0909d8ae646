//! # Translated Events
//!
//! The vocabulary a behavior receives: readiness has already been turned into
//! completed reads, accepted connections and lifecycle notifications by the
//! time it reaches [`crate::broker::BrokerBehavior::on_io`]. Payloads are
//! opaque byte buffers; this crate defines no wire format.

use crate::model::ResourceHandle;

/// An I/O notification delivered to a broker behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoEvent {
    /// Bytes arrived on a connection or datagram receiver.
    DataReceived {
        handle: ResourceHandle,
        bytes: Vec<u8>,
    },

    /// The resource reached the end of its life: peer close, hangup or a
    /// completed local close.
    ConnectionClosed { handle: ResourceHandle },

    /// A descriptor-level failure. The handle is force-closed immediately
    /// after this event; queued writes are discarded.
    IoError {
        handle: ResourceHandle,
        reason: String,
    },

    /// An acceptor produced a new connection, already registered and `Open`
    /// with empty buffers.
    AcceptedConnection {
        acceptor: ResourceHandle,
        connection: ResourceHandle,
    },
}

impl IoEvent {
    /// The handle this event is about. For accepts, the acceptor.
    pub fn handle(&self) -> ResourceHandle {
        match self {
            IoEvent::DataReceived { handle, .. } => *handle,
            IoEvent::ConnectionClosed { handle } => *handle,
            IoEvent::IoError { handle, .. } => *handle,
            IoEvent::AcceptedConnection { acceptor, .. } => *acceptor,
        }
    }
}
