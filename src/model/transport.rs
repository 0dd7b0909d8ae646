//! # Transport Seams
//!
//! Object-safe traits in front of the raw, non-blocking sockets a record owns.
//! All calls are non-blocking: `WouldBlock` is an ordinary outcome that ends
//! processing for the current readiness cycle, never something to wait on.
//!
//! Production sockets (the mio types in [`crate::mux::poll`]) return their
//! [`mio::event::Source`] from the `source` hook so the multiplexer can
//! register them. Test doubles leave the hook at its `None` default.

use std::fmt;
use std::io;

use crate::model::ResourceKind;

/// An established byte-stream connection.
pub trait StreamSocket: Send {
    /// Reads into `buf`, returning the number of bytes read. `Ok(0)` means the
    /// peer closed its end.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes from `buf`, returning the number of bytes accepted by the
    /// kernel. Short writes are normal under backpressure.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// The OS-level registration source, when there is one.
    fn source(&mut self) -> Option<&mut dyn mio::event::Source> {
        None
    }
}

/// A listening socket producing new stream connections.
pub trait ListenerSocket: Send {
    /// Accepts one pending connection.
    fn accept(&mut self) -> io::Result<Box<dyn StreamSocket>>;

    fn source(&mut self) -> Option<&mut dyn mio::event::Source> {
        None
    }
}

/// One direction of a datagram endpoint.
///
/// Sends are all-or-nothing per call: a datagram is never split across calls,
/// and a short send is reported by the caller as a transport failure rather
/// than re-queued.
pub trait DatagramSocket: Send {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn source(&mut self) -> Option<&mut dyn mio::event::Source> {
        None
    }
}

/// The socket behind a record, tagged by resource kind.
pub enum Transport {
    Stream(Box<dyn StreamSocket>),
    Listener(Box<dyn ListenerSocket>),
    DatagramRx(Box<dyn DatagramSocket>),
    DatagramTx(Box<dyn DatagramSocket>),
}

impl Transport {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Transport::Stream(_) => ResourceKind::Connection,
            Transport::Listener(_) => ResourceKind::Acceptor,
            Transport::DatagramRx(_) => ResourceKind::DatagramRx,
            Transport::DatagramTx(_) => ResourceKind::DatagramTx,
        }
    }

    pub(crate) fn source(&mut self) -> Option<&mut dyn mio::event::Source> {
        match self {
            Transport::Stream(s) => s.source(),
            Transport::Listener(l) => l.source(),
            Transport::DatagramRx(d) | Transport::DatagramTx(d) => d.source(),
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Transport::Stream(_) => "stream",
            Transport::Listener(_) => "listener",
            Transport::DatagramRx(_) => "datagram-rx",
            Transport::DatagramTx(_) => "datagram-tx",
        };
        write!(f, "Transport({label})")
    }
}
