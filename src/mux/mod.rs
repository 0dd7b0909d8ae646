//! # Multiplexer Contract
//!
//! The broker consumes OS-level readiness notification through the
//! [`Multiplexer`] trait. Two implementations ship with the crate:
//! [`poll::PollMux`], a mio-backed poller running on its own thread, and
//! [`mock::MockMux`], a deterministic double for tests.
//!
//! A multiplexer holds a non-owning index from [`Descriptor`] to the sink of
//! the broker currently owning that resource. It delivers [`MuxEvent`]s into
//! the sink and never touches records or sockets itself; all socket I/O
//! happens inside the owning broker's task when the event is dequeued. The
//! sink is an unbounded sender because the poll thread must never block on a
//! slow actor's mailbox.
//!
//! Registration, interest changes and rerouting may be called from any actor
//! task while the poll thread concurrently delivers readiness for other
//! descriptors; implementations must be thread-safe.

use std::fmt;
use std::io;

use tokio::sync::mpsc;

use crate::model::Transport;

pub mod mock;
pub mod poll;

pub use mock::MockMux;
pub use poll::PollMux;

/// Opaque multiplexer-facing identifier for a registered resource.
///
/// Allocated by the runtime alongside the handle; in the mio-backed poller it
/// maps 1:1 to a `Token`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub u64);

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd:{}", self.0)
    }
}

/// The readiness interest a registration asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const fn read() -> Self {
        Self {
            read: true,
            write: false,
        }
    }

    pub const fn write() -> Self {
        Self {
            read: false,
            write: true,
        }
    }

    pub const fn read_write() -> Self {
        Self {
            read: true,
            write: true,
        }
    }
}

/// What the multiplexer observed on a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    Writable,
    /// A descriptor-level failure with a human-readable reason.
    Error(String),
    /// The peer went away without a clean end-of-stream read.
    Hangup,
}

/// One readiness notification, delivered into the owning broker's sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxEvent {
    pub descriptor: Descriptor,
    pub readiness: Readiness,
}

/// The delivery target for a descriptor's events: the readiness channel of
/// the broker that currently owns it.
pub type MuxSink = mpsc::UnboundedSender<MuxEvent>;

/// Readiness-notification backend.
pub trait Multiplexer: Send + Sync + 'static {
    /// Registers a transport's descriptor for `interest`, delivering events
    /// into `sink`.
    fn register(
        &self,
        transport: &mut Transport,
        descriptor: Descriptor,
        interest: Interest,
        sink: MuxSink,
    ) -> io::Result<()>;

    /// Replaces the interest set of an existing registration.
    fn modify_interest(
        &self,
        transport: &mut Transport,
        descriptor: Descriptor,
        interest: Interest,
    ) -> io::Result<()>;

    /// Atomically repoints a descriptor's events at a different sink. After
    /// this returns, no new event reaches the previous sink.
    fn reroute(&self, descriptor: Descriptor, sink: MuxSink) -> io::Result<()>;

    /// Removes a registration. Events already in flight to the old sink are
    /// the receiver's problem; no new ones are produced.
    fn deregister(&self, transport: &mut Transport, descriptor: Descriptor) -> io::Result<()>;
}
