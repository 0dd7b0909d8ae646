//! # io-broker
//!
//! > **An actor that owns sockets.**
//!
//! This crate implements the I/O broker of an actor runtime: an actor owning
//! a set of network resources (stream connections, listening sockets,
//! datagram endpoints) that turns raw readiness from an asynchronous
//! multiplexer into ordinary actor messages for a user-supplied behavior.
//!
//! It reconciles two execution models that do not naturally mix. A reactor
//! delivers low-level readiness out of order, on its own thread. An actor
//! processes one message at a time with exclusive access to its state. The
//! broker sits in between: the reactor only ever *enqueues* readiness into
//! the broker's channel, and every socket read, write, accept and close
//! happens inside the broker's task when that readiness is dequeued. The
//! resource table therefore needs no locks at all.
//!
//! ## Module Tour
//!
//! ### The Data ([`model`])
//! [`ResourceHandle`]s are copyable names; [`model::ResourceRecord`]s are the
//! owned state behind them (transport, lifecycle state, pending writes).
//! Records move by value between owners, never by shared reference.
//!
//! ### The Reactor Seam ([`mux`])
//! The [`mux::Multiplexer`] trait is everything the broker asks of the OS:
//! register, change interest, reroute, deregister. [`mux::PollMux`] is the
//! mio-backed production poller; [`mux::MockMux`] is a scriptable double that
//! makes every test deterministic.
//!
//! ### The Engine ([`broker`])
//! [`broker::ResourceTable`] enforces exclusive ownership and keeps the
//! multiplexer registrations in line with record state. The translator turns
//! readiness into the [`IoEvent`] vocabulary. [`Broker`] is the actor loop
//! dispatching events and messages into a [`BrokerBehavior`], and
//! [`BrokerContext::fork`] hands a live connection off to a freshly spawned
//! broker without losing buffered data or closing the socket.
//!
//! ### The Wiring ([`runtime`])
//! [`BrokerSystem`] builds the runtime handle (multiplexer, shared id
//! allocator, [`BrokerConfig`]) and spawns brokers into tokio tasks. The
//! runtime is injected, never reached through a global.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use io_broker::{BrokerConfig, BrokerSystem, PollMux, Transport};
//!
//! let mux = Arc::new(PollMux::new()?);
//! let mut system = BrokerSystem::new(mux, BrokerConfig::default());
//! let client = system.spawn("echo", |ctx| {
//!     let listener = mio::net::TcpListener::bind("127.0.0.1:7000".parse()?)?;
//!     ctx.spawn_resource(Transport::Listener(Box::new(listener)))?;
//!     EchoBehavior::default()
//! });
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test
//! ```

pub mod broker;
pub mod model;
pub mod mux;
pub mod runtime;

// Re-export core types for convenience
pub use broker::{
    Broker, BrokerBehavior, BrokerClient, BrokerContext, BrokerError, BrokerState, IoEvent,
};
pub use model::{
    DatagramSocket, ListenerSocket, ResourceHandle, ResourceKind, StreamSocket, Transport,
};
pub use mux::{Descriptor, Interest, MockMux, Multiplexer, MuxEvent, PollMux, Readiness};
pub use runtime::{setup_tracing, BrokerConfig, BrokerRuntime, BrokerSystem};
