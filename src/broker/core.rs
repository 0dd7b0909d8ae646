//! # The Broker Actor
//!
//! This module defines the server half of the broker. A [`Broker`] owns a
//! [`ResourceTable`] and two inbound channels: a bounded command mailbox fed
//! by [`BrokerClient`](crate::broker::BrokerClient)s, and an unbounded
//! readiness channel fed by the multiplexer. It processes one message at a
//! time, so the table and every record in it are mutated without any locking.
//!
//! **Concurrency model**: the poll thread enqueues readiness and never
//! touches broker state. Translation of readiness into [`IoEvent`]s, behavior
//! dispatch and all socket I/O happen here, sequentially. Per-handle event
//! order follows the readiness channel's order; nothing is guaranteed across
//! different handles.
//!
//! The user plugs in a [`BrokerBehavior`]: the polymorphic handler dispatching
//! over translated I/O events and ordinary actor messages. Behavior errors
//! are logged and never take the broker down; losing one connection must not
//! cost the others.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::broker::client::BrokerClient;
use crate::broker::error::BrokerError;
use crate::broker::event::IoEvent;
use crate::broker::table::{CloseOutcome, ResourceTable};
use crate::broker::translator;
use crate::model::{ResourceHandle, ResourceRecord, Transport};
use crate::mux::{Descriptor, MuxEvent, MuxSink};
use crate::runtime::BrokerRuntime;

/// Type alias for the one-shot response channel used by broker commands.
pub type Response<T> = oneshot::Sender<Result<T, BrokerError>>;

/// Everything that can land in a broker's command mailbox.
pub enum BrokerMsg<M> {
    /// An ordinary actor message for the behavior.
    Message(M),
    QueueWrite {
        handle: ResourceHandle,
        bytes: Vec<u8>,
        respond_to: Response<()>,
    },
    Close {
        handle: ResourceHandle,
        respond_to: Response<()>,
    },
    Shutdown {
        respond_to: Response<()>,
    },
}

/// Lifecycle of a broker instance.
///
/// `Running` is the only state that registers new handles or dispatches
/// events to the behavior. `Terminating` drains in-flight writes through the
/// table's close protocol before the actor stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Initializing,
    Running,
    Terminating,
    Terminated,
}

/// The user-supplied behavior driving a broker.
///
/// Hooks receive the [`BrokerContext`] for imperative access to the resource
/// table: queueing writes, closing handles, spawning resources and forking
/// connections off to dedicated brokers. A hook returning an error is logged
/// and processing continues with the next message.
#[async_trait]
pub trait BrokerBehavior: Send + 'static {
    /// The ordinary (non-I/O) message type this behavior understands.
    type Message: Send + 'static;

    /// The behavior's own error type, surfaced in the broker's logs.
    type Error: std::error::Error + Send + 'static;

    /// Handles a translated I/O event.
    async fn on_io(
        &mut self,
        ctx: &mut BrokerContext,
        event: IoEvent,
    ) -> Result<(), Self::Error>;

    /// Handles an ordinary actor message.
    async fn on_message(
        &mut self,
        ctx: &mut BrokerContext,
        message: Self::Message,
    ) -> Result<(), Self::Error>;

    /// Called once after the loop exits, before remaining resources are torn
    /// down.
    async fn on_stop(&mut self, _ctx: &mut BrokerContext) {}
}

/// The state handed to behavior hooks: the resource table plus the injected
/// runtime. There is no ambient global; a broker reaches its runtime only
/// through this context.
pub struct BrokerContext {
    pub(crate) name: String,
    pub(crate) state: BrokerState,
    pub(crate) table: ResourceTable,
    pub(crate) runtime: BrokerRuntime,
    pub(crate) mux_sink: MuxSink,
    /// Descriptors forked away: readiness already queued here is passed on to
    /// the new owner instead of being translated against our table.
    pub(crate) forwards: HashMap<Descriptor, MuxSink>,
    /// Events produced by context calls mid-dispatch, delivered to the
    /// behavior once the current hook returns.
    pub(crate) pending: VecDeque<IoEvent>,
}

impl BrokerContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BrokerState {
        self.state
    }

    pub fn runtime(&self) -> &BrokerRuntime {
        &self.runtime
    }

    pub fn lookup(&self, handle: ResourceHandle) -> Option<&ResourceRecord> {
        self.table.lookup(handle)
    }

    pub fn open_handles(&self) -> Vec<ResourceHandle> {
        self.table.handles()
    }

    /// Registers a new resource with this broker, typically an outbound
    /// connection or a freshly bound listener.
    pub fn spawn_resource(&mut self, transport: Transport) -> Result<ResourceHandle, BrokerError> {
        if self.state != BrokerState::Running {
            return Err(BrokerError::BrokerClosed);
        }
        self.table.register(transport)
    }

    /// Appends bytes to a handle's pending writes.
    pub fn queue_write(
        &mut self,
        handle: ResourceHandle,
        bytes: Vec<u8>,
    ) -> Result<(), BrokerError> {
        self.table.queue_write(handle, bytes)
    }

    /// Gracefully closes a handle. The closed notification is delivered to
    /// the behavior once the current hook returns (immediately for an empty
    /// queue, after the drain otherwise).
    pub fn close(&mut self, handle: ResourceHandle) -> Result<(), BrokerError> {
        if let CloseOutcome::Closed { notify: true } = self.table.close(handle)? {
            self.pending.push_back(IoEvent::ConnectionClosed { handle });
        }
        Ok(())
    }

    /// Asks the broker to terminate after draining pending writes.
    pub fn shutdown(&mut self) {
        self.begin_termination();
    }

    pub(crate) fn begin_termination(&mut self) {
        if matches!(self.state, BrokerState::Terminating | BrokerState::Terminated) {
            return;
        }
        self.state = BrokerState::Terminating;
        info!(broker = %self.name, open = self.table.len(), "broker terminating");
        for handle in self.table.handles() {
            match self.table.close(handle) {
                Ok(CloseOutcome::Closed { notify: true }) => {
                    self.pending.push_back(IoEvent::ConnectionClosed { handle });
                }
                Ok(_) => {}
                Err(e) => debug!(broker = %self.name, %handle, error = %e, "close during termination"),
            }
        }
    }
}

/// The broker actor. Created together with its client; must be driven by
/// [`Broker::run`], usually inside `tokio::spawn`.
pub struct Broker<M: Send + 'static> {
    ctx: BrokerContext,
    commands: mpsc::Receiver<BrokerMsg<M>>,
    readiness: mpsc::UnboundedReceiver<MuxEvent>,
    shutdown_acks: Vec<Response<()>>,
}

impl<M: Send + 'static> Broker<M> {
    /// Creates a broker and its client.
    ///
    /// The command mailbox capacity comes from the runtime's
    /// [`BrokerConfig`](crate::runtime::BrokerConfig); the readiness channel
    /// is unbounded because the poll thread must never block on a full
    /// mailbox.
    pub fn new(runtime: &BrokerRuntime, name: impl Into<String>) -> (Self, BrokerClient<M>) {
        let name = name.into();
        let (command_tx, commands) = mpsc::channel(runtime.config().mailbox_capacity);
        let (mux_sink, readiness) = mpsc::unbounded_channel();
        let table = ResourceTable::new(runtime.clone(), mux_sink.clone(), name.clone());
        let ctx = BrokerContext {
            name,
            state: BrokerState::Initializing,
            table,
            runtime: runtime.clone(),
            mux_sink,
            forwards: HashMap::new(),
            pending: VecDeque::new(),
        };
        let broker = Self {
            ctx,
            commands,
            readiness,
            shutdown_acks: Vec::new(),
        };
        let client = BrokerClient::new(command_tx);
        (broker, client)
    }

    /// Creates a broker that starts out owning `record`. Used by the fork
    /// protocol; the record keeps its handle, descriptor and multiplexer
    /// registration. On failure the record is handed back.
    pub(crate) fn adopting(
        runtime: &BrokerRuntime,
        name: impl Into<String>,
        record: ResourceRecord,
    ) -> Result<(Self, BrokerClient<M>), (BrokerError, ResourceRecord)> {
        let (mut broker, client) = Self::new(runtime, name);
        match broker.ctx.table.adopt(record) {
            Ok(_) => Ok((broker, client)),
            Err((e, record)) => Err((e, record)),
        }
    }

    pub(crate) fn mux_sink(&self) -> MuxSink {
        self.ctx.mux_sink.clone()
    }

    /// Takes an adopted record back out, undoing `adopting` when a later
    /// fork step fails.
    pub(crate) fn reclaim(mut self, handle: ResourceHandle) -> Option<ResourceRecord> {
        self.ctx.table.take(handle).ok()
    }

    /// Runs the broker until it terminates.
    ///
    /// `setup` is called once, with the context, and returns the behavior;
    /// it is the place to open initial listeners or connections. After that
    /// the loop dispatches readiness and commands until a shutdown request
    /// drains the table, or every client is dropped (which force-closes
    /// whatever is left).
    pub async fn run<B, F>(mut self, setup: F)
    where
        B: BrokerBehavior<Message = M>,
        F: FnOnce(&mut BrokerContext) -> B,
    {
        self.ctx.state = BrokerState::Running;
        info!(broker = %self.ctx.name, "broker started");
        let mut behavior = setup(&mut self.ctx);
        self.drain_pending(&mut behavior).await;

        loop {
            if self.ctx.state == BrokerState::Terminating && self.ctx.table.is_empty() {
                break;
            }
            tokio::select! {
                biased;
                event = self.readiness.recv() => match event {
                    Some(event) => self.handle_readiness(event, &mut behavior).await,
                    None => break,
                },
                command = self.commands.recv(), if self.ctx.state == BrokerState::Running => match command {
                    Some(command) => self.handle_command(command, &mut behavior).await,
                    None => {
                        // Every client is gone; nobody is left to observe a
                        // graceful drain. Abortive shutdown.
                        debug!(broker = %self.ctx.name, "all clients dropped, closing down");
                        for handle in self.ctx.table.handles() {
                            self.ctx.table.force_close(handle);
                        }
                        self.ctx.state = BrokerState::Terminating;
                    }
                },
            }
        }

        behavior.on_stop(&mut self.ctx).await;
        for handle in self.ctx.table.handles() {
            self.ctx.table.force_close(handle);
        }
        self.ctx.state = BrokerState::Terminated;
        for ack in self.shutdown_acks.drain(..) {
            let _ = ack.send(Ok(()));
        }
        info!(broker = %self.ctx.name, "broker terminated");
    }

    async fn handle_readiness<B>(&mut self, event: MuxEvent, behavior: &mut B)
    where
        B: BrokerBehavior<Message = M>,
    {
        // Readiness that was queued before a fork rerouted the descriptor
        // still belongs to the new owner.
        if let Some(forward) = self.ctx.forwards.get(&event.descriptor) {
            if forward.send(event).is_err() {
                trace!(broker = %self.ctx.name, "forked owner is gone, dropping event");
            }
            return;
        }
        let events = translator::translate(&mut self.ctx.table, event);
        for event in events {
            self.dispatch(behavior, event).await;
        }
        self.drain_pending(behavior).await;
    }

    async fn handle_command<B>(&mut self, command: BrokerMsg<M>, behavior: &mut B)
    where
        B: BrokerBehavior<Message = M>,
    {
        match command {
            BrokerMsg::Message(message) => {
                if let Err(e) = behavior.on_message(&mut self.ctx, message).await {
                    warn!(broker = %self.ctx.name, error = %e, "behavior failed on message");
                }
                self.drain_pending(behavior).await;
            }
            BrokerMsg::QueueWrite {
                handle,
                bytes,
                respond_to,
            } => {
                let result = self.ctx.table.queue_write(handle, bytes);
                let _ = respond_to.send(result);
            }
            BrokerMsg::Close { handle, respond_to } => {
                let result = self.ctx.close(handle);
                let _ = respond_to.send(result);
                self.drain_pending(behavior).await;
            }
            BrokerMsg::Shutdown { respond_to } => {
                self.ctx.begin_termination();
                self.shutdown_acks.push(respond_to);
                self.drain_pending(behavior).await;
            }
        }
    }

    async fn dispatch<B>(&mut self, behavior: &mut B, event: IoEvent)
    where
        B: BrokerBehavior<Message = M>,
    {
        if let Err(e) = behavior.on_io(&mut self.ctx, event).await {
            warn!(broker = %self.ctx.name, error = %e, "behavior failed on event");
        }
    }

    async fn drain_pending<B>(&mut self, behavior: &mut B)
    where
        B: BrokerBehavior<Message = M>,
    {
        while let Some(event) = self.ctx.pending.pop_front() {
            self.dispatch(behavior, event).await;
        }
    }
}
