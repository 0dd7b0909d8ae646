//! # Runtime and System Orchestration
//!
//! [`BrokerRuntime`] is the injected handle every broker receives at
//! construction: the multiplexer, the shared id allocator and the
//! configuration. There is no ambient global; a broker that wants to spawn a
//! sibling or fork a connection goes through the runtime it was given.
//!
//! [`BrokerSystem`] is the orchestrator that wires a runtime, spawns brokers
//! into their own tokio tasks and waits for them on shutdown.

use std::sync::Arc;

use tracing::{error, info};

use crate::broker::{Broker, BrokerBehavior, BrokerClient, BrokerContext};
use crate::model::HandleAllocator;
use crate::mux::Multiplexer;

/// Tunables shared by every broker of a runtime.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Maximum records a single broker's table may hold.
    pub max_handles: usize,
    /// Byte cap for a record's pending-write queue. `None` leaves the queue
    /// unbounded; with a mark set, crossing it fails the write with a
    /// backpressure error.
    pub write_high_water: Option<usize>,
    /// Upper bound for one read from a transport.
    pub read_chunk: usize,
    /// Capacity of a broker's command mailbox.
    pub mailbox_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_handles: 1024,
            write_high_water: None,
            read_chunk: 4096,
            mailbox_capacity: 32,
        }
    }
}

struct RuntimeInner {
    mux: Arc<dyn Multiplexer>,
    allocator: HandleAllocator,
    config: BrokerConfig,
}

/// Shared runtime handle: multiplexer, id allocator and configuration.
/// Cheap to clone; all brokers of a system hold the same one.
#[derive(Clone)]
pub struct BrokerRuntime {
    inner: Arc<RuntimeInner>,
}

impl BrokerRuntime {
    pub fn new(mux: Arc<dyn Multiplexer>, config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                mux,
                allocator: HandleAllocator::new(),
                config,
            }),
        }
    }

    pub fn mux(&self) -> Arc<dyn Multiplexer> {
        self.inner.mux.clone()
    }

    pub fn allocator(&self) -> &HandleAllocator {
        &self.inner.allocator
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }
}

/// Owns the runtime and the tasks of the brokers spawned through it.
///
/// Forked brokers are not tracked here: they live and die with their clients,
/// under whichever broker forked them.
pub struct BrokerSystem {
    runtime: BrokerRuntime,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl BrokerSystem {
    pub fn new(mux: Arc<dyn Multiplexer>, config: BrokerConfig) -> Self {
        Self {
            runtime: BrokerRuntime::new(mux, config),
            handles: Vec::new(),
        }
    }

    pub fn runtime(&self) -> &BrokerRuntime {
        &self.runtime
    }

    /// Spawns a broker in its own task. `setup` runs once inside the broker,
    /// installs the behavior and may open the initial resources.
    pub fn spawn<B, F>(&mut self, name: impl Into<String>, setup: F) -> BrokerClient<B::Message>
    where
        B: BrokerBehavior,
        F: FnOnce(&mut BrokerContext) -> B + Send + 'static,
    {
        let (broker, client) = Broker::<B::Message>::new(&self.runtime, name);
        self.handles.push(tokio::spawn(broker.run(setup)));
        client
    }

    /// Waits for every spawned broker task to finish.
    ///
    /// Ask the brokers to stop first (via [`BrokerClient::shutdown`] or by
    /// dropping every client); this call only joins the tasks.
    pub async fn shutdown(self) -> Result<(), String> {
        info!("shutting down broker system");
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("broker task failed: {e:?}");
                return Err(format!("broker task failed: {e:?}"));
            }
        }
        info!("broker system shutdown complete");
        Ok(())
    }
}
