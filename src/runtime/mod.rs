//! Runtime wiring: configuration, the injected runtime handle, the system
//! orchestrator and observability setup.

pub mod system;
pub mod tracing;

pub use system::{BrokerConfig, BrokerRuntime, BrokerSystem};
pub use tracing::setup_tracing;
