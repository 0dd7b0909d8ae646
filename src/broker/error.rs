//! # Broker Errors
//!
//! The error taxonomy shared by the resource table, the broker loop and the
//! clients. Table-level failures are always returned to the caller; losing
//! one resource must never take the broker down, so nothing in here is ever
//! allowed to escalate into a panic.

use crate::model::ResourceHandle;

/// Errors surfaced by broker and resource-table operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The handle was never owned by this broker, or has been closed and
    /// removed.
    #[error("handle not found: {0}")]
    NotFound(ResourceHandle),

    /// The handle exists but its state cannot accept the operation. A no-op
    /// signal, not a fault.
    #[error("handle {0} cannot accept this operation in its current state")]
    Stale(ResourceHandle),

    /// The handle was handed off to another actor by a previous `take`.
    #[error("handle {0} was already detached from this broker")]
    AlreadyDetached(ResourceHandle),

    /// The handle does not satisfy an operation's precondition (wrong kind,
    /// not open, not owned here).
    #[error("handle {0} is not a transferable open resource of this broker")]
    InvalidHandle(ResourceHandle),

    /// The configured open-handle cap was reached.
    #[error("open-handle limit of {limit} reached")]
    ResourceLimitExceeded { limit: usize },

    /// The write queue crossed its high-water mark; the producer should pause
    /// until the queue drains.
    #[error("write queue for {handle} is over its high-water mark ({queued} of {high_water} bytes)")]
    Backpressure {
        handle: ResourceHandle,
        queued: usize,
        high_water: usize,
    },

    /// A forked actor could not be brought up; ownership of the handle was
    /// rolled back to the calling broker.
    #[error("failed to spawn forked broker: {0}")]
    SpawnFailed(String),

    /// The multiplexer rejected a registration call.
    #[error("multiplexer error: {0}")]
    Mux(#[from] std::io::Error),

    /// The broker's mailbox is closed.
    #[error("broker closed")]
    BrokerClosed,

    /// The broker dropped the response channel before answering.
    #[error("broker dropped response channel")]
    BrokerDropped,
}
