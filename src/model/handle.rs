//! # Resource Handles
//!
//! This module defines the identifiers used to name network resources. A
//! [`ResourceHandle`] is a cheap, copyable back-reference: it distinguishes one
//! resource from another but carries no ownership. The record it names lives in
//! exactly one broker's resource table at any time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::mux::Descriptor;

/// The four kinds of network resource a broker can own.
///
/// The set is closed on purpose: every table operation matches on the kind
/// exhaustively, so adding a kind is a compile-time event, not a runtime
/// surprise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// An established, bidirectional stream connection.
    Connection,
    /// A listening socket that produces new connections.
    Acceptor,
    /// The receiving side of a datagram endpoint.
    DatagramRx,
    /// The sending side of a datagram endpoint.
    DatagramTx,
}

impl ResourceKind {
    fn index(self) -> usize {
        match self {
            ResourceKind::Connection => 0,
            ResourceKind::Acceptor => 1,
            ResourceKind::DatagramRx => 2,
            ResourceKind::DatagramTx => 3,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ResourceKind::Connection => "connection",
            ResourceKind::Acceptor => "acceptor",
            ResourceKind::DatagramRx => "datagram-rx",
            ResourceKind::DatagramTx => "datagram-tx",
        }
    }
}

/// Opaque identifier for a network resource.
///
/// Handles are unique within their kind for the lifetime of the process (the
/// id space is served by a [`HandleAllocator`] shared across all brokers of a
/// runtime), safe to copy, compare and hash, and implement `Display` so they
/// drop straight into tracing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    kind: ResourceKind,
    id: u64,
}

impl ResourceHandle {
    pub(crate) fn new(kind: ResourceKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind.label(), self.id)
    }
}

/// Process-wide id generator for handles and multiplexer descriptors.
///
/// One counter per resource kind plus one for descriptors. The allocator is
/// owned by the runtime and shared by every broker it spawns, so a handle
/// forked from one broker to another can never collide with a handle the new
/// owner allocates itself.
#[derive(Debug)]
pub struct HandleAllocator {
    counters: [AtomicU64; 4],
    descriptors: AtomicU64,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self {
            counters: [
                AtomicU64::new(1),
                AtomicU64::new(1),
                AtomicU64::new(1),
                AtomicU64::new(1),
            ],
            descriptors: AtomicU64::new(1),
        }
    }

    pub fn next_handle(&self, kind: ResourceKind) -> ResourceHandle {
        let id = self.counters[kind.index()].fetch_add(1, Ordering::Relaxed);
        ResourceHandle::new(kind, id)
    }

    pub fn next_descriptor(&self) -> Descriptor {
        Descriptor(self.descriptors.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique_within_kind() {
        let alloc = HandleAllocator::new();
        let a = alloc.next_handle(ResourceKind::Connection);
        let b = alloc.next_handle(ResourceKind::Connection);
        assert_ne!(a, b);
        assert_eq!(a.kind(), b.kind());
    }

    #[test]
    fn kinds_have_independent_id_spaces() {
        let alloc = HandleAllocator::new();
        let conn = alloc.next_handle(ResourceKind::Connection);
        let acc = alloc.next_handle(ResourceKind::Acceptor);
        // Same numeric id, different kind: still distinct handles.
        assert_eq!(conn.id(), acc.id());
        assert_ne!(conn, acc);
    }

    #[test]
    fn display_names_the_kind() {
        let alloc = HandleAllocator::new();
        let h = alloc.next_handle(ResourceKind::DatagramRx);
        assert_eq!(h.to_string(), "datagram-rx#1");
    }
}
