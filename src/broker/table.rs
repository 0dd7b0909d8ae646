//! # Resource Table
//!
//! The broker's ownership ledger: every record it holds is registered with
//! the multiplexer for exactly the interest its state implies, and removing a
//! record deregisters it in the same step. The table is only ever touched
//! from its owning broker's task, so it needs no locking; the actor model's
//! one-message-at-a-time guarantee is the whole concurrency story.
//!
//! Write interest is demand-driven: it is registered on the empty-to-
//! non-empty transition of a record's write queue and dropped again once the
//! queue drains, which keeps an idle connection from waking the poll loop on
//! every cycle. Read interest stays on for the whole `Open` life of
//! connections, acceptors and datagram receivers. Datagram senders have no
//! read side at all, so their registration only exists while sends are
//! queued.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::broker::error::BrokerError;
use crate::model::{RecordState, ResourceHandle, ResourceKind, ResourceRecord, Transport};
use crate::mux::{Descriptor, Interest, MuxSink};
use crate::runtime::BrokerRuntime;

/// What a `close` call achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The record is gone. `notify` is `true` when the caller still owes the
    /// behavior a closed notification for this handle.
    Closed { notify: bool },
    /// Writes are still queued; the record moved to `Closing` and will be
    /// removed once the queue drains.
    Draining,
}

/// Handle-to-record map with the descriptor side index used for event
/// dispatch.
pub struct ResourceTable {
    records: HashMap<ResourceHandle, ResourceRecord>,
    by_descriptor: HashMap<Descriptor, ResourceHandle>,
    /// Handles given away via `take` and never re-registered here.
    detached: HashSet<ResourceHandle>,
    runtime: BrokerRuntime,
    sink: MuxSink,
    owner: String,
}

impl ResourceTable {
    pub(crate) fn new(runtime: BrokerRuntime, sink: MuxSink, owner: String) -> Self {
        Self {
            records: HashMap::new(),
            by_descriptor: HashMap::new(),
            detached: HashSet::new(),
            runtime,
            sink,
            owner,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn lookup(&self, handle: ResourceHandle) -> Option<&ResourceRecord> {
        self.records.get(&handle)
    }

    /// Maps a multiplexer descriptor back to the handle it belongs to.
    pub fn resolve(&self, descriptor: Descriptor) -> Option<ResourceHandle> {
        self.by_descriptor.get(&descriptor).copied()
    }

    pub fn handles(&self) -> Vec<ResourceHandle> {
        self.records.keys().copied().collect()
    }

    pub(crate) fn record_mut(&mut self, handle: ResourceHandle) -> Option<&mut ResourceRecord> {
        self.records.get_mut(&handle)
    }

    pub(crate) fn read_chunk(&self) -> usize {
        self.runtime.config().read_chunk
    }

    /// Allocates a fresh handle for `transport`, inserts the record and
    /// registers it with the multiplexer for read interest.
    pub fn register(&mut self, transport: Transport) -> Result<ResourceHandle, BrokerError> {
        let limit = self.runtime.config().max_handles;
        if self.records.len() >= limit {
            warn!(owner = %self.owner, limit, "open-handle limit reached");
            return Err(BrokerError::ResourceLimitExceeded { limit });
        }

        let kind = transport.kind();
        let handle = self.runtime.allocator().next_handle(kind);
        let descriptor = self.runtime.allocator().next_descriptor();
        let mut record = ResourceRecord::new(
            handle,
            descriptor,
            transport,
            self.runtime.config().write_high_water,
            self.owner.clone(),
        );

        // Datagram senders have nothing to observe until a send is queued;
        // their registration is created on demand by `queue_write`.
        if kind != ResourceKind::DatagramTx {
            self.runtime.mux().register(
                record.transport_mut(),
                descriptor,
                Interest::read(),
                self.sink.clone(),
            )?;
            record.set_mux_registered(true);
        }

        self.by_descriptor.insert(descriptor, handle);
        self.records.insert(handle, record);
        debug!(owner = %self.owner, %handle, %descriptor, "resource registered");
        Ok(handle)
    }

    /// Inserts a record that is already registered with the multiplexer,
    /// keeping its handle and descriptor. Used on the receiving side of a
    /// fork. On failure the record is handed back untouched.
    pub(crate) fn adopt(
        &mut self,
        mut record: ResourceRecord,
    ) -> Result<ResourceHandle, (BrokerError, ResourceRecord)> {
        let limit = self.runtime.config().max_handles;
        if self.records.len() >= limit {
            return Err((BrokerError::ResourceLimitExceeded { limit }, record));
        }
        let handle = record.handle();
        record.set_owner(self.owner.clone());
        self.by_descriptor.insert(record.descriptor(), handle);
        self.records.insert(handle, record);
        debug!(owner = %self.owner, %handle, "resource adopted");
        Ok(handle)
    }

    /// Appends bytes to a record's pending writes, turning write interest on
    /// when the queue was empty.
    pub fn queue_write(
        &mut self,
        handle: ResourceHandle,
        bytes: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let record = match self.records.get_mut(&handle) {
            Some(r) => r,
            None => return Err(self.missing(handle)),
        };
        match record.kind() {
            ResourceKind::Acceptor | ResourceKind::DatagramRx => {
                return Err(BrokerError::InvalidHandle(handle))
            }
            ResourceKind::Connection | ResourceKind::DatagramTx => {}
        }
        if !record.is_open() {
            return Err(BrokerError::Stale(handle));
        }
        if bytes.is_empty() {
            return Ok(());
        }
        if record.write_queue().would_exceed(bytes.len()) {
            return Err(BrokerError::Backpressure {
                handle,
                queued: record.write_queue().queued_bytes(),
                high_water: record.write_queue().high_water().unwrap_or(0),
            });
        }

        let was_empty = record.write_queue().is_empty();
        record.write_queue_mut().push(bytes);
        if was_empty {
            self.apply_interest(handle)?;
        }
        Ok(())
    }

    /// Closes a handle through the graceful protocol: immediate removal when
    /// nothing is queued, otherwise `Closing` until the queue drains. Calling
    /// it again while draining, or after removal, is a no-op signal.
    pub fn close(&mut self, handle: ResourceHandle) -> Result<CloseOutcome, BrokerError> {
        let record = match self.records.get_mut(&handle) {
            Some(r) => r,
            None if self.detached.contains(&handle) => {
                return Err(BrokerError::AlreadyDetached(handle))
            }
            None => return Err(BrokerError::Stale(handle)),
        };
        match record.state() {
            RecordState::Closing => Ok(CloseOutcome::Draining),
            RecordState::Closed => Ok(CloseOutcome::Closed { notify: false }),
            RecordState::Open => {
                if record.write_queue().is_empty() {
                    let notify = record.take_close_notification();
                    self.remove_entry(handle);
                    Ok(CloseOutcome::Closed { notify })
                } else {
                    record.set_state(RecordState::Closing);
                    self.apply_interest(handle)?;
                    Ok(CloseOutcome::Draining)
                }
            }
        }
    }

    /// Abrupt close: discards queued writes and removes the record now.
    /// Returns whether the caller still owes a closed notification, or `None`
    /// if the handle is not present.
    pub fn force_close(&mut self, handle: ResourceHandle) -> Option<bool> {
        let record = self.records.get_mut(&handle)?;
        let dropped = record.write_queue_mut().discard();
        if dropped > 0 {
            debug!(owner = %self.owner, %handle, dropped, "discarding queued writes");
        }
        let notify = record.take_close_notification();
        self.remove_entry(handle);
        Some(notify)
    }

    /// Completes a deferred close once the write queue has drained.
    pub(crate) fn finish_close(&mut self, handle: ResourceHandle) -> bool {
        let Some(record) = self.records.get_mut(&handle) else {
            return false;
        };
        let notify = record.take_close_notification();
        self.remove_entry(handle);
        notify
    }

    /// Removes and returns the record without closing the socket or touching
    /// its multiplexer registration. The descriptor keeps delivering events;
    /// rerouting them is the caller's job.
    pub fn take(&mut self, handle: ResourceHandle) -> Result<ResourceRecord, BrokerError> {
        match self.records.remove(&handle) {
            Some(record) => {
                self.by_descriptor.remove(&record.descriptor());
                self.detached.insert(handle);
                debug!(owner = %self.owner, %handle, "resource detached");
                Ok(record)
            }
            None => Err(self.missing(handle)),
        }
    }

    /// Undoes a `take`, putting the record back under this table's
    /// ownership.
    pub(crate) fn restore(&mut self, record: ResourceRecord) {
        let handle = record.handle();
        self.detached.remove(&handle);
        self.by_descriptor.insert(record.descriptor(), handle);
        self.records.insert(handle, record);
        debug!(owner = %self.owner, %handle, "resource restored");
    }

    /// Brings a record's multiplexer registration in line with the interest
    /// its state implies.
    pub(crate) fn apply_interest(&mut self, handle: ResourceHandle) -> Result<(), BrokerError> {
        let mux = self.runtime.mux();
        let sink = self.sink.clone();
        let Some(record) = self.records.get_mut(&handle) else {
            return Ok(());
        };
        let desired = desired_interest(record);
        let descriptor = record.descriptor();
        match (record.mux_registered(), desired) {
            (true, Some(interest)) => {
                mux.modify_interest(record.transport_mut(), descriptor, interest)?;
            }
            (true, None) => {
                mux.deregister(record.transport_mut(), descriptor)?;
                record.set_mux_registered(false);
            }
            (false, Some(interest)) => {
                mux.register(record.transport_mut(), descriptor, interest, sink)?;
                record.set_mux_registered(true);
            }
            (false, None) => {}
        }
        Ok(())
    }

    fn remove_entry(&mut self, handle: ResourceHandle) {
        let Some(mut record) = self.records.remove(&handle) else {
            return;
        };
        let descriptor = record.descriptor();
        self.by_descriptor.remove(&descriptor);
        if record.mux_registered() {
            // Best effort: a failed deregistration must not stall teardown.
            if let Err(e) = self
                .runtime
                .mux()
                .deregister(record.transport_mut(), descriptor)
            {
                warn!(owner = %self.owner, %handle, error = %e, "deregistration failed");
            }
        }
        record.set_state(RecordState::Closed);
        debug!(owner = %self.owner, %handle, remaining = self.records.len(), "resource closed");
    }

    fn missing(&self, handle: ResourceHandle) -> BrokerError {
        if self.detached.contains(&handle) {
            BrokerError::AlreadyDetached(handle)
        } else {
            BrokerError::NotFound(handle)
        }
    }
}

/// The interest set implied by a record's state, or `None` when no
/// registration should exist.
fn desired_interest(record: &ResourceRecord) -> Option<Interest> {
    match record.kind() {
        ResourceKind::DatagramTx => {
            if record.write_queue().is_empty() {
                None
            } else {
                Some(Interest::write())
            }
        }
        _ => match record.state() {
            RecordState::Open => {
                if record.write_queue().is_empty() {
                    Some(Interest::read())
                } else {
                    Some(Interest::read_write())
                }
            }
            RecordState::Closing => Some(Interest::write()),
            RecordState::Closed => None,
        },
    }
}
