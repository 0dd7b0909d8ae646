//! # Resource Records
//!
//! The mutable state behind a handle: the transport, the lifecycle state and
//! the pending-write queue. A record is owned by exactly one resource table at
//! a time; it moves between tables by value, so exclusive ownership is the
//! type system's problem, not a locking discipline.

use std::collections::VecDeque;
use std::io;

use crate::model::{ResourceHandle, ResourceKind, StreamSocket, Transport};
use crate::mux::Descriptor;

/// Lifecycle of a record.
///
/// Connections and datagram senders pass through `Closing` while their queue
/// drains; acceptors and datagram receivers have nothing to flush and close
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Open,
    Closing,
    Closed,
}

/// Pending outbound chunks with byte accounting.
///
/// The queue preserves chunk order; a partial flush drains a prefix of the
/// front chunk in place. An optional high-water mark bounds the total queued
/// bytes, which is how backpressure is signalled to producers.
#[derive(Debug)]
pub struct WriteQueue {
    chunks: VecDeque<Vec<u8>>,
    queued: usize,
    high_water: Option<usize>,
}

impl WriteQueue {
    pub fn new(high_water: Option<usize>) -> Self {
        Self {
            chunks: VecDeque::new(),
            queued: 0,
            high_water,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued
    }

    pub fn high_water(&self) -> Option<usize> {
        self.high_water
    }

    /// Whether accepting `additional` bytes would cross the high-water mark.
    pub fn would_exceed(&self, additional: usize) -> bool {
        match self.high_water {
            Some(mark) => self.queued + additional > mark,
            None => false,
        }
    }

    pub fn push(&mut self, chunk: Vec<u8>) {
        self.queued += chunk.len();
        self.chunks.push_back(chunk);
    }

    pub fn front(&self) -> Option<&[u8]> {
        self.chunks.front().map(|c| c.as_slice())
    }

    /// Drops `n` bytes from the front of the queue, ending mid-chunk if
    /// needed.
    pub fn consume(&mut self, mut n: usize) {
        self.queued = self.queued.saturating_sub(n);
        while n > 0 {
            let Some(front) = self.chunks.front_mut() else {
                return;
            };
            if n >= front.len() {
                n -= front.len();
                self.chunks.pop_front();
            } else {
                front.drain(..n);
                n = 0;
            }
        }
    }

    /// Discards everything, returning the number of bytes dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.queued;
        self.chunks.clear();
        self.queued = 0;
        dropped
    }

    pub(crate) fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().map(|c| c.as_slice())
    }
}

/// Outcome of one flush attempt against the transport.
#[derive(Debug)]
pub(crate) enum FlushStatus {
    /// The queue is empty.
    Drained,
    /// The transport stopped accepting bytes; the remainder stays queued and
    /// write interest must stay on.
    Partial,
    /// The transport failed; the record must be force-closed.
    Failed(String),
}

/// Per-handle state owned by a resource table.
pub struct ResourceRecord {
    handle: ResourceHandle,
    descriptor: Descriptor,
    transport: Transport,
    state: RecordState,
    write_queue: WriteQueue,
    owner: String,
    closed_notified: bool,
    mux_registered: bool,
}

impl ResourceRecord {
    pub(crate) fn new(
        handle: ResourceHandle,
        descriptor: Descriptor,
        transport: Transport,
        high_water: Option<usize>,
        owner: String,
    ) -> Self {
        Self {
            handle,
            descriptor,
            transport,
            state: RecordState::Open,
            write_queue: WriteQueue::new(high_water),
            owner,
            closed_notified: false,
            mux_registered: false,
        }
    }

    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    pub fn kind(&self) -> ResourceKind {
        self.handle.kind()
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == RecordState::Open
    }

    pub fn write_queue(&self) -> &WriteQueue {
        &self.write_queue
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn set_state(&mut self, state: RecordState) {
        self.state = state;
    }

    pub(crate) fn set_owner(&mut self, owner: String) {
        self.owner = owner;
    }

    pub(crate) fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub(crate) fn write_queue_mut(&mut self) -> &mut WriteQueue {
        &mut self.write_queue
    }

    pub(crate) fn mux_registered(&self) -> bool {
        self.mux_registered
    }

    pub(crate) fn set_mux_registered(&mut self, registered: bool) {
        self.mux_registered = registered;
    }

    /// Marks the closed notification as delivered. Returns `true` the first
    /// time, so callers emit the event exactly once per handle.
    pub(crate) fn take_close_notification(&mut self) -> bool {
        let first = !self.closed_notified;
        self.closed_notified = true;
        first
    }

    /// One bounded read from the transport into a fresh buffer.
    pub(crate) fn read_step(&mut self, max: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let n = match &mut self.transport {
            Transport::Stream(s) => s.read(&mut buf)?,
            Transport::DatagramRx(d) => d.recv(&mut buf)?,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "resource kind is not readable",
                ))
            }
        };
        buf.truncate(n);
        Ok(buf)
    }

    /// Accepts one pending connection from a listener transport.
    pub(crate) fn accept_step(&mut self) -> io::Result<Box<dyn StreamSocket>> {
        match &mut self.transport {
            Transport::Listener(l) => l.accept(),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "resource kind does not accept connections",
            )),
        }
    }

    /// Flushes queued chunks until the queue drains or the transport stops
    /// accepting bytes.
    pub(crate) fn flush_step(&mut self) -> FlushStatus {
        loop {
            let Some(chunk_len) = self.write_queue.front().map(|c| c.len()) else {
                return FlushStatus::Drained;
            };
            let is_datagram = matches!(self.transport, Transport::DatagramTx(_));
            let result = {
                let chunk = match self.write_queue.front() {
                    Some(c) => c,
                    None => return FlushStatus::Drained,
                };
                match &mut self.transport {
                    Transport::Stream(s) => s.write(chunk),
                    Transport::DatagramTx(d) => d.send(chunk),
                    _ => {
                        return FlushStatus::Failed(
                            "resource kind does not accept writes".to_string(),
                        )
                    }
                }
            };
            match result {
                Ok(0) => return FlushStatus::Partial,
                Ok(n) if is_datagram && n < chunk_len => {
                    return FlushStatus::Failed(format!(
                        "short datagram send: {n} of {chunk_len} bytes"
                    ));
                }
                Ok(n) => {
                    self.write_queue.consume(n);
                    if n < chunk_len {
                        return FlushStatus::Partial;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return FlushStatus::Partial,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return FlushStatus::Failed(e.to_string()),
            }
        }
    }
}

impl std::fmt::Debug for ResourceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRecord")
            .field("handle", &self.handle.to_string())
            .field("descriptor", &self.descriptor)
            .field("state", &self.state)
            .field("queued_bytes", &self.write_queue.queued_bytes())
            .field("owner", &self.owner)
            .finish()
    }
}
