//! # Mock Multiplexer
//!
//! Utilities for testing brokers in isolation: a deterministic [`MockMux`]
//! that records registrations and lets tests inject readiness by hand, plus
//! scripted transport doubles ([`ScriptedStream`], [`ScriptedListener`],
//! [`ScriptedDatagram`]) whose reads and writes follow a queue of outcomes
//! prepared by the test.
//!
//! All state sits behind shared `Arc<Mutex<_>>` handles, so a test can keep a
//! clone for assertions after the transport has moved into a broker's record.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use crate::model::{DatagramSocket, ListenerSocket, StreamSocket, Transport};
use crate::mux::{Descriptor, Interest, MuxEvent, Multiplexer, MuxSink, Readiness};

#[derive(Default)]
struct MockState {
    entries: HashMap<Descriptor, MockEntry>,
    fail_next_reroute: bool,
}

struct MockEntry {
    interest: Interest,
    sink: MuxSink,
}

/// A multiplexer double with registration bookkeeping and manual event
/// injection.
#[derive(Clone, Default)]
pub struct MockMux {
    state: Arc<Mutex<MockState>>,
}

impl MockMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, descriptor: Descriptor) -> bool {
        self.state.lock().unwrap().entries.contains_key(&descriptor)
    }

    pub fn interest_of(&self, descriptor: Descriptor) -> Option<Interest> {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(&descriptor)
            .map(|e| e.interest)
    }

    pub fn registered_count(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    /// Makes the next `reroute` call fail, for exercising fork rollback.
    pub fn fail_next_reroute(&self) {
        self.state.lock().unwrap().fail_next_reroute = true;
    }

    /// Delivers a readiness event through whatever sink the descriptor is
    /// currently routed to. Returns `false` if the descriptor is unknown or
    /// the receiving broker is gone.
    pub fn fire(&self, descriptor: Descriptor, readiness: Readiness) -> bool {
        let sink = {
            let state = self.state.lock().unwrap();
            match state.entries.get(&descriptor) {
                Some(entry) => entry.sink.clone(),
                None => return false,
            }
        };
        sink.send(MuxEvent {
            descriptor,
            readiness,
        })
        .is_ok()
    }
}

impl Multiplexer for MockMux {
    fn register(
        &self,
        _transport: &mut Transport,
        descriptor: Descriptor,
        interest: Interest,
        sink: MuxSink,
    ) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.entries.contains_key(&descriptor) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{descriptor} already registered"),
            ));
        }
        state
            .entries
            .insert(descriptor, MockEntry { interest, sink });
        Ok(())
    }

    fn modify_interest(
        &self,
        _transport: &mut Transport,
        descriptor: Descriptor,
        interest: Interest,
    ) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.entries.get_mut(&descriptor) {
            Some(entry) => {
                entry.interest = interest;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{descriptor} is not registered"),
            )),
        }
    }

    fn reroute(&self, descriptor: Descriptor, sink: MuxSink) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_reroute {
            state.fail_next_reroute = false;
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "injected reroute failure",
            ));
        }
        match state.entries.get_mut(&descriptor) {
            Some(entry) => {
                entry.sink = sink;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{descriptor} is not registered"),
            )),
        }
    }

    fn deregister(&self, _transport: &mut Transport, descriptor: Descriptor) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.entries.remove(&descriptor) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{descriptor} is not registered"),
            )),
        }
    }
}

// =============================================================================
// Scripted transports
// =============================================================================

#[derive(Default)]
struct ScriptedStreamState {
    reads: VecDeque<io::Result<Vec<u8>>>,
    write_results: VecDeque<io::Result<usize>>,
    written: Vec<u8>,
}

/// A stream double whose reads pop from a prepared script and whose writes
/// append to a shared buffer.
///
/// Reads return `WouldBlock` once the script is exhausted; an empty scripted
/// chunk reads as end-of-stream. Writes follow `push_write_result` scripts
/// (`Ok(n)` accepts the first `n` bytes) and accept everything once the
/// script runs dry.
#[derive(Clone, Default)]
pub struct ScriptedStream {
    state: Arc<Mutex<ScriptedStreamState>>,
}

impl ScriptedStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_read(&self, result: io::Result<Vec<u8>>) {
        self.state.lock().unwrap().reads.push_back(result);
    }

    pub fn push_write_result(&self, result: io::Result<usize>) {
        self.state.lock().unwrap().write_results.push_back(result);
    }

    /// Snapshot of every byte the broker has flushed so far, in order.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }
}

impl StreamSocket for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        match state.reads.pop_front() {
            Some(Ok(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        match state.write_results.pop_front() {
            Some(Ok(n)) => {
                let n = n.min(buf.len());
                state.written.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => {
                state.written.extend_from_slice(buf);
                Ok(buf.len())
            }
        }
    }
}

/// A listener double that hands out pre-queued streams.
#[derive(Clone, Default)]
pub struct ScriptedListener {
    pending: Arc<Mutex<VecDeque<Box<dyn StreamSocket>>>>,
}

impl ScriptedListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_incoming(&self, stream: impl StreamSocket + 'static) {
        self.pending.lock().unwrap().push_back(Box::new(stream));
    }
}

impl ListenerSocket for ScriptedListener {
    fn accept(&mut self) -> io::Result<Box<dyn StreamSocket>> {
        match self.pending.lock().unwrap().pop_front() {
            Some(stream) => Ok(stream),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

#[derive(Default)]
struct ScriptedDatagramState {
    reads: VecDeque<io::Result<Vec<u8>>>,
    send_results: VecDeque<io::Result<usize>>,
    sent: Vec<Vec<u8>>,
}

/// A datagram double; each send records one whole datagram.
#[derive(Clone, Default)]
pub struct ScriptedDatagram {
    state: Arc<Mutex<ScriptedDatagramState>>,
}

impl ScriptedDatagram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_read(&self, result: io::Result<Vec<u8>>) {
        self.state.lock().unwrap().reads.push_back(result);
    }

    pub fn push_send_result(&self, result: io::Result<usize>) {
        self.state.lock().unwrap().send_results.push_back(result);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().sent.clone()
    }
}

impl DatagramSocket for ScriptedDatagram {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        match state.reads.pop_front() {
            Some(Ok(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        match state.send_results.pop_front() {
            Some(Ok(n)) => {
                let n = n.min(buf.len());
                state.sent.push(buf[..n].to_vec());
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => {
                state.sent.push(buf.to_vec());
                Ok(buf.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn dummy_transport() -> Transport {
        Transport::Stream(Box::new(ScriptedStream::new()))
    }

    #[test]
    fn fire_routes_to_current_sink() {
        let mux = MockMux::new();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        let d = Descriptor(7);

        let mut t = dummy_transport();
        mux.register(&mut t, d, Interest::read(), old_tx).unwrap();
        assert!(mux.fire(d, Readiness::Readable));
        assert!(old_rx.try_recv().is_ok());

        mux.reroute(d, new_tx).unwrap();
        assert!(mux.fire(d, Readiness::Readable));
        assert!(old_rx.try_recv().is_err(), "old sink must see nothing");
        assert!(new_rx.try_recv().is_ok());
    }

    #[test]
    fn scripted_stream_reads_then_blocks() {
        let stream = ScriptedStream::new();
        stream.push_read(Ok(b"hi".to_vec()));
        let mut boxed: Box<dyn StreamSocket> = Box::new(stream);

        let mut buf = [0u8; 16];
        assert_eq!(boxed.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");
        let err = boxed.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn scripted_stream_partial_writes() {
        let stream = ScriptedStream::new();
        stream.push_write_result(Ok(2));
        let probe = stream.clone();
        let mut boxed: Box<dyn StreamSocket> = Box::new(stream);

        assert_eq!(boxed.write(b"abcd").unwrap(), 2);
        // Script exhausted: the rest is accepted wholesale.
        assert_eq!(boxed.write(b"cd").unwrap(), 2);
        assert_eq!(probe.written(), b"abcd");
    }
}
