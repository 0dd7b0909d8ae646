//! # Production Poller
//!
//! [`PollMux`] implements [`Multiplexer`] on top of mio. A dedicated thread
//! runs the poll loop and fans readiness out to broker sinks through a shared
//! token registry; registration and interest changes go straight to the mio
//! `Registry`, which is safe to use from any thread while the loop polls.
//!
//! This module also implements the transport traits for the mio socket types,
//! so `mio::net::{TcpStream, TcpListener, UdpSocket}` drop directly into a
//! broker's `spawn_resource`.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mio::{Events, Poll, Token, Waker};
use tracing::{debug, trace, warn};

use crate::model::{DatagramSocket, ListenerSocket, StreamSocket, Transport};
use crate::mux::{Descriptor, Interest, MuxEvent, Multiplexer, MuxSink, Readiness};

const EVENTS_CAPACITY: usize = 1024;
const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const WAKE_TOKEN: Token = Token(usize::MAX);

/// mio-backed multiplexer with a background poll thread.
pub struct PollMux {
    registry: mio::Registry,
    sinks: Arc<Mutex<HashMap<Token, MuxSink>>>,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl PollMux {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let sinks: Arc<Mutex<HashMap<Token, MuxSink>>> = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let loop_sinks = sinks.clone();
        let loop_shutdown = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name("io-broker-poll".to_string())
            .spawn(move || poll_loop(poll, loop_sinks, loop_shutdown))?;

        Ok(Self {
            registry,
            sinks,
            waker,
            shutdown,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Stops the poll thread and waits for it to exit.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake poll thread for shutdown");
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("poll thread panicked");
            }
        }
    }

    fn token(descriptor: Descriptor) -> Token {
        Token(descriptor.0 as usize)
    }

    fn mio_interest(interest: Interest) -> mio::Interest {
        match (interest.read, interest.write) {
            (true, true) => mio::Interest::READABLE.add(mio::Interest::WRITABLE),
            (false, true) => mio::Interest::WRITABLE,
            // A registration always carries at least read interest.
            _ => mio::Interest::READABLE,
        }
    }

    fn source_of(transport: &mut Transport) -> io::Result<&mut dyn mio::event::Source> {
        transport.source().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Unsupported,
                "transport has no OS-level descriptor",
            )
        })
    }
}

impl Drop for PollMux {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_loop(mut poll: Poll, sinks: Arc<Mutex<HashMap<Token, MuxSink>>>, shutdown: Arc<AtomicBool>) {
    let mut events = Events::with_capacity(EVENTS_CAPACITY);
    debug!("poll thread started");

    while !shutdown.load(Ordering::SeqCst) {
        if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            warn!(error = %e, "poll failed, stopping poll thread");
            break;
        }

        for event in events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN {
                continue;
            }
            let sink = match sinks.lock().unwrap().get(&token) {
                Some(sink) => sink.clone(),
                None => {
                    trace!(?token, "readiness for unregistered token");
                    continue;
                }
            };
            let descriptor = Descriptor(token.0 as u64);
            let deliver = |readiness: Readiness| {
                if sink
                    .send(MuxEvent {
                        descriptor,
                        readiness,
                    })
                    .is_err()
                {
                    trace!(%descriptor, "owning broker is gone, dropping event");
                }
            };
            if event.is_error() {
                deliver(Readiness::Error("socket error".to_string()));
            }
            if event.is_readable() {
                deliver(Readiness::Readable);
            }
            if event.is_writable() {
                deliver(Readiness::Writable);
            }
            // A close observed without readable data has no read path to
            // surface it, so signal the hangup explicitly.
            if !event.is_readable() && (event.is_read_closed() || event.is_write_closed()) {
                deliver(Readiness::Hangup);
            }
        }
    }

    debug!("poll thread stopped");
}

impl Multiplexer for PollMux {
    fn register(
        &self,
        transport: &mut Transport,
        descriptor: Descriptor,
        interest: Interest,
        sink: MuxSink,
    ) -> io::Result<()> {
        let token = Self::token(descriptor);
        let source = Self::source_of(transport)?;
        self.registry
            .register(source, token, Self::mio_interest(interest))?;
        self.sinks.lock().unwrap().insert(token, sink);
        Ok(())
    }

    fn modify_interest(
        &self,
        transport: &mut Transport,
        descriptor: Descriptor,
        interest: Interest,
    ) -> io::Result<()> {
        let token = Self::token(descriptor);
        let source = Self::source_of(transport)?;
        self.registry
            .reregister(source, token, Self::mio_interest(interest))
    }

    fn reroute(&self, descriptor: Descriptor, sink: MuxSink) -> io::Result<()> {
        let token = Self::token(descriptor);
        let mut sinks = self.sinks.lock().unwrap();
        match sinks.get_mut(&token) {
            Some(entry) => {
                *entry = sink;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{descriptor} is not registered"),
            )),
        }
    }

    fn deregister(&self, transport: &mut Transport, descriptor: Descriptor) -> io::Result<()> {
        let token = Self::token(descriptor);
        let source = Self::source_of(transport)?;
        self.registry.deregister(source)?;
        self.sinks.lock().unwrap().remove(&token);
        Ok(())
    }
}

// =============================================================================
// Transport impls for the mio socket types
// =============================================================================

impl StreamSocket for mio::net::TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(self, buf)
    }

    fn source(&mut self) -> Option<&mut dyn mio::event::Source> {
        Some(self)
    }
}

impl ListenerSocket for mio::net::TcpListener {
    fn accept(&mut self) -> io::Result<Box<dyn StreamSocket>> {
        let (stream, _addr) = mio::net::TcpListener::accept(self)?;
        Ok(Box::new(stream))
    }

    fn source(&mut self) -> Option<&mut dyn mio::event::Source> {
        Some(self)
    }
}

impl DatagramSocket for mio::net::UdpSocket {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        mio::net::UdpSocket::recv(self, buf)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        mio::net::UdpSocket::send(self, buf)
    }

    fn source(&mut self) -> Option<&mut dyn mio::event::Source> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn delivers_readable_for_incoming_connection() {
        let mux = PollMux::new().unwrap();
        let listener = mio::net::TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let mut transport = Transport::Listener(Box::new(listener));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let descriptor = Descriptor(1);
        mux.register(&mut transport, descriptor, Interest::read(), tx)
            .unwrap();

        let _client = std::net::TcpStream::connect(addr).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no readiness within timeout")
            .expect("sink closed");
        assert_eq!(event.descriptor, descriptor);
        assert_eq!(event.readiness, Readiness::Readable);

        mux.deregister(&mut transport, descriptor).unwrap();
        mux.shutdown();
    }

    #[test]
    fn register_rejects_transports_without_descriptor() {
        let mux = PollMux::new().unwrap();
        let mut transport =
            Transport::Stream(Box::new(crate::mux::mock::ScriptedStream::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = mux
            .register(&mut transport, Descriptor(9), Interest::read(), tx)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        mux.shutdown();
    }
}
