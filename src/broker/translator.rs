//! # Event Translation
//!
//! Turns raw readiness into the [`IoEvent`] vocabulary behaviors consume.
//! Translation runs inside the owning broker's task when a readiness event is
//! dequeued: the poll thread only ever enqueues, so every socket read, write
//! and accept below happens under the actor's one-message-at-a-time
//! guarantee.
//!
//! For a given handle the order of produced events follows the order of the
//! underlying readiness, because both travel through the broker's single
//! readiness channel.

use tracing::{debug, warn};

use crate::broker::event::IoEvent;
use crate::broker::table::ResourceTable;
use crate::model::{FlushStatus, RecordState, ResourceHandle, ResourceKind, Transport};
use crate::mux::{MuxEvent, Readiness};
use std::io;

/// Translates one readiness notification into zero or more behavior events,
/// applying the side effects (reads, flushes, closes) as it goes.
pub(crate) fn translate(table: &mut ResourceTable, event: MuxEvent) -> Vec<IoEvent> {
    let Some(handle) = table.resolve(event.descriptor) else {
        // Readiness can arrive for a handle that closed in the same batch.
        debug!(descriptor = %event.descriptor, "readiness for a handle no longer owned here");
        return Vec::new();
    };
    match event.readiness {
        Readiness::Readable => on_readable(table, handle),
        Readiness::Writable => on_writable(table, handle),
        Readiness::Error(reason) => {
            table.force_close(handle);
            vec![IoEvent::IoError { handle, reason }]
        }
        Readiness::Hangup => {
            let notify = table.force_close(handle).unwrap_or(false);
            if notify {
                vec![IoEvent::ConnectionClosed { handle }]
            } else {
                Vec::new()
            }
        }
    }
}

fn on_readable(table: &mut ResourceTable, handle: ResourceHandle) -> Vec<IoEvent> {
    match handle.kind() {
        ResourceKind::Connection | ResourceKind::DatagramRx => on_read(table, handle),
        ResourceKind::Acceptor => on_accept(table, handle),
        // No read side; stray wake-ups are ignored.
        ResourceKind::DatagramTx => Vec::new(),
    }
}

fn on_read(table: &mut ResourceTable, handle: ResourceHandle) -> Vec<IoEvent> {
    let max = table.read_chunk();
    let step = {
        let Some(record) = table.record_mut(handle) else {
            return Vec::new();
        };
        if record.state() != RecordState::Open {
            return Vec::new();
        }
        record.read_step(max)
    };
    match step {
        // End-of-stream. Datagrams have no EOF; an empty datagram is data.
        Ok(bytes) if bytes.is_empty() && handle.kind() == ResourceKind::Connection => {
            let notify = table
                .record_mut(handle)
                .map(|r| r.take_close_notification())
                .unwrap_or(false);
            // Graceful close: anything still queued flushes before removal.
            if let Err(e) = table.close(handle) {
                debug!(%handle, error = %e, "close after end-of-stream");
            }
            if notify {
                vec![IoEvent::ConnectionClosed { handle }]
            } else {
                Vec::new()
            }
        }
        Ok(bytes) => vec![IoEvent::DataReceived { handle, bytes }],
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Vec::new(),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Vec::new(),
        Err(e) => {
            table.force_close(handle);
            vec![IoEvent::IoError {
                handle,
                reason: e.to_string(),
            }]
        }
    }
}

fn on_accept(table: &mut ResourceTable, acceptor: ResourceHandle) -> Vec<IoEvent> {
    let mut events = Vec::new();
    loop {
        let step = {
            let Some(record) = table.record_mut(acceptor) else {
                break;
            };
            record.accept_step()
        };
        match step {
            Ok(stream) => match table.register(Transport::Stream(stream)) {
                Ok(connection) => events.push(IoEvent::AcceptedConnection {
                    acceptor,
                    connection,
                }),
                Err(e) => {
                    // The acceptor stays open; only this connection is shed.
                    warn!(%acceptor, error = %e, "dropping accepted connection");
                    break;
                }
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                table.force_close(acceptor);
                events.push(IoEvent::IoError {
                    handle: acceptor,
                    reason: e.to_string(),
                });
                break;
            }
        }
    }
    events
}

fn on_writable(table: &mut ResourceTable, handle: ResourceHandle) -> Vec<IoEvent> {
    let (status, state) = {
        let Some(record) = table.record_mut(handle) else {
            return Vec::new();
        };
        (record.flush_step(), record.state())
    };
    match status {
        FlushStatus::Drained => {
            if state == RecordState::Closing {
                let notify = table.finish_close(handle);
                if notify {
                    vec![IoEvent::ConnectionClosed { handle }]
                } else {
                    Vec::new()
                }
            } else {
                if let Err(e) = table.apply_interest(handle) {
                    warn!(%handle, error = %e, "failed to drop write interest");
                }
                Vec::new()
            }
        }
        // Remainder stays queued and write interest stays registered.
        FlushStatus::Partial => Vec::new(),
        FlushStatus::Failed(reason) => {
            table.force_close(handle);
            vec![IoEvent::IoError { handle, reason }]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::mock::{MockMux, ScriptedListener, ScriptedStream};
    use crate::mux::{Descriptor, Interest};
    use crate::runtime::{BrokerConfig, BrokerRuntime};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_table() -> (ResourceTable, MockMux) {
        let mux = MockMux::new();
        let runtime = BrokerRuntime::new(Arc::new(mux.clone()), BrokerConfig::default());
        let (sink, _rx) = mpsc::unbounded_channel();
        (
            ResourceTable::new(runtime, sink, "test".to_string()),
            mux,
        )
    }

    fn readable(descriptor: Descriptor) -> MuxEvent {
        MuxEvent {
            descriptor,
            readiness: Readiness::Readable,
        }
    }

    fn writable(descriptor: Descriptor) -> MuxEvent {
        MuxEvent {
            descriptor,
            readiness: Readiness::Writable,
        }
    }

    #[test]
    fn readable_delivers_data_in_order() {
        let (mut table, _mux) = test_table();
        let stream = ScriptedStream::new();
        stream.push_read(Ok(b"hello".to_vec()));
        stream.push_read(Ok(b"world".to_vec()));
        let handle = table
            .register(Transport::Stream(Box::new(stream)))
            .unwrap();
        let d = table.lookup(handle).unwrap().descriptor();

        let first = translate(&mut table, readable(d));
        let second = translate(&mut table, readable(d));
        assert_eq!(
            first,
            vec![IoEvent::DataReceived {
                handle,
                bytes: b"hello".to_vec()
            }]
        );
        assert_eq!(
            second,
            vec![IoEvent::DataReceived {
                handle,
                bytes: b"world".to_vec()
            }]
        );
    }

    #[test]
    fn readable_end_of_stream_closes() {
        let (mut table, mux) = test_table();
        let stream = ScriptedStream::new();
        stream.push_read(Ok(Vec::new()));
        let handle = table
            .register(Transport::Stream(Box::new(stream)))
            .unwrap();
        let d = table.lookup(handle).unwrap().descriptor();

        let events = translate(&mut table, readable(d));
        assert_eq!(events, vec![IoEvent::ConnectionClosed { handle }]);
        assert!(table.lookup(handle).is_none());
        assert!(!mux.is_registered(d));
    }

    #[test]
    fn partial_flush_keeps_remainder_and_interest() {
        let (mut table, mux) = test_table();
        let stream = ScriptedStream::new();
        stream.push_write_result(Ok(2));
        stream.push_write_result(Ok(1));
        let probe = stream.clone();
        let handle = table
            .register(Transport::Stream(Box::new(stream)))
            .unwrap();
        let d = table.lookup(handle).unwrap().descriptor();

        table.queue_write(handle, b"ab".to_vec()).unwrap();
        table.queue_write(handle, b"cde".to_vec()).unwrap();
        table.queue_write(handle, b"f".to_vec()).unwrap();

        let events = translate(&mut table, writable(d));
        assert!(events.is_empty());
        assert_eq!(probe.written(), b"abc");

        let remaining: Vec<&[u8]> = table
            .lookup(handle)
            .unwrap()
            .write_queue()
            .chunks()
            .collect();
        assert_eq!(remaining, vec![&b"de"[..], &b"f"[..]]);
        assert_eq!(mux.interest_of(d), Some(Interest::read_write()));

        // Script exhausted: the next writable drains everything.
        let events = translate(&mut table, writable(d));
        assert!(events.is_empty());
        assert_eq!(probe.written(), b"abcdef");
        assert_eq!(mux.interest_of(d), Some(Interest::read()));
    }

    #[test]
    fn writable_completes_deferred_close() {
        let (mut table, mux) = test_table();
        let stream = ScriptedStream::new();
        stream.push_write_result(Err(io::ErrorKind::WouldBlock.into()));
        let probe = stream.clone();
        let handle = table
            .register(Transport::Stream(Box::new(stream)))
            .unwrap();
        let d = table.lookup(handle).unwrap().descriptor();

        table.queue_write(handle, b"bye".to_vec()).unwrap();
        table.close(handle).unwrap();

        // First writable: transport refuses, record keeps draining.
        assert!(translate(&mut table, writable(d)).is_empty());
        assert!(table.lookup(handle).is_some());

        // Second writable: queue drains, close completes.
        let events = translate(&mut table, writable(d));
        assert_eq!(events, vec![IoEvent::ConnectionClosed { handle }]);
        assert_eq!(probe.written(), b"bye");
        assert!(table.lookup(handle).is_none());
        assert!(!mux.is_registered(d));
    }

    #[test]
    fn acceptor_produces_registered_connections() {
        let (mut table, _mux) = test_table();
        let listener = ScriptedListener::new();
        listener.push_incoming(ScriptedStream::new());
        let acceptor = table
            .register(Transport::Listener(Box::new(listener)))
            .unwrap();
        let d = table.lookup(acceptor).unwrap().descriptor();

        let events = translate(&mut table, readable(d));
        let connection = match events.as_slice() {
            [IoEvent::AcceptedConnection {
                acceptor: a,
                connection,
            }] => {
                assert_eq!(*a, acceptor);
                *connection
            }
            other => panic!("unexpected events: {other:?}"),
        };

        assert_eq!(connection.kind(), ResourceKind::Connection);
        let record = table.lookup(connection).unwrap();
        assert!(record.is_open());
        assert!(record.write_queue().is_empty());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn read_error_forces_close() {
        let (mut table, mux) = test_table();
        let stream = ScriptedStream::new();
        stream.push_read(Err(io::ErrorKind::ConnectionReset.into()));
        let handle = table
            .register(Transport::Stream(Box::new(stream)))
            .unwrap();
        let d = table.lookup(handle).unwrap().descriptor();

        table.queue_write(handle, b"never sent".to_vec()).unwrap();
        let events = translate(&mut table, readable(d));
        assert!(matches!(
            events.as_slice(),
            [IoEvent::IoError { handle: h, .. }] if *h == handle
        ));
        // Forced close discards the queue and the registration.
        assert!(table.lookup(handle).is_none());
        assert!(!mux.is_registered(d));
    }

    #[test]
    fn hangup_closes_without_error() {
        let (mut table, _mux) = test_table();
        let stream = ScriptedStream::new();
        let handle = table
            .register(Transport::Stream(Box::new(stream)))
            .unwrap();
        let d = table.lookup(handle).unwrap().descriptor();

        let events = translate(
            &mut table,
            MuxEvent {
                descriptor: d,
                readiness: Readiness::Hangup,
            },
        );
        assert_eq!(events, vec![IoEvent::ConnectionClosed { handle }]);
        assert!(table.lookup(handle).is_none());
    }

    #[test]
    fn stale_descriptor_is_ignored() {
        let (mut table, _mux) = test_table();
        let events = translate(&mut table, readable(Descriptor(999)));
        assert!(events.is_empty());
    }
}
