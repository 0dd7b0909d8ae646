//! Fork protocol tests: ownership hand-off, event rerouting to the new
//! broker, rollback on failure and precondition checks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use io_broker::mux::mock::{MockMux, ScriptedListener, ScriptedStream};
use io_broker::{
    BrokerBehavior, BrokerClient, BrokerConfig, BrokerContext, BrokerError, BrokerSystem,
    Descriptor, IoEvent, Readiness, ResourceHandle, Transport,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};

/// Command vocabulary for the parent broker under test.
enum Cmd {
    Fork {
        handle: ResourceHandle,
        child_events: mpsc::UnboundedSender<IoEvent>,
        respond_to: oneshot::Sender<Result<BrokerClient<()>, BrokerError>>,
    },
}

/// Parent behavior: forwards events and forks on demand.
struct Parent {
    events: mpsc::UnboundedSender<IoEvent>,
}

#[async_trait]
impl BrokerBehavior for Parent {
    type Message = Cmd;
    type Error = std::convert::Infallible;

    async fn on_io(
        &mut self,
        _ctx: &mut BrokerContext,
        event: IoEvent,
    ) -> Result<(), Self::Error> {
        let _ = self.events.send(event);
        Ok(())
    }

    async fn on_message(
        &mut self,
        ctx: &mut BrokerContext,
        message: Cmd,
    ) -> Result<(), Self::Error> {
        match message {
            Cmd::Fork {
                handle,
                child_events,
                respond_to,
            } => {
                let result = ctx.fork(
                    Child {
                        events: child_events,
                    },
                    handle,
                );
                let _ = respond_to.send(result);
            }
        }
        Ok(())
    }
}

/// The forked broker's behavior: a plain event probe.
struct Child {
    events: mpsc::UnboundedSender<IoEvent>,
}

#[async_trait]
impl BrokerBehavior for Child {
    type Message = ();
    type Error = std::convert::Infallible;

    async fn on_io(
        &mut self,
        _ctx: &mut BrokerContext,
        event: IoEvent,
    ) -> Result<(), Self::Error> {
        let _ = self.events.send(event);
        Ok(())
    }

    async fn on_message(
        &mut self,
        _ctx: &mut BrokerContext,
        _message: (),
    ) -> Result<(), Self::Error> {
        Ok(())
    }
}

struct TestParent {
    _system: BrokerSystem,
    client: BrokerClient<Cmd>,
    events: mpsc::UnboundedReceiver<IoEvent>,
    handle: ResourceHandle,
    descriptor: Descriptor,
}

async fn start_parent(mux: &MockMux, transport: Transport) -> TestParent {
    let mut system = BrokerSystem::new(Arc::new(mux.clone()), BrokerConfig::default());
    let (events_tx, events) = mpsc::unbounded_channel();
    let (meta_tx, mut meta_rx) = mpsc::unbounded_channel();
    let client = system.spawn::<Parent, _>("parent", move |ctx| {
        let handle = ctx.spawn_resource(transport).expect("resource registers");
        let descriptor = ctx.lookup(handle).expect("record exists").descriptor();
        meta_tx.send((handle, descriptor)).expect("test is alive");
        Parent { events: events_tx }
    });
    let (handle, descriptor) = timeout(Duration::from_secs(2), meta_rx.recv())
        .await
        .expect("setup did not run")
        .expect("setup dropped the channel");
    TestParent {
        _system: system,
        client,
        events,
        handle,
        descriptor,
    }
}

async fn fork_via(
    client: &BrokerClient<Cmd>,
    handle: ResourceHandle,
) -> (
    Result<BrokerClient<()>, BrokerError>,
    mpsc::UnboundedReceiver<IoEvent>,
) {
    let (child_tx, child_rx) = mpsc::unbounded_channel();
    let (respond_to, response) = oneshot::channel();
    client
        .send(Cmd::Fork {
            handle,
            child_events: child_tx,
            respond_to,
        })
        .await
        .expect("parent accepts the command");
    let result = timeout(Duration::from_secs(2), response)
        .await
        .expect("fork did not answer")
        .expect("parent dropped the response");
    (result, child_rx)
}

async fn recv_event(events: &mut mpsc::UnboundedReceiver<IoEvent>) -> IoEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no event within timeout")
        .expect("behavior gone")
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout");
}

#[tokio::test]
async fn fork_hands_the_connection_to_a_new_broker() {
    let mux = MockMux::new();
    let stream = ScriptedStream::new();
    stream.push_read(Ok(b"before".to_vec()));
    let probe = stream.clone();
    let mut t = start_parent(&mux, Transport::Stream(Box::new(stream))).await;

    // Traffic before the fork reaches the parent.
    mux.fire(t.descriptor, Readiness::Readable);
    assert_eq!(
        recv_event(&mut t.events).await,
        IoEvent::DataReceived {
            handle: t.handle,
            bytes: b"before".to_vec()
        }
    );

    let (result, mut child_events) = fork_via(&t.client, t.handle).await;
    let child_client = result.expect("fork succeeds");

    // The parent's table no longer contains the handle.
    let err = t.client.queue_write(t.handle, b"x".to_vec()).await.unwrap_err();
    assert!(matches!(err, BrokerError::AlreadyDetached(h) if h == t.handle));

    // Synthetic readiness injected right after the fork lands in the new
    // broker's translator, not the old one.
    probe.push_read(Ok(b"after".to_vec()));
    mux.fire(t.descriptor, Readiness::Readable);
    assert_eq!(
        recv_event(&mut child_events).await,
        IoEvent::DataReceived {
            handle: t.handle,
            bytes: b"after".to_vec()
        }
    );
    assert!(t.events.try_recv().is_err(), "parent must see nothing");

    // The child owns reads and writes from here on.
    child_client
        .queue_write(t.handle, b"reply".to_vec())
        .await
        .expect("child serves writes");
    mux.fire(t.descriptor, Readiness::Writable);
    eventually(|| probe.written() == b"reply").await;
}

#[tokio::test]
async fn fork_rolls_back_when_rerouting_fails() {
    let mux = MockMux::new();
    let stream = ScriptedStream::new();
    let probe = stream.clone();
    let mut t = start_parent(&mux, Transport::Stream(Box::new(stream))).await;

    mux.fail_next_reroute();
    let (result, _child_events) = fork_via(&t.client, t.handle).await;
    assert!(matches!(result, Err(BrokerError::SpawnFailed(_))));

    // Ownership rolled back: the parent still serves the handle.
    t.client
        .queue_write(t.handle, b"still mine".to_vec())
        .await
        .expect("handle restored to the parent");
    probe.push_read(Ok(b"data".to_vec()));
    mux.fire(t.descriptor, Readiness::Readable);
    assert_eq!(
        recv_event(&mut t.events).await,
        IoEvent::DataReceived {
            handle: t.handle,
            bytes: b"data".to_vec()
        }
    );
}

#[tokio::test]
async fn fork_rejects_closed_handles() {
    let mux = MockMux::new();
    let mut t = start_parent(&mux, Transport::Stream(Box::new(ScriptedStream::new()))).await;

    t.client.close(t.handle).await.unwrap();
    assert_eq!(
        recv_event(&mut t.events).await,
        IoEvent::ConnectionClosed { handle: t.handle }
    );

    let (result, _child_events) = fork_via(&t.client, t.handle).await;
    assert!(matches!(result, Err(BrokerError::InvalidHandle(h)) if h == t.handle));
}

#[tokio::test]
async fn fork_rejects_non_connection_handles() {
    let mux = MockMux::new();
    let t = start_parent(&mux, Transport::Listener(Box::new(ScriptedListener::new()))).await;

    let (result, _child_events) = fork_via(&t.client, t.handle).await;
    assert!(matches!(result, Err(BrokerError::InvalidHandle(h)) if h == t.handle));
}

#[tokio::test]
async fn forking_twice_reports_already_detached() {
    let mux = MockMux::new();
    let t = start_parent(&mux, Transport::Stream(Box::new(ScriptedStream::new()))).await;

    let (first, _child_events) = fork_via(&t.client, t.handle).await;
    let _child_client = first.expect("first fork succeeds");

    let (second, _more_events) = fork_via(&t.client, t.handle).await;
    assert!(matches!(second, Err(BrokerError::AlreadyDetached(h)) if h == t.handle));
}
