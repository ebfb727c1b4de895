//! Integration tests for wamp-callee.
//!
//! The first group drives a `Callee` directly through a recording proxy.
//! The second runs a full session against a scripted router over an
//! in-memory duplex stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use wamp_callee::callee::testing::{RecordingProxy, Sent};
use wamp_callee::callee::InvocationTracker;
use wamp_callee::codec::Serializer;
use wamp_callee::error::{CANCELED, PROTOCOL_VIOLATION};
use wamp_callee::handler::{CancellableInvocation, ParamType};
use wamp_callee::protocol::{
    build_frame, codes, Dict, Frame, FrameBuffer, FrameType, InterruptDetails, InvocationDetails,
    RegisterOptions, WampMessage, HANDSHAKE_MAGIC, HANDSHAKE_SIZE,
};
use wamp_callee::{
    AsyncOperation, Callee, CalleeError, ClientBuilder, CloseInfo, ConnectionLoss,
    ConnectionMonitor, InvocationCallback, RpcOperation, SyncOperation, CLOSE_NORMAL,
    GOODBYE_AND_OUT,
};

fn connected_callee() -> (Arc<Callee>, Arc<RecordingProxy>, Arc<ConnectionMonitor>) {
    let proxy = RecordingProxy::new();
    let monitor = ConnectionMonitor::new();
    monitor.set_connected();
    let callee = Callee::new(proxy.clone(), monitor.clone());
    (callee, proxy, monitor)
}

fn add_operation() -> SyncOperation {
    SyncOperation::new("com.example.add", |args| {
        let a: i64 = args.get(0)?;
        let b: i64 = args.get(1)?;
        Ok(json!(a + b))
    })
    .param("a", ParamType::Integer)
    .param("b", ParamType::Integer)
}

/// Counts cancel signals; never replies on its own.
#[derive(Default)]
struct CountingHandle {
    cancels: AtomicUsize,
}

impl CancellableInvocation for CountingHandle {
    fn cancel(&self, _details: &InterruptDetails) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ParkedState {
    handle: Arc<CountingHandle>,
    callbacks: parking_lot::Mutex<Vec<InvocationCallback>>,
}

/// Operation that parks every invocation and exposes its callback.
#[derive(Clone, Default)]
struct Parked(Arc<ParkedState>);

impl RpcOperation for Parked {
    fn procedure(&self) -> &str {
        "com.example.parked"
    }

    fn supports_cancellation(&self) -> bool {
        true
    }

    fn invoke(
        &self,
        callback: InvocationCallback,
        _details: InvocationDetails,
        _arguments: Option<Vec<Value>>,
        _arguments_kw: Option<Dict>,
    ) -> Option<Arc<dyn CancellableInvocation>> {
        self.0.callbacks.lock().push(callback);
        Some(self.0.handle.clone())
    }
}

// ============================================================================
// Callee core
// ============================================================================

#[tokio::test]
async fn test_add_invocation_yields_without_tracking() {
    let (callee, proxy, _monitor) = connected_callee();

    let pending = callee
        .register(add_operation(), RegisterOptions::default())
        .unwrap();
    assert_eq!(proxy.last_register_id(), Some(1));
    callee.on_registered(1, 100);
    let registration = pending.await.unwrap();
    assert_eq!(registration.id(), 100);

    callee.on_invocation(
        7,
        100,
        InvocationDetails::default(),
        Some(vec![json!(2), json!(3)]),
        None,
    );

    assert_eq!(
        proxy.sent().last(),
        Some(&Sent::Yield {
            request_id: 7,
            progress: false,
            arguments: Some(vec![json!(5)]),
            arguments_kw: None,
        })
    );
    assert_eq!(callee.tracked_invocation_count(), 0);
}

#[tokio::test]
async fn test_register_error_fails_with_protocol_error() {
    let (callee, _proxy, _monitor) = connected_callee();

    let pending = callee
        .register(add_operation(), RegisterOptions::default())
        .unwrap();
    callee.on_register_error(
        1,
        Dict::new(),
        "wamp.error.procedure_already_exists",
        None,
        None,
    );

    match pending.await {
        Err(CalleeError::Protocol(e)) => {
            assert_eq!(e.error, "wamp.error.procedure_already_exists")
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(callee.registration_count(), 0);
}

#[tokio::test]
async fn test_registry_tracks_acknowledged_registrations() {
    let (callee, proxy, _monitor) = connected_callee();

    let mut registrations = Vec::new();
    for registration_id in [100, 101, 102] {
        let pending = callee
            .register(add_operation(), RegisterOptions::default())
            .unwrap();
        callee.on_registered(proxy.last_register_id().unwrap(), registration_id);
        registrations.push(pending.await.unwrap());
    }

    // A fourth request is never acknowledged.
    let _unacked = callee
        .register(add_operation(), RegisterOptions::default())
        .unwrap();
    assert_eq!(callee.registration_count(), 3);

    let second = registrations.remove(1);
    let pending = second.unregister().unwrap();
    callee.on_unregistered(proxy.last_unregister_id().unwrap());
    pending.await.unwrap();

    assert_eq!(callee.registration_count(), 2);
    assert!(callee.has_registration(100));
    assert!(!callee.has_registration(101));
    assert!(callee.has_registration(102));
    assert_eq!(callee.pending_register_count(), 1);
}

#[tokio::test]
async fn test_ack_then_sweep_resolves_once() {
    let (callee, proxy, monitor) = connected_callee();

    let pending = callee
        .register(add_operation(), RegisterOptions::default())
        .unwrap();
    let request_id = proxy.last_register_id().unwrap();
    callee.on_registered(request_id, 100);
    monitor.connection_broken(CloseInfo::new("wamp.close.system_shutdown"));
    // Late duplicate after the sweep.
    callee.on_registered(request_id, 100);

    assert_eq!(pending.await.unwrap().id(), 100);
    assert_eq!(callee.registration_count(), 0);
}

#[tokio::test]
async fn test_late_result_after_unregister_is_harmless() {
    let (callee, proxy, _monitor) = connected_callee();
    let parked = Parked::default();

    let pending = callee
        .register(parked.clone(), RegisterOptions::default())
        .unwrap();
    callee.on_registered(proxy.last_register_id().unwrap(), 100);
    let registration = pending.await.unwrap();

    callee.on_invocation(7, 100, InvocationDetails::default(), None, None);
    callee.on_invocation(8, 100, InvocationDetails::default(), None, None);
    assert_eq!(callee.tracked_invocation_count(), 2);

    let unregistered = registration.unregister().unwrap();
    callee.on_unregistered(proxy.last_unregister_id().unwrap());
    unregistered.await.unwrap();
    assert_eq!(callee.tracked_invocation_count(), 0);

    // Replies still go out; nothing is re-tracked.
    let callbacks = parked.0.callbacks.lock().clone();
    callbacks[0]
        .result(Default::default(), Some(vec![json!("late")]), None)
        .unwrap();
    callbacks[1]
        .error(&wamp_callee::WampError::new("com.example.error.late"))
        .unwrap();

    assert_eq!(callee.tracked_invocation_count(), 0);
    assert!(!callee.is_tracking(7));
    assert_eq!(proxy.yields(), vec![Some(vec![json!("late")])]);
    assert_eq!(proxy.error_uris(), vec!["com.example.error.late".to_owned()]);
}

#[test]
fn test_cancel_unknown_invocation_is_absent() {
    let tracker = InvocationTracker::new();
    assert!(tracker.cancel(99).is_none());
    assert!(tracker.is_empty());

    let (callee, proxy, _monitor) = connected_callee();
    callee.on_interrupt(99, InterruptDetails::default());
    assert!(proxy.sent().is_empty());
}

#[test]
fn test_concurrent_track_then_remove_all() {
    const N: u64 = 64;
    let tracker = Arc::new(InvocationTracker::new());

    let threads: Vec<_> = (0..N)
        .map(|id| {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                tracker.track(id, 100, Arc::new(CountingHandle::default()));
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(tracker.len(), N as usize);

    let removed = tracker.remove_all_for_registration(100);
    assert_eq!(removed.len(), N as usize);
    assert!(tracker.is_empty());
    assert!(tracker.invocations_for(100).is_empty());
}

#[tokio::test]
async fn test_interrupt_signals_once_then_completion_is_noop() {
    let (callee, proxy, _monitor) = connected_callee();
    let parked = Parked::default();

    let pending = callee
        .register(parked.clone(), RegisterOptions::default())
        .unwrap();
    callee.on_registered(proxy.last_register_id().unwrap(), 100);
    pending.await.unwrap();

    callee.on_invocation(7, 100, InvocationDetails::default(), None, None);
    assert!(callee.is_tracking(7));

    callee.on_interrupt(7, InterruptDetails::default());
    callee.on_interrupt(7, InterruptDetails::default());
    assert_eq!(parked.0.handle.cancels.load(Ordering::SeqCst), 1);
    assert!(!callee.is_tracking(7));

    let callback = parked.0.callbacks.lock()[0].clone();
    callback
        .error(&wamp_callee::WampError::new(CANCELED))
        .unwrap();
    assert_eq!(callee.tracked_invocation_count(), 0);
    assert_eq!(parked.0.handle.cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_interrupt_cancels_async_operation() {
    let (callee, proxy, _monitor) = connected_callee();
    let slow = AsyncOperation::new("com.example.slow", |_, token| async move {
        token.cancelled().await;
        Err(anyhow::anyhow!("stopped"))
    });

    let pending = callee.register(slow, RegisterOptions::default()).unwrap();
    callee.on_registered(proxy.last_register_id().unwrap(), 100);
    pending.await.unwrap();

    callee.on_invocation(7, 100, InvocationDetails::default(), None, None);
    assert!(callee.is_tracking(7));

    callee.on_interrupt(7, InterruptDetails::default());
    proxy.wait_for_sent(2).await;

    assert_eq!(proxy.error_uris(), vec![CANCELED.to_owned()]);
    assert_eq!(callee.tracked_invocation_count(), 0);
}

#[tokio::test]
async fn test_async_result_untracks_invocation() {
    let (callee, proxy, _monitor) = connected_callee();
    let double = AsyncOperation::new("com.example.double", |args, _| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(json!(args.get::<i64>(0)? * 2))
    });

    let pending = callee.register(double, RegisterOptions::default()).unwrap();
    callee.on_registered(proxy.last_register_id().unwrap(), 100);
    pending.await.unwrap();

    callee.on_invocation(7, 100, InvocationDetails::default(), Some(vec![json!(4)]), None);
    proxy.wait_for_sent(2).await;

    assert_eq!(proxy.yields(), vec![Some(vec![json!(8)])]);
    assert!(!callee.is_tracking(7));
}

#[tokio::test]
async fn test_connection_broken_fails_everything() {
    let (callee, proxy, monitor) = connected_callee();
    let parked = Parked::default();

    let acked = callee
        .register(parked.clone(), RegisterOptions::default())
        .unwrap();
    callee.on_registered(proxy.last_register_id().unwrap(), 100);
    acked.await.unwrap();
    callee.on_invocation(7, 100, InvocationDetails::default(), None, None);

    let first = callee
        .register(add_operation(), RegisterOptions::default())
        .unwrap();
    let second = callee
        .register(add_operation(), RegisterOptions::default())
        .unwrap();

    let info = CloseInfo::new("wamp.close.system_shutdown");
    monitor.connection_broken(info.clone());

    for pending in [first, second] {
        match pending.await {
            Err(CalleeError::ConnectionLost(ConnectionLoss::Broken(got))) => {
                assert_eq!(got, info)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
    assert_eq!(callee.registration_count(), 0);
    assert_eq!(callee.tracked_invocation_count(), 0);
    assert_eq!(callee.pending_register_count(), 0);

    assert!(matches!(
        callee.register(add_operation(), RegisterOptions::default()),
        Err(CalleeError::SessionNotEstablished)
    ));
}

// ============================================================================
// Full session against a scripted router
// ============================================================================

struct Router {
    stream: DuplexStream,
    buffer: FrameBuffer,
    queued: VecDeque<Frame>,
    serializer: Serializer,
}

impl Router {
    async fn accept(mut stream: DuplexStream) -> Self {
        let mut hs = [0u8; HANDSHAKE_SIZE];
        stream.read_exact(&mut hs).await.unwrap();
        assert_eq!(hs[0], HANDSHAKE_MAGIC);

        let serializer = Serializer::from_id(hs[1] & 0x0F).unwrap();
        stream
            .write_all(&[HANDSHAKE_MAGIC, (15 << 4) | serializer.id(), 0, 0])
            .await
            .unwrap();

        Self {
            stream,
            buffer: FrameBuffer::new(),
            queued: VecDeque::new(),
            serializer,
        }
    }

    async fn next_frame(&mut self) -> Frame {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.queued.pop_front() {
                return frame;
            }
            let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut buf))
                .await
                .expect("router timed out waiting for a frame")
                .unwrap();
            assert!(n > 0, "client closed the stream");
            self.queued.extend(self.buffer.push(&buf[..n]).unwrap());
        }
    }

    async fn recv(&mut self) -> WampMessage {
        let frame = self.next_frame().await;
        assert_eq!(frame.frame_type(), FrameType::Regular);
        WampMessage::from_value(self.serializer.decode(frame.payload()).unwrap()).unwrap()
    }

    async fn send(&mut self, message: WampMessage) {
        let payload = self.serializer.encode(&message.to_value().unwrap()).unwrap();
        self.send_frame(FrameType::Regular, &payload).await;
    }

    async fn send_frame(&mut self, frame_type: FrameType, payload: &[u8]) {
        self.stream
            .write_all(&build_frame(frame_type, payload))
            .await
            .unwrap();
    }

    /// Everything the client still sends until it closes the stream or
    /// goes quiet.
    async fn drain(&mut self) -> Vec<WampMessage> {
        let mut messages = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            while let Some(frame) = self.queued.pop_front() {
                let value = self.serializer.decode(frame.payload()).unwrap();
                messages.push(WampMessage::from_value(value).unwrap());
            }
            let read =
                tokio::time::timeout(Duration::from_millis(200), self.stream.read(&mut buf)).await;
            match read {
                Ok(Ok(n)) if n > 0 => self.queued.extend(self.buffer.push(&buf[..n]).unwrap()),
                _ => return messages,
            }
        }
    }
}

async fn join(builder: ClientBuilder) -> (wamp_callee::Client, Router) {
    let (client_io, router_io) = tokio::io::duplex(64 * 1024);
    let joining = tokio::spawn(builder.start(client_io));
    let mut router = Router::accept(router_io).await;
    assert!(matches!(router.recv().await, WampMessage::Hello { .. }));
    router
        .send(WampMessage::Welcome {
            session: 1,
            details: Dict::new(),
        })
        .await;
    (joining.await.unwrap().unwrap(), router)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

async fn run_session(serializer: Serializer) {
    let (client_io, router_io) = tokio::io::duplex(64 * 1024);
    let joining = tokio::spawn(
        ClientBuilder::new("realm1")
            .serializer(serializer)
            .start(client_io),
    );
    let mut router = Router::accept(router_io).await;

    match router.recv().await {
        WampMessage::Hello { realm, details } => {
            assert_eq!(realm, "realm1");
            assert_eq!(
                details["roles"]["callee"]["features"]["call_canceling"],
                json!(true)
            );
        }
        other => panic!("expected HELLO, got {:?}", other),
    }
    router
        .send(WampMessage::Welcome {
            session: 4242,
            details: Dict::new(),
        })
        .await;

    let client = joining.await.unwrap().unwrap();
    assert_eq!(client.session_id(), 4242);
    assert!(client.is_connected());

    // REGISTER / REGISTERED
    let pending = client
        .register(add_operation(), RegisterOptions::default())
        .unwrap();
    let request = match router.recv().await {
        WampMessage::Register {
            request, procedure, ..
        } => {
            assert_eq!(procedure, "com.example.add");
            request
        }
        other => panic!("expected REGISTER, got {:?}", other),
    };
    router
        .send(WampMessage::Registered {
            request,
            registration: 100,
        })
        .await;
    let registration = pending.await.unwrap();

    // INVOCATION / YIELD
    router
        .send(WampMessage::Invocation {
            request: 7,
            registration: 100,
            details: InvocationDetails::default(),
            arguments: Some(vec![json!(2), json!(3)]),
            arguments_kw: None,
        })
        .await;
    match router.recv().await {
        WampMessage::Yield {
            request, arguments, ..
        } => {
            assert_eq!(request, 7);
            assert_eq!(arguments, Some(vec![json!(5)]));
        }
        other => panic!("expected YIELD, got {:?}", other),
    }

    // Bad arguments come back as an ERROR.
    router
        .send(WampMessage::Invocation {
            request: 8,
            registration: 100,
            details: InvocationDetails::default(),
            arguments: Some(vec![json!("two")]),
            arguments_kw: None,
        })
        .await;
    match router.recv().await {
        WampMessage::Error {
            request_type,
            request,
            error,
            ..
        } => {
            assert_eq!(request_type, codes::INVOCATION);
            assert_eq!(request, 8);
            assert_eq!(error, "wamp.error.invalid_argument");
        }
        other => panic!("expected ERROR, got {:?}", other),
    }

    // INTERRUPT an async invocation.
    let slow = AsyncOperation::new("com.example.slow", |_, token| async move {
        token.cancelled().await;
        Err(anyhow::anyhow!("stopped"))
    });
    let pending = client.register(slow, RegisterOptions::default()).unwrap();
    let request = match router.recv().await {
        WampMessage::Register { request, .. } => request,
        other => panic!("expected REGISTER, got {:?}", other),
    };
    router
        .send(WampMessage::Registered {
            request,
            registration: 101,
        })
        .await;
    pending.await.unwrap();

    router
        .send(WampMessage::Invocation {
            request: 9,
            registration: 101,
            details: InvocationDetails::default(),
            arguments: None,
            arguments_kw: None,
        })
        .await;
    let callee = client.callee().clone();
    wait_until(|| callee.is_tracking(9)).await;

    router
        .send(WampMessage::Interrupt {
            request: 9,
            options: InterruptDetails {
                mode: Some("kill".into()),
                ..InterruptDetails::default()
            },
        })
        .await;
    match router.recv().await {
        WampMessage::Error { request, error, .. } => {
            assert_eq!(request, 9);
            assert_eq!(error, CANCELED);
        }
        other => panic!("expected ERROR, got {:?}", other),
    }

    // PING / PONG
    router.send_frame(FrameType::Ping, b"keepalive").await;
    let pong = router.next_frame().await;
    assert_eq!(pong.frame_type(), FrameType::Pong);
    assert_eq!(pong.payload(), b"keepalive");

    // UNREGISTER / UNREGISTERED
    let pending = registration.unregister().unwrap();
    let request = match router.recv().await {
        WampMessage::Unregister {
            request,
            registration,
        } => {
            assert_eq!(registration, 100);
            request
        }
        other => panic!("expected UNREGISTER, got {:?}", other),
    };
    router.send(WampMessage::Unregistered { request }).await;
    pending.await.unwrap();
    assert!(!callee.has_registration(100));
    assert!(callee.has_registration(101));

    // Router GOODBYE ends the session.
    router
        .send(WampMessage::Goodbye {
            details: Dict::new(),
            reason: "wamp.close.system_shutdown".into(),
        })
        .await;
    match router.recv().await {
        WampMessage::Goodbye { reason, .. } => assert_eq!(reason, GOODBYE_AND_OUT),
        other => panic!("expected GOODBYE, got {:?}", other),
    }

    tokio::time::timeout(Duration::from_secs(5), client.wait_for_shutdown())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(callee.registration_count(), 0);
}

#[tokio::test]
async fn test_session_over_json() {
    run_session(Serializer::Json).await;
}

#[tokio::test]
async fn test_session_over_msgpack() {
    run_session(Serializer::MsgPack).await;
}

#[tokio::test]
async fn test_abort_during_join() {
    let (client_io, router_io) = tokio::io::duplex(4096);
    let joining = tokio::spawn(ClientBuilder::new("forbidden").start(client_io));
    let mut router = Router::accept(router_io).await;

    assert!(matches!(router.recv().await, WampMessage::Hello { .. }));
    router
        .send(WampMessage::Abort {
            details: Dict::new(),
            reason: "wamp.error.no_such_realm".into(),
        })
        .await;

    match joining.await.unwrap() {
        Err(CalleeError::Handshake(message)) => assert!(message.contains("no_such_realm")),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("join should fail"),
    }
}

#[tokio::test]
async fn test_transport_eof_breaks_session() {
    let (client_io, router_io) = tokio::io::duplex(4096);
    let joining = tokio::spawn(ClientBuilder::new("realm1").start(client_io));
    let mut router = Router::accept(router_io).await;

    router.recv().await;
    router
        .send(WampMessage::Welcome {
            session: 1,
            details: Dict::new(),
        })
        .await;
    let client = joining.await.unwrap().unwrap();

    let pending = client
        .register(add_operation(), RegisterOptions::default())
        .unwrap();
    router.recv().await;
    drop(router);

    match pending.await {
        Err(CalleeError::ConnectionLost(ConnectionLoss::Broken(info))) => {
            assert_eq!(info.reason, "wamp.close.transport_closed")
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_client_close_handshake() {
    let (client, mut router) = join(ClientBuilder::new("realm1")).await;

    client.close(CLOSE_NORMAL).await.unwrap();
    match router.recv().await {
        WampMessage::Goodbye { reason, .. } => assert_eq!(reason, CLOSE_NORMAL),
        other => panic!("expected GOODBYE, got {:?}", other),
    }
    router
        .send(WampMessage::Goodbye {
            details: Dict::new(),
            reason: GOODBYE_AND_OUT.into(),
        })
        .await;

    tokio::time::timeout(Duration::from_secs(5), client.wait_for_shutdown())
        .await
        .unwrap()
        .unwrap();

    let goodbyes: Vec<_> = router
        .drain()
        .await
        .into_iter()
        .filter(|m| matches!(m, WampMessage::Goodbye { .. }))
        .collect();
    assert!(goodbyes.is_empty(), "answered our own GOODBYE: {:?}", goodbyes);
}

#[tokio::test]
async fn test_undecodable_message_aborts_session() {
    let (client, mut router) = join(ClientBuilder::new("realm1").serializer(Serializer::Json)).await;

    let pending = client
        .register(add_operation(), RegisterOptions::default())
        .unwrap();
    router.recv().await;

    router.send_frame(FrameType::Regular, b"not json").await;
    match router.recv().await {
        WampMessage::Abort { reason, .. } => assert_eq!(reason, PROTOCOL_VIOLATION),
        other => panic!("expected ABORT, got {:?}", other),
    }

    assert!(matches!(
        pending.await,
        Err(CalleeError::ConnectionLost(ConnectionLoss::Error(_)))
    ));
    assert!(!client.is_connected());
}
