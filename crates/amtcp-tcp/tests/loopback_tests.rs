//! End-to-end tests over loopback sockets
//!
//! Covers:
//! - Round trip between two workers (listen, connect, echo)
//! - Frames written one byte at a time
//! - Endpoint teardown when the peer goes away

use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use amtcp_tcp::{
    AmDispatcher, AmEndpoint, AmHandlerTable, AmId, HEADER_SIZE, SHORT_HEADER_SIZE, TcpIfaceConfig,
    Token, Worker,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

type Inbox = Arc<Mutex<Vec<(Token, u8, Vec<u8>)>>>;

const PING: u8 = 1;
const PONG: u8 = 2;
const TICK: Duration = Duration::from_millis(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn collector(inbox: Inbox) -> impl FnMut(Token, AmId, &[u8]) {
    move |token, id, payload| inbox.lock().push((token, id.get(), payload.to_vec()))
}

/// Runs `step` until it reports completion, failing after ten seconds.
fn spin(mut step: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !step() {
        assert!(Instant::now() < deadline, "timed out waiting for progress");
    }
}

fn frame(am_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![am_id, 0, 0, 0];
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    assert_eq!(out.len(), HEADER_SIZE + payload.len());
    out
}

#[test]
fn test_ping_pong_between_workers() {
    init_tracing();

    let server_inbox = Inbox::default();
    let mut server =
        Worker::new(TcpIfaceConfig::default(), collector(Arc::clone(&server_inbox))).unwrap();
    let addr = server.listen("127.0.0.1:0".parse().unwrap()).unwrap();

    let client_inbox = Inbox::default();
    let mut client =
        Worker::new(TcpIfaceConfig::default(), collector(Arc::clone(&client_inbox))).unwrap();
    let token = client.connect(addr).unwrap();
    client
        .endpoint_mut(token)
        .unwrap()
        .send_short(AmId::new(PING).unwrap(), 0x1234, b"PING")
        .unwrap();

    spin(|| {
        server.progress(Some(TICK)).unwrap();
        client.progress(Some(TICK)).unwrap();

        let requests: Vec<_> = server_inbox.lock().drain(..).collect();
        for (from, id, payload) in requests {
            assert_eq!(id, PING);
            let echoed = server
                .endpoint_mut(from)
                .unwrap()
                .send_bulk(AmId::new(PONG).unwrap(), &mut |dst| {
                    dst[..payload.len()].copy_from_slice(&payload);
                    payload.len()
                })
                .unwrap();
            assert_eq!(echoed, SHORT_HEADER_SIZE + 4);
        }
        !client_inbox.lock().is_empty()
    });

    let mut body = 0x1234u64.to_le_bytes().to_vec();
    body.extend_from_slice(b"PING");
    assert_eq!(client_inbox.lock().clone(), vec![(token, PONG, body)]);
    assert_eq!(server.endpoint_count(), 1);
    assert_eq!(server.iface().metrics().am_received, 1);
    assert_eq!(server.iface().metrics().am_bulk, 1);
    assert_eq!(client.iface().metrics().am_short, 1);
    assert!(client.iface().flush().is_ok());

    client.close(token).unwrap();
    assert_eq!(client.endpoint_count(), 0);

    spin(|| {
        server.progress(Some(TICK)).unwrap();
        server.endpoint_count() == 0
    });
    assert_eq!(server.iface().endpoint_count(), 0);
    assert_eq!(server.iface().metrics().disconnects, 1);
}

#[test]
fn test_byte_at_a_time_stream() {
    init_tracing();

    let received = Arc::new(Mutex::new(Vec::new()));
    let mut table = AmHandlerTable::new();
    for raw in [3u8, 4, 5] {
        let sink = Arc::clone(&received);
        table.set_handler(AmId::new(raw).unwrap(), move |payload: &[u8]| {
            sink.lock().push((raw, payload.to_vec()));
        });
    }
    let dispatcher = move |_token: Token, id: AmId, payload: &[u8]| table.invoke(id, payload);

    let mut server = Worker::new(TcpIfaceConfig::default(), dispatcher).unwrap();
    let addr = server.listen("127.0.0.1:0".parse().unwrap()).unwrap();

    let mut peer = TcpStream::connect(addr).unwrap();
    peer.set_nodelay(true).unwrap();

    let mut bytes = frame(3, b"first");
    bytes.extend(frame(4, b""));
    bytes.extend(frame(5, &[0x5a; 300]));
    for byte in &bytes {
        peer.write_all(std::slice::from_ref(byte)).unwrap();
        server.progress(Some(Duration::from_millis(1))).unwrap();
    }

    spin(|| {
        server.progress(Some(TICK)).unwrap();
        received.lock().len() == 3
    });
    assert_eq!(
        received.lock().clone(),
        vec![
            (3, b"first".to_vec()),
            (4, Vec::new()),
            (5, vec![0x5a; 300]),
        ]
    );
}

#[test]
fn test_invalid_id_does_not_break_stream() {
    init_tracing();

    let inbox = Inbox::default();
    let mut server = Worker::new(TcpIfaceConfig::default(), collector(Arc::clone(&inbox))).unwrap();
    let addr = server.listen("127.0.0.1:0".parse().unwrap()).unwrap();

    let mut peer = TcpStream::connect(addr).unwrap();
    let mut bytes = frame(200, b"dropped");
    bytes.extend(frame(PING, b"kept"));
    peer.write_all(&bytes).unwrap();

    spin(|| {
        server.progress(Some(TICK)).unwrap();
        !inbox.lock().is_empty()
    });
    let messages: Vec<(u8, Vec<u8>)> = inbox
        .lock()
        .iter()
        .map(|(_, id, payload)| (*id, payload.clone()))
        .collect();
    assert_eq!(messages, vec![(PING, b"kept".to_vec())]);
    assert_eq!(server.iface().metrics().am_dropped, 1);
}

#[test]
fn test_peer_disconnect_drops_endpoint() {
    init_tracing();

    let mut server = Worker::new(TcpIfaceConfig::default(), collector(Inbox::default())).unwrap();
    let addr = server.listen("127.0.0.1:0".parse().unwrap()).unwrap();

    let peer = TcpStream::connect(addr).unwrap();
    spin(|| {
        server.progress(Some(TICK)).unwrap();
        server.endpoint_count() == 1
    });
    assert_eq!(server.iface().metrics().connections, 1);

    drop(peer);
    spin(|| {
        server.progress(Some(TICK)).unwrap();
        server.endpoint_count() == 0
    });
    assert_eq!(server.iface().endpoint_count(), 0);
    assert_eq!(server.iface().metrics().disconnects, 1);
}

#[test]
fn test_connect_refused_is_unreachable() {
    let mut client = Worker::new(TcpIfaceConfig::default(), collector(Inbox::default())).unwrap();

    // bind then drop to get a port nobody listens on
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let err = client.connect(addr).unwrap_err();
    assert!(matches!(err, amtcp_tcp::TransportError::Unreachable(_)));
    assert_eq!(client.iface().endpoint_count(), 0);
}

#[test]
fn test_adopted_stream_joins_worker() {
    init_tracing();

    let inbox = Inbox::default();
    let mut server = Worker::new(TcpIfaceConfig::default(), collector(Arc::clone(&inbox))).unwrap();
    let addr = server.listen("127.0.0.1:0".parse().unwrap()).unwrap();

    let mut client = Worker::new(TcpIfaceConfig::default(), collector(Inbox::default())).unwrap();
    let token = client.adopt(TcpStream::connect(addr).unwrap()).unwrap();
    assert_eq!(client.tokens().collect::<Vec<_>>(), vec![token]);
    assert_eq!(client.endpoint(token).unwrap().peer_addr(), Some(addr));

    client
        .endpoint_mut(token)
        .unwrap()
        .send_short(AmId::new(PING).unwrap(), u64::MAX, b"")
        .unwrap();

    spin(|| {
        server.progress(Some(TICK)).unwrap();
        !inbox.lock().is_empty()
    });
    let (_, id, payload) = inbox.lock()[0].clone();
    assert_eq!(id, PING);
    assert_eq!(payload, u64::MAX.to_le_bytes().to_vec());
}

#[test]
fn test_short_send_delivers_header_then_payload() {
    init_tracing();

    let inbox = Inbox::default();
    let mut server = Worker::new(TcpIfaceConfig::default(), collector(Arc::clone(&inbox))).unwrap();
    let addr = server.listen("127.0.0.1:0".parse().unwrap()).unwrap();

    let mut client = Worker::new(TcpIfaceConfig::default(), collector(Inbox::default())).unwrap();
    let token = client.connect(addr).unwrap();
    client
        .endpoint_mut(token)
        .unwrap()
        .send_short(AmId::new(PING).unwrap(), 0, b"PING")
        .unwrap();

    spin(|| {
        server.progress(Some(TICK)).unwrap();
        !inbox.lock().is_empty()
    });

    // the receiver sees the 8 byte user header ahead of the payload
    let received: Vec<(u8, Vec<u8>)> = inbox
        .lock()
        .iter()
        .map(|(_, id, payload)| (*id, payload.clone()))
        .collect();
    assert_eq!(
        received,
        vec![(PING, b"\0\0\0\0\0\0\0\0PING".to_vec())]
    );
    assert_eq!(received[0].1.len(), SHORT_HEADER_SIZE + 4);
}

#[test]
fn test_worker_drops_endpoint_when_peer_vanishes_mid_send() {
    init_tracing();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut client = Worker::new(TcpIfaceConfig::default(), collector(Inbox::default())).unwrap();
    let token = client.connect(listener.local_addr().unwrap()).unwrap();
    let (peer, _) = listener.accept().unwrap();

    let ep = client.endpoint_mut(token).unwrap();
    loop {
        match ep.send_bulk(AmId::new(PING).unwrap(), &mut |dst| dst.len()) {
            Ok(_) => {}
            Err(amtcp_tcp::TransportError::NoResource) => break,
            Err(e) => panic!("unexpected send failure: {e}"),
        }
    }
    assert!(client.iface().outstanding() > 0);

    drop(peer);
    spin(|| {
        client.progress(Some(TICK)).unwrap();
        client.endpoint_count() == 0
    });
    assert!(client.endpoint(token).is_none());
    assert_eq!(client.iface().outstanding(), 0);
    assert_eq!(client.iface().endpoint_count(), 0);
    assert!(client.iface().flush().is_ok());
}
