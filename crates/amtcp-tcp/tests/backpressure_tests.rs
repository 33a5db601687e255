//! Backpressure and pending-queue behavior against a slow reader

use std::io::Read;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use amtcp_tcp::{
    AmEndpoint, AmId, EventMask, HEADER_SIZE, PendingRequest, PendingStatus, TcpEndpoint,
    TcpIface, TcpIfaceConfig, TransportError,
};
use mio::Poll;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

const BULK_ID: u8 = 1;
const ORDER_ID: u8 = 2;

/// Sends its index once the endpoint accepts it, recording the send order.
#[derive(Debug)]
struct Ordered {
    index: u8,
    log: Arc<Mutex<Vec<u8>>>,
}

impl PendingRequest for Ordered {
    fn dispatch(&mut self, ep: &mut dyn AmEndpoint) -> PendingStatus {
        match ep.send_short(AmId::new(ORDER_ID).unwrap(), u64::from(self.index), &[]) {
            Ok(()) => {
                self.log.lock().push(self.index);
                PendingStatus::Done
            }
            Err(TransportError::NoResource) => PendingStatus::Retry,
            Err(e) => panic!("unexpected send failure: {e}"),
        }
    }
}

/// Never gets to send; counts how many times it has been dropped.
#[derive(Debug)]
struct Stalled(Arc<AtomicUsize>);

impl PendingRequest for Stalled {
    fn dispatch(&mut self, _ep: &mut dyn AmEndpoint) -> PendingStatus {
        PendingStatus::Retry
    }
}

impl Drop for Stalled {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

fn parse_frames(mut bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        let mut length = [0u8; 4];
        length.copy_from_slice(&bytes[4..HEADER_SIZE]);
        let end = HEADER_SIZE + u32::from_le_bytes(length) as usize;
        out.push((bytes[0], bytes[HEADER_SIZE..end].to_vec()));
        bytes = &bytes[end..];
    }
    out
}

#[test]
fn test_pending_requests_drain_in_order() {
    let poll = Poll::new().unwrap();
    let config = TcpIfaceConfig::builder().bulk_size(4096).build().unwrap();
    let max_bulk = config.max_bulk();
    let iface = TcpIface::new(config, poll.registry()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut ep = TcpEndpoint::connect(&iface, listener.local_addr().unwrap()).unwrap();
    let (mut peer, _) = listener.accept().unwrap();

    // Fill the socket until a frame is left in flight
    let mut bulk_frames = 0usize;
    loop {
        let result = ep.send_bulk(AmId::new(BULK_ID).unwrap(), &mut |dst| {
            dst.fill(0xab);
            dst.len()
        });
        match result {
            Ok(packed) => {
                assert_eq!(packed, max_bulk);
                bulk_frames += 1;
            }
            Err(TransportError::NoResource) => break,
            Err(e) => panic!("unexpected send failure: {e}"),
        }
        assert!(bulk_frames < 1_000_000, "socket never filled up");
    }

    assert!(!ep.is_idle());
    assert!(ep.events().contains(EventMask::WRITE));
    assert!(iface.outstanding() > 0);
    assert_eq!(ep.flush(), Err(TransportError::NoResource));
    assert_eq!(iface.flush(), Err(TransportError::NoResource));

    let log = Arc::new(Mutex::new(Vec::new()));
    for index in 0..3 {
        ep.pending_add(Box::new(Ordered {
            index,
            log: Arc::clone(&log),
        }))
        .unwrap();
    }
    assert_eq!(ep.pending_len(), 3);
    assert_eq!(iface.metrics().pending_added, 3);

    let reader = thread::spawn(move || {
        let mut all = Vec::new();
        peer.read_to_end(&mut all).unwrap();
        all
    });

    let deadline = Instant::now() + Duration::from_secs(10);
    while !(ep.pending_len() == 0 && ep.is_idle()) {
        ep.progress_tx();
        assert!(Instant::now() < deadline, "pending queue never drained");
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(*log.lock(), vec![0, 1, 2]);
    assert_eq!(iface.outstanding(), 0);
    assert_eq!(ep.events(), EventMask::NONE);
    assert!(ep.flush().is_ok());
    assert!(iface.flush().is_ok());

    ep.close().unwrap();
    let frames = parse_frames(&reader.join().unwrap());

    assert_eq!(frames.len(), bulk_frames + 3);
    assert!(
        frames[..bulk_frames]
            .iter()
            .all(|(id, payload)| *id == BULK_ID && payload.len() == max_bulk)
    );
    assert_eq!(
        frames[bulk_frames..].to_vec(),
        (0u64..3)
            .map(|index| (ORDER_ID, index.to_le_bytes().to_vec()))
            .collect::<Vec<_>>()
    );
}

#[test]
fn test_oversized_bulk_never_reaches_wire() {
    let poll = Poll::new().unwrap();
    let config = TcpIfaceConfig::builder()
        .bulk_size(64)
        .short_size(32)
        .build()
        .unwrap();
    let iface = TcpIface::new(config, poll.registry()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut ep = TcpEndpoint::connect(&iface, listener.local_addr().unwrap()).unwrap();
    let (mut peer, _) = listener.accept().unwrap();

    let err = ep
        .send_bulk(AmId::new(BULK_ID).unwrap(), &mut |_dst| 100)
        .unwrap_err();
    assert_eq!(
        err,
        TransportError::MessageTooLarge {
            size: 100,
            max: 64 - HEADER_SIZE
        }
    );
    assert!(ep.is_idle());
    assert_eq!(iface.metrics().am_bulk, 0);

    // A valid frame sent afterwards is the first thing the peer sees
    ep.send_short(AmId::new(ORDER_ID).unwrap(), 0x2a, b"ok").unwrap();
    ep.close().unwrap();

    let mut body = 0x2au64.to_le_bytes().to_vec();
    body.extend_from_slice(b"ok");
    let mut all = Vec::new();
    peer.read_to_end(&mut all).unwrap();
    assert_eq!(parse_frames(&all), vec![(ORDER_ID, body)]);
}

#[test]
fn test_peer_gone_mid_send_releases_everything() {
    let poll = Poll::new().unwrap();
    let config = TcpIfaceConfig::builder().bulk_size(4096).build().unwrap();
    let iface = TcpIface::new(config, poll.registry()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut ep = TcpEndpoint::connect(&iface, listener.local_addr().unwrap()).unwrap();
    let (peer, _) = listener.accept().unwrap();

    loop {
        match ep.send_bulk(AmId::new(BULK_ID).unwrap(), &mut |dst| dst.len()) {
            Ok(_) => {}
            Err(TransportError::NoResource) => break,
            Err(e) => panic!("unexpected send failure: {e}"),
        }
    }
    assert!(iface.outstanding() > 0);

    let released = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        ep.pending_add(Box::new(Stalled(Arc::clone(&released))))
            .unwrap();
    }

    // closing with unread data resets the connection
    drop(peer);

    // only the transmit side is driven, so the write must notice
    let deadline = Instant::now() + Duration::from_secs(10);
    while !ep.is_closed() {
        ep.progress_tx();
        assert!(Instant::now() < deadline, "peer disconnect never detected");
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(ep.pending_len(), 0);
    assert_eq!(released.load(Ordering::Relaxed), 3);
    assert_eq!(iface.outstanding(), 0);
    assert_eq!(iface.endpoint_count(), 0);
    assert_eq!(iface.metrics().disconnects, 1);
    assert!(iface.flush().is_ok());
    assert_eq!(
        ep.send_short(AmId::new(ORDER_ID).unwrap(), 0, b""),
        Err(TransportError::Closed)
    );
}
