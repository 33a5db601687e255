//! TCP active-message endpoint.
//!
//! An endpoint owns one non-blocking socket and one frame buffer. At most one
//! outgoing frame is in flight; a send is accepted only while the buffer is
//! idle, which also means no partially received frame is waiting for its tail.
//! Received frames are parsed in place and dispatched synchronously.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use mio::Token;
use mio::net::TcpStream;
use tracing::{debug, error, trace, warn};

use amtcp_transport_traits::{
    AmDispatcher, AmEndpoint, AmId, AtomicMetrics, PackCallback, PendingQueue, PendingRejected,
    PendingRequest, PendingStatus, TransportError, TransportResult,
};

use crate::buffer::AmBuffer;
use crate::fatal;
use crate::header::{HEADER_SIZE, SHORT_HEADER_SIZE};
use crate::iface::TcpIface;
use crate::mux::EventMask;

/// Outcome of one receive progress call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxStatus {
    /// Nothing was read. The socket had no data, or the buffer is busy
    /// transmitting and cannot take received bytes yet.
    WouldBlock,
    /// Bytes were read and every complete frame among them dispatched.
    Progressed,
    /// The peer went away. The endpoint has been torn down and should be dropped.
    Disconnected,
}

/// One connection speaking the active-message framing.
pub struct TcpEndpoint {
    iface: TcpIface,
    token: Token,
    /// `None` once torn down.
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    buf: AmBuffer,
    events: EventMask,
    pending: PendingQueue,
}

impl fmt::Debug for TcpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpEndpoint")
            .field("token", &self.token)
            .field("peer", &self.peer)
            .field("events", &self.events)
            .field("idle", &self.buf.is_idle())
            .field("pending", &self.pending.len())
            .field("closed", &self.stream.is_none())
            .finish()
    }
}

impl TcpEndpoint {
    /// Connects to `addr` and wraps the socket in an endpoint.
    ///
    /// This is the only blocking call in the transport: the connect itself
    /// waits for the handshake. The socket is switched to non-blocking mode
    /// afterwards. The endpoint starts with no readiness subscription.
    pub fn connect(iface: &TcpIface, addr: SocketAddr) -> TransportResult<Self> {
        let buf = AmBuffer::with_capacity(iface.config().buffer_capacity())?;
        let stream = std::net::TcpStream::connect(addr).map_err(|e| {
            debug!("tcp connect to {} failed: {}", addr, e);
            TransportError::Unreachable(format!("{addr}: {e}"))
        })?;
        stream.set_nonblocking(true)?;
        Self::adopt(iface, TcpStream::from_std(stream), Some(addr), buf)
    }

    /// Wraps an already connected socket.
    pub fn from_stream(iface: &TcpIface, stream: std::net::TcpStream) -> TransportResult<Self> {
        let buf = AmBuffer::with_capacity(iface.config().buffer_capacity())?;
        stream.set_nonblocking(true)?;
        let peer = stream.peer_addr().ok();
        Self::adopt(iface, TcpStream::from_std(stream), peer, buf)
    }

    /// Wraps a socket returned by a non-blocking accept.
    pub(crate) fn accepted(
        iface: &TcpIface,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> TransportResult<Self> {
        let buf = AmBuffer::with_capacity(iface.config().buffer_capacity())?;
        Self::adopt(iface, stream, Some(peer), buf)
    }

    fn adopt(
        iface: &TcpIface,
        stream: TcpStream,
        peer: Option<SocketAddr>,
        buf: AmBuffer,
    ) -> TransportResult<Self> {
        let config = iface.config();
        if config.nodelay {
            stream.set_nodelay(true)?;
        }
        if let Some(ttl) = config.ttl {
            stream.set_ttl(ttl)?;
        }

        let token = iface.next_token();
        iface.lock().insert(token, peer);
        AtomicMetrics::add(&iface.counters().connections, 1);
        debug!("tcp_ep {}: created, peer {:?}", token.0, peer);

        Ok(Self {
            iface: iface.clone(),
            token,
            stream: Some(stream),
            peer,
            buf,
            events: EventMask::NONE,
            pending: PendingQueue::new(),
        })
    }

    /// Multiplexer token of this endpoint.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Remote address, when known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Current readiness subscription.
    pub fn events(&self) -> EventMask {
        self.events
    }

    /// Returns `true` when the endpoint would accept a send right now.
    pub fn is_idle(&self) -> bool {
        self.stream.is_some() && self.buf.is_idle()
    }

    /// Returns `true` once the endpoint has been torn down.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Number of parked requests.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Adds `add` to and removes `remove` from the readiness subscription.
    ///
    /// Issues at most one multiplexer call, under the iface lock: deregister
    /// when the result is empty, register when it was empty, modify otherwise.
    /// An unchanged mask makes no call.
    ///
    /// # Panics
    ///
    /// Panics if the multiplexer rejects the call.
    pub fn mod_events(&mut self, add: EventMask, remove: EventMask) {
        let old = self.events;
        let new = (old | add) - remove;
        if new == old {
            return;
        }
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let _list = self.iface.lock();
        let mux = self.iface.mux();
        let result = match (old.to_interest(), new.to_interest()) {
            (_, None) => mux.deregister(stream),
            (None, Some(interest)) => mux.register(stream, self.token, interest),
            (Some(_), Some(interest)) => mux.modify(stream, self.token, interest),
        };
        if let Err(e) = result {
            fatal!(
                "tcp_ep {}: failed to change events {:?} -> {:?}: {}",
                self.token.0,
                old,
                new,
                e
            );
        }
        trace!("tcp_ep {}: events {:?} -> {:?}", self.token.0, old, new);
        self.events = new;
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.stream.is_none() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    /// Accounts a freshly staged frame and tries to put it on the wire.
    ///
    /// Fails with `Closed` if the peer turned out to be gone; the frame is
    /// discarded with the endpoint.
    fn am_send(&mut self, frame_len: usize) -> TransportResult<()> {
        self.iface.add_outstanding(frame_len);
        self.send();
        self.ensure_open()?;
        if !self.buf.is_idle() {
            self.mod_events(EventMask::WRITE, EventMask::NONE);
        }
        Ok(())
    }

    /// One non-blocking write of the unsent part of the current frame.
    fn send(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        if !self.buf.is_transmitting() {
            return false;
        }

        let written = match stream.write(self.buf.unsent()) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => 0,
            Err(e) if peer_gone(&e) => {
                debug!("tcp_ep {}: send failed: {}", self.token.0, e);
                self.on_disconnect();
                return false;
            }
            Err(e) => {
                warn!("tcp_ep {}: send failed: {}", self.token.0, e);
                0
            }
        };
        if written == 0 {
            return false;
        }

        trace!("tcp_ep {}: sent {} bytes", self.token.0, written);
        self.iface.sub_outstanding(written);
        AtomicMetrics::add(&self.iface.counters().bytes_sent, written as u64);
        self.buf.advance(written);
        true
    }

    /// Releases parked requests, oldest first, while the endpoint stays idle.
    fn dispatch_pending(&mut self) -> usize {
        let mut released = 0;
        while self.is_idle() {
            let Some(mut request) = self.pending.pop_front() else {
                break;
            };
            match request.dispatch(self) {
                PendingStatus::Done => released += 1,
                // a request that found the peer gone is dropped with the queue
                PendingStatus::Retry if self.is_closed() => break,
                PendingStatus::Retry => {
                    self.pending.requeue_front(request);
                    break;
                }
            }
        }
        released
    }

    /// Continues an in-flight send, then drains the pending queue.
    ///
    /// Write readiness is dropped once the endpoint is idle with nothing
    /// queued. Returns the amount of work done: one for a write that moved
    /// bytes plus one per released request. A write that finds the peer gone
    /// tears the endpoint down; check [`is_closed`](Self::is_closed).
    pub fn progress_tx(&mut self) -> usize {
        if self.stream.is_none() {
            return 0;
        }

        let mut count = usize::from(self.send());
        if self.stream.is_none() {
            return count;
        }
        count += self.dispatch_pending();

        if self.buf.is_idle() && self.pending.is_empty() {
            self.mod_events(EventMask::NONE, EventMask::WRITE);
        }
        count
    }

    /// Reads once and dispatches every complete frame.
    ///
    /// Frames carrying an id outside the valid range are logged and dropped.
    /// While a frame is in flight the buffer cannot take received bytes; the
    /// socket is only peeked so that a vanished peer is still noticed.
    ///
    /// # Panics
    ///
    /// Panics if the buffer has no free space, or if a header announces a
    /// payload larger than the buffer can ever hold. Both mean the two sides
    /// disagree on segment sizes.
    pub fn progress_rx(&mut self, dispatcher: &mut dyn AmDispatcher) -> RxStatus {
        let Some(stream) = self.stream.as_mut() else {
            return RxStatus::Disconnected;
        };
        if self.buf.is_transmitting() {
            let mut byte = [0u8; 1];
            return match stream.peek(&mut byte) {
                Ok(0) => {
                    self.on_disconnect();
                    RxStatus::Disconnected
                }
                Err(e) if peer_gone(&e) => {
                    self.on_disconnect();
                    RxStatus::Disconnected
                }
                _ => RxStatus::WouldBlock,
            };
        }
        if self.buf.free_len() == 0 {
            fatal!("tcp_ep {}: receive buffer full", self.token.0);
        }

        let read = match stream.read(self.buf.free_mut()) {
            Ok(0) => {
                self.on_disconnect();
                return RxStatus::Disconnected;
            }
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                return RxStatus::WouldBlock;
            }
            Err(e) if peer_gone(&e) => {
                self.on_disconnect();
                return RxStatus::Disconnected;
            }
            Err(e) => {
                warn!("tcp_ep {}: recv failed: {}", self.token.0, e);
                return RxStatus::WouldBlock;
            }
        };

        self.buf.commit(read);
        trace!("tcp_ep {}: recvd {} bytes", self.token.0, read);

        let token = self.token;
        let counters = self.iface.counters();
        AtomicMetrics::add(&counters.bytes_received, read as u64);
        self.buf.drain_frames(|raw_id, payload| match AmId::new(raw_id) {
            Ok(id) => {
                trace!("RECV tcp_ep {} {} len {}", token.0, id, payload.len());
                AtomicMetrics::add(&counters.am_received, 1);
                dispatcher.invoke(id, payload);
            }
            Err(_) => {
                error!("tcp_ep {}: invalid am id: {}", token.0, raw_id);
                AtomicMetrics::add(&counters.am_dropped, 1);
            }
        });
        RxStatus::Progressed
    }

    fn on_disconnect(&mut self) {
        debug!("tcp_ep {}: remote disconnected", self.token.0);
        self.mod_events(EventMask::NONE, EventMask::READ);
        AtomicMetrics::add(&self.iface.counters().disconnects, 1);
        self.teardown();
    }

    /// Destroys the endpoint.
    ///
    /// Fails with `PendingNotPurged` while requests are parked; the endpoint
    /// stays usable in that case. Closing twice is a no-op.
    pub fn close(&mut self) -> TransportResult<()> {
        if self.stream.is_none() {
            return Ok(());
        }
        if !self.pending.is_empty() {
            return Err(TransportError::PendingNotPurged {
                count: self.pending.len(),
            });
        }
        self.teardown();
        Ok(())
    }

    fn teardown(&mut self) {
        if self.stream.is_none() {
            return;
        }
        debug!("tcp_ep {}: destroying", self.token.0);

        self.mod_events(EventMask::NONE, EventMask::READ | EventMask::WRITE);
        self.iface.lock().remove(&self.token);

        if self.buf.is_transmitting() {
            self.iface.sub_outstanding(self.buf.unsent().len());
        }
        self.buf.reset();

        let discarded = self.pending.purge(&mut |_request| {});
        if discarded > 0 {
            debug!(
                "tcp_ep {}: discarded {} pending requests",
                self.token.0, discarded
            );
        }

        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Socket errors meaning the connection is gone for good.
fn peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

impl AmEndpoint for TcpEndpoint {
    fn send_short(&mut self, id: AmId, header: u64, payload: &[u8]) -> TransportResult<()> {
        self.ensure_open()?;
        if !self.buf.is_idle() {
            return Err(TransportError::NoResource);
        }
        let max = self.iface.config().max_short();
        let size = SHORT_HEADER_SIZE + payload.len();
        if size > max {
            return Err(TransportError::MessageTooLarge { size, max });
        }

        let frame_len = self.buf.stage_short(id.get(), header, payload);
        AtomicMetrics::add(&self.iface.counters().am_short, 1);
        trace!(
            "SEND tcp_ep {} {} hdr {:#x} len {}",
            self.token.0,
            id,
            header,
            size
        );
        self.am_send(frame_len)
    }

    fn send_bulk(&mut self, id: AmId, pack: PackCallback<'_>) -> TransportResult<usize> {
        self.ensure_open()?;
        if !self.buf.is_idle() {
            return Err(TransportError::NoResource);
        }
        let max = self.iface.config().max_bulk();
        let packed = self
            .buf
            .stage_bulk(id.get(), max, pack)
            .map_err(|size| TransportError::MessageTooLarge { size, max })?;

        AtomicMetrics::add(&self.iface.counters().am_bulk, 1);
        trace!("SEND tcp_ep {} {} len {}", self.token.0, id, packed);
        self.am_send(HEADER_SIZE + packed)?;
        Ok(packed)
    }

    fn pending_add(&mut self, request: Box<dyn PendingRequest>) -> Result<(), PendingRejected> {
        if self.stream.is_none() {
            return Err(PendingRejected {
                error: TransportError::Closed,
                request,
            });
        }
        if self.buf.is_idle() {
            return Err(PendingRejected {
                error: TransportError::Busy,
                request,
            });
        }
        self.pending.push(request)?;
        AtomicMetrics::add(&self.iface.counters().pending_added, 1);
        // keep transmit progress driven until the queue drains
        self.mod_events(EventMask::WRITE, EventMask::NONE);
        Ok(())
    }

    fn pending_purge(&mut self, release: &mut dyn FnMut(Box<dyn PendingRequest>)) {
        self.pending.purge(release);
    }

    fn flush(&mut self) -> TransportResult<()> {
        self.ensure_open()?;
        if self.buf.is_transmitting() {
            return Err(TransportError::NoResource);
        }
        AtomicMetrics::add(&self.iface.counters().flushes, 1);
        Ok(())
    }
}

impl Drop for TcpEndpoint {
    fn drop(&mut self) {
        self.teardown();
    }
}
