//! Single-threaded event loop driving a set of TCP endpoints.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, trace, warn};

use amtcp_transport_traits::{AmDispatcher, AmId, TransportError, TransportResult};

use crate::config::TcpIfaceConfig;
use crate::endpoint::{RxStatus, TcpEndpoint};
use crate::iface::TcpIface;
use crate::mux::EventMask;

/// Token of the listening socket.
pub const LISTENER_TOKEN: Token = Token(0);

/// Receives messages together with the endpoint they arrived on.
///
/// Implemented for closures taking `(Token, AmId, &[u8])`. An
/// [`AmHandlerTable`](amtcp_transport_traits::AmHandlerTable) plugs in through
/// a closure that ignores the token.
pub trait WorkerDispatcher {
    /// Delivers one message received on `token`.
    fn invoke(&mut self, token: Token, id: AmId, payload: &[u8]);
}

impl<F> WorkerDispatcher for F
where
    F: FnMut(Token, AmId, &[u8]),
{
    fn invoke(&mut self, token: Token, id: AmId, payload: &[u8]) {
        self(token, id, payload);
    }
}

/// Binds a worker dispatcher to the endpoint currently being driven.
struct Scoped<'a, D: ?Sized> {
    token: Token,
    inner: &'a mut D,
}

impl<D: WorkerDispatcher + ?Sized> AmDispatcher for Scoped<'_, D> {
    fn invoke(&mut self, id: AmId, payload: &[u8]) {
        self.inner.invoke(self.token, id, payload);
    }
}

/// Owns a poll instance, an optional listener and every connected endpoint.
///
/// Nothing runs in the background: the caller drives everything through
/// [`Worker::progress`].
pub struct Worker<D> {
    poll: Poll,
    events: Events,
    iface: TcpIface,
    dispatcher: D,
    endpoints: HashMap<Token, TcpEndpoint>,
    listener: Option<TcpListener>,
}

impl<D> fmt::Debug for Worker<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("iface", &self.iface)
            .field("endpoints", &self.endpoints.len())
            .field(
                "listener",
                &self.listener.as_ref().and_then(|l| l.local_addr().ok()),
            )
            .finish_non_exhaustive()
    }
}

impl<D: WorkerDispatcher> Worker<D> {
    /// Creates a worker with its own poll instance and iface.
    pub fn new(config: TcpIfaceConfig, dispatcher: D) -> TransportResult<Self> {
        let poll = Poll::new()?;
        let events = Events::with_capacity(config.max_events);
        let iface = TcpIface::new(config, poll.registry())?;
        Ok(Self {
            poll,
            events,
            iface,
            dispatcher,
            endpoints: HashMap::new(),
            listener: None,
        })
    }

    /// The iface shared by this worker's endpoints.
    pub fn iface(&self) -> &TcpIface {
        &self.iface
    }

    /// The dispatcher messages are delivered to.
    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Mutable access to the dispatcher.
    pub fn dispatcher_mut(&mut self) -> &mut D {
        &mut self.dispatcher
    }

    /// Starts accepting connections on `addr` and returns the bound address.
    ///
    /// Accepted sockets become endpoints subscribed to read readiness.
    pub fn listen(&mut self, addr: SocketAddr) -> TransportResult<SocketAddr> {
        if self.listener.is_some() {
            return Err(TransportError::ConfigurationError(
                "worker is already listening".into(),
            ));
        }
        let mut listener = TcpListener::bind(addr)?;
        self.poll
            .registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let local = listener.local_addr()?;
        debug!("listening on {}", local);
        self.listener = Some(listener);
        Ok(local)
    }

    /// Address of the listening socket, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Connects to `addr`. Blocks until the connection is established.
    pub fn connect(&mut self, addr: SocketAddr) -> TransportResult<Token> {
        let ep = TcpEndpoint::connect(&self.iface, addr)?;
        debug!("connected to {}", addr);
        Ok(self.insert(ep))
    }

    /// Adopts an already connected socket.
    pub fn adopt(&mut self, stream: std::net::TcpStream) -> TransportResult<Token> {
        let ep = TcpEndpoint::from_stream(&self.iface, stream)?;
        Ok(self.insert(ep))
    }

    fn insert(&mut self, mut ep: TcpEndpoint) -> Token {
        ep.mod_events(EventMask::READ, EventMask::NONE);
        let token = ep.token();
        self.endpoints.insert(token, ep);
        token
    }

    /// Looks up a connected endpoint.
    pub fn endpoint(&self, token: Token) -> Option<&TcpEndpoint> {
        self.endpoints.get(&token)
    }

    /// Looks up a connected endpoint for sending.
    pub fn endpoint_mut(&mut self, token: Token) -> Option<&mut TcpEndpoint> {
        self.endpoints.get_mut(&token)
    }

    /// Tokens of every connected endpoint.
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.endpoints.keys().copied()
    }

    /// Number of connected endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Closes and forgets an endpoint.
    ///
    /// An endpoint with parked requests is kept; purge it first.
    pub fn close(&mut self, token: Token) -> TransportResult<()> {
        let ep = self
            .endpoints
            .get_mut(&token)
            .ok_or(TransportError::Closed)?;
        ep.close()?;
        self.endpoints.remove(&token);
        Ok(())
    }

    /// Waits for readiness at most `timeout` (forever if `None`) and drives
    /// every ready endpoint.
    ///
    /// Endpoints whose peer disconnected, on receive or on send, are dropped.
    /// Returns the amount of work done; zero means the wait timed out or
    /// nothing moved.
    pub fn progress(&mut self, timeout: Option<Duration>) -> TransportResult<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e.into()),
        }

        let ready: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
        let mut count = 0;
        for token in ready {
            if token == LISTENER_TOKEN {
                count += self.accept();
                continue;
            }
            let Some(ep) = self.endpoints.get_mut(&token) else {
                trace!("event for unknown token {}", token.0);
                continue;
            };
            let (work, disconnected) = drive(ep, &mut self.dispatcher);
            count += work;
            if disconnected {
                self.endpoints.remove(&token);
            }
        }
        // a send issued between polls may have found the peer gone
        self.endpoints.retain(|_, ep| !ep.is_closed());
        Ok(count)
    }

    fn accept(&mut self) -> usize {
        let Some(listener) = self.listener.as_ref() else {
            return 0;
        };

        let mut accepted = 0;
        loop {
            match listener.accept() {
                Ok((stream, peer)) => match TcpEndpoint::accepted(&self.iface, stream, peer) {
                    Ok(mut ep) => {
                        debug!("accepted connection from {}", peer);
                        ep.mod_events(EventMask::READ, EventMask::NONE);
                        self.endpoints.insert(ep.token(), ep);
                        accepted += 1;
                    }
                    Err(e) => warn!("failed to adopt connection from {}: {}", peer, e),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    break;
                }
            }
        }
        accepted
    }
}

/// Runs receive and transmit progress until neither moves.
///
/// Readiness is edge-triggered and the endpoint refuses to read while a frame
/// is in flight, so a completed transmission must be followed by another
/// receive attempt. Returns the work done and whether the peer disconnected,
/// as seen by either direction.
fn drive<D: WorkerDispatcher + ?Sized>(ep: &mut TcpEndpoint, dispatcher: &mut D) -> (usize, bool) {
    let mut scoped = Scoped {
        token: ep.token(),
        inner: dispatcher,
    };
    let mut count = 0;
    loop {
        let mut work = 0;
        loop {
            match ep.progress_rx(&mut scoped) {
                RxStatus::Progressed => work += 1,
                RxStatus::WouldBlock => break,
                RxStatus::Disconnected => return (count + work, true),
            }
        }
        loop {
            let n = ep.progress_tx();
            work += n;
            if ep.is_closed() {
                return (count + work, true);
            }
            if n == 0 {
                break;
            }
        }
        if work == 0 {
            return (count, false);
        }
        count += work;
    }
}
