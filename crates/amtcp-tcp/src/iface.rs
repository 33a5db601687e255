//! State shared by every endpoint of one TCP iface.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use mio::{Registry, Token};
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use amtcp_transport_traits::{AtomicMetrics, TransportError, TransportMetrics, TransportResult};

use crate::config::TcpIfaceConfig;
use crate::mux::Multiplexer;

/// First token handed to an endpoint. Lower tokens are left to the owner of
/// the poll instance (the worker keeps `Token(0)` for its listener).
pub(crate) const FIRST_ENDPOINT_TOKEN: usize = 1;

#[derive(Debug)]
struct IfaceShared {
    config: TcpIfaceConfig,
    mux: Box<dyn Multiplexer>,
    /// Live endpoints and their peers. The lock also serializes registration calls.
    endpoints: Mutex<HashMap<Token, Option<SocketAddr>>>,
    /// Bytes accepted by a send but not yet written to a socket.
    outstanding: AtomicUsize,
    metrics: AtomicMetrics,
    next_token: AtomicUsize,
}

/// Handle to a TCP iface.
///
/// Cloning is cheap; every clone refers to the same configuration, endpoint
/// list, outstanding-byte counter and metrics.
#[derive(Debug, Clone)]
pub struct TcpIface {
    shared: Arc<IfaceShared>,
}

impl TcpIface {
    /// Creates an iface whose endpoints register with `registry`.
    pub fn new(config: TcpIfaceConfig, registry: &Registry) -> TransportResult<Self> {
        let registry = registry.try_clone()?;
        Self::with_multiplexer(config, Box::new(registry))
    }

    /// Creates an iface on top of any [`Multiplexer`].
    pub fn with_multiplexer(
        config: TcpIfaceConfig,
        mux: Box<dyn Multiplexer>,
    ) -> TransportResult<Self> {
        config.validate()?;
        debug!(
            "tcp iface created: bulk_size={} short_size={} nodelay={}",
            config.bulk_size, config.short_size, config.nodelay
        );
        Ok(Self {
            shared: Arc::new(IfaceShared {
                config,
                mux,
                endpoints: Mutex::new(HashMap::new()),
                outstanding: AtomicUsize::new(0),
                metrics: AtomicMetrics::new(),
                next_token: AtomicUsize::new(FIRST_ENDPOINT_TOKEN),
            }),
        })
    }

    /// Iface configuration.
    pub fn config(&self) -> &TcpIfaceConfig {
        &self.shared.config
    }

    /// Succeeds once every accepted byte on every endpoint has been written.
    pub fn flush(&self) -> TransportResult<()> {
        if self.outstanding() > 0 {
            return Err(TransportError::NoResource);
        }
        AtomicMetrics::add(&self.shared.metrics.flushes, 1);
        Ok(())
    }

    /// Number of live endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.shared.endpoints.lock().len()
    }

    /// Peer address of a live endpoint, if known.
    pub fn peer_of(&self, token: Token) -> Option<SocketAddr> {
        self.shared.endpoints.lock().get(&token).copied().flatten()
    }

    /// Bytes accepted by a send but not yet written.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    /// Snapshot of the iface counters.
    pub fn metrics(&self) -> TransportMetrics {
        self.shared.metrics.snapshot()
    }

    pub(crate) fn counters(&self) -> &AtomicMetrics {
        &self.shared.metrics
    }

    pub(crate) fn mux(&self) -> &dyn Multiplexer {
        self.shared.mux.as_ref()
    }

    /// Takes the iface lock. Registration calls are made while holding it.
    pub(crate) fn lock(&self) -> MutexGuard<'_, HashMap<Token, Option<SocketAddr>>> {
        self.shared.endpoints.lock()
    }

    pub(crate) fn next_token(&self) -> Token {
        Token(self.shared.next_token.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn add_outstanding(&self, n: usize) {
        self.shared.outstanding.fetch_add(n, Ordering::AcqRel);
    }

    pub(crate) fn sub_outstanding(&self, n: usize) {
        self.shared.outstanding.fetch_sub(n, Ordering::AcqRel);
    }
}
