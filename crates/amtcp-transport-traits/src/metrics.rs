//! Transport metrics types.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A serializable snapshot of a transport's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMetrics {
    /// Total number of bytes written to sockets.
    pub bytes_sent: u64,

    /// Total number of bytes read from sockets.
    pub bytes_received: u64,

    /// Short sends accepted.
    pub am_short: u64,

    /// Bulk sends accepted.
    pub am_bulk: u64,

    /// Messages delivered to the dispatcher.
    pub am_received: u64,

    /// Received frames dropped for carrying an invalid id.
    pub am_dropped: u64,

    /// Requests parked on a pending queue.
    pub pending_added: u64,

    /// Flush calls that found the endpoint idle.
    pub flushes: u64,

    /// Endpoints created.
    pub connections: u64,

    /// Endpoints torn down after the peer went away.
    pub disconnects: u64,
}

/// A lock-free, atomic structure for high-performance metrics updates.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    /// Total bytes sent (atomic counter).
    pub bytes_sent: AtomicU64,

    /// Total bytes received (atomic counter).
    pub bytes_received: AtomicU64,

    /// Short sends accepted (atomic counter).
    pub am_short: AtomicU64,

    /// Bulk sends accepted (atomic counter).
    pub am_bulk: AtomicU64,

    /// Messages dispatched (atomic counter).
    pub am_received: AtomicU64,

    /// Frames dropped for an invalid id (atomic counter).
    pub am_dropped: AtomicU64,

    /// Pending requests added (atomic counter).
    pub pending_added: AtomicU64,

    /// Successful flushes (atomic counter).
    pub flushes: AtomicU64,

    /// Endpoints created (atomic counter).
    pub connections: AtomicU64,

    /// Peer disconnects (atomic counter).
    pub disconnects: AtomicU64,
}

impl AtomicMetrics {
    /// Creates a new `AtomicMetrics` instance with all counters initialized to zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` to `counter`.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Creates a serializable `TransportMetrics` snapshot from the current atomic values.
    pub fn snapshot(&self) -> TransportMetrics {
        TransportMetrics {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            am_short: self.am_short.load(Ordering::Relaxed),
            am_bulk: self.am_bulk.load(Ordering::Relaxed),
            am_received: self.am_received.load(Ordering::Relaxed),
            am_dropped: self.am_dropped.load(Ordering::Relaxed),
            pending_added: self.pending_added.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }

    /// Resets all atomic metric counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.bytes_sent,
            &self.bytes_received,
            &self.am_short,
            &self.am_bulk,
            &self.am_received,
            &self.am_dropped,
            &self.pending_added,
            &self.flushes,
            &self.connections,
            &self.disconnects,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
