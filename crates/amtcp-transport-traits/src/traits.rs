//! Core transport traits.

use crate::am::AmId;
use crate::error::TransportResult;
use crate::pending::{PendingRejected, PendingRequest};

/// Packs a bulk payload in place.
///
/// Receives the writable payload region of the transport buffer and returns
/// the number of bytes it produced. Reporting more bytes than the region holds
/// makes the send fail with `MessageTooLarge`.
pub type PackCallback<'a> = &'a mut dyn FnMut(&mut [u8]) -> usize;

/// The uniform interface every active-message transport endpoint implements.
///
/// All operations are non-blocking. Sends are accepted only when the endpoint
/// has nothing in flight; otherwise they fail with
/// [`TransportError::NoResource`](crate::TransportError::NoResource) and the
/// caller either retries later or parks a [`PendingRequest`].
pub trait AmEndpoint: std::fmt::Debug {
    /// Sends a short message copied into the transport buffer.
    ///
    /// The receiver sees `header` as the first eight payload bytes,
    /// little-endian, followed by `payload`.
    fn send_short(&mut self, id: AmId, header: u64, payload: &[u8]) -> TransportResult<()>;

    /// Sends a message whose payload is produced in place by `pack`.
    ///
    /// Returns the payload length on success.
    fn send_bulk(&mut self, id: AmId, pack: PackCallback<'_>) -> TransportResult<usize>;

    /// Parks a request until the endpoint can send again.
    ///
    /// Fails with `Busy`, handing the request back, if the endpoint is idle
    /// right now, and with `Closed` once the queue has been purged.
    fn pending_add(&mut self, request: Box<dyn PendingRequest>) -> Result<(), PendingRejected>;

    /// Releases every parked request through `release`, oldest first.
    ///
    /// Used during teardown; no requests may be parked afterwards.
    fn pending_purge(&mut self, release: &mut dyn FnMut(Box<dyn PendingRequest>));

    /// Succeeds if nothing is in flight, fails with `NoResource` otherwise.
    fn flush(&mut self) -> TransportResult<()>;
}
