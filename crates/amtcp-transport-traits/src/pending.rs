//! Deferred send requests.
//!
//! When an endpoint cannot accept a send it hands back
//! [`TransportError::NoResource`]. The caller may then park a
//! [`PendingRequest`] on the endpoint; the transport releases parked requests
//! in FIFO order each time the endpoint becomes idle again, and stops as soon
//! as a released request leaves it busy.

use std::collections::VecDeque;
use std::fmt;

use thiserror::Error;

use crate::error::TransportError;
use crate::traits::AmEndpoint;

/// Outcome of releasing a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStatus {
    /// The request completed its work and is released.
    Done,
    /// The request could not make progress; keep it at the head of the queue.
    Retry,
}

/// A send deferred until the endpoint becomes idle.
pub trait PendingRequest: fmt::Debug + Send {
    /// Called when the endpoint can accept a send.
    ///
    /// Typically issues `send_short` or `send_bulk` on `ep`. Returning
    /// [`PendingStatus::Done`] releases the request for good.
    fn dispatch(&mut self, ep: &mut dyn AmEndpoint) -> PendingStatus;
}

/// A request the endpoint refused to queue, handed back to the caller.
#[derive(Debug, Error)]
#[error("pending request rejected: {error}")]
pub struct PendingRejected {
    /// Why the request was refused
    #[source]
    pub error: TransportError,
    /// The request itself, so the caller keeps ownership
    pub request: Box<dyn PendingRequest>,
}

/// FIFO of deferred send requests.
#[derive(Debug, Default)]
pub struct PendingQueue {
    queue: VecDeque<Box<dyn PendingRequest>>,
    sealed: bool,
}

impl PendingQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request at the tail.
    ///
    /// A queue that has been purged is sealed and refuses new requests.
    pub fn push(&mut self, request: Box<dyn PendingRequest>) -> Result<(), PendingRejected> {
        if self.sealed {
            return Err(PendingRejected {
                error: TransportError::Closed,
                request,
            });
        }
        self.queue.push_back(request);
        Ok(())
    }

    /// Takes the oldest request.
    pub fn pop_front(&mut self) -> Option<Box<dyn PendingRequest>> {
        self.queue.pop_front()
    }

    /// Puts a request that asked to be retried back at the head.
    pub fn requeue_front(&mut self, request: Box<dyn PendingRequest>) {
        self.queue.push_front(request);
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns `true` once the queue has been purged.
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Hands every queued request to `release`, oldest first, and seals the queue.
    ///
    /// Returns the number of requests released.
    pub fn purge(&mut self, release: &mut dyn FnMut(Box<dyn PendingRequest>)) -> usize {
        self.sealed = true;
        let count = self.queue.len();
        for request in self.queue.drain(..) {
            release(request);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct Tagged(u32);

    impl PendingRequest for Tagged {
        fn dispatch(&mut self, _ep: &mut dyn AmEndpoint) -> PendingStatus {
            PendingStatus::Done
        }
    }

    fn tag_of(request: &dyn PendingRequest) -> String {
        format!("{request:?}")
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = PendingQueue::new();
        for i in 0..3 {
            queue.push(Box::new(Tagged(i))).unwrap();
        }
        assert_eq!(queue.len(), 3);

        let order: Vec<String> = std::iter::from_fn(|| queue.pop_front())
            .map(|r| tag_of(r.as_ref()))
            .collect();
        assert_eq!(order, vec!["Tagged(0)", "Tagged(1)", "Tagged(2)"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_front_keeps_head() {
        let mut queue = PendingQueue::new();
        queue.push(Box::new(Tagged(1))).unwrap();
        queue.push(Box::new(Tagged(2))).unwrap();

        let head = queue.pop_front().unwrap();
        queue.requeue_front(head);

        assert_eq!(tag_of(queue.pop_front().unwrap().as_ref()), "Tagged(1)");
    }

    #[test]
    fn test_purge_releases_each_once_and_seals() {
        let mut queue = PendingQueue::new();
        for i in 0..4 {
            queue.push(Box::new(Tagged(i))).unwrap();
        }

        let mut released = Vec::new();
        let count = queue.purge(&mut |r| released.push(tag_of(r.as_ref())));

        assert_eq!(count, 4);
        assert_eq!(
            released,
            vec!["Tagged(0)", "Tagged(1)", "Tagged(2)", "Tagged(3)"]
        );
        assert!(queue.is_empty());
        assert!(queue.is_sealed());

        let rejected = queue.push(Box::new(Tagged(9))).unwrap_err();
        assert_eq!(rejected.error, TransportError::Closed);
        assert_eq!(tag_of(rejected.request.as_ref()), "Tagged(9)");
    }
}
