//! Active message ids and dispatch.

use std::fmt;

use tracing::{error, warn};

use crate::error::{TransportError, TransportResult};

/// Number of distinct active message ids.
pub const AM_ID_MAX: u8 = 32;

/// An active message id, guaranteed to be below [`AM_ID_MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AmId(u8);

impl AmId {
    /// Creates an id, rejecting values outside the valid range.
    pub const fn new(id: u8) -> TransportResult<Self> {
        if id < AM_ID_MAX {
            Ok(Self(id))
        } else {
            Err(TransportError::InvalidAmId { id, max: AM_ID_MAX })
        }
    }

    /// Returns the raw id.
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for AmId {
    type Error = TransportError;

    fn try_from(id: u8) -> TransportResult<Self> {
        Self::new(id)
    }
}

impl From<AmId> for u8 {
    fn from(id: AmId) -> Self {
        id.0
    }
}

impl fmt::Display for AmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "am{}", self.0)
    }
}

/// Receives fully parsed active messages from a transport.
///
/// `invoke` runs synchronously inside the transport's receive progress, before
/// the next frame is parsed. The payload slice borrows the transport buffer and
/// is only valid for the duration of the call.
pub trait AmDispatcher {
    /// Delivers one message.
    fn invoke(&mut self, id: AmId, payload: &[u8]);
}

impl<F> AmDispatcher for F
where
    F: FnMut(AmId, &[u8]),
{
    fn invoke(&mut self, id: AmId, payload: &[u8]) {
        self(id, payload);
    }
}

/// Boxed per-id message handler.
pub type AmHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Dispatcher that routes each id to its own registered handler.
pub struct AmHandlerTable {
    handlers: Vec<Option<AmHandler>>,
    unhandled: u64,
}

impl fmt::Debug for AmHandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<u8> = self
            .handlers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_some())
            .map(|(id, _)| id as u8)
            .collect();
        f.debug_struct("AmHandlerTable")
            .field("registered", &registered)
            .field("unhandled", &self.unhandled)
            .finish()
    }
}

impl Default for AmHandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AmHandlerTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            handlers: (0..AM_ID_MAX).map(|_| None).collect(),
            unhandled: 0,
        }
    }

    /// Installs `handler` for `id`, returning the previous one if any.
    pub fn set_handler<F>(&mut self, id: AmId, handler: F) -> Option<AmHandler>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.handlers[usize::from(id.get())].replace(Box::new(handler))
    }

    /// Removes the handler for `id`.
    pub fn clear_handler(&mut self, id: AmId) -> Option<AmHandler> {
        self.handlers[usize::from(id.get())].take()
    }

    /// Returns `true` if `id` has a handler.
    pub fn is_handled(&self, id: AmId) -> bool {
        self.handlers[usize::from(id.get())].is_some()
    }

    /// Number of messages that arrived for an id without a handler.
    pub const fn unhandled(&self) -> u64 {
        self.unhandled
    }
}

impl AmDispatcher for AmHandlerTable {
    fn invoke(&mut self, id: AmId, payload: &[u8]) {
        match self.handlers.get_mut(usize::from(id.get())) {
            Some(Some(handler)) => handler(payload),
            Some(None) => {
                self.unhandled += 1;
                warn!("no handler for {}, dropping {} bytes", id, payload.len());
            }
            None => error!("{} outside handler table", id),
        }
    }
}
