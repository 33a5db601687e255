//! # amtcp TCP Transport
//!
//! Length-prefixed active messages over non-blocking TCP sockets, driven by a
//! readiness multiplexer (`mio`).
//!
//! ## Features
//!
//! - **Framing**: 8 byte header (id + little-endian payload length), frames
//!   reassembled across arbitrary read boundaries
//! - **Backpressure**: one frame in flight per endpoint; busy senders get
//!   `NoResource` and may park a pending request
//! - **Edge-triggered readiness**: write interest is held only while a frame is
//!   partially sent
//! - **Event loop**: [`Worker`] owns the poll instance, an optional listener and
//!   every connected endpoint
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use amtcp_tcp::{AmEndpoint, AmId, TcpIfaceConfig, Token, Worker};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = |token: Token, id: AmId, payload: &[u8]| {
//!         println!("{} {id}: {payload:?}", token.0);
//!     };
//!     let mut worker = Worker::new(TcpIfaceConfig::default(), dispatcher)?;
//!
//!     let token = worker.connect("127.0.0.1:13337".parse()?)?;
//!     if let Some(ep) = worker.endpoint_mut(token) {
//!         ep.send_short(AmId::new(1)?, 0, b"PING")?;
//!     }
//!
//!     loop {
//!         worker.progress(Some(Duration::from_millis(100)))?;
//!     }
//! }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

/// Logs at error level, then panics with the same message.
///
/// Reserved for broken invariants the transport cannot recover from.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        ::tracing::error!($($arg)*);
        panic!($($arg)*)
    }};
}
pub(crate) use fatal;

mod buffer;
mod config;
mod endpoint;
mod header;
mod iface;
mod mux;
mod worker;

pub use config::{
    ConfigError, ENV_PREFIX, MAX_SEGMENT_SIZE, TcpIfaceConfig, TcpIfaceConfigBuilder,
};
pub use endpoint::{RxStatus, TcpEndpoint};
pub use header::{HEADER_SIZE, SHORT_HEADER_SIZE};
pub use iface::TcpIface;
pub use mux::{EventMask, Multiplexer};
pub use worker::{LISTENER_TOKEN, Worker, WorkerDispatcher};

pub use mio::Token;

// Re-export transport traits for convenience
pub use amtcp_transport_traits::{
    AM_ID_MAX, AmDispatcher, AmEndpoint, AmHandlerTable, AmId, AtomicMetrics, PackCallback,
    PendingQueue, PendingRejected, PendingRequest, PendingStatus, TransportError,
    TransportMetrics, TransportResult,
};
