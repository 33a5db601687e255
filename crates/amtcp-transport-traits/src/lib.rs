//! # amtcp Transport Traits
//!
//! Core traits and types for active-message transports. Every wire transport
//! (TCP today, others behind the same interface) depends on this crate.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Traits**: [`AmEndpoint`], [`AmDispatcher`], [`PendingRequest`]
//! - **Types**: [`AmId`], [`AmHandlerTable`], [`PendingQueue`]
//! - **Errors**: [`TransportError`], [`TransportResult`]
//! - **Metrics**: [`TransportMetrics`], [`AtomicMetrics`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use amtcp_transport_traits::{AmEndpoint, AmId, TransportError};
//!
//! fn ping(ep: &mut dyn AmEndpoint) -> Result<(), TransportError> {
//!     match ep.send_short(AmId::new(1)?, 0, b"PING") {
//!         Err(TransportError::NoResource) => Ok(()), // retry on the next progress
//!         other => other,
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

mod am;
mod error;
mod metrics;
mod pending;
mod traits;

// Re-export all public items
pub use am::{AM_ID_MAX, AmDispatcher, AmHandler, AmHandlerTable, AmId};
pub use error::{TransportError, TransportResult};
pub use metrics::{AtomicMetrics, TransportMetrics};
pub use pending::{PendingQueue, PendingRejected, PendingRequest, PendingStatus};
pub use traits::{AmEndpoint, PackCallback};
