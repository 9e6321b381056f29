//! Remote bus-access proxy.
//!
//! Forwards memory-mapped load/store transactions from a local bus master to
//! a remote peer process over a message channel and blocks until the result
//! returns, so the remote side can emulate a memory-mapped device
//! indistinguishably from a local model. Used in system simulation where an
//! address range is owned by an external process.
//!
//! - [`Aperture`]: a configured local address window; the read/write façade
//!   the local bus dispatches into.
//! - [`Channel`]: the connection to one peer; serializes transactions,
//!   correlates completions by id, and drains pending peer traffic after
//!   every read.
//! - [`ChannelTransport`]: the byte-moving collaborator (socket, pipe,
//!   shared-memory ring) supplied by the surrounding system.
//!
//! Frame encoding lives in the `busbridge-protocol` crate. An in-process fake
//! peer for tests lives in [`loopback`].

mod aperture;
mod channel;
mod error;
pub mod loopback;
mod transport;

pub use aperture::{AddressingMode, Aperture, ApertureConfig, MAX_ACCESS_SIZE, MIN_ACCESS_SIZE};
pub use channel::{AccessAttrs, BusAttrs, Channel, ChannelConfig, ResponseTable};
pub use error::{BusStatus, ConfigError};
pub use transport::{ChannelTransport, NotificationSink};
