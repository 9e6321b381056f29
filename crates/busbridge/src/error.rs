use thiserror::Error;

use crate::aperture::{MAX_ACCESS_SIZE, MIN_ACCESS_SIZE};

/// Outcome of one bus transaction.
///
/// Bus faults are ordinary results, not Rust errors: a caller emulating a bus
/// master is expected to handle [`BusStatus::AddressError`] the same way real
/// hardware handles a decode fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusStatus {
    /// The peer decoded and performed the access.
    Ok,
    /// The address fell outside the region mapped on the peer (or outside the
    /// local window, in which case no frame was sent).
    AddressError,
    /// Any other peer-side failure. Finer-grained remote error detail is
    /// deliberately collapsed.
    Error,
}

impl BusStatus {
    pub fn is_ok(self) -> bool {
        self == BusStatus::Ok
    }

    pub(crate) fn from_wire(code: u8) -> Self {
        match code {
            busbridge_protocol::STATUS_OK => BusStatus::Ok,
            busbridge_protocol::STATUS_ADDRESS_ERROR => BusStatus::AddressError,
            _ => BusStatus::Error,
        }
    }
}

/// Errors validating an [`ApertureConfig`](crate::ApertureConfig).
///
/// All of these are fatal at setup time; nothing is re-checked per access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("maximum access size {value} below minimum {MIN_ACCESS_SIZE}")]
    MaxAccessSizeTooSmall { value: usize },

    #[error("maximum access size {value} above maximum {MAX_ACCESS_SIZE}")]
    MaxAccessSizeTooLarge { value: usize },

    #[error("aperture count must be nonzero")]
    NoWindows,

    #[error("aperture window size must be nonzero")]
    EmptyWindow,

    #[error(
        "aperture layout overflows the address space: count={count} window_size=0x{window_size:x} offset=0x{offset:x}"
    )]
    LayoutOverflow {
        count: usize,
        window_size: u64,
        offset: u64,
    },
}
