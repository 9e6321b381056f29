use core::fmt;
use std::sync::Arc;

use crate::channel::{AccessAttrs, Channel};
use crate::error::{BusStatus, ConfigError};

/// Smallest allowed value for the configured maximum access size.
pub const MIN_ACCESS_SIZE: usize = 4;
/// Largest allowed value for (and default of) the configured maximum access
/// size.
pub const MAX_ACCESS_SIZE: usize = 4096;

/// How a window translates local addresses into the peer's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// `remote = window_base + local + offset`: the window set sparsely
    /// exposes one large remote region.
    Absolute,
    /// `remote = local` (offset ignored): every window aliases the same
    /// remote structure, e.g. repeated per-unit register blocks.
    Relative,
}

/// Configuration for one set of same-sized address windows bound to a single
/// channel and device.
///
/// Validated once by [`Aperture::build`]; nothing here is re-checked per
/// access.
#[derive(Debug, Clone)]
pub struct ApertureConfig {
    /// Number of windows to create.
    pub count: usize,
    /// Additive offset applied in [`AddressingMode::Absolute`].
    pub offset: u64,
    /// Size of each window in bytes.
    pub window_size: u64,
    /// Device index on the remote peer.
    pub device: u16,
    pub mode: AddressingMode,
    /// Upper bound on a single access, in `[MIN_ACCESS_SIZE, MAX_ACCESS_SIZE]`.
    pub max_access_size: usize,
}

impl Default for ApertureConfig {
    fn default() -> Self {
        Self {
            count: 1,
            offset: 0,
            window_size: 0x1000,
            device: 0,
            mode: AddressingMode::Absolute,
            max_access_size: MAX_ACCESS_SIZE,
        }
    }
}

/// One local address window forwarding accesses to a remote peer.
///
/// This is the public read/write entry point: the local bus dispatches a
/// load/store here with an address relative to the window base. Immutable
/// after creation.
pub struct Aperture {
    channel: Arc<Channel>,
    device: u16,
    mode: AddressingMode,
    offset: u64,
    /// Position of this window within its set (`index * window_size`).
    window_base: u64,
    size: u64,
    max_access_size: usize,
}

impl Aperture {
    /// Validate `config` and create its windows, all sharing `channel`.
    ///
    /// Windows on one channel serialize through the channel's lock; this is
    /// what preserves global access ordering toward the peer.
    pub fn build(channel: Arc<Channel>, config: &ApertureConfig) -> Result<Vec<Aperture>, ConfigError> {
        if config.max_access_size < MIN_ACCESS_SIZE {
            return Err(ConfigError::MaxAccessSizeTooSmall {
                value: config.max_access_size,
            });
        }
        if config.max_access_size > MAX_ACCESS_SIZE {
            return Err(ConfigError::MaxAccessSizeTooLarge {
                value: config.max_access_size,
            });
        }
        if config.count == 0 {
            return Err(ConfigError::NoWindows);
        }
        if config.window_size == 0 {
            return Err(ConfigError::EmptyWindow);
        }

        // The absolute-mode translation of the last byte must not overflow.
        let overflow = ConfigError::LayoutOverflow {
            count: config.count,
            window_size: config.window_size,
            offset: config.offset,
        };
        let span = (config.count as u64)
            .checked_mul(config.window_size)
            .ok_or(overflow.clone())?;
        span.checked_add(config.offset).ok_or(overflow)?;

        Ok((0..config.count)
            .map(|index| Aperture {
                channel: channel.clone(),
                device: config.device,
                mode: config.mode,
                offset: config.offset,
                window_base: index as u64 * config.window_size,
                size: config.window_size,
                max_access_size: config.max_access_size,
            })
            .collect())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn device(&self) -> u16 {
        self.device
    }

    pub fn mode(&self) -> AddressingMode {
        self.mode
    }

    /// Read `buf.len()` bytes at window-relative address `addr`.
    ///
    /// Accesses that leave the window or exceed the configured maximum size
    /// fault locally, without a round trip; `buf` is only written on
    /// [`BusStatus::Ok`].
    pub fn read(&self, addr: u64, buf: &mut [u8], attrs: AccessAttrs) -> BusStatus {
        if !self.access_ok(addr, buf.len()) {
            return BusStatus::AddressError;
        }
        self.channel.read(self.device, self.translate(addr), buf, attrs)
    }

    /// Write `data` at window-relative address `addr`.
    pub fn write(&self, addr: u64, data: &[u8], attrs: AccessAttrs) -> BusStatus {
        if !self.access_ok(addr, data.len()) {
            return BusStatus::AddressError;
        }
        self.channel.write(self.device, self.translate(addr), data, attrs)
    }

    fn access_ok(&self, addr: u64, len: usize) -> bool {
        len <= self.max_access_size
            && (len as u64) <= self.size
            && addr <= self.size - len as u64
    }

    fn translate(&self, local: u64) -> u64 {
        match self.mode {
            // No overflow: window_base + size + offset was validated at build.
            AddressingMode::Absolute => self.window_base + local + self.offset,
            AddressingMode::Relative => local,
        }
    }
}

impl fmt::Debug for Aperture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aperture")
            .field("device", &self.device)
            .field("mode", &self.mode)
            .field("offset", &self.offset)
            .field("window_base", &self.window_base)
            .field("size", &self.size)
            .field("max_access_size", &self.max_access_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{BusAttrs, ChannelConfig};
    use crate::loopback::LoopbackTransport;

    fn build(config: &ApertureConfig) -> Result<(Vec<Aperture>, Arc<LoopbackTransport>), ConfigError> {
        let loopback = Arc::new(LoopbackTransport::new());
        let channel = Arc::new(Channel::new(
            ChannelConfig {
                peer: "test-peer".to_string(),
                default_attrs: BusAttrs::empty(),
            },
            loopback.clone(),
        ));
        loopback.connect(channel.response_table());
        Ok((Aperture::build(channel, config)?, loopback))
    }

    #[test]
    fn max_access_size_bounds_are_closed() {
        for bad in [0, 3, 4097] {
            let err = build(&ApertureConfig {
                max_access_size: bad,
                ..ApertureConfig::default()
            })
            .unwrap_err();
            match bad {
                0 | 3 => assert_eq!(err, ConfigError::MaxAccessSizeTooSmall { value: bad }),
                _ => assert_eq!(err, ConfigError::MaxAccessSizeTooLarge { value: bad }),
            }
        }
        for good in [4, 4096] {
            build(&ApertureConfig {
                max_access_size: good,
                ..ApertureConfig::default()
            })
            .unwrap();
        }
    }

    #[test]
    fn degenerate_layouts_are_rejected() {
        assert_eq!(
            build(&ApertureConfig {
                count: 0,
                ..ApertureConfig::default()
            })
            .unwrap_err(),
            ConfigError::NoWindows
        );
        assert_eq!(
            build(&ApertureConfig {
                window_size: 0,
                ..ApertureConfig::default()
            })
            .unwrap_err(),
            ConfigError::EmptyWindow
        );
        assert!(matches!(
            build(&ApertureConfig {
                count: 2,
                window_size: u64::MAX / 2 + 1,
                ..ApertureConfig::default()
            })
            .unwrap_err(),
            ConfigError::LayoutOverflow { .. }
        ));
    }

    #[test]
    fn relative_mode_ignores_the_offset() {
        let (windows, loopback) = build(&ApertureConfig {
            offset: 0x1000,
            mode: AddressingMode::Relative,
            ..ApertureConfig::default()
        })
        .unwrap();

        windows[0].write(0x10, &[0u8; 4], AccessAttrs::default());
        assert_eq!(loopback.sent_addrs(), vec![0x10]);
    }

    #[test]
    fn absolute_mode_applies_the_offset() {
        let (windows, loopback) = build(&ApertureConfig {
            offset: 0x1000,
            mode: AddressingMode::Absolute,
            ..ApertureConfig::default()
        })
        .unwrap();

        windows[0].write(0x10, &[0u8; 4], AccessAttrs::default());
        assert_eq!(loopback.sent_addrs(), vec![0x1010]);
    }

    #[test]
    fn absolute_windows_tile_the_remote_region() {
        let (windows, loopback) = build(&ApertureConfig {
            count: 3,
            offset: 0x1000,
            window_size: 0x100,
            mode: AddressingMode::Absolute,
            ..ApertureConfig::default()
        })
        .unwrap();

        for w in &windows {
            w.write(0x10, &[0u8; 4], AccessAttrs::default());
        }
        assert_eq!(loopback.sent_addrs(), vec![0x1010, 0x1110, 0x1210]);
    }

    #[test]
    fn relative_windows_alias_the_same_remote_block() {
        let (windows, loopback) = build(&ApertureConfig {
            count: 2,
            window_size: 0x100,
            mode: AddressingMode::Relative,
            ..ApertureConfig::default()
        })
        .unwrap();

        windows[0].write(0x20, &[0u8; 4], AccessAttrs::default());
        windows[1].write(0x20, &[0u8; 4], AccessAttrs::default());
        assert_eq!(loopback.sent_addrs(), vec![0x20, 0x20]);
    }

    #[test]
    fn out_of_window_accesses_fault_locally() {
        let (windows, loopback) = build(&ApertureConfig {
            window_size: 0x100,
            max_access_size: 16,
            ..ApertureConfig::default()
        })
        .unwrap();
        let w = &windows[0];

        let mut buf = [0u8; 8];
        assert_eq!(w.read(0x100, &mut buf, AccessAttrs::default()), BusStatus::AddressError);
        assert_eq!(w.read(0xfc, &mut buf, AccessAttrs::default()), BusStatus::AddressError);
        // Exceeding the configured per-access cap faults the same way.
        let mut big = [0u8; 32];
        assert_eq!(w.read(0x0, &mut big, AccessAttrs::default()), BusStatus::AddressError);
        // No frame was ever sent.
        assert_eq!(loopback.sent_addrs(), Vec::<u64>::new());

        assert!(w.read(0xf8, &mut buf, AccessAttrs::default()).is_ok());
    }
}
