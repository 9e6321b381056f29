use busbridge_protocol::LogLevel;

/// Transport/dispatch collaborator backing one [`Channel`](crate::Channel).
///
/// The channel layer owns framing, correlation and ordering; the transport
/// owns the actual byte movement (socket, pipe, shared-memory ring — out of
/// scope here) and the peer's time pacing. Implementations must be callable
/// while a transaction caller is blocked waiting for its completion: incoming
/// peer frames are fed into the channel's
/// [`ResponseTable`](crate::ResponseTable) by whatever dispatch context the
/// transport runs (a reader thread, or the same thread re-entering via an
/// event loop).
pub trait ChannelTransport: Send + Sync {
    /// Deliver one encoded request frame to the peer.
    ///
    /// There is no failure path and no timeout: a peer that never answers
    /// stalls the calling transaction indefinitely. This is an accepted
    /// limitation of the protocol, not something to paper over here.
    fn send_frame(&self, frame: &[u8]);

    /// Sample the channel's normalized virtual clock. Stamped into every
    /// request at encode time.
    fn sample_clock(&self) -> u64;

    /// Synchronously process every peer message already queued on the
    /// channel (interrupt level changes, peer logs). Called after each read
    /// completes, while the channel lock is still held.
    fn drain_pending(&self);

    /// Restart the periodic timer that paces the peer's virtual time.
    /// Called after [`ChannelTransport::drain_pending`] on every read.
    fn restart_sync_timer(&self);
}

/// Consumer of asynchronous peer notifications surfaced during a drain.
pub trait NotificationSink: Send + Sync {
    /// An interrupt line on the peer changed level.
    fn irq_level(&self, line: u16, level: bool);

    /// The peer emitted a log record.
    fn peer_log(&self, level: LogLevel, message: &str);
}
