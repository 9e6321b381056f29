use std::sync::{Arc, Condvar, Mutex};

use busbridge_protocol as proto;
use proto::{BusCommand, CompletionFrame, PeerMessage};
use tracing::trace;

use crate::error::BusStatus;
use crate::transport::ChannelTransport;

bitflags::bitflags! {
    /// Attribute word carried in every request frame.
    ///
    /// Bit 0 marks a secure/privileged access. The remaining bits are
    /// device-defined defaults configured per channel and OR'd into every
    /// request unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BusAttrs: u32 {
        const SECURE = 1 << 0;
    }
}

/// Per-access attributes supplied by the bus master.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessAttrs {
    /// Marks the access secure; sets [`BusAttrs::SECURE`] in the encoded
    /// attribute word.
    pub secure: bool,
    /// Identity of the requesting master, carried verbatim in the frame.
    pub master_id: u16,
}

/// Static configuration for one [`Channel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Peer identity. Diagnostics only; not on the wire.
    pub peer: String,
    /// Device-default attribute bits OR'd into every request.
    pub default_attrs: BusAttrs,
}

/// Correlates the outstanding transaction on a channel with its completion.
///
/// The table holds at most one slot because the channel's exclusive lock
/// admits exactly one transaction at a time; the slot still records the
/// (device, id) pair it was registered for so a completion delivered out of
/// the assumed order is caught rather than mis-matched.
///
/// Cloning yields another handle to the same table; the transport's dispatch
/// context keeps one and feeds incoming peer frames through
/// [`ResponseTable::deliver`] or [`ResponseTable::complete`].
#[derive(Clone)]
pub struct ResponseTable {
    inner: Arc<TableInner>,
}

struct TableInner {
    slot: Mutex<Option<Slot>>,
    signaled: Condvar,
}

struct Slot {
    dev: u16,
    id: u32,
    completion: Option<CompletionFrame>,
}

impl ResponseTable {
    fn new() -> Self {
        Self {
            inner: Arc::new(TableInner {
                slot: Mutex::new(None),
                signaled: Condvar::new(),
            }),
        }
    }

    /// Feed one raw peer frame from the dispatch path.
    ///
    /// Completions are routed to the waiting caller. Asynchronous
    /// notifications are handed back so the dispatch path can queue them for
    /// the next drain. A frame that fails to decode means the transport is
    /// corrupt; there is no way to resynchronize, so the process aborts.
    pub fn deliver(&self, bytes: &[u8]) -> Option<PeerMessage> {
        match proto::decode_message(bytes) {
            Ok(PeerMessage::Completion(completion)) => {
                self.complete(completion);
                None
            }
            Ok(other) => Some(other),
            Err(err) => panic!("malformed peer frame: {err}"),
        }
    }

    /// Signal the caller waiting on `completion.id`.
    ///
    /// Panics if no transaction is outstanding or the id does not match the
    /// one being waited for: both mean the transport delivered responses out
    /// of the order this protocol assumes, which is unrecoverable
    /// (out-of-order completion is explicitly unsupported).
    pub fn complete(&self, completion: CompletionFrame) {
        let mut slot = self.inner.slot.lock().unwrap();
        let slot = slot
            .as_mut()
            .unwrap_or_else(|| panic!("completion id {} with no outstanding transaction", completion.id));
        assert_eq!(
            completion.id, slot.id,
            "response id mismatch on device {}: waited for {}, got {}",
            slot.dev, slot.id, completion.id,
        );
        slot.completion = Some(completion);
        self.inner.signaled.notify_all();
    }

    fn register(&self, dev: u16, id: u32) {
        let mut slot = self.inner.slot.lock().unwrap();
        assert!(
            slot.is_none(),
            "transaction registered while another is in flight"
        );
        *slot = Some(Slot {
            dev,
            id,
            completion: None,
        });
    }

    /// Block until the slot registered for (`dev`, `id`) is signaled, then
    /// consume and recycle it.
    fn wait(&self, dev: u16, id: u32) -> CompletionFrame {
        let mut slot = self.inner.slot.lock().unwrap();
        while !matches!(&*slot, Some(s) if s.completion.is_some()) {
            if slot.is_none() {
                panic!("waiting on a transaction that was never registered");
            }
            slot = self.inner.signaled.wait(slot).unwrap();
        }
        let s = slot.take().unwrap();
        debug_assert_eq!((s.dev, s.id), (dev, id));
        s.completion.unwrap()
    }
}

/// One logical connection to a remote peer; the unit of request/response
/// serialization.
///
/// Every transaction on a channel runs the full send → wait → drain sequence
/// as a single critical section under the channel's exclusive lock, so a
/// caller's access either fully happens in program order or blocks. Multiple
/// address windows may share one channel and therefore serialize through the
/// same lock, preserving global ordering across all accesses to that peer.
pub struct Channel {
    peer: String,
    default_attrs: BusAttrs,
    transport: Arc<dyn ChannelTransport>,
    table: ResponseTable,
    excl: Mutex<Exclusive>,
}

/// State owned by whichever caller currently holds the channel lock.
struct Exclusive {
    next_id: u32,
}

impl Channel {
    pub fn new(config: ChannelConfig, transport: Arc<dyn ChannelTransport>) -> Self {
        Self {
            peer: config.peer,
            default_attrs: config.default_attrs,
            transport,
            table: ResponseTable::new(),
            excl: Mutex::new(Exclusive { next_id: 0 }),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Handle for the transport's dispatch context to deliver peer frames.
    pub fn response_table(&self) -> ResponseTable {
        self.table.clone()
    }

    /// Issue a read of `buf.len()` bytes at `addr` on device `dev`.
    ///
    /// `buf` is only written on [`BusStatus::Ok`].
    pub fn read(&self, dev: u16, addr: u64, buf: &mut [u8], attrs: AccessAttrs) -> BusStatus {
        let (status, data) =
            self.transact(BusCommand::Read, dev, addr, buf.len() as u32, &[], attrs);
        if status.is_ok() {
            buf.copy_from_slice(&data);
        }
        status
    }

    /// Issue a write of `data` at `addr` on device `dev`.
    ///
    /// `data` is copied into the frame before this returns, so the caller's
    /// buffer is free for reuse regardless of when the peer acts on it.
    pub fn write(&self, dev: u16, addr: u64, data: &[u8], attrs: AccessAttrs) -> BusStatus {
        self.transact(BusCommand::Write, dev, addr, data.len() as u32, data, attrs)
            .0
    }

    fn transact(
        &self,
        cmd: BusCommand,
        dev: u16,
        addr: u64,
        size: u32,
        write_payload: &[u8],
        attrs: AccessAttrs,
    ) -> (BusStatus, Vec<u8>) {
        // The whole send → wait → drain sequence is one critical section.
        let mut excl = self.excl.lock().unwrap();

        // Ids are serialized by the lock; wraparound is silent and harmless
        // with one transaction in flight.
        let id = excl.next_id;
        excl.next_id = excl.next_id.wrapping_add(1);

        let frame = proto::RequestFrame {
            cmd,
            id,
            dev,
            clk: self.transport.sample_clock(),
            master_id: attrs.master_id,
            addr,
            attr: self.attr_word(attrs),
            size,
            payload: write_payload.to_vec(),
        };
        let bytes = proto::encode_request(&frame);

        // Register before sending so a dispatch context racing the send
        // always finds the slot.
        self.table.register(dev, id);
        trace!(peer = %self.peer, ?cmd, dev, id, addr, size, "bus transaction");
        self.transport.send_frame(&bytes);

        let completion = self.table.wait(dev, id);
        let status = BusStatus::from_wire(completion.status);

        let data = if cmd == BusCommand::Read && status.is_ok() {
            assert_eq!(
                completion.payload.len(),
                size as usize,
                "read completion for id {id} carries wrong payload length"
            );
            completion.payload
        } else {
            Vec::new()
        };

        if cmd == BusCommand::Read {
            // Reads are synchronization points: peer messages already queued
            // (e.g. an interrupt for the side effect this read observed) must
            // be processed before the caller sees the value, and the peer's
            // time base is re-paced afterwards.
            self.transport.drain_pending();
            self.transport.restart_sync_timer();
        }

        drop(excl);
        (status, data)
    }

    fn attr_word(&self, attrs: AccessAttrs) -> u32 {
        let mut word = self.default_attrs;
        if attrs.secure {
            word |= BusAttrs::SECURE;
        }
        word.bits()
    }
}
