//! In-process fake peer for exercising the channel layer without a real
//! transport.
//!
//! [`LoopbackTransport`] answers every request out of a byte-addressed sparse
//! memory, so a write followed by a read round-trips through the full encode →
//! send → correlate → decode path. Tests can force failure statuses, queue
//! asynchronous peer notifications to be observed at the next drain, and
//! inspect a journal of transport-level events to assert ordering.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use busbridge_protocol::{
    decode_request, BusCommand, CompletionFrame, PeerMessage, RequestFrame, STATUS_OK,
};

use crate::channel::ResponseTable;
use crate::transport::{ChannelTransport, NotificationSink};

/// Transport-level occurrences, in the order the loopback observed them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackEvent {
    /// A request frame was handed to the transport.
    Send { id: u32 },
    /// The channel drained pending peer messages.
    Drain,
    /// The channel restarted the peer's sync timer.
    SyncRestart,
}

#[derive(Default)]
struct LoopbackState {
    table: Option<ResponseTable>,
    sink: Option<Arc<dyn NotificationSink>>,
    mem: HashMap<(u16, u64), u8>,
    queued: VecDeque<PeerMessage>,
    drained: Vec<PeerMessage>,
    sent: Vec<RequestFrame>,
    events: Vec<LoopbackEvent>,
    forced_status: Option<u8>,
    completion_delay: Option<Duration>,
    clock: u64,
    sync_restarts: u64,
}

pub struct LoopbackTransport {
    state: Mutex<LoopbackState>,
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport").finish_non_exhaustive()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoopbackState::default()),
        }
    }

    /// Wire the loopback to the channel it serves. Must be called before the
    /// first transaction.
    pub fn connect(&self, table: ResponseTable) {
        self.state.lock().unwrap().table = Some(table);
    }

    /// Receive asynchronous notifications processed during drains.
    pub fn set_sink(&self, sink: Arc<dyn NotificationSink>) {
        self.state.lock().unwrap().sink = Some(sink);
    }

    /// Answer subsequent requests with `status` instead of performing them.
    pub fn force_status(&self, status: Option<u8>) {
        self.state.lock().unwrap().forced_status = status;
    }

    /// Queue a peer message to be observed at the next drain.
    pub fn push_notification(&self, msg: PeerMessage) {
        self.state.lock().unwrap().queued.push_back(msg);
    }

    /// Deliver completions from a separate thread after `delay`, instead of
    /// synchronously inside [`ChannelTransport::send_frame`]. Exercises the
    /// blocking wait path the way a real reader thread would.
    pub fn defer_completions(&self, delay: Duration) {
        self.state.lock().unwrap().completion_delay = Some(delay);
    }

    /// Notifications processed so far, in drain order.
    pub fn drained(&self) -> Vec<PeerMessage> {
        self.state.lock().unwrap().drained.clone()
    }

    /// Transport event journal.
    pub fn events(&self) -> Vec<LoopbackEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn sync_restarts(&self) -> u64 {
        self.state.lock().unwrap().sync_restarts
    }

    pub fn sent_ids(&self) -> Vec<u32> {
        self.state.lock().unwrap().sent.iter().map(|f| f.id).collect()
    }

    pub fn sent_addrs(&self) -> Vec<u64> {
        self.state.lock().unwrap().sent.iter().map(|f| f.addr).collect()
    }

    pub fn sent_attrs(&self) -> Vec<u32> {
        self.state.lock().unwrap().sent.iter().map(|f| f.attr).collect()
    }

    /// Peer-side memory contents at (`dev`, `addr`), unwritten bytes read 0.
    pub fn peek(&self, dev: u16, addr: u64, len: usize) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        (0..len as u64)
            .map(|i| state.mem.get(&(dev, addr + i)).copied().unwrap_or(0))
            .collect()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTransport for LoopbackTransport {
    fn send_frame(&self, frame: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let req = decode_request(frame).expect("loopback received malformed request");
        state.events.push(LoopbackEvent::Send { id: req.id });

        let completion = match state.forced_status {
            Some(status) => CompletionFrame {
                id: req.id,
                status,
                payload: Vec::new(),
            },
            None => match req.cmd {
                BusCommand::Write => {
                    for (i, byte) in req.payload.iter().enumerate() {
                        state.mem.insert((req.dev, req.addr + i as u64), *byte);
                    }
                    CompletionFrame {
                        id: req.id,
                        status: STATUS_OK,
                        payload: Vec::new(),
                    }
                }
                BusCommand::Read => {
                    let payload = (0..req.size as u64)
                        .map(|i| state.mem.get(&(req.dev, req.addr + i)).copied().unwrap_or(0))
                        .collect();
                    CompletionFrame {
                        id: req.id,
                        status: STATUS_OK,
                        payload,
                    }
                }
            },
        };

        let table = state
            .table
            .clone()
            .expect("loopback transport not connected to a channel");
        let delay = state.completion_delay;
        state.sent.push(req);
        drop(state);

        match delay {
            // Hand the completion to a separate "dispatch" thread, like a
            // transport reader would.
            Some(delay) => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    table.complete(completion);
                });
            }
            None => table.complete(completion),
        }
    }

    fn sample_clock(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.clock += 1;
        state.clock
    }

    fn drain_pending(&self) {
        let (pending, sink) = {
            let mut state = self.state.lock().unwrap();
            state.events.push(LoopbackEvent::Drain);
            let pending: Vec<PeerMessage> = state.queued.drain(..).collect();
            (pending, state.sink.clone())
        };

        for msg in &pending {
            if let Some(sink) = &sink {
                match msg {
                    PeerMessage::IrqLevel { line, level } => sink.irq_level(*line, *level),
                    PeerMessage::Log { level, message } => sink.peer_log(*level, message),
                    PeerMessage::Completion(_) => {
                        panic!("completion queued as an asynchronous notification")
                    }
                }
            }
        }

        self.state.lock().unwrap().drained.extend(pending);
    }

    fn restart_sync_timer(&self) {
        let mut state = self.state.lock().unwrap();
        state.sync_restarts += 1;
        state.events.push(LoopbackEvent::SyncRestart);
    }
}
