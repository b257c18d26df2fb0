//! Event bus
//!
//! A process-lifetime mpsc channel that funnels fixed-size event records
//! from the producer threads (signal watcher, engine callbacks) into the
//! one orchestrator thread. Producers never block; the consumer blocks in
//! [`EventBus::next_event`] with no timeout; event arrival is the only
//! thing that drives the dispatch loop.
//!
//! Ordering is FIFO per producer. Nothing is guaranteed about interleaving
//! across producers and the orchestrator must not assume any.

use std::sync::mpsc::{channel, Receiver, Sender};

use arrayvec::ArrayString;

use crate::engine::PortId;
use crate::Error;

/// Longest client global name an event record can carry.
pub const MAX_CLIENT_NAME_LEN: usize = 128;

/// A client global name stored inline, keeping [`Event`] `Copy` and
/// compile-time sized.
pub type ClientName = ArrayString<MAX_CLIENT_NAME_LEN>;

/// One cross-thread event record.
///
/// Constructed by a producer, copied into the channel, consumed and
/// dropped by the orchestrator. Never shared, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// An OS signal arrived. `sender_pid` is the originating process
    /// (0 when the OS reports none). Meaningful for SIGCHLD.
    Signal { signal: i32, sender_pid: i32 },
    /// A server port appeared (`registered`) or went away.
    Port { port_id: PortId, registered: bool },
    /// A server client appeared (`registered`) or went away.
    Client { name: ClientName, registered: bool },
}

/// The consumer end, owned by the orchestrator thread.
pub struct EventBus {
    rx: Receiver<Event>,
}

/// Cheap clonable handle from which producers mint their publishers.
#[derive(Clone)]
pub struct BusHandle {
    tx: Sender<Event>,
}

/// A producer's own sending end, labeled for diagnostics.
#[derive(Clone)]
pub struct Publisher {
    context: &'static str,
    tx: Sender<Event>,
}

impl EventBus {
    /// Create the bus and the handle producers clone their publishers
    /// from. The consumer side holds no sender, so a disconnect in
    /// `next_event` really means every producer is gone.
    pub fn new() -> (Self, BusHandle) {
        let (tx, rx) = channel();
        (Self { rx }, BusHandle { tx })
    }

    /// Block until the next event arrives.
    ///
    /// The startup order keeps at least one producer alive for as long as
    /// the loop runs, so a disconnect here is an invariant break, not an
    /// expected shutdown path.
    pub fn next_event(&self) -> Result<Event, Error> {
        self.rx.recv().map_err(|_| Error::BusClosed)
    }
}

impl BusHandle {
    /// Mint a publisher for one producer context.
    pub fn publisher(&self, context: &'static str) -> Publisher {
        Publisher {
            context,
            tx: self.tx.clone(),
        }
    }
}

impl Publisher {
    /// Hand an event to the orchestrator. Never blocks the producer; if
    /// the consumer is already gone the event is dropped with a note.
    pub fn publish(&self, event: Event) {
        if self.tx.send(event).is_err() {
            log::warn!("{}: event bus consumer gone, dropping event", self.context);
        }
    }
}
