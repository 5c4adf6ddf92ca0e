//! Events and the deterministic event queue.
//!
//! The queue is a `BinaryHeap` with reversed `Ord` on [`Event`], keyed by
//! `(at, id)`. Ids are strictly increasing, so events scheduled for the
//! same instant dispatch in creation order and two runs with the same
//! seed replay identically.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use crate::communicator::{Reply, Request};
use crate::node::NodeId;

use super::time::VirtualTime;

// ── Event ID ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

// ── Event kind ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A request reaches its mote.
    Request(Request),
    /// A reply or notification reaches the controller.
    Reply(Reply),
    /// Controller housekeeping tick.
    Tick,
    /// Motes push statistics to their observers.
    Report,
    /// `node` associates with `parent`.
    Join { node: NodeId, parent: NodeId },
    /// `node` and everything below it go silent.
    Leave { node: NodeId },
    /// `node` switches to `parent`.
    Rewire { node: NodeId, parent: NodeId },
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Request(r) => write!(f, "Request({} {:?} {})", r.token, r.op, r.path),
            EventKind::Reply(r) => write!(f, "Reply({} {} from {})", r.token, r.status, r.from),
            EventKind::Tick => write!(f, "Tick"),
            EventKind::Report => write!(f, "Report"),
            EventKind::Join { node, parent } => write!(f, "Join({} → {})", node, parent),
            EventKind::Leave { node } => write!(f, "Leave({})", node),
            EventKind::Rewire { node, parent } => write!(f, "Rewire({} → {})", node, parent),
        }
    }
}

// ── Event ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Event {
    pub id: EventId,
    pub at: VirtualTime,
    pub kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.id == other.id
    }
}

impl Eq for Event {}

/// Smallest `(at, id)` first: reversed for `BinaryHeap`.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at).then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ── Queue ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Event>,
    next_id: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: VirtualTime, kind: EventKind) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.heap.push(Event { id, at, kind });
        id
    }

    pub fn pop_next(&mut self) -> Option<Event> {
        self.heap.pop()
    }

    pub fn peek_next(&self) -> Option<&Event> {
        self.heap.peek()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
