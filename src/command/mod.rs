//! Commands: one remote request each, correlated with its reply by token.
//!
//! # Module structure
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`resource`] | [`Resource`] tables, [`ResourcePath`], wire bodies |
//! | [`session`] | [`Session`], the barrier-synchronised block queue |

pub mod resource;
pub mod session;

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::frame::{LinkOption, LinkType};
use crate::node::NodeId;

pub use resource::{Resource, ResourcePath};
pub use session::{Session, SessionError};

// ── Command ID ────────────────────────────────────────────────────────

/// Correlation token of a command.
///
/// Tokens are strictly increasing per generator, so a stale or duplicated
/// reply can never be mistaken for a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(u64);

impl CommandId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        CommandId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C#{}", self.0)
    }
}

/// Monotonic token generator, owned by one [`Mesh`](crate::mesh::Mesh).
#[derive(Debug, Clone)]
pub struct CommandIdGen {
    next: u64,
}

impl CommandIdGen {
    pub fn new() -> Self {
        CommandIdGen { next: 1 }
    }

    pub fn starting_at(start: u64) -> Self {
        CommandIdGen { next: start }
    }

    pub fn next_id(&mut self) -> CommandId {
        let id = CommandId(self.next);
        self.next += 1;
        id
    }

    pub fn peek(&self) -> CommandId {
        CommandId(self.next)
    }
}

impl Default for CommandIdGen {
    fn default() -> Self {
        Self::new()
    }
}

// ── Operation ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Get,
    /// A standing subscription: many replies share one token.
    Observe,
    Post,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Get => "GET",
            Operation::Observe => "OBSERVE",
            Operation::Post => "POST",
            Operation::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

// ── Payload ───────────────────────────────────────────────────────────

/// A cell install before the owner's frame alias is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRequest {
    pub slot: u16,
    pub channel: u8,
    pub option: LinkOption,
    pub link_type: LinkType,
    pub target: NodeId,
}

/// What a command carries to the mote.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Slotframe { size: u16 },
    Cell(CellRequest),
    Statistics { metrics: Vec<String> },
    Json(Value),
}

// ── Route ─────────────────────────────────────────────────────────────

/// Which handler processes the replies of a command.
///
/// Fixed when the command is dispatched, from its operation and path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Children,
    SlotframeInstall,
    CellInstall,
    CellRemoval,
    ProbeInstall,
    Report,
    Removal,
}

impl Route {
    pub fn select(op: Operation, path: &ResourcePath) -> Route {
        match (op, path.resource()) {
            (Operation::Get | Operation::Observe, Some(Resource::RplChildren)) => Route::Children,
            (Operation::Post, Some(Resource::Slotframe)) => Route::SlotframeInstall,
            (Operation::Post, Some(Resource::CellList)) => Route::CellInstall,
            (Operation::Delete, Some(Resource::CellList)) => Route::CellRemoval,
            (Operation::Post, Some(Resource::StatisticsDefinition)) => Route::ProbeInstall,
            (Operation::Delete, _) => Route::Removal,
            _ => Route::Report,
        }
    }
}

// ── Command ───────────────────────────────────────────────────────────

/// A single remote operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: CommandId,
    pub op: Operation,
    pub to: NodeId,
    pub path: ResourcePath,
    pub payload: Payload,
    /// Context that must survive the round trip but never hits the wire.
    pub attachment: BTreeMap<String, Value>,
    /// Filled in at dispatch.
    pub route: Option<Route>,
}

/// Attachment key naming the slotframe a command belongs to.
pub const ATTACH_FRAME: &str = "frame";
/// Attachment key marking a liveness probe.
pub const ATTACH_PROBE: &str = "probe";

impl Command {
    pub fn new(id: CommandId, op: Operation, to: NodeId, path: ResourcePath) -> Self {
        Command {
            id,
            op,
            to,
            path,
            payload: Payload::Empty,
            attachment: BTreeMap::new(),
            route: None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn attach(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attachment.insert(key.to_string(), value.into());
        self
    }

    pub fn attachment(&self, key: &str) -> Option<&Value> {
        self.attachment.get(key)
    }

    /// Name of the slotframe this command belongs to, if any.
    pub fn frame(&self) -> Option<&str> {
        self.attachment(ATTACH_FRAME)?.as_str()
    }

    pub fn is_probe(&self) -> bool {
        self.attachment(ATTACH_PROBE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}/{}", self.id, self.op, self.to, self.path)
    }
}
