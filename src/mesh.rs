//! Controller-side state of the network: topology, slotframes and the
//! command token sequence.
//!
//! A `Mesh` is owned by one [`Reflector`](crate::reflector::Reflector).
//! Hooks get `&mut Mesh` to plan new sessions; structural changes go
//! through the allocator operations in [`crate::allocator`].

use std::collections::BTreeMap;

use tracing::debug;

use crate::command::{Command, CommandIdGen, Operation, ResourcePath};
use crate::error::{ControllerError, ControllerResult};
use crate::frame::{SlotFrame, MAX_CHANNELS};
use crate::node::{NodeId, Topology, DEFAULT_PREFIX};

#[derive(Debug, Clone)]
pub struct Mesh {
    pub(crate) topology: Topology,
    pub(crate) frames: BTreeMap<String, SlotFrame>,
    ids: CommandIdGen,
    channels: u8,
    prefix: u16,
}

impl Mesh {
    /// A mesh holding only the border router.
    pub fn new(root: NodeId) -> Self {
        Mesh {
            topology: Topology::new(root),
            frames: BTreeMap::new(),
            ids: CommandIdGen::new(),
            channels: MAX_CHANNELS,
            prefix: DEFAULT_PREFIX,
        }
    }

    /// Restrict allocation to the first `channels` channel offsets.
    pub fn with_channels(mut self, channels: u8) -> ControllerResult<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(ControllerError::InvalidConfig(format!(
                "channel count {} outside 1..={}",
                channels, MAX_CHANNELS
            )));
        }
        self.channels = channels;
        Ok(self)
    }

    /// Prefix used to qualify bare interface ids reported by motes.
    pub fn with_prefix(mut self, prefix: u16) -> Self {
        self.prefix = prefix;
        self
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.topology.root()
    }

    #[inline]
    pub fn channels(&self) -> u8 {
        self.channels
    }

    #[inline]
    pub fn prefix(&self) -> u16 {
        self.prefix
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn frames(&self) -> impl Iterator<Item = &SlotFrame> {
        self.frames.values()
    }

    pub fn frame(&self, name: &str) -> ControllerResult<&SlotFrame> {
        self.frames
            .get(name)
            .ok_or_else(|| ControllerError::UnknownFrame(name.to_string()))
    }

    pub(crate) fn frame_mut(&mut self, name: &str) -> ControllerResult<&mut SlotFrame> {
        self.frames
            .get_mut(name)
            .ok_or_else(|| ControllerError::UnknownFrame(name.to_string()))
    }

    /// Define a slotframe centrally. Returns `false` if the name is taken.
    pub fn register_frame(&mut self, frame: SlotFrame) -> bool {
        if self.frames.contains_key(frame.name()) {
            return false;
        }
        debug!(frame = frame.name(), size = frame.size(), "slotframe registered");
        self.frames.insert(frame.name().to_string(), frame);
        true
    }

    /// Mint a command with a fresh token.
    pub fn command(&mut self, op: Operation, to: NodeId, path: ResourcePath) -> Command {
        Command::new(self.ids.next_id(), op, to, path)
    }
}
