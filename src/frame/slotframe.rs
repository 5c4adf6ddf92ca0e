//! The slotframe container: cells, per-node aliases and blacklisted coordinates.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::trace;

use super::cell::{Cell, CellFilter, LinkOption};
use super::MAX_CHANNELS;
use crate::node::NodeId;

/// Why a cell could not be added to a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("slot {slot} is outside a frame of {size} slots")]
    SlotOutOfRange { slot: u16, size: u16 },

    #[error("channel offset {0} is out of range")]
    ChannelOutOfRange(u8),

    #[error("{owner} already holds a cell at slot {slot}, channel {channel}")]
    Occupied { owner: NodeId, slot: u16, channel: u8 },

    #[error("{owner} already uses that radio direction at slot {slot}")]
    DirectionClaimed { owner: NodeId, slot: u16 },
}

/// A centrally defined slotframe, replicated onto every mote.
///
/// Each mote names its copy with a local alias, learned from its
/// acknowledgement of the install.
#[derive(Debug, Clone)]
pub struct SlotFrame {
    name: String,
    size: u16,
    cells: Vec<Cell>,
    aliases: BTreeMap<NodeId, u8>,
    /// Unusable `(slot, channel)` coordinates.
    blacklist: BTreeSet<(u16, u8)>,
}

impl SlotFrame {
    pub fn new(name: impl Into<String>, size: u16) -> Self {
        SlotFrame {
            name: name.into(),
            size,
            cells: Vec::new(),
            aliases: BTreeMap::new(),
            blacklist: BTreeSet::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cells_at(&self, slot: u16) -> impl Iterator<Item = &Cell> {
        self.cells.iter().filter(move |c| c.slot == slot)
    }

    // ── Aliases ───────────────────────────────────────────────────

    pub fn alias_id(&self, node: NodeId) -> Option<u8> {
        self.aliases.get(&node).copied()
    }

    /// Record `node`'s local id for this frame and stamp its cells with it.
    pub fn set_alias_id(&mut self, node: NodeId, alias: u8) {
        self.aliases.insert(node, alias);
        for cell in self.cells.iter_mut().filter(|c| c.owner == node) {
            cell.alias = Some(alias);
        }
    }

    pub fn remove_alias(&mut self, node: NodeId) -> Option<u8> {
        self.aliases.remove(&node)
    }

    pub fn aliases(&self) -> &BTreeMap<NodeId, u8> {
        &self.aliases
    }

    // ── Cells ─────────────────────────────────────────────────────

    /// Insert a reservation.
    ///
    /// Rejected if `owner` already holds `(slot, channel)`, or already uses
    /// the same radio direction anywhere in `slot`.
    pub fn add_link(&mut self, mut cell: Cell) -> Result<(), LinkError> {
        if cell.slot >= self.size {
            return Err(LinkError::SlotOutOfRange {
                slot: cell.slot,
                size: self.size,
            });
        }
        if cell.channel >= MAX_CHANNELS {
            return Err(LinkError::ChannelOutOfRange(cell.channel));
        }
        for existing in self.cells.iter().filter(|c| c.owner == cell.owner && c.slot == cell.slot) {
            if existing.channel == cell.channel {
                return Err(LinkError::Occupied {
                    owner: cell.owner,
                    slot: cell.slot,
                    channel: cell.channel,
                });
            }
            if existing.option.shares_direction(cell.option) {
                return Err(LinkError::DirectionClaimed {
                    owner: cell.owner,
                    slot: cell.slot,
                });
            }
        }
        if cell.alias.is_none() {
            cell.alias = self.alias_id(cell.owner);
        }
        trace!(frame = %self.name, %cell, "reserved");
        self.cells.push(cell);
        Ok(())
    }

    /// Every cell matching `filter`, in insertion order.
    pub fn cells_similar_to(&self, filter: &CellFilter) -> Vec<&Cell> {
        self.cells.iter().filter(|c| filter.matches(c)).collect()
    }

    /// Remove and return every cell matching `filter`.
    pub fn remove_cells(&mut self, filter: &CellFilter) -> Vec<Cell> {
        let (removed, kept): (Vec<Cell>, Vec<Cell>) =
            self.cells.drain(..).partition(|c| filter.matches(c));
        self.cells = kept;
        removed
    }

    /// Remove every cell owned by `node`.
    pub fn delete_links_of(&mut self, node: NodeId) -> Vec<Cell> {
        self.remove_cells(&CellFilter::new().owner(node))
    }

    /// Remove the far-side cells of `cell` held by other owners.
    pub fn take_paired(&mut self, cell: &Cell) -> Vec<Cell> {
        let (removed, kept): (Vec<Cell>, Vec<Cell>) =
            self.cells.drain(..).partition(|c| cell.pairs_with(c));
        self.cells = kept;
        removed
    }

    /// Remove one exact reservation.
    pub fn remove_cell(&mut self, cell: &Cell) -> Option<Cell> {
        let index = self.cells.iter().position(|c| c.same_reservation(cell))?;
        Some(self.cells.remove(index))
    }

    /// The reservation a cell request was built from, if still held.
    pub fn reservation(&self, owner: NodeId, slot: u16, channel: u8, option: LinkOption) -> Option<&Cell> {
        self.cells.iter().find(|c| {
            c.owner == owner && c.slot == slot && c.channel == channel && c.option == option
        })
    }

    /// Remove a reservation the owner never acknowledged.
    pub fn take_reservation(
        &mut self,
        owner: NodeId,
        slot: u16,
        channel: u8,
        option: LinkOption,
    ) -> Option<Cell> {
        let index = self.cells.iter().position(|c| {
            c.owner == owner
                && c.slot == slot
                && c.channel == channel
                && c.option == option
                && !c.is_confirmed()
        })?;
        Some(self.cells.remove(index))
    }

    /// Attach the owner-assigned id to a pending reservation.
    pub fn set_remote_cell_id(
        &mut self,
        owner: NodeId,
        slot: u16,
        channel: u8,
        option: LinkOption,
        remote_id: u16,
    ) -> Option<&Cell> {
        let cell = self.cells.iter_mut().find(|c| {
            c.owner == owner && c.slot == slot && c.channel == channel && c.option == option
        })?;
        cell.remote_id = Some(remote_id);
        Some(cell)
    }

    pub fn cell_by_remote_id(&self, owner: NodeId, remote_id: u16) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|c| c.owner == owner && c.remote_id == Some(remote_id))
    }

    // ── Blacklist ─────────────────────────────────────────────────

    #[inline]
    pub fn is_blacklisted(&self, slot: u16, channel: u8) -> bool {
        self.blacklist.contains(&(slot, channel))
    }

    /// Returns `false` if the coordinate was already blacklisted.
    pub fn blacklist_coordinate(&mut self, slot: u16, channel: u8) -> bool {
        self.blacklist.insert((slot, channel))
    }

    pub fn blacklisted(&self) -> impl Iterator<Item = (u16, u8)> + '_ {
        self.blacklist.iter().copied()
    }
}
