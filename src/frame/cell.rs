//! Cells: (slot, channel) reservations owned by a single mote.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

bitflags! {
    /// 6top link option bitmask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct LinkOption: u8 {
        const TX = 1;
        const RX = 2;
        const SHARED = 4;
        const TIMEKEEPING = 8;
    }
}

impl LinkOption {
    pub const UNICAST_TX: LinkOption = LinkOption::TX;
    pub const UNICAST_RX: LinkOption = LinkOption::RX;
    pub const BROADCAST_TX: LinkOption = LinkOption::TX.union(LinkOption::TIMEKEEPING);
    pub const BROADCAST_RX: LinkOption = LinkOption::RX.union(LinkOption::TIMEKEEPING);
    /// The always-on shared cell at slot 0.
    pub const MINIMAL: LinkOption = LinkOption::TX
        .union(LinkOption::RX)
        .union(LinkOption::SHARED);

    #[inline]
    pub fn transmits(self) -> bool {
        self.contains(LinkOption::TX)
    }

    #[inline]
    pub fn receives(self) -> bool {
        self.contains(LinkOption::RX)
    }

    /// Two options clash when they claim the same radio direction.
    #[inline]
    pub fn shares_direction(self, other: LinkOption) -> bool {
        (self.transmits() && other.transmits()) || (self.receives() && other.receives())
    }
}

/// 6top link type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum LinkType {
    Normal,
    Advertising,
}

impl LinkType {
    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            LinkType::Normal => 0,
            LinkType::Advertising => 1,
        }
    }
}

impl From<LinkType> for u8 {
    fn from(t: LinkType) -> Self {
        t.as_u8()
    }
}

impl TryFrom<u8> for LinkType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LinkType::Normal),
            1 => Ok(LinkType::Advertising),
            other => Err(format!("unknown link type {}", other)),
        }
    }
}

/// One side of a link as installed on `owner`.
///
/// A unicast link is two cells at the same coordinate: a Tx cell on `tx`
/// and an Rx cell on `rx`. A broadcast link is one Tx cell plus an Rx cell
/// on every listening neighbour, all with `rx == None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub owner: NodeId,
    pub slot: u16,
    pub channel: u8,
    /// The owner's local id for the slotframe, once known.
    pub alias: Option<u8>,
    pub link_type: LinkType,
    pub option: LinkOption,
    pub tx: NodeId,
    pub rx: Option<NodeId>,
    /// Cell id assigned by the owner when it acknowledged the install.
    pub remote_id: Option<u16>,
}

impl Cell {
    /// The transmitting side of a link.
    pub fn transmitter(tx: NodeId, slot: u16, channel: u8, rx: Option<NodeId>) -> Self {
        let (option, link_type) = match rx {
            Some(_) => (LinkOption::UNICAST_TX, LinkType::Normal),
            None => (LinkOption::BROADCAST_TX, LinkType::Advertising),
        };
        Cell {
            owner: tx,
            slot,
            channel,
            alias: None,
            link_type,
            option,
            tx,
            rx,
            remote_id: None,
        }
    }

    /// The receiving side of a link, installed on `owner`.
    pub fn receiver(owner: NodeId, slot: u16, channel: u8, tx: NodeId, rx: Option<NodeId>) -> Self {
        let (option, link_type) = match rx {
            Some(_) => (LinkOption::UNICAST_RX, LinkType::Normal),
            None => (LinkOption::BROADCAST_RX, LinkType::Advertising),
        };
        Cell {
            owner,
            slot,
            channel,
            alias: None,
            link_type,
            option,
            tx,
            rx,
            remote_id: None,
        }
    }

    /// The node the owner talks to through this cell.
    pub fn target(&self) -> NodeId {
        match self.rx {
            None => NodeId::BROADCAST,
            Some(rx) if self.option.transmits() => rx,
            Some(_) => self.tx,
        }
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.rx.is_none()
    }

    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.remote_id.is_some()
    }

    /// Same owner, coordinate and direction.
    pub fn same_reservation(&self, other: &Cell) -> bool {
        self.owner == other.owner
            && self.slot == other.slot
            && self.channel == other.channel
            && self.option == other.option
    }

    /// `true` if `other` is the far side of the same logical link.
    ///
    /// The Rx side of a broadcast does not pair back to the transmitter:
    /// the transmitter keeps serving its other listeners.
    pub fn pairs_with(&self, other: &Cell) -> bool {
        if self.owner == other.owner
            || self.slot != other.slot
            || self.channel != other.channel
            || self.tx != other.tx
            || self.rx != other.rx
        {
            return false;
        }
        match self.rx {
            Some(_) => self.option.transmits() != other.option.transmits(),
            None => self.option.transmits() && other.option.receives(),
        }
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cell({} so={} co={} lo={} -> {})",
            self.owner,
            self.slot,
            self.channel,
            self.option.bits(),
            self.target()
        )
    }
}

/// Match criteria for [`SlotFrame::cells_similar_to`](super::SlotFrame::cells_similar_to).
///
/// Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellFilter {
    pub owner: Option<NodeId>,
    pub slot: Option<u16>,
    pub channel: Option<u8>,
    pub option: Option<LinkOption>,
    pub link_type: Option<LinkType>,
    pub alias: Option<u8>,
    pub target: Option<NodeId>,
    pub tx: Option<NodeId>,
    /// `Some(None)` selects broadcast cells only.
    pub rx: Option<Option<NodeId>>,
}

impl CellFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(mut self, owner: NodeId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn slot(mut self, slot: u16) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn option(mut self, option: LinkOption) -> Self {
        self.option = Some(option);
        self
    }

    pub fn link_type(mut self, link_type: LinkType) -> Self {
        self.link_type = Some(link_type);
        self
    }

    pub fn alias(mut self, alias: u8) -> Self {
        self.alias = Some(alias);
        self
    }

    pub fn target(mut self, target: NodeId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn tx(mut self, tx: NodeId) -> Self {
        self.tx = Some(tx);
        self
    }

    pub fn rx(mut self, rx: Option<NodeId>) -> Self {
        self.rx = Some(rx);
        self
    }

    pub fn matches(&self, cell: &Cell) -> bool {
        self.owner.map_or(true, |v| cell.owner == v)
            && self.slot.map_or(true, |v| cell.slot == v)
            && self.channel.map_or(true, |v| cell.channel == v)
            && self.option.map_or(true, |v| cell.option == v)
            && self.link_type.map_or(true, |v| cell.link_type == v)
            && self.alias.map_or(true, |v| cell.alias == Some(v))
            && self.target.map_or(true, |v| cell.target() == v)
            && self.tx.map_or(true, |v| cell.tx == v)
            && self.rx.map_or(true, |v| cell.rx == v)
    }
}
