//! TSCH scheduling resources: slotframes and the cells inside them.

pub mod cell;
pub mod slotframe;

pub use cell::{Cell, CellFilter, LinkOption, LinkType};
pub use slotframe::{LinkError, SlotFrame};

/// Channel offsets available to the hopping sequence (IEEE 802.15.4, 2.4 GHz).
pub const MAX_CHANNELS: u8 = 16;

/// Slot 0 carries the minimal shared cell and is never allocated.
pub const MINIMAL_SLOT: u16 = 0;
