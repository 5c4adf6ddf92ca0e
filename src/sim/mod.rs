//! Deterministic mesh simulation.
//!
//! Stands in for a real border router and radio network so the controller
//! can be exercised end to end without hardware. A single seed fixes every
//! latency, loss and ordering decision.
//!
//! # Module structure
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`time`] | [`VirtualTime`] |
//! | [`event`] | [`Event`], [`EventKind`], [`EventQueue`] min-heap |
//! | [`network`] | [`Network`] latency/loss/partitions, SplitMix64 RNG |
//! | [`mote`] | [`Mote`] resource emulation |
//! | [`harness`] | [`MeshSimulation`] run loop and churn scripting |

pub mod event;
pub mod harness;
pub mod mote;
pub mod network;
pub mod time;

#[cfg(test)]
mod tests;

pub use event::{Event, EventId, EventKind, EventQueue};
pub use harness::{MeshSimulation, SimulationConfig, SimulationStats};
pub use mote::Mote;
pub use network::{DeterministicRng, Network, NetworkConfig, NetworkCounters, NetworkDecision};
pub use time::VirtualTime;
