//! # tschctl: centralized TSCH schedule controller
//!
//! Keeps a mirror of an RPL mesh (who is whose parent, which cells every
//! node holds in every slotframe) and drives the motes' 6top resources so
//! the real schedules match the mirror. Topology changes arrive as children
//! reports; scheduling decisions come from a pluggable [`Hooks`] policy.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Reflector                                    │ ← sessions, token cache, churn
//! │  ┌──────────────┐   ┌─────────────────────┐  │
//! │  │    Hooks      │   │        Mesh         │  │
//! │  │ GreedyPolicy  │──►│ Topology · SlotFrame │  │ ← allocator operations
//! │  └──────────────┘   └─────────────────────┘  │
//! └───────────────┬──────────────▲───────────────┘
//!                 │ Request       │ Reply
//!        ┌────────▼──────────────┴────────┐
//!        │  Communicator                   │
//!        │  Outbox (sim) · Channel (tokio) │
//!        └─────────────────────────────────┘
//! ```
//!
//! Everything below the communicator is synchronous and deterministic; the
//! [`sim`] module runs it against emulated motes, [`driver`] on a tokio task.

pub mod allocator;
pub mod command;
pub mod communicator;
pub mod config;
pub mod driver;
pub mod error;
pub mod frame;
pub mod mesh;
pub mod node;
pub mod policy;
pub mod reflector;
pub mod sim;

// Re-exports for convenience.
pub use command::{Command, CommandId, Operation, Resource, ResourcePath, Session};
pub use communicator::{Communicator, Outbox, Reply, Request, Status};
pub use config::{ConfigLoader, ControllerConfig};
pub use driver::{ChannelCommunicator, ControllerHandle};
pub use error::{ControllerError, ControllerResult};
pub use frame::{Cell, CellFilter, LinkOption, LinkType, SlotFrame};
pub use mesh::Mesh;
pub use node::{NodeId, Topology};
pub use policy::GreedyPolicy;
pub use reflector::{ChurnSettings, Hooks, NoHooks, Reflector};
pub use sim::{MeshSimulation, SimulationConfig};
