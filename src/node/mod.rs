//! Node identity and the controller's view of the routing tree.
//!
//! # Module structure
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`id`] | [`NodeId`] endpoint value type |
//! | [`topology`] | [`Topology`], the local DoDAG mirror |

pub mod id;
pub mod topology;

pub use id::{NodeId, DEFAULT_PORT, DEFAULT_PREFIX};
pub use topology::{Edge, Topology};
