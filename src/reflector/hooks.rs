//! Extension points of the reflector.

use serde_json::Value;

use crate::command::{ResourcePath, Session};
use crate::frame::Cell;
use crate::mesh::Mesh;
use crate::node::NodeId;

use super::reply::Report;

/// Scheduling policy plugged into a [`Reflector`](super::Reflector).
///
/// Every hook runs after the reflector has updated its own state for the
/// reply and may return sessions to start. All hooks are no-ops by
/// default except [`probed`](Hooks::probed), which subscribes to the
/// freshly defined statistics.
pub trait Hooks {
    /// `child` joined the tree under `parent`.
    fn connected(&mut self, _mesh: &mut Mesh, _child: NodeId, _parent: NodeId) -> Vec<Session> {
        Vec::new()
    }

    /// `node` left the tree. It is already gone from the topology.
    fn disconnected(&mut self, _mesh: &mut Mesh, _node: NodeId) -> Vec<Session> {
        Vec::new()
    }

    /// `node` moved away from `old_parent`; its new parent is in the topology.
    fn rewired(&mut self, _mesh: &mut Mesh, _node: NodeId, _old_parent: NodeId) -> Vec<Session> {
        Vec::new()
    }

    /// `node` installed `frame` under local id `alias`.
    fn framed(&mut self, _mesh: &mut Mesh, _node: NodeId, _frame: &str, _alias: u8) -> Vec<Session> {
        Vec::new()
    }

    /// `node` confirmed `cell`.
    fn celled(&mut self, _mesh: &mut Mesh, _node: NodeId, _cell: &Cell) -> Vec<Session> {
        Vec::new()
    }

    /// `node` accepted a statistics definition under `id`.
    fn probed(&mut self, mesh: &mut Mesh, node: NodeId, id: u16) -> Vec<Session> {
        vec![mesh.get_remote_statistics(node, id, true)]
    }

    /// `node` answered a read on `path`.
    fn reported(
        &mut self,
        _mesh: &mut Mesh,
        _node: NodeId,
        _path: &ResourcePath,
        _report: &Report,
    ) -> Vec<Session> {
        Vec::new()
    }

    /// `node` acknowledged a delete on `path`.
    fn deleted(
        &mut self,
        _mesh: &mut Mesh,
        _node: NodeId,
        _path: &ResourcePath,
        _info: &Value,
    ) -> Vec<Session> {
        Vec::new()
    }

    /// One churn tick has elapsed.
    fn tick(&mut self, _mesh: &mut Mesh) -> Vec<Session> {
        Vec::new()
    }
}

/// Reflector without a policy: tracks the tree and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl Hooks for NoHooks {}
