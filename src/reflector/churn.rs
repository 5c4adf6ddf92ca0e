//! Topology churn: children reports, lost-child countdowns and disconnects.

use tracing::{debug, info};

use crate::command::{Operation, Resource, ResourcePath, Session, ATTACH_PROBE};
use crate::communicator::Communicator;
use crate::node::NodeId;

use super::hooks::Hooks;
use super::Reflector;

/// A child missing from its parent's last report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct LostChild {
    pub(super) parent: NodeId,
    pub(super) remaining: u32,
}

impl<C: Communicator, H: Hooks> Reflector<C, H> {
    /// Reconcile `parent`'s reported children with the topology.
    ///
    /// Missing children start a countdown instead of being dropped. Listed
    /// children are attached; a first attachment is a join, a parent change
    /// a rewire. A claim that would hang a node below its own descendant is
    /// parked until the descendant moves away.
    pub(super) fn on_children(&mut self, parent: NodeId, listed: &[NodeId], probe: bool) -> Vec<Session> {
        let mut sessions = Vec::new();
        if probe {
            if let Some(lost) = self.lost.get_mut(&parent) {
                lost.remaining = self.churn.lost_child_ticks;
                debug!(node = %parent, "probe answered, countdown reset");
            }
        }

        for child in self.mesh.topology.children(parent) {
            if listed.contains(&child) || self.lost.contains_key(&child) {
                continue;
            }
            info!(node = %child, %parent, ticks = self.churn.lost_child_ticks, "child missing, countdown started");
            self.lost.insert(
                child,
                LostChild {
                    parent,
                    remaining: self.churn.lost_child_ticks,
                },
            );
        }
        self.deferred
            .retain(|child, claimed| *claimed != parent || listed.contains(child));

        let mut changed = false;
        for &child in listed {
            changed |= self.adopt(child, parent, &mut sessions);
        }
        while changed {
            changed = false;
            let parked: Vec<(NodeId, NodeId)> = self.deferred.iter().map(|(c, p)| (*c, *p)).collect();
            for (child, claimed) in parked {
                if !self.mesh.topology.would_cycle(child, claimed) {
                    self.deferred.remove(&child);
                    changed |= self.adopt(child, claimed, &mut sessions);
                }
            }
        }
        sessions
    }

    /// Attach `child` below `parent` and run the join or rewire path.
    /// Returns `true` if the topology changed.
    fn adopt(&mut self, child: NodeId, parent: NodeId, sessions: &mut Vec<Session>) -> bool {
        if self.mesh.topology.would_cycle(child, parent) {
            debug!(node = %child, %parent, "claim parked until the loop clears");
            self.deferred.insert(child, parent);
            return false;
        }
        let old_parent = self.mesh.topology.parent(child);
        if !self.mesh.topology.attach_child(child, parent) {
            if old_parent == Some(parent) {
                self.lost.remove(&child);
                self.deferred.remove(&child);
            }
            return false;
        }
        self.lost.remove(&child);
        self.deferred.remove(&child);
        match old_parent {
            None => {
                info!(node = %child, %parent, "node joined");
                sessions.push(self.mesh.get_remote_children(child, true));
                sessions.extend(self.hooks.connected(&mut self.mesh, child, parent));
            }
            Some(old) => {
                info!(node = %child, from = %old, to = %parent, "node rewired");
                sessions.push(self.mesh.purge_link(child, old));
                sessions.extend(self.hooks.rewired(&mut self.mesh, child, old));
            }
        }
        true
    }

    /// Advance every countdown by one tick.
    ///
    /// Children reaching the probe point are queried directly; children
    /// reaching zero are disconnected. Returns the nodes removed from the
    /// topology.
    pub fn tick(&mut self) -> Vec<NodeId> {
        let probe_at = self.churn.probe_at();
        let mut probes = Vec::new();
        let mut expired = Vec::new();
        for (node, lost) in self.lost.iter_mut() {
            lost.remaining = lost.remaining.saturating_sub(1);
            if lost.remaining == 0 {
                expired.push(*node);
            } else if lost.remaining == probe_at {
                probes.push(*node);
            }
        }

        for node in probes {
            debug!(%node, "probing lost child");
            let probe = self
                .mesh
                .command(Operation::Get, node, ResourcePath::new(Resource::RplChildren))
                .attach(ATTACH_PROBE, true);
            let mut session = Session::new();
            session.push(probe);
            self.communicate(session);
        }

        let mut gone = Vec::new();
        for node in expired {
            if let Some(lost) = self.lost.remove(&node) {
                debug!(%node, parent = %lost.parent, "countdown expired");
            }
            gone.extend(self.disconnect(node));
        }

        let follow_ups = self.hooks.tick(&mut self.mesh);
        self.communicate_all(follow_ups);
        gone
    }

    /// Remove `node` and its subtree, delete their cells and the far sides
    /// of their links, then run `disconnected` for each removed node.
    pub fn disconnect(&mut self, node: NodeId) -> Vec<NodeId> {
        if node == self.mesh.root() || !self.mesh.topology.contains(node) {
            return Vec::new();
        }
        let removed = self.mesh.topology.detach_node(node);

        let stale: Vec<_> = self
            .cache
            .iter()
            .filter(|(_, p)| removed.contains(&p.command.to))
            .map(|(token, p)| (*token, p.session))
            .collect();
        for (token, session) in stale {
            self.cache.remove(&token);
            self.touch(session, token);
        }

        self.deferred
            .retain(|child, claimed| !removed.contains(child) && !removed.contains(claimed));
        for n in &removed {
            self.lost.remove(n);
            let (surviving, departed) = self.mesh.purge_node(*n);
            self.communicate(surviving);
            self.send_detached(departed);
        }
        for n in &removed {
            info!(node = %n, "node disconnected");
            let follow_ups = self.hooks.disconnected(&mut self.mesh, *n);
            self.communicate_all(follow_ups);
        }
        removed
    }
}
