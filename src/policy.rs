//! `GreedyPolicy`: first-fit scheduling plus link-quality blacklisting.
//!
//! Every node gets a broadcast cell of its own, listens to its parent's and
//! children's broadcasts, and one dedicated unicast cell per direction with
//! each neighbour. Statistics reports are kept per link; a periodic sweep
//! blacklists the coordinates of the worst offender.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::command::resource::LinkStats;
use crate::command::{ResourcePath, Session};
use crate::config::PolicyConfig;
use crate::error::{ControllerError, ControllerResult};
use crate::frame::{CellFilter, LinkOption};
use crate::mesh::Mesh;
use crate::node::NodeId;
use crate::reflector::{Hooks, Report};

pub struct GreedyPolicy {
    broadcast: String,
    unicast: String,
    settings: PolicyConfig,
    /// reporter → neighbour → latest stats.
    statistics: BTreeMap<NodeId, BTreeMap<NodeId, LinkStats>>,
    ticks: u64,
    blacklisted_links: u64,
}

/// Queue `next` behind `session`; failures are logged and skipped.
fn chain(session: &mut Session, next: ControllerResult<Session>) {
    match next.and_then(|s| session.append(s).map_err(ControllerError::from)) {
        Ok(()) => {}
        // Already reported by the allocator.
        Err(ControllerError::CapacityExhausted { .. }) => {}
        Err(err) => warn!(%err, "link not installed"),
    }
}

impl GreedyPolicy {
    pub fn new(broadcast: impl Into<String>, unicast: impl Into<String>, settings: PolicyConfig) -> Self {
        GreedyPolicy {
            broadcast: broadcast.into(),
            unicast: unicast.into(),
            settings,
            statistics: BTreeMap::new(),
            ticks: 0,
            blacklisted_links: 0,
        }
    }

    pub fn settings(&self) -> &PolicyConfig {
        &self.settings
    }

    pub fn link_stats(&self, reporter: NodeId, neighbor: NodeId) -> Option<&LinkStats> {
        self.statistics.get(&reporter)?.get(&neighbor)
    }

    /// Links blacklisted so far.
    pub fn blacklisted_links(&self) -> u64 {
        self.blacklisted_links
    }

    fn unicast_pair(&self, mesh: &mut Mesh, a: NodeId, b: NodeId) -> Session {
        let mut session = Session::new();
        chain(&mut session, mesh.allocate_link(b, Some(a), &self.unicast));
        chain(&mut session, mesh.allocate_link(a, Some(b), &self.unicast));
        session
    }

    /// Unicast links with `node`'s neighbours that are missing in either
    /// direction, for neighbours already holding the unicast frame.
    fn fill_unicast(&self, mesh: &mut Mesh, node: NodeId) -> Session {
        let mut session = Session::new();
        for neighbor in mesh.topology().neighbors(node) {
            let framed = mesh
                .frame(&self.unicast)
                .is_ok_and(|f| f.alias_id(neighbor).is_some());
            if !framed {
                continue;
            }
            for (tx, rx) in [(neighbor, node), (node, neighbor)] {
                let missing = mesh
                    .get_link_by_endpoints(&self.unicast, tx, Some(rx))
                    .is_ok_and(|cells| cells.is_empty());
                if missing {
                    debug!(%tx, %rx, "unicast link missing, rescheduling");
                    chain(&mut session, mesh.allocate_link(tx, Some(rx), &self.unicast));
                }
            }
        }
        session
    }

    /// Listening cells for neighbour broadcasts `node` does not hear yet.
    fn fill_listening(&self, mesh: &mut Mesh, node: NodeId) -> Session {
        let neighbors = mesh.topology().neighbors(node);
        let unheard: Vec<(u16, u8, NodeId)> = mesh
            .frame(&self.broadcast)
            .map(|f| {
                f.cells_similar_to(&CellFilter::new().option(LinkOption::BROADCAST_TX))
                    .into_iter()
                    .filter(|c| neighbors.contains(&c.tx))
                    .filter(|c| {
                        f.reservation(node, c.slot, c.channel, LinkOption::BROADCAST_RX)
                            .is_none()
                    })
                    .map(|c| (c.slot, c.channel, c.tx))
                    .collect()
            })
            .unwrap_or_default();
        let mut session = Session::new();
        for (slot, channel, tx) in unheard {
            chain(&mut session, mesh.post_link(slot, channel, &self.broadcast, tx, None, Some(node)));
        }
        session
    }

    /// The first link whose quality crossed a threshold, from `tx`'s ETX
    /// and the receiver's PRR for the same link.
    fn worst_link(&self, mesh: &Mesh) -> Option<(NodeId, NodeId)> {
        for (&tx, links) in &self.statistics {
            for (&rx, stats) in links {
                let Some(etx) = stats.etx.filter(|v| *v >= 0.0) else { continue };
                let Some(prr) = self.link_stats(rx, tx).and_then(|s| s.prr).filter(|v| *v >= 0.0) else {
                    continue;
                };
                if !mesh.topology().are_neighbors(tx, rx) {
                    continue;
                }
                if etx >= self.settings.etx_ceiling || prr <= self.settings.prr_floor {
                    return Some((tx, rx));
                }
            }
        }
        None
    }

    /// Blacklist the coordinates of one bad link, if any.
    fn sweep(&mut self, mesh: &mut Mesh) -> Vec<Session> {
        let Some((tx, rx)) = self.worst_link(mesh) else {
            return Vec::new();
        };
        info!(%tx, %rx, "bad link detected");
        let mut sessions = Vec::new();
        for frame in [self.broadcast.clone(), self.unicast.clone()] {
            let coords: BTreeSet<(u16, u8)> = match mesh.get_link_by_endpoints(&frame, tx, Some(rx)) {
                Ok(cells) => cells.iter().map(|c| (c.slot, c.channel)).collect(),
                Err(err) => {
                    warn!(%err, "sweep skipped frame");
                    continue;
                }
            };
            for (slot, channel) in coords {
                match mesh.blacklist(channel, slot, &frame) {
                    Ok(s) => sessions.extend(s),
                    Err(err) => warn!(%err, slot, channel, "blacklist failed"),
                }
            }
        }
        if let Some(links) = self.statistics.get_mut(&tx) {
            links.remove(&rx);
        }
        self.blacklisted_links += 1;
        sessions
    }
}

impl Hooks for GreedyPolicy {
    fn connected(&mut self, mesh: &mut Mesh, child: NodeId, parent: NodeId) -> Vec<Session> {
        let mut sessions = Vec::new();
        let children = mesh.topology().children(child);

        // Broadcast frame: install, listen to neighbours, then our own cell.
        let mut bcq = match mesh.post_slotframes(child, &[self.broadcast.as_str()]) {
            Ok(s) => s,
            Err(err) => {
                warn!(%err, node = %child, "broadcast frame missing");
                return sessions;
            }
        };
        let listened: Vec<(u16, u8, NodeId)> = mesh
            .frame(&self.broadcast)
            .map(|f| {
                f.cells_similar_to(&CellFilter::new().option(LinkOption::BROADCAST_TX))
                    .into_iter()
                    .filter(|c| c.tx == parent || children.contains(&c.tx))
                    .map(|c| (c.slot, c.channel, c.tx))
                    .collect()
            })
            .unwrap_or_default();
        for (slot, channel, tx) in listened {
            chain(&mut bcq, mesh.post_link(slot, channel, &self.broadcast, tx, None, Some(child)));
        }
        chain(&mut bcq, mesh.allocate_link(child, None, &self.broadcast));
        sessions.push(bcq);

        // Unicast frame: one cell per direction with every neighbour.
        match mesh.post_slotframes(child, &[self.unicast.as_str()]) {
            Ok(mut ucq) => {
                for neighbor in std::iter::once(parent).chain(children) {
                    let pair = self.unicast_pair(mesh, child, neighbor);
                    chain(&mut ucq, Ok(pair));
                }
                sessions.push(ucq);
            }
            Err(err) => warn!(%err, node = %child, "unicast frame missing"),
        }

        if !self.settings.metrics.is_empty() {
            sessions.push(mesh.set_remote_statistics(child, &self.settings.metrics));
        }
        sessions
    }

    /// Links planned while a neighbour's frame was still pending are
    /// dropped when that neighbour rejects them; plan them again now.
    fn framed(&mut self, mesh: &mut Mesh, node: NodeId, frame: &str, _alias: u8) -> Vec<Session> {
        let session = if frame == self.unicast {
            self.fill_unicast(mesh, node)
        } else if frame == self.broadcast {
            self.fill_listening(mesh, node)
        } else {
            return Vec::new();
        };
        if session.is_empty() {
            Vec::new()
        } else {
            vec![session]
        }
    }

    fn disconnected(&mut self, _mesh: &mut Mesh, node: NodeId) -> Vec<Session> {
        self.statistics.remove(&node);
        for links in self.statistics.values_mut() {
            links.remove(&node);
        }
        Vec::new()
    }

    fn rewired(&mut self, mesh: &mut Mesh, node: NodeId, old_parent: NodeId) -> Vec<Session> {
        let Some(parent) = mesh.topology().parent(node) else {
            return Vec::new();
        };
        debug!(%node, from = %old_parent, to = %parent, "rescheduling unicast links");
        vec![self.unicast_pair(mesh, node, parent)]
    }

    fn reported(&mut self, mesh: &mut Mesh, node: NodeId, _path: &ResourcePath, report: &Report) -> Vec<Session> {
        let Report::Statistics(links) = report else {
            return Vec::new();
        };
        let entry = self.statistics.entry(node).or_default();
        for (neighbor, stats) in links {
            match NodeId::parse_with_prefix(neighbor, mesh.prefix()) {
                Ok(neighbor) => {
                    entry.insert(neighbor, *stats);
                }
                Err(err) => warn!(%node, %err, "statistics for an unparsable neighbour"),
            }
        }
        Vec::new()
    }

    fn tick(&mut self, mesh: &mut Mesh) -> Vec<Session> {
        self.ticks += 1;
        if self.ticks % u64::from(self.settings.statistics_period.max(1)) != 0 {
            return Vec::new();
        }
        self.sweep(mesh)
    }
}
