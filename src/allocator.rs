//! Slot/channel allocation over the mesh's slotframes.
//!
//! Everything here is synchronous bookkeeping: reservations are made in the
//! local [`SlotFrame`]s and the matching remote operations come back as
//! [`Session`]s for the reflector to run.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::command::{
    CellRequest, Command, Operation, Payload, Resource, ResourcePath, Session, ATTACH_FRAME,
};
use crate::error::{ControllerError, ControllerResult};
use crate::frame::{Cell, CellFilter, LinkError, LinkOption, SlotFrame, MINIMAL_SLOT};
use crate::mesh::Mesh;
use crate::node::NodeId;

/// Coordinates sharing one physical channel with `(slot, channel)` across
/// the frame: the channel offset drops by one for every slot forward.
pub fn hopping_diagonal(channel: u8, slot: u16, size: u16, channels: u8) -> Vec<(u16, u8)> {
    let channels = i32::from(channels.max(1));
    (0..size)
        .map(|s| {
            let step = i32::from(s) - i32::from(slot);
            let c = (i32::from(channel) - step).rem_euclid(channels);
            (s, c as u8)
        })
        .collect()
}

impl Mesh {
    // ── Radio usage ───────────────────────────────────────────────

    fn closed_neighborhood(&self, node: NodeId) -> BTreeSet<NodeId> {
        let mut set: BTreeSet<NodeId> = self.topology.neighbors(node).into_iter().collect();
        set.insert(node);
        set
    }

    /// Radios busy with a link: the transmitter and its receiver, or every
    /// neighbour of the transmitter for a broadcast.
    fn radios(&self, tx: NodeId, rx: Option<NodeId>) -> BTreeSet<NodeId> {
        match rx {
            Some(rx) => [tx, rx].into_iter().collect(),
            None => self.closed_neighborhood(tx),
        }
    }

    /// `true` if `slot` of `frame` already involves `tx`, `rx` or one of
    /// their one-hop neighbours, or would make some radio serve two links.
    pub fn conflict(&self, slot: u16, tx: NodeId, rx: Option<NodeId>, frame: &str) -> bool {
        let Some(frame) = self.frames.get(frame) else {
            return false;
        };
        let mut near = self.closed_neighborhood(tx);
        if let Some(rx) = rx {
            near.extend(self.closed_neighborhood(rx));
        }
        let busy = self.radios(tx, rx);
        frame.cells_at(slot).any(|cell| {
            near.contains(&cell.tx)
                || cell.rx.is_some_and(|r| near.contains(&r))
                || !busy.is_disjoint(&self.radios(cell.tx, cell.rx))
        })
    }

    /// Channel offsets at `slot` of `frame` used by unicast pairs unrelated
    /// to `tx -> rx`.
    pub fn interfere(&self, slot: u16, tx: NodeId, rx: Option<NodeId>, frame: &str) -> BTreeSet<u8> {
        let mut unsafe_channels = BTreeSet::new();
        let (Some(rx), Some(frame)) = (rx, self.frames.get(frame)) else {
            return unsafe_channels;
        };
        for cell in frame.cells_at(slot) {
            let Some(cell_rx) = cell.rx else { continue };
            if !self.topology.are_neighbors(cell_rx, tx) && !self.topology.are_neighbors(rx, cell.tx) {
                unsafe_channels.insert(cell.channel);
            }
        }
        unsafe_channels
    }

    /// Lowest free `(slot, channel)` for `tx -> rx` in `frame`.
    ///
    /// Every registered frame is checked for conflicts and interference.
    /// Blacklisted coordinates of `frame` are skipped.
    pub fn schedule(&self, tx: NodeId, rx: Option<NodeId>, frame: &str) -> Option<(u16, u8)> {
        let target = self.frames.get(frame)?;
        for slot in (MINIMAL_SLOT + 1)..target.size() {
            let mut free: BTreeSet<u8> = (0..self.channels()).collect();
            let mut skip = false;
            for other in self.frames.values() {
                if self.conflict(slot, tx, rx, other.name()) {
                    skip = true;
                    break;
                }
                for channel in self.interfere(slot, tx, rx, other.name()) {
                    free.remove(&channel);
                }
            }
            if skip {
                continue;
            }
            if let Some(channel) = free.into_iter().find(|c| !target.is_blacklisted(slot, *c)) {
                return Some((slot, channel));
            }
        }
        None
    }

    /// [`schedule`](Mesh::schedule) then [`post_link`](Mesh::post_link).
    ///
    /// Starvation is logged and reported as `CapacityExhausted`.
    pub fn allocate_link(
        &mut self,
        tx: NodeId,
        rx: Option<NodeId>,
        frame: &str,
    ) -> ControllerResult<Session> {
        match self.schedule(tx, rx, frame) {
            Some((slot, channel)) => self.post_link(slot, channel, frame, tx, rx, None),
            None => {
                let err = ControllerError::CapacityExhausted {
                    frame: frame.to_string(),
                    tx,
                    rx,
                };
                error!(%err, "link left unscheduled");
                Err(err)
            }
        }
    }

    // ── Link installation ─────────────────────────────────────────

    /// Reserve both sides of `tx -> rx` at `(slot, channel)` and build the
    /// install commands, one block per topology depth, deepest first.
    ///
    /// `rx == None` is a broadcast: every neighbour of `tx` gets an Rx cell.
    /// With `target` set, only that node's side is installed, except that
    /// targeting the transmitter of a broadcast also installs the listeners
    /// it is missing. Sides that are already reserved are skipped.
    pub fn post_link(
        &mut self,
        slot: u16,
        channel: u8,
        frame: &str,
        tx: NodeId,
        rx: Option<NodeId>,
        target: Option<NodeId>,
    ) -> ControllerResult<Session> {
        let size = self.frame(frame)?.size();
        if slot >= size {
            return Err(LinkError::SlotOutOfRange { slot, size }.into());
        }
        if channel >= self.channels() {
            return Err(LinkError::ChannelOutOfRange(channel).into());
        }

        let listeners = match rx {
            Some(rx) => vec![rx],
            None => self.topology.neighbors(tx),
        };
        if let Some(t) = target {
            if t != tx && !listeners.contains(&t) {
                warn!(target = %t, %tx, "target is not an endpoint of the link");
                return Ok(Session::new());
            }
        }

        let existing = self.frame(frame)?.cells_similar_to(
            &CellFilter::new().slot(slot).channel(channel).tx(tx).rx(rx),
        );
        let tx_found = existing.iter().any(|c| c.owner == tx && c.option.transmits());
        let rx_found: BTreeSet<NodeId> = existing
            .iter()
            .filter(|c| c.option.receives())
            .map(|c| c.owner)
            .collect();

        let mut cells = Vec::new();
        if !tx_found && target.map_or(true, |t| t == tx) {
            cells.push(Cell::transmitter(tx, slot, channel, rx));
        }
        let all_listeners = match target {
            None => true,
            Some(t) => rx.is_none() && t == tx,
        };
        for listener in listeners {
            if !rx_found.contains(&listener) && (all_listeners || target == Some(listener)) {
                cells.push(Cell::receiver(listener, slot, channel, tx, rx));
            }
        }

        let mut by_depth: BTreeMap<usize, Vec<Command>> = BTreeMap::new();
        for cell in cells {
            let depth = self.topology.depth(cell.owner).unwrap_or(0);
            let request = CellRequest {
                slot,
                channel,
                option: cell.option,
                link_type: cell.link_type,
                target: cell.target(),
            };
            let owner = cell.owner;
            if let Err(err) = self.frame_mut(frame)?.add_link(cell) {
                warn!(%owner, slot, channel, %err, "reservation rejected");
                continue;
            }
            let cmd = self
                .command(Operation::Post, owner, ResourcePath::new(Resource::CellList))
                .with_payload(Payload::Cell(request))
                .attach(ATTACH_FRAME, frame);
            by_depth.entry(depth).or_default().push(cmd);
        }

        let mut session = Session::new();
        for (_, commands) in by_depth.into_iter().rev() {
            session.extend(commands);
            session.block();
        }
        debug!(frame, slot, channel, %tx, blocks = session.block_count(), "link planned");
        Ok(session)
    }

    /// Install the named frames on `node`, all in one block.
    pub fn post_slotframes(&mut self, node: NodeId, frames: &[&str]) -> ControllerResult<Session> {
        let mut session = Session::new();
        for name in frames {
            let size = self.frame(name)?.size();
            let cmd = self
                .command(Operation::Post, node, ResourcePath::new(Resource::Slotframe))
                .with_payload(Payload::Slotframe { size })
                .attach(ATTACH_FRAME, *name);
            session.push(cmd);
        }
        session.block();
        Ok(session)
    }

    // ── Lookups ───────────────────────────────────────────────────

    pub fn get_link_by_coords(&self, frame: &str, slot: u16, channel: u8) -> ControllerResult<Vec<&Cell>> {
        Ok(self
            .frame(frame)?
            .cells_similar_to(&CellFilter::new().slot(slot).channel(channel)))
    }

    pub fn get_link_by_owner(&self, frame: &str, owner: NodeId) -> ControllerResult<Vec<&Cell>> {
        Ok(self.frame(frame)?.cells_similar_to(&CellFilter::new().owner(owner)))
    }

    pub fn get_link_by_endpoints(
        &self,
        frame: &str,
        tx: NodeId,
        rx: Option<NodeId>,
    ) -> ControllerResult<Vec<&Cell>> {
        Ok(self.frame(frame)?.cells_similar_to(&CellFilter::new().tx(tx).rx(rx)))
    }

    // ── Remote queries ────────────────────────────────────────────

    fn single(&mut self, op: Operation, to: NodeId, path: ResourcePath) -> Session {
        let cmd = self.command(op, to, path);
        let mut session = Session::new();
        session.push(cmd);
        session.block();
        session
    }

    pub fn get_remote_children(&mut self, node: NodeId, observe: bool) -> Session {
        let op = if observe { Operation::Observe } else { Operation::Get };
        self.single(op, node, ResourcePath::new(Resource::RplChildren))
    }

    /// Read the whole cell list of `node`, or one entry.
    pub fn get_remote_cell(&mut self, node: NodeId, cell_id: Option<u16>) -> Session {
        let path = match cell_id {
            Some(id) => ResourcePath::entry(Resource::CellList, id),
            None => ResourcePath::new(Resource::CellList),
        };
        self.single(Operation::Get, node, path)
    }

    pub fn get_remote_statistics(&mut self, node: NodeId, id: u16, observe: bool) -> Session {
        let op = if observe { Operation::Observe } else { Operation::Get };
        self.single(op, node, ResourcePath::entry(Resource::StatisticsValues, id))
    }

    /// Define a statistics resource on `node` collecting `metrics`.
    pub fn set_remote_statistics(&mut self, node: NodeId, metrics: &[String]) -> Session {
        let cmd = self
            .command(Operation::Post, node, ResourcePath::new(Resource::StatisticsDefinition))
            .with_payload(Payload::Statistics {
                metrics: metrics.to_vec(),
            });
        let mut session = Session::new();
        session.push(cmd);
        session.block();
        session
    }

    // ── Removal ───────────────────────────────────────────────────

    /// DELETE for a cell on its owner: by remote id once confirmed, else by
    /// coordinates. `None` if the owner never learned the frame.
    pub fn delete_remote_cell(&mut self, frame: &str, cell: &Cell) -> Option<Command> {
        let path = match cell.remote_id {
            Some(id) => ResourcePath::entry(Resource::CellList, id),
            None => {
                let alias = cell
                    .alias
                    .or_else(|| self.frames.get(frame).and_then(|f| f.alias_id(cell.owner)))?;
                ResourcePath::new(Resource::CellList)
                    .with_query("so", cell.slot)
                    .with_query("co", cell.channel)
                    .with_query("fd", alias)
            }
        };
        Some(
            self.command(Operation::Delete, cell.owner, path)
                .attach(ATTACH_FRAME, frame)
                .attach("lo", Value::from(cell.option.bits())),
        )
    }

    fn removal_session(&mut self, removed: Vec<(String, Cell)>) -> Session {
        let mut session = Session::new();
        for (frame, cell) in removed {
            if let Some(cmd) = self.delete_remote_cell(&frame, &cell) {
                session.push(cmd);
            }
        }
        session.block();
        session
    }

    /// Drop every cell of a departed node and the far sides of its links.
    ///
    /// Returns `(deletes to surviving owners, deletes to the departed node)`.
    pub fn purge_node(&mut self, node: NodeId) -> (Session, Session) {
        let mut departed = Vec::new();
        let mut surviving = Vec::new();
        let names: Vec<String> = self.frames.keys().cloned().collect();
        for name in names {
            let Some(frame) = self.frames.get_mut(&name) else { continue };
            let owned = frame.delete_links_of(node);
            for cell in &owned {
                for paired in frame.take_paired(cell) {
                    surviving.push((name.clone(), paired));
                }
            }
            let mut leftovers = frame.remove_cells(&CellFilter::new().tx(node));
            leftovers.extend(frame.remove_cells(&CellFilter::new().rx(Some(node))));
            surviving.extend(leftovers.into_iter().map(|c| (name.clone(), c)));
            departed.extend(owned.into_iter().map(|c| (name.clone(), c)));
        }
        info!(%node, own = departed.len(), paired = surviving.len(), "purging cells");
        let surviving = self.removal_session(surviving);
        let departed = self.removal_session(departed);
        for frame in self.frames.values_mut() {
            frame.remove_alias(node);
        }
        (surviving, departed)
    }

    /// Drop the unicast cells between `a` and `b`, both directions, in every frame.
    pub fn purge_link(&mut self, a: NodeId, b: NodeId) -> Session {
        let mut removed = Vec::new();
        for (name, frame) in self.frames.iter_mut() {
            for (tx, rx) in [(a, b), (b, a)] {
                let cells = frame.remove_cells(&CellFilter::new().tx(tx).rx(Some(rx)));
                removed.extend(cells.into_iter().map(|c| (name.clone(), c)));
            }
        }
        self.removal_session(removed)
    }

    /// Remove a scheduled link and delete it remotely.
    pub fn unschedule(&mut self, frame: &str, tx: NodeId, rx: Option<NodeId>) -> ControllerResult<Session> {
        let cells = self
            .frame_mut(frame)?
            .remove_cells(&CellFilter::new().tx(tx).rx(rx));
        let removed = cells.into_iter().map(|c| (frame.to_string(), c)).collect();
        Ok(self.removal_session(removed))
    }

    // ── Blacklisting ──────────────────────────────────────────────

    /// Blacklist `(channel, slot)` and every coordinate on its hopping
    /// diagonal, evict the cells sitting there and reschedule their links.
    ///
    /// The first session deletes the evicted cells; the rest install the
    /// replacements. Links that no longer fit are logged and dropped.
    pub fn blacklist(&mut self, channel: u8, slot: u16, frame: &str) -> ControllerResult<Vec<Session>> {
        let channels = self.channels();
        let target: &mut SlotFrame = self.frame_mut(frame)?;
        if slot >= target.size() {
            return Err(LinkError::SlotOutOfRange {
                slot,
                size: target.size(),
            }
            .into());
        }
        if channel >= channels {
            return Err(LinkError::ChannelOutOfRange(channel).into());
        }

        let mut evicted = Vec::new();
        for (s, c) in hopping_diagonal(channel, slot, target.size(), channels) {
            target.blacklist_coordinate(s, c);
            evicted.extend(target.remove_cells(&CellFilter::new().slot(s).channel(c)));
        }
        info!(frame, slot, channel, evicted = evicted.len(), "coordinate blacklisted");

        let links: BTreeSet<(NodeId, Option<NodeId>)> =
            evicted.iter().map(|c| (c.tx, c.rx)).collect();
        let deletes = self.removal_session(evicted.into_iter().map(|c| (frame.to_string(), c)).collect());

        let mut sessions = Vec::new();
        if !deletes.is_empty() {
            sessions.push(deletes);
        }
        for (tx, rx) in links {
            match self.allocate_link(tx, rx, frame) {
                Ok(session) if !session.is_empty() => sessions.push(session),
                Ok(_) => {}
                Err(ControllerError::CapacityExhausted { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(sessions)
    }

    /// Cells of `frame` with both option bits agreeing with `option`.
    pub fn cells_with_option(&self, frame: &str, option: LinkOption) -> ControllerResult<Vec<&Cell>> {
        Ok(self.frame(frame)?.cells_similar_to(&CellFilter::new().option(option)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::node;

    /// root(0) ─ 1 ─ 3
    ///         └ 2
    fn mesh() -> Mesh {
        let mut m = Mesh::new(node(0));
        m.topology.attach_child(node(1), node(0));
        m.topology.attach_child(node(2), node(0));
        m.topology.attach_child(node(3), node(1));
        m.register_frame(SlotFrame::new("B", 25));
        m.register_frame(SlotFrame::new("U", 21));
        m
    }

    fn drain(session: &mut Session) -> Vec<Command> {
        let mut out = Vec::new();
        while let Some(c) = session.pop() {
            session.release(c.id);
            out.push(c);
        }
        out
    }

    #[test]
    fn test_schedule_empty_frame_starts_at_slot_one() {
        let mut m = Mesh::new(node(0));
        m.topology.attach_child(node(1), node(0));
        m.register_frame(SlotFrame::new("B", 25));
        assert_eq!(m.schedule(node(1), None, "B"), Some((1, 0)));
    }

    #[test]
    fn test_schedule_skips_conflicting_slot() {
        let mut m = mesh();
        m.post_link(1, 0, "U", node(1), Some(node(0)), None).unwrap();
        // 3 is a neighbour of 1: slot 1 is out.
        assert_eq!(m.schedule(node(3), Some(node(1)), "U"), Some((2, 0)));
        // Same slot in another frame still conflicts.
        assert_eq!(m.schedule(node(3), Some(node(1)), "B"), Some((2, 0)));
    }

    #[test]
    fn test_conflict_rules() {
        let mut m = mesh();
        m.post_link(4, 0, "U", node(2), Some(node(0)), None).unwrap();
        assert!(m.conflict(4, node(0), Some(node(1)), "U"));
        assert!(m.conflict(4, node(3), Some(node(1)), "U"));
        assert!(!m.conflict(5, node(0), Some(node(1)), "U"));
        assert!(!m.conflict(4, node(0), Some(node(1)), "missing"));
    }

    #[test]
    fn test_broadcast_conflicts_through_shared_listener() {
        let mut m = mesh();
        let extra = node(4);
        m.topology.attach_child(extra, node(2));
        // 3 broadcasts to {1}; 2 broadcasting reaches {0, 4}; 1 hears both 0 and 3.
        m.post_link(6, 0, "B", node(3), None, None).unwrap();
        assert!(!m.conflict(6, extra, Some(node(2)), "B"));
        assert!(m.conflict(6, node(0), None, "B"));
    }

    #[test]
    fn test_interfere_reports_unrelated_unicast_channels() {
        let mut m = mesh();
        let (a, b) = (node(10), node(11));
        m.topology.attach_child(a, node(3));
        m.topology.attach_child(b, a);
        m.post_link(7, 5, "U", b, Some(a), None).unwrap();
        let unsafe_channels = m.interfere(7, node(2), Some(node(0)), "U");
        assert!(unsafe_channels.contains(&5));
        assert!(m.interfere(7, node(2), None, "U").is_empty());
    }

    #[test]
    fn test_post_link_unicast_reserves_both_sides_deepest_first() {
        let mut m = mesh();
        let mut s = m.post_link(3, 2, "U", node(1), Some(node(3)), None).unwrap();
        assert_eq!(s.block_count(), 2);
        let cmds = drain(&mut s);
        assert_eq!(cmds[0].to, node(3));
        assert_eq!(cmds[1].to, node(1));
        assert!(matches!(cmds[0].payload, Payload::Cell(CellRequest { option, .. }) if option == LinkOption::UNICAST_RX));
        assert_eq!(cmds[0].frame(), Some("U"));
        assert_eq!(m.get_link_by_coords("U", 3, 2).unwrap().len(), 2);

        // Re-posting finds both sides reserved.
        let again = m.post_link(3, 2, "U", node(1), Some(node(3)), None).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_post_link_broadcast_reaches_all_neighbors() {
        let mut m = mesh();
        let mut s = m.post_link(1, 0, "B", node(1), None, None).unwrap();
        let cmds = drain(&mut s);
        let owners: BTreeSet<NodeId> = cmds.iter().map(|c| c.to).collect();
        assert_eq!(owners, [node(0), node(1), node(3)].into_iter().collect());
        let tx = m.get_link_by_owner("B", node(1)).unwrap();
        assert_eq!(tx[0].option, LinkOption::BROADCAST_TX);
        assert_eq!(tx[0].target(), NodeId::BROADCAST);
    }

    #[test]
    fn test_post_link_target_only() {
        let mut m = mesh();
        m.post_link(1, 0, "B", node(0), None, None).unwrap();
        let newcomer = node(9);
        m.topology.attach_child(newcomer, node(0));
        let mut s = m.post_link(1, 0, "B", node(0), None, Some(newcomer)).unwrap();
        let cmds = drain(&mut s);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].to, newcomer);

        let s = m.post_link(1, 0, "B", node(0), None, Some(node(3))).unwrap();
        assert!(s.is_empty());
    }

    #[test]
    fn test_post_link_broadcast_targeting_transmitter_fills_listeners() {
        let mut m = mesh();
        m.post_link(1, 0, "B", node(0), None, None).unwrap();
        let newcomer = node(9);
        m.topology.attach_child(newcomer, node(0));

        let mut s = m.post_link(1, 0, "B", node(0), None, Some(node(0))).unwrap();
        let cmds = drain(&mut s);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].to, newcomer);
        let rx = m.get_link_by_owner("B", newcomer).unwrap();
        assert_eq!(rx[0].option, LinkOption::BROADCAST_RX);

        // From scratch the transmitter and every listener are reserved.
        let mut s = m.post_link(2, 0, "B", node(1), None, Some(node(1))).unwrap();
        let owners: BTreeSet<NodeId> = drain(&mut s).iter().map(|c| c.to).collect();
        assert_eq!(owners, [node(0), node(1), node(3)].into_iter().collect());

        // A unicast link targeting its transmitter still installs one side.
        let mut s = m.post_link(3, 0, "U", node(1), Some(node(0)), Some(node(1))).unwrap();
        let cmds = drain(&mut s);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].to, node(1));
    }

    #[test]
    fn test_post_link_bounds() {
        let mut m = mesh();
        assert!(matches!(
            m.post_link(21, 0, "U", node(1), Some(node(0)), None),
            Err(ControllerError::Link(LinkError::SlotOutOfRange { .. }))
        ));
        assert!(matches!(
            m.post_link(1, 0, "nope", node(1), Some(node(0)), None),
            Err(ControllerError::UnknownFrame(_))
        ));
    }

    #[test]
    fn test_hopping_diagonal() {
        let d = hopping_diagonal(3, 5, 10, 16);
        assert_eq!(d.len(), 10);
        assert!(d.contains(&(5, 3)));
        assert!(d.contains(&(6, 2)));
        assert!(d.contains(&(4, 4)));
        assert!(d.contains(&(0, 8)));
        assert!(d.contains(&(9, 15)));
    }

    #[test]
    fn test_blacklist_marks_diagonal_and_evicts() {
        let mut m = Mesh::new(node(0));
        m.topology.attach_child(node(1), node(0));
        m.topology.attach_child(node(2), node(0));
        m.register_frame(SlotFrame::new("F", 10));
        m.post_link(5, 3, "F", node(1), Some(node(0)), None).unwrap();
        m.post_link(8, 0, "F", node(2), Some(node(0)), None).unwrap();
        m.post_link(2, 1, "F", node(0), Some(node(2)), None).unwrap();

        let sessions = m.blacklist(3, 5, "F").unwrap();
        let frame = m.frame("F").unwrap();
        for (s, c) in hopping_diagonal(3, 5, 10, 16) {
            assert!(frame.is_blacklisted(s, c), "({}, {}) not blacklisted", s, c);
            assert!(frame.cells_similar_to(&CellFilter::new().slot(s).channel(c)).is_empty());
        }
        // (2, 1) was not on the diagonal and survives; (5, 3) and (8, 0) were.
        assert_eq!(frame.cells_similar_to(&CellFilter::new().slot(2).channel(1)).len(), 2);
        assert!(!frame.is_blacklisted(2, 1));
        // No deletes for never-installed cells: owners had no alias yet.
        // Both evicted links are rescheduled off the diagonal.
        assert_eq!(sessions.len(), 2);
        assert_eq!(m.get_link_by_endpoints("F", node(1), Some(node(0))).unwrap().len(), 2);
        for cell in m.frame("F").unwrap().cells() {
            assert!(!m.frame("F").unwrap().is_blacklisted(cell.slot, cell.channel));
        }
    }

    #[test]
    fn test_blacklist_issues_remote_deletes_for_confirmed_cells() {
        let mut m = Mesh::new(node(0));
        m.topology.attach_child(node(1), node(0));
        m.register_frame(SlotFrame::new("F", 10));
        m.post_link(5, 3, "F", node(1), Some(node(0)), None).unwrap();
        let f = m.frame_mut("F").unwrap();
        f.set_remote_cell_id(node(1), 5, 3, LinkOption::UNICAST_TX, 11);
        f.set_alias_id(node(0), 2);

        let mut sessions = m.blacklist(3, 5, "F").unwrap();
        let deletes = drain(&mut sessions[0]);
        assert_eq!(deletes.len(), 2);
        assert!(deletes.iter().all(|c| c.op == Operation::Delete));
        let by_id = deletes.iter().find(|c| c.to == node(1)).unwrap();
        assert_eq!(by_id.path.entry_id(), Some(11));
        let by_query = deletes.iter().find(|c| c.to == node(0)).unwrap();
        assert_eq!(by_query.path.query_value("fd"), Some("2"));
    }

    #[test]
    fn test_capacity_exhaustion() {
        let mut m = Mesh::new(node(0));
        m.topology.attach_child(node(1), node(0));
        m.register_frame(SlotFrame::new("tiny", 2));
        m.post_link(1, 0, "tiny", node(1), Some(node(0)), None).unwrap();
        assert_eq!(m.schedule(node(0), Some(node(1)), "tiny"), None);
        assert!(matches!(
            m.allocate_link(node(0), Some(node(1)), "tiny"),
            Err(ControllerError::CapacityExhausted { .. })
        ));
    }

    #[test]
    fn test_purge_node_collects_own_and_paired_cells() {
        let mut m = mesh();
        for frame in ["B", "U"] {
            for n in 0..4 {
                m.frame_mut(frame).unwrap().set_alias_id(node(n), 1);
            }
        }
        m.post_link(2, 0, "U", node(3), Some(node(1)), None).unwrap();
        m.post_link(3, 0, "B", node(3), None, None).unwrap();
        m.post_link(4, 0, "U", node(2), Some(node(0)), None).unwrap();

        let (mut surviving, mut departed) = m.purge_node(node(3));
        let own = drain(&mut departed);
        let paired = drain(&mut surviving);
        assert_eq!(own.len(), 2);
        assert!(own.iter().all(|c| c.to == node(3)));
        assert_eq!(paired.len(), 2);
        assert!(paired.iter().all(|c| c.to == node(1)));
        assert!(m.get_link_by_owner("U", node(1)).unwrap().is_empty());
        assert_eq!(m.get_link_by_owner("U", node(2)).unwrap().len(), 1);
        assert_eq!(m.frame("U").unwrap().alias_id(node(3)), None);
    }

    #[test]
    fn test_purge_link_and_unschedule() {
        let mut m = mesh();
        m.post_link(2, 0, "U", node(3), Some(node(1)), None).unwrap();
        m.post_link(5, 0, "U", node(1), Some(node(3)), None).unwrap();
        m.purge_link(node(1), node(3));
        assert!(m.frame("U").unwrap().cells().is_empty());

        m.post_link(2, 0, "U", node(3), Some(node(1)), None).unwrap();
        m.unschedule("U", node(3), Some(node(1))).unwrap();
        assert!(m.frame("U").unwrap().cells().is_empty());
    }

    #[test]
    fn test_remote_queries() {
        let mut m = mesh();
        let mut s = m.get_remote_statistics(node(1), 2, true);
        let c = s.pop().unwrap();
        assert_eq!(c.op, Operation::Observe);
        assert_eq!(c.path.to_string(), "6t/6/ml/2");

        let mut s = m.get_remote_cell(node(1), Some(4));
        assert_eq!(s.pop().unwrap().path.entry_id(), Some(4));

        let mut s = m.set_remote_statistics(node(1), &["PRR".to_string()]);
        let c = s.pop().unwrap();
        assert!(matches!(c.payload, Payload::Statistics { ref metrics } if metrics == &["PRR".to_string()]));

        let mut s = m.post_slotframes(node(1), &["B", "U"]).unwrap();
        assert_eq!(s.block_count(), 1);
        assert_eq!(drain(&mut s).len(), 2);
        assert!(m.post_slotframes(node(1), &["X"]).is_err());
    }
}
