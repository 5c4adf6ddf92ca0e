//! An emulated mote: the resource tree a real node exposes to the
//! controller, backed by in-memory tables.
//!
//! | Path | Verbs | Reply body |
//! |---|---|---|
//! | `rpl/c` | GET, OBSERVE | `["0:0:0:2", …]` children by interface id |
//! | `6t/6/sf` | POST `{"ns"}` | `{"fd": alias}` |
//! | `6t/6/cl` | POST cell, DELETE `?so&co&fd` | `{"cd": id}` / the removed cell |
//! | `6t/6/cl/{id}` | GET, DELETE | the cell |
//! | `6t/6/sm` | POST `{"mt"}` | `{"md": id}` |
//! | `6t/6/ml/{id}` | GET, OBSERVE | neighbour → `{"ETX","PRR","RSSI"}` |

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::trace;

use crate::command::resource::{CellBody, LinkReport, LinkStats, SlotframeBody, StatisticsBody};
use crate::command::{CommandId, Operation, Resource, ResourcePath};
use crate::communicator::{Reply, Request, Status};
use crate::node::NodeId;

use super::network::Network;

/// Render the interface id the way motes list their children.
pub fn interface_id_string(node: NodeId) -> String {
    let iid = node.interface_id();
    format!(
        "{:x}:{:x}:{:x}:{:x}",
        (iid >> 48) & 0xffff,
        (iid >> 32) & 0xffff,
        (iid >> 16) & 0xffff,
        iid & 0xffff
    )
}

#[derive(Debug, Clone)]
pub struct Mote {
    id: NodeId,
    parent: Option<NodeId>,
    children: BTreeSet<NodeId>,
    /// alias → slotframe size.
    frames: BTreeMap<u8, u16>,
    cells: BTreeMap<u16, CellBody>,
    /// statistics id → metric names.
    probes: BTreeMap<u16, Vec<String>>,
    observers: BTreeMap<CommandId, ResourcePath>,
    next_alias: u8,
    next_cell: u16,
    next_probe: u16,
}

fn parse<T: DeserializeOwned>(body: &Option<Value>) -> Option<T> {
    serde_json::from_value(body.clone()?).ok()
}

fn cell_json(id: u16, cell: &CellBody) -> Value {
    let mut value = serde_json::to_value(cell).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("cd".to_string(), Value::from(id));
    }
    value
}

impl Mote {
    pub fn new(id: NodeId) -> Self {
        Mote {
            id,
            parent: None,
            children: BTreeSet::new(),
            frames: BTreeMap::new(),
            cells: BTreeMap::new(),
            probes: BTreeMap::new(),
            observers: BTreeMap::new(),
            next_alias: 0,
            next_cell: 0,
            next_probe: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().copied()
    }

    pub fn add_child(&mut self, child: NodeId) -> bool {
        self.children.insert(child)
    }

    pub fn remove_child(&mut self, child: NodeId) -> bool {
        self.children.remove(&child)
    }

    /// Installed slotframes, alias → size.
    pub fn frames(&self) -> &BTreeMap<u8, u16> {
        &self.frames
    }

    pub fn cells(&self) -> impl Iterator<Item = (u16, &CellBody)> {
        self.cells.iter().map(|(id, c)| (*id, c))
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    // ── Request handling ──────────────────────────────────────────

    /// Serve one request. Observes register the token for later pushes.
    pub fn handle(&mut self, request: &Request, network: &Network) -> Reply {
        let (status, body) = self.serve(request, network);
        trace!(mote = %self.id, token = %request.token, %status, "request served");
        Reply::answer(request, status, body)
    }

    fn serve(&mut self, request: &Request, network: &Network) -> (Status, Value) {
        let path = &request.path;
        match (request.op, path.resource()) {
            (Operation::Get | Operation::Observe, Some(Resource::RplChildren)) => {
                if request.op == Operation::Observe {
                    self.observers.insert(request.token, path.clone());
                }
                (Status::Content, self.children_body())
            }
            (Operation::Post, Some(Resource::Slotframe)) => {
                let Some(body) = parse::<SlotframeBody>(&request.body) else {
                    return (Status::BadRequest, Value::Null);
                };
                let alias = self.next_alias;
                self.next_alias = self.next_alias.wrapping_add(1);
                self.frames.insert(alias, body.size);
                (Status::Created, json!({ "fd": alias }))
            }
            (Operation::Post, Some(Resource::CellList)) => {
                let Some(cell) = parse::<CellBody>(&request.body) else {
                    return (Status::BadRequest, Value::Null);
                };
                match self.frames.get(&cell.frame) {
                    None => return (Status::NotFound, Value::Null),
                    Some(&size) if cell.slot >= size => return (Status::BadRequest, Value::Null),
                    Some(_) => {}
                }
                let taken = self
                    .cells
                    .values()
                    .any(|c| c.frame == cell.frame && c.slot == cell.slot && c.channel == cell.channel);
                if taken {
                    return (Status::Conflict, Value::Null);
                }
                let id = self.next_cell;
                self.next_cell = self.next_cell.wrapping_add(1);
                self.cells.insert(id, cell);
                (Status::Created, json!({ "cd": id }))
            }
            (Operation::Get, Some(Resource::CellList)) => match path.entry_id() {
                Some(id) => match self.cells.get(&id) {
                    Some(cell) => (Status::Content, cell_json(id, cell)),
                    None => (Status::NotFound, Value::Null),
                },
                None => (
                    Status::Content,
                    Value::Array(self.cells.iter().map(|(id, c)| cell_json(*id, c)).collect()),
                ),
            },
            (Operation::Delete, Some(Resource::CellList)) => {
                let id = path.entry_id().or_else(|| self.cell_at(path));
                match id.and_then(|id| self.cells.remove(&id).map(|c| (id, c))) {
                    Some((id, cell)) => (Status::Deleted, cell_json(id, &cell)),
                    None => (Status::NotFound, Value::Null),
                }
            }
            (Operation::Post, Some(Resource::StatisticsDefinition)) => {
                let Some(body) = parse::<StatisticsBody>(&request.body) else {
                    return (Status::BadRequest, Value::Null);
                };
                let id = self.next_probe;
                self.next_probe = self.next_probe.wrapping_add(1);
                self.probes.insert(id, body.metrics);
                (Status::Created, json!({ "md": id }))
            }
            (Operation::Get | Operation::Observe, Some(Resource::StatisticsValues)) => {
                let Some(report) = path.entry_id().and_then(|id| self.report(id, network)) else {
                    return (Status::NotFound, Value::Null);
                };
                if request.op == Operation::Observe {
                    self.observers.insert(request.token, path.clone());
                }
                (Status::Content, report)
            }
            _ => (Status::MethodNotAllowed, Value::Null),
        }
    }

    /// Cell id addressed by a `?so&co&fd` query.
    fn cell_at(&self, path: &ResourcePath) -> Option<u16> {
        let slot: u16 = path.query_value("so")?.parse().ok()?;
        let channel: u8 = path.query_value("co")?.parse().ok()?;
        let frame: u8 = path.query_value("fd")?.parse().ok()?;
        self.cells
            .iter()
            .find(|(_, c)| c.slot == slot && c.channel == channel && c.frame == frame)
            .map(|(id, _)| *id)
    }

    // ── Notifications ─────────────────────────────────────────────

    fn children_body(&self) -> Value {
        Value::Array(
            self.children
                .iter()
                .map(|c| Value::from(interface_id_string(*c)))
                .collect(),
        )
    }

    /// Link quality towards every neighbour, restricted to the metrics
    /// defined under `probe`.
    fn report(&self, probe: u16, network: &Network) -> Option<Value> {
        let metrics = self.probes.get(&probe)?;
        let wants = |name: &str| metrics.iter().any(|m| m.eq_ignore_ascii_case(name));
        let mut report = LinkReport::new();
        for neighbor in self.parent.into_iter().chain(self.children.iter().copied()) {
            let tx = network.link_quality(self.id, neighbor);
            let rx = network.link_quality(neighbor, self.id);
            let etx = if tx > 0.0 { (100.0 / tx).round() } else { 10_000.0 };
            let stats = LinkStats {
                etx: wants("ETX").then_some(etx),
                prr: wants("PRR").then(|| (rx * 100.0).round()),
                rssi: wants("RSSI").then(|| (-40.0 - 50.0 * (1.0 - rx)).round()),
            };
            report.insert(neighbor.address().to_string(), stats);
        }
        serde_json::to_value(report).ok()
    }

    /// Pushes for every `rpl/c` observer.
    pub fn children_notifications(&self) -> Vec<Reply> {
        self.observers
            .iter()
            .filter(|(_, p)| p.resource() == Some(Resource::RplChildren))
            .map(|(token, _)| Reply::new(*token, self.id, Status::Content, self.children_body()))
            .collect()
    }

    /// Pushes for every statistics observer.
    pub fn statistics_notifications(&self, network: &Network) -> Vec<Reply> {
        self.observers
            .iter()
            .filter(|(_, p)| p.resource() == Some(Resource::StatisticsValues))
            .filter_map(|(token, p)| {
                let report = self.report(p.entry_id()?, network)?;
                Some(Reply::new(*token, self.id, Status::Content, report))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::LinkType;
    use crate::node::testing::node;

    fn request(op: Operation, path: &str, body: Option<Value>) -> Request {
        Request {
            token: CommandId::new(7),
            op,
            to: node(1),
            path: ResourcePath::parse(path),
            body,
        }
    }

    fn cell(frame: u8, slot: u16, channel: u8) -> Value {
        serde_json::to_value(CellBody {
            slot,
            channel,
            frame,
            option: 1,
            link_type: LinkType::Normal,
            target: node(0),
        })
        .unwrap()
    }

    #[test]
    fn test_interface_id_string_round_trips() {
        let s = interface_id_string(node(1));
        assert_eq!(s, "0:0:0:2");
        assert_eq!(NodeId::parse_with_prefix(&s, 0xaaaa).unwrap(), node(1));
    }

    #[test]
    fn test_frames_then_cells() {
        let net = Network::reliable(0);
        let mut mote = Mote::new(node(1));

        let r = mote.handle(&request(Operation::Post, "6t/6/cl", Some(cell(0, 1, 0))), &net);
        assert_eq!(r.status, Status::NotFound);

        let r = mote.handle(&request(Operation::Post, "6t/6/sf", Some(json!({"ns": 25}))), &net);
        assert_eq!(r.status, Status::Created);
        assert_eq!(r.body, json!({"fd": 0}));

        let r = mote.handle(&request(Operation::Post, "6t/6/cl", Some(cell(0, 1, 0))), &net);
        assert_eq!(r.body, json!({"cd": 0}));
        let r = mote.handle(&request(Operation::Post, "6t/6/cl", Some(cell(0, 1, 0))), &net);
        assert_eq!(r.status, Status::Conflict);
        let r = mote.handle(&request(Operation::Post, "6t/6/cl", Some(cell(0, 30, 0))), &net);
        assert_eq!(r.status, Status::BadRequest);
        assert_eq!(mote.cell_count(), 1);
    }

    #[test]
    fn test_delete_by_id_and_by_coordinates() {
        let net = Network::reliable(0);
        let mut mote = Mote::new(node(1));
        mote.handle(&request(Operation::Post, "6t/6/sf", Some(json!({"ns": 25}))), &net);
        mote.handle(&request(Operation::Post, "6t/6/cl", Some(cell(0, 1, 0))), &net);
        mote.handle(&request(Operation::Post, "6t/6/cl", Some(cell(0, 2, 3))), &net);

        let r = mote.handle(&request(Operation::Delete, "6t/6/cl/0", None), &net);
        assert_eq!(r.status, Status::Deleted);
        assert_eq!(r.body["so"], 1);
        assert_eq!(r.body["cd"], 0);

        let r = mote.handle(&request(Operation::Delete, "6t/6/cl?so=2&co=3&fd=0", None), &net);
        assert_eq!(r.status, Status::Deleted);
        assert_eq!(r.body["cd"], 1);

        let r = mote.handle(&request(Operation::Delete, "6t/6/cl/0", None), &net);
        assert_eq!(r.status, Status::NotFound);
    }

    #[test]
    fn test_children_observe_pushes_changes() {
        let net = Network::reliable(0);
        let mut mote = Mote::new(node(0));
        let r = mote.handle(&request(Operation::Observe, "rpl/c", None), &net);
        assert_eq!(r.body, json!([]));

        mote.add_child(node(1));
        let pushes = mote.children_notifications();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].token, CommandId::new(7));
        assert_eq!(pushes[0].body, json!(["0:0:0:2"]));
    }

    #[test]
    fn test_statistics_follow_link_quality() {
        let mut net = Network::reliable(0);
        net.set_link_quality(node(1), node(0), 0.25);
        net.set_link_quality(node(0), node(1), 0.5);
        let mut mote = Mote::new(node(1));
        mote.set_parent(Some(node(0)));

        let r = mote.handle(&request(Operation::Post, "6t/6/sm", Some(json!({"mt": ["ETX", "PRR"]}))), &net);
        assert_eq!(r.body, json!({"md": 0}));

        let r = mote.handle(&request(Operation::Observe, "6t/6/ml/0", None), &net);
        assert_eq!(r.status, Status::Content);
        let report: LinkReport = serde_json::from_value(r.body).unwrap();
        let parent = &report["aaaa::1"];
        assert_eq!(parent.etx, Some(400.0));
        assert_eq!(parent.prr, Some(50.0));
        assert_eq!(parent.rssi, None);

        assert_eq!(mote.statistics_notifications(&net).len(), 1);
        let r = mote.handle(&request(Operation::Get, "6t/6/ml/9", None), &net);
        assert_eq!(r.status, Status::NotFound);
    }
}
