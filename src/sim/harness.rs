//! `MeshSimulation`: a reflector wired to emulated motes over a simulated
//! network, driven by a deterministic event queue.
//!
//! ```text
//!   Reflector ──Outbox──► flush ──Network──► Request ──► Mote::handle
//!       ▲                                                      │
//!       └── on_reply ◄── Reply ◄──Network◄── send_reply ◄───────┘
//! ```
//!
//! Scripted churn (`join`, `leave`, `rewire`) mutates the motes, which push
//! the new children lists to their observers. Periodic `Tick` events drive
//! the reflector's countdowns and hooks; `Report` events push statistics.

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use crate::communicator::{Outbox, Reply};
use crate::error::ControllerResult;
use crate::frame::SlotFrame;
use crate::node::NodeId;
use crate::reflector::{Hooks, Reflector};

use super::event::{Event, EventKind, EventQueue};
use super::mote::Mote;
use super::network::{Network, NetworkConfig, NetworkDecision};
use super::time::VirtualTime;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub seed: u64,
    pub network: NetworkConfig,
    /// Virtual ticks between reflector ticks.
    pub tick_interval: u64,
    /// Virtual ticks between statistics pushes.
    pub report_interval: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            seed: 0,
            network: NetworkConfig::reliable(),
            tick_interval: 10,
            report_interval: 50,
        }
    }
}

/// Counters over one simulation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationStats {
    pub events: u64,
    /// Requests that reached a mote.
    pub requests: u64,
    /// Replies and notifications that reached the controller.
    pub replies: u64,
    pub notifications: u64,
    /// Replies the reflector rejected.
    pub failures: u64,
    /// Requests addressed to a mote that is not there.
    pub unanswered: u64,
    pub disconnects: u64,
}

pub struct MeshSimulation<H: Hooks> {
    reflector: Reflector<Outbox, H>,
    motes: BTreeMap<NodeId, Mote>,
    network: Network,
    queue: EventQueue,
    now: VirtualTime,
    config: SimulationConfig,
    stats: SimulationStats,
}

impl<H: Hooks> MeshSimulation<H> {
    /// Wrap `reflector`; the border router mote is created from its root.
    pub fn new(reflector: Reflector<Outbox, H>, config: SimulationConfig) -> Self {
        let root = reflector.mesh().root();
        let mut motes = BTreeMap::new();
        motes.insert(root, Mote::new(root));
        let mut queue = EventQueue::new();
        queue.schedule(VirtualTime::new(config.tick_interval.max(1)), EventKind::Tick);
        queue.schedule(VirtualTime::new(config.report_interval.max(1)), EventKind::Report);
        MeshSimulation {
            reflector,
            motes,
            network: Network::new(config.network.clone(), config.seed),
            queue,
            now: VirtualTime::ZERO,
            config,
            stats: SimulationStats::default(),
        }
    }

    /// Start the reflector and put its first requests on the air.
    pub fn start(&mut self, frames: Vec<SlotFrame>, broadcast: &str, metrics: &[String]) -> ControllerResult<()> {
        self.reflector.start(frames, broadcast, metrics)?;
        self.flush();
        Ok(())
    }

    // ── Scripting ─────────────────────────────────────────────────

    pub fn join(&mut self, at: u64, node: NodeId, parent: NodeId) {
        self.queue.schedule(VirtualTime::new(at), EventKind::Join { node, parent });
    }

    pub fn leave(&mut self, at: u64, node: NodeId) {
        self.queue.schedule(VirtualTime::new(at), EventKind::Leave { node });
    }

    pub fn rewire(&mut self, at: u64, node: NodeId, parent: NodeId) {
        self.queue.schedule(VirtualTime::new(at), EventKind::Rewire { node, parent });
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn reflector(&self) -> &Reflector<Outbox, H> {
        &self.reflector
    }

    pub fn reflector_mut(&mut self) -> &mut Reflector<Outbox, H> {
        &mut self.reflector
    }

    pub fn mote(&self, node: NodeId) -> Option<&Mote> {
        self.motes.get(&node)
    }

    pub fn motes(&self) -> impl Iterator<Item = &Mote> {
        self.motes.values()
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    pub fn now(&self) -> VirtualTime {
        self.now
    }

    pub fn stats(&self) -> SimulationStats {
        self.stats
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    // ── Execution ─────────────────────────────────────────────────

    /// Dispatch the next event. `false` once the queue is empty.
    pub fn step(&mut self) -> bool {
        let Some(event) = self.queue.pop_next() else {
            return false;
        };
        debug_assert!(event.at >= self.now, "time went backward");
        self.now = event.at;
        self.stats.events += 1;
        self.dispatch(event);
        true
    }

    /// Dispatch every event scheduled at or before `horizon`, then park
    /// the clock there. Returns the number of events processed.
    pub fn run_until(&mut self, horizon: u64) -> u64 {
        let horizon = VirtualTime::new(horizon);
        let start = self.stats.events;
        while self.queue.peek_next().is_some_and(|e| e.at <= horizon) {
            self.step();
        }
        if self.now < horizon {
            self.now = horizon;
        }
        self.stats.events - start
    }

    fn dispatch(&mut self, event: Event) {
        trace!(at = %event.at, id = %event.id, kind = %event.kind, "dispatch");
        match event.kind {
            EventKind::Request(request) => match self.motes.get_mut(&request.to) {
                Some(mote) => {
                    self.stats.requests += 1;
                    let reply = mote.handle(&request, &self.network);
                    self.send_reply(reply);
                }
                None => {
                    self.stats.unanswered += 1;
                    trace!(to = %request.to, token = %request.token, "no mote at address");
                }
            },
            EventKind::Reply(reply) => {
                self.stats.replies += 1;
                if let Err(err) = self.reflector.on_reply(reply) {
                    self.stats.failures += 1;
                    debug!(%err, "reply rejected");
                }
                self.flush();
            }
            EventKind::Tick => {
                let removed = self.reflector.tick();
                self.stats.disconnects += removed.len() as u64;
                self.flush();
                let next = self.now.plus(self.config.tick_interval.max(1));
                self.queue.schedule(next, EventKind::Tick);
            }
            EventKind::Report => {
                let pushes: Vec<Reply> = self
                    .motes
                    .values()
                    .flat_map(|m| m.statistics_notifications(&self.network))
                    .collect();
                for reply in pushes {
                    self.stats.notifications += 1;
                    self.send_reply(reply);
                }
                let next = self.now.plus(self.config.report_interval.max(1));
                self.queue.schedule(next, EventKind::Report);
            }
            EventKind::Join { node, parent } => self.on_join(node, parent),
            EventKind::Leave { node } => self.on_leave(node),
            EventKind::Rewire { node, parent } => self.on_rewire(node, parent),
        }
    }

    /// Hand everything the reflector queued to the network.
    fn flush(&mut self) {
        let root = self.reflector.mesh().root();
        for request in self.reflector.communicator_mut().drain() {
            match self.network.process(root, request.to) {
                NetworkDecision::Delivered { latency } => {
                    self.queue.schedule(self.now.plus(latency), EventKind::Request(request));
                }
                decision => trace!(to = %request.to, ?decision, "request lost"),
            }
        }
    }

    fn send_reply(&mut self, reply: Reply) {
        let root = self.reflector.mesh().root();
        match self.network.process(reply.from, root) {
            NetworkDecision::Delivered { latency } => {
                self.queue.schedule(self.now.plus(latency), EventKind::Reply(reply));
            }
            decision => trace!(from = %reply.from, ?decision, "reply lost"),
        }
    }

    fn notify_children(&mut self, node: NodeId) {
        let pushes = match self.motes.get(&node) {
            Some(mote) => mote.children_notifications(),
            None => return,
        };
        for reply in pushes {
            self.stats.notifications += 1;
            self.send_reply(reply);
        }
    }

    // ── Churn ─────────────────────────────────────────────────────

    fn on_join(&mut self, node: NodeId, parent: NodeId) {
        if node == parent || !self.motes.contains_key(&parent) {
            warn!(%node, %parent, "join ignored, parent is not in the mesh");
            return;
        }
        if self.motes.get(&node).and_then(Mote::parent).is_some() {
            self.on_rewire(node, parent);
            return;
        }
        debug!(%node, %parent, "mote joining");
        self.motes
            .entry(node)
            .or_insert_with(|| Mote::new(node))
            .set_parent(Some(parent));
        let added = self
            .motes
            .get_mut(&parent)
            .map(|p| p.add_child(node))
            .unwrap_or(false);
        if added {
            self.notify_children(parent);
        }
    }

    fn on_leave(&mut self, node: NodeId) {
        if node == self.reflector.mesh().root() {
            warn!("the border router cannot leave");
            return;
        }
        let Some(mote) = self.motes.get(&node) else { return };
        let parent = mote.parent();

        let mut gone = vec![node];
        let mut i = 0;
        while i < gone.len() {
            if let Some(m) = self.motes.get(&gone[i]) {
                gone.extend(m.children());
            }
            i += 1;
        }
        debug!(%node, subtree = gone.len(), "motes leaving");
        for n in &gone {
            self.motes.remove(n);
        }
        if let Some(parent) = parent {
            if self.motes.get_mut(&parent).is_some_and(|p| p.remove_child(node)) {
                self.notify_children(parent);
            }
        }
    }

    fn on_rewire(&mut self, node: NodeId, parent: NodeId) {
        if node == parent || !self.motes.contains_key(&parent) {
            warn!(%node, %parent, "rewire ignored, parent is not in the mesh");
            return;
        }
        let Some(old) = self.motes.get(&node).map(Mote::parent) else {
            return;
        };
        if old == Some(parent) {
            return;
        }
        debug!(%node, %parent, "mote rewiring");
        if let Some(mote) = self.motes.get_mut(&node) {
            mote.set_parent(Some(parent));
        }
        if let Some(old) = old {
            if self.motes.get_mut(&old).is_some_and(|p| p.remove_child(node)) {
                self.notify_children(old);
            }
        }
        if self.motes.get_mut(&parent).is_some_and(|p| p.add_child(node)) {
            self.notify_children(parent);
        }
    }
}
