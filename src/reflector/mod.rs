//! The reflector: dispatches sessions, correlates replies and keeps the
//! mesh mirror up to date.
//!
//! # Module structure
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`hooks`] | [`Hooks`] policy trait, [`NoHooks`] |
//! | [`reply`] | [`Decoded`] reply kinds and the body decoder |
//! | `churn` | children reports, lost-child countdowns, disconnects |
//! | `tests` | scenario tests against a recording transport |
//!
//! ```text
//!   Session ──communicate──► sessions ──pop──► push_command ──► Communicator
//!                                ▲                  │
//!                                │               cache[token]
//!                             release               │
//!                                │                  ▼
//!   Hooks ◄── apply ◄── decode ◄─┴──────────── on_reply(Reply)
//! ```
//!
//! Everything runs on the caller's thread. A reply is handled to
//! completion, including the sessions its hook returns, before
//! `on_reply` returns.

pub mod hooks;
pub mod reply;

mod churn;


use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::command::resource::{CellBody, SlotframeBody, StatisticsBody};
use crate::command::{
    Command, CommandId, Operation, Payload, Resource, ResourcePath, Route, Session,
};
use crate::communicator::{Communicator, Reply};
use crate::error::{ControllerError, ControllerResult};
use crate::frame::SlotFrame;
use crate::mesh::Mesh;
use crate::node::NodeId;

pub use hooks::{Hooks, NoHooks};
pub use reply::{Decoded, Report};

use churn::LostChild;

// ── Session ID ────────────────────────────────────────────────────────

/// Handle of a running session inside one reflector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S#{}", self.0)
    }
}

// ── Churn settings ────────────────────────────────────────────────────

/// Lost-child countdown parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChurnSettings {
    /// Ticks a missing child is kept before it is disconnected.
    pub lost_child_ticks: u32,
    /// Fraction of the countdown after which the child is probed directly.
    pub probe_ratio: f64,
}

impl ChurnSettings {
    /// Remaining ticks at which the probe goes out.
    pub fn probe_at(&self) -> u32 {
        let remaining = f64::from(self.lost_child_ticks) * (1.0 - self.probe_ratio);
        (remaining.round() as u32).max(1)
    }
}

impl Default for ChurnSettings {
    fn default() -> Self {
        ChurnSettings {
            lost_child_ticks: 30,
            probe_ratio: 0.9,
        }
    }
}

// ── Reflector ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Pending {
    session: SessionId,
    command: Command,
}

/// Single-owner controller core.
///
/// Owns the [`Mesh`], the transport half `C` and the policy `H`. Feed it
/// replies with [`on_reply`](Reflector::on_reply) and time with
/// [`tick`](Reflector::tick).
pub struct Reflector<C: Communicator, H: Hooks = NoHooks> {
    mesh: Mesh,
    communicator: C,
    hooks: H,
    cache: BTreeMap<CommandId, Pending>,
    sessions: BTreeMap<SessionId, Session>,
    next_session: u64,
    lost: BTreeMap<NodeId, LostChild>,
    /// Child -> claimed parent, for claims that would close a loop.
    deferred: BTreeMap<NodeId, NodeId>,
    churn: ChurnSettings,
}

impl<C: Communicator, H: Hooks> Reflector<C, H> {
    pub fn new(mesh: Mesh, communicator: C, hooks: H) -> Self {
        Reflector {
            mesh,
            communicator,
            hooks,
            cache: BTreeMap::new(),
            sessions: BTreeMap::new(),
            next_session: 1,
            lost: BTreeMap::new(),
            deferred: BTreeMap::new(),
            churn: ChurnSettings::default(),
        }
    }

    pub fn with_churn(mut self, churn: ChurnSettings) -> Self {
        self.churn = churn;
        self
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Direct access for manual scheduling; pass the resulting sessions
    /// to [`communicate`](Reflector::communicate).
    pub fn mesh_mut(&mut self) -> &mut Mesh {
        &mut self.mesh
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn communicator(&self) -> &C {
        &self.communicator
    }

    pub fn communicator_mut(&mut self) -> &mut C {
        &mut self.communicator
    }

    pub fn churn(&self) -> ChurnSettings {
        self.churn
    }

    /// Commands waiting for a reply, standing observes included.
    pub fn in_flight(&self) -> usize {
        self.cache.len()
    }

    pub fn is_in_flight(&self, token: CommandId) -> bool {
        self.cache.contains_key(&token)
    }

    /// Sessions with unresolved commands.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Children currently counting down, with their remaining ticks.
    pub fn lost_children(&self) -> impl Iterator<Item = (NodeId, u32)> + '_ {
        self.lost.iter().map(|(n, l)| (*n, l.remaining))
    }

    /// Parent claims waiting for a loop in the topology to clear.
    pub fn deferred_claims(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.deferred.iter().map(|(c, p)| (*c, *p))
    }

    pub fn into_parts(self) -> (Mesh, C, H) {
        (self.mesh, self.communicator, self.hooks)
    }

    // ── Start-up ──────────────────────────────────────────────────

    /// Bring up the border router.
    ///
    /// Registers `frames`, subscribes to the root's children, then installs
    /// the frames on the root, its broadcast cell at `(1, 0)` of `broadcast`
    /// and a statistics definition over `metrics`.
    pub fn start(
        &mut self,
        frames: Vec<SlotFrame>,
        broadcast: &str,
        metrics: &[String],
    ) -> ControllerResult<()> {
        let names: Vec<String> = frames.iter().map(|f| f.name().to_string()).collect();
        for frame in frames {
            if !self.mesh.register_frame(frame) {
                warn!("slotframe already registered, keeping the existing definition");
            }
        }
        self.mesh.frame(broadcast)?;
        let root = self.mesh.root();
        info!(%root, frames = names.len(), "starting controller");

        let observe = self.mesh.get_remote_children(root, true);
        self.communicate(observe);

        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut setup = self.mesh.post_slotframes(root, &refs)?;
        setup.append(self.mesh.post_link(1, 0, broadcast, root, None, None)?)?;
        if !metrics.is_empty() {
            setup.append(self.mesh.set_remote_statistics(root, metrics))?;
        }
        self.communicate(setup);
        Ok(())
    }

    // ── Dispatch ──────────────────────────────────────────────────

    /// Start `session`: its first block goes out now.
    ///
    /// An open trailing block is closed first.
    pub fn communicate(&mut self, mut session: Session) -> Option<SessionId> {
        session.block();
        if session.finished() {
            return None;
        }
        let id = SessionId(self.next_session);
        self.next_session += 1;
        trace!(session = %id, commands = session.len(), "session started");
        self.sessions.insert(id, session);
        self.pump(id);
        Some(id)
    }

    fn communicate_all(&mut self, sessions: Vec<Session>) {
        for session in sessions {
            self.communicate(session);
        }
    }

    /// Send everything the session has ready; forget it once finished.
    fn pump(&mut self, id: SessionId) {
        while let Some(cmd) = self.sessions.get_mut(&id).and_then(Session::pop) {
            self.push_command(cmd, id);
        }
        if self.sessions.get(&id).is_some_and(Session::finished) {
            self.sessions.remove(&id);
            trace!(session = %id, "session finished");
        }
    }

    /// Resolve `token` in its session and move the session along.
    fn touch(&mut self, id: SessionId, token: CommandId) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.release(token);
            self.pump(id);
        }
    }

    fn encode<T: Serialize>(cmd: &Command, body: &T) -> ControllerResult<Value> {
        serde_json::to_value(body)
            .map_err(|e| ControllerError::InvariantViolation(format!("{}: {}", cmd, e)))
    }

    /// Wire body of `cmd`. Fails for a cell whose owner has no alias yet.
    fn body(&self, cmd: &Command) -> ControllerResult<Option<Value>> {
        let value = match &cmd.payload {
            Payload::Empty => return Ok(None),
            Payload::Slotframe { size } => Self::encode(cmd, &SlotframeBody { size: *size })?,
            Payload::Cell(req) => {
                let frame = cmd.frame().ok_or_else(|| {
                    ControllerError::InvariantViolation(format!("{} carries no slotframe", cmd))
                })?;
                let alias = self.mesh.frame(frame)?.alias_id(cmd.to).ok_or_else(|| {
                    ControllerError::InvariantViolation(format!(
                        "{} has no local id for '{}' yet",
                        cmd.to, frame
                    ))
                })?;
                let body = CellBody {
                    slot: req.slot,
                    channel: req.channel,
                    frame: alias,
                    option: req.option.bits(),
                    link_type: req.link_type,
                    target: req.target,
                };
                Self::encode(cmd, &body)?
            }
            Payload::Statistics { metrics } => Self::encode(
                cmd,
                &StatisticsBody {
                    metrics: metrics.clone(),
                },
            )?,
            Payload::Json(value) => value.clone(),
        };
        Ok(Some(value))
    }

    /// `false` for a cell POST whose reservation has been dropped since
    /// the command was planned.
    fn is_reserved(&self, cmd: &Command) -> bool {
        let (Payload::Cell(req), Some(name)) = (&cmd.payload, cmd.frame()) else {
            return true;
        };
        self.mesh.frame(name).is_ok_and(|f| {
            f.reservation(cmd.to, req.slot, req.channel, req.option)
                .is_some()
        })
    }

    /// Undo the reservation behind a cell POST its owner never accepted,
    /// together with the far side of the link. Far sides the other owners
    /// already confirmed are deleted remotely.
    fn abandon_cell(&mut self, cmd: &Command) {
        let (Payload::Cell(req), Some(name)) = (&cmd.payload, cmd.frame()) else {
            return;
        };
        let Ok(frame) = self.mesh.frame_mut(name) else {
            return;
        };
        let Some(cell) = frame.take_reservation(cmd.to, req.slot, req.channel, req.option) else {
            return;
        };
        let paired = frame.take_paired(&cell);
        info!(
            node = %cmd.to,
            frame = name,
            slot = cell.slot,
            channel = cell.channel,
            paired = paired.len(),
            "reservation dropped"
        );
        let mut deletes = Session::new();
        for other in paired.iter().filter(|c| c.is_confirmed()) {
            if let Some(delete) = self.mesh.delete_remote_cell(name, other) {
                deletes.push(delete);
            }
        }
        self.communicate(deletes);
    }

    fn release(&mut self, session: SessionId, token: CommandId) {
        if let Some(s) = self.sessions.get_mut(&session) {
            s.release(token);
        }
    }

    /// Route, cache and send one command.
    ///
    /// A command that cannot be encoded is released without being sent; a
    /// rejected cell also gives up its reservation.
    fn push_command(&mut self, mut cmd: Command, session: SessionId) {
        if !self.is_reserved(&cmd) {
            trace!(token = %cmd.id, node = %cmd.to, "reservation gone, cell not sent");
            self.release(session, cmd.id);
            return;
        }
        cmd.route = Some(Route::select(cmd.op, &cmd.path));
        let body = match self.body(&cmd) {
            Ok(body) => body,
            Err(err) => {
                warn!(token = %cmd.id, node = %cmd.to, %err, "command rejected");
                self.release(session, cmd.id);
                self.abandon_cell(&cmd);
                return;
            }
        };
        debug!(token = %cmd.id, node = %cmd.to, op = %cmd.op, path = %cmd.path, "sending");
        self.transmit(&cmd, body);
        self.cache.insert(
            cmd.id,
            Pending {
                session,
                command: cmd,
            },
        );
    }

    fn transmit(&mut self, cmd: &Command, body: Option<Value>) {
        let (to, path, token) = (cmd.to, cmd.path.clone(), cmd.id);
        match cmd.op {
            Operation::Get => self.communicator.get(to, path, token),
            Operation::Observe => self.communicator.observe(to, path, token),
            Operation::Post => self.communicator.post(to, path, body.unwrap_or(Value::Null), token),
            Operation::Delete => self.communicator.delete(to, path, token),
        }
    }

    /// Send every command of `session` without waiting for replies.
    ///
    /// Nothing is cached, so any answer is dropped as stale. Used for nodes
    /// that already left the topology.
    fn send_detached(&mut self, mut session: Session) {
        session.block();
        while let Some(cmd) = session.pop() {
            session.release(cmd.id);
            match self.body(&cmd) {
                Ok(body) => {
                    debug!(token = %cmd.id, node = %cmd.to, op = %cmd.op, path = %cmd.path, "sending detached");
                    self.transmit(&cmd, body);
                }
                Err(err) => warn!(token = %cmd.id, node = %cmd.to, %err, "command rejected"),
            }
        }
    }

    // ── Replies ───────────────────────────────────────────────────

    /// Handle one reply.
    ///
    /// Unknown tokens are dropped. A failure status or an undecodable body
    /// resolves the command and returns the error; the caller logs it and
    /// carries on.
    pub fn on_reply(&mut self, reply: Reply) -> ControllerResult<()> {
        let Some(pending) = self.cache.get(&reply.token) else {
            trace!(token = %reply.token, from = %reply.from, "stale reply dropped");
            return Ok(());
        };
        let session = pending.session;
        let cmd = pending.command.clone();
        let node = cmd.to;
        let route = cmd.route.unwrap_or_else(|| Route::select(cmd.op, &cmd.path));

        if !reply.status.is_success() {
            self.cache.remove(&cmd.id);
            if cmd.op == Operation::Post {
                self.abandon_cell(&cmd);
            }
            self.touch(session, cmd.id);
            let err = ControllerError::Protocol {
                token: cmd.id,
                node,
                op: cmd.op,
                path: cmd.path.to_string(),
                status: reply.status,
            };
            warn!(%err, "request failed");
            return Err(err);
        }

        let decoded = match reply::decode(route, &cmd.path, &reply.body, self.mesh.prefix()) {
            Ok(decoded) => decoded,
            Err(reason) => {
                self.cache.remove(&cmd.id);
                self.touch(session, cmd.id);
                let err = ControllerError::MalformedPayload {
                    token: cmd.id,
                    node,
                    path: cmd.path.to_string(),
                    reason,
                };
                error!(%err, "reply dropped");
                return Err(err);
            }
        };

        if cmd.op != Operation::Observe {
            self.cache.remove(&cmd.id);
        }
        let follow_ups = self.apply(&cmd, decoded);
        self.communicate_all(follow_ups);
        self.touch(session, cmd.id);
        Ok(())
    }

    /// State update plus hook for one decoded reply.
    fn apply(&mut self, cmd: &Command, decoded: Decoded) -> Vec<Session> {
        let node = cmd.to;
        match decoded {
            Decoded::Children(children) => self.on_children(node, &children, cmd.is_probe()),
            Decoded::FrameInstalled(ack) => {
                let Some(name) = cmd.frame() else {
                    warn!(token = %cmd.id, "slotframe ack without a frame");
                    return Vec::new();
                };
                match self.mesh.frame_mut(name) {
                    Ok(frame) => frame.set_alias_id(node, ack.alias),
                    Err(err) => {
                        warn!(%err, "slotframe ack for an unregistered frame");
                        return Vec::new();
                    }
                }
                info!(%node, frame = name, alias = ack.alias, "slotframe installed");
                self.hooks.framed(&mut self.mesh, node, name, ack.alias)
            }
            Decoded::CellInstalled(ack) => self.on_cell_installed(cmd, ack.id),
            Decoded::ProbeInstalled(ack) => {
                debug!(%node, id = ack.id, "statistics defined");
                self.hooks.probed(&mut self.mesh, node, ack.id)
            }
            Decoded::Reported(report) => {
                trace!(%node, path = %cmd.path, "report");
                self.hooks.reported(&mut self.mesh, node, &cmd.path, &report)
            }
            Decoded::Removed(info) => {
                debug!(%node, path = %cmd.path, "removed");
                self.hooks.deleted(&mut self.mesh, node, &cmd.path, &info)
            }
        }
    }

    fn on_cell_installed(&mut self, cmd: &Command, remote_id: u16) -> Vec<Session> {
        let node = cmd.to;
        let (Payload::Cell(req), Some(name)) = (&cmd.payload, cmd.frame()) else {
            warn!(token = %cmd.id, "cell ack without a cell request");
            return Vec::new();
        };
        let confirmed = self
            .mesh
            .frame_mut(name)
            .ok()
            .and_then(|f| f.set_remote_cell_id(node, req.slot, req.channel, req.option, remote_id))
            .cloned();
        match confirmed {
            Some(cell) => {
                info!(%node, frame = name, slot = cell.slot, channel = cell.channel, id = remote_id, "cell installed");
                self.hooks.celled(&mut self.mesh, node, &cell)
            }
            None => {
                warn!(%node, frame = name, id = remote_id, "cell confirmed after its reservation was dropped");
                let delete = self
                    .mesh
                    .command(
                        Operation::Delete,
                        node,
                        ResourcePath::entry(Resource::CellList, remote_id),
                    )
                    .attach(crate::command::ATTACH_FRAME, name);
                let mut session = Session::new();
                session.push(delete);
                vec![session]
            }
        }
    }
}
