//! The transport seam.
//!
//! A [`Communicator`] fires requests and later hands replies back to the
//! reflector, correlated by token. Delivery is not guaranteed: a request
//! may yield no reply, one reply, or (for observes) many.

use std::collections::VecDeque;
use std::fmt;

use serde_json::Value;

use crate::command::{CommandId, Operation, ResourcePath};
use crate::node::NodeId;

// ── Status ────────────────────────────────────────────────────────────

/// Result code of a reply (CoAP response classes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Created,
    Deleted,
    Valid,
    Changed,
    Content,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    Conflict,
    InternalError,
    Unavailable,
    /// Any other code, as `class * 100 + detail`.
    Other(u16),
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Created => 201,
            Status::Deleted => 202,
            Status::Valid => 203,
            Status::Changed => 204,
            Status::Content => 205,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::Conflict => 409,
            Status::InternalError => 500,
            Status::Unavailable => 503,
            Status::Other(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            201 => Status::Created,
            202 => Status::Deleted,
            203 => Status::Valid,
            204 => Status::Changed,
            205 => Status::Content,
            400 => Status::BadRequest,
            404 => Status::NotFound,
            405 => Status::MethodNotAllowed,
            409 => Status::Conflict,
            500 => Status::InternalError,
            503 => Status::Unavailable,
            other => Status::Other(other),
        }
    }

    #[inline]
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.code())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code();
        write!(f, "{}.{:02}", code / 100, code % 100)
    }
}

// ── Request / Reply ───────────────────────────────────────────────────

/// An outbound request, as handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub token: CommandId,
    pub op: Operation,
    pub to: NodeId,
    pub path: ResourcePath,
    pub body: Option<Value>,
}

/// An inbound reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub token: CommandId,
    pub from: NodeId,
    pub status: Status,
    /// Decoded payload, `Value::Null` when empty.
    pub body: Value,
}

impl Reply {
    pub fn new(token: CommandId, from: NodeId, status: Status, body: Value) -> Self {
        Reply {
            token,
            from,
            status,
            body,
        }
    }

    /// A reply to `request` from its target.
    pub fn answer(request: &Request, status: Status, body: Value) -> Self {
        Reply::new(request.token, request.to, status, body)
    }
}

// ── Communicator ──────────────────────────────────────────────────────

/// Outbound half of the transport.
///
/// Only [`send`](Communicator::send) is required; the verb helpers build
/// the [`Request`].
pub trait Communicator {
    fn send(&mut self, request: Request);

    fn get(&mut self, to: NodeId, path: ResourcePath, token: CommandId) {
        self.send(Request {
            token,
            op: Operation::Get,
            to,
            path,
            body: None,
        });
    }

    fn observe(&mut self, to: NodeId, path: ResourcePath, token: CommandId) {
        self.send(Request {
            token,
            op: Operation::Observe,
            to,
            path,
            body: None,
        });
    }

    fn post(&mut self, to: NodeId, path: ResourcePath, body: Value, token: CommandId) {
        self.send(Request {
            token,
            op: Operation::Post,
            to,
            path,
            body: Some(body),
        });
    }

    fn delete(&mut self, to: NodeId, path: ResourcePath, token: CommandId) {
        self.send(Request {
            token,
            op: Operation::Delete,
            to,
            path,
            body: None,
        });
    }
}

/// Buffers requests until the owner drains them.
///
/// Used by the simulated mesh and by tests to inspect what was sent.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    queue: VecDeque<Request>,
    sent: u64,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&mut self) -> Vec<Request> {
        self.queue.drain(..).collect()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Request> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Requests sent over the outbox's lifetime.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl Communicator for Outbox {
    fn send(&mut self, request: Request) {
        self.sent += 1;
        self.queue.push_back(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Resource;
    use crate::node::testing::node;

    #[test]
    fn test_status_classes() {
        assert!(Status::Content.is_success());
        assert!(Status::Created.is_success());
        assert!(!Status::NotFound.is_success());
        assert!(!Status::Other(302).is_success());
        assert_eq!(Status::from_code(205), Status::Content);
        assert_eq!(Status::NotFound.to_string(), "4.04");
    }

    #[test]
    fn test_outbox_verbs() {
        let mut out = Outbox::new();
        out.observe(node(1), ResourcePath::new(Resource::RplChildren), CommandId::new(1));
        out.post(
            node(2),
            ResourcePath::new(Resource::Slotframe),
            serde_json::json!({"ns": 25}),
            CommandId::new(2),
        );
        assert_eq!(out.len(), 2);
        let sent = out.drain();
        assert_eq!(sent[0].op, Operation::Observe);
        assert_eq!(sent[1].body, Some(serde_json::json!({"ns": 25})));
        assert!(out.is_empty());
        assert_eq!(out.sent(), 2);
    }
}
