//! Structured error types for the controller.
//!
//! Reply handling returns `Result<(), ControllerError>` so the event loop
//! can log and carry on; nothing on the reply path is fatal. Only start-up
//! problems (bad configuration, unparsable addresses) are meant to stop
//! the process.

use std::path::PathBuf;

use thiserror::Error;

use crate::command::{CommandId, Operation, SessionError};
use crate::communicator::Status;
use crate::frame::LinkError;
use crate::node::NodeId;

fn target_label(rx: &Option<NodeId>) -> String {
    match rx {
        Some(node) => node.to_string(),
        None => "broadcast".to_string(),
    }
}

/// The top-level error type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerError {
    // ── Reply errors ──────────────────────────────────────

    /// The mote answered with a non-success code.
    #[error("{node} answered {status} to {op} {path} ({token})")]
    Protocol {
        token: CommandId,
        node: NodeId,
        op: Operation,
        path: String,
        status: Status,
    },

    /// The reply body did not decode into what the resource promises.
    #[error("malformed reply from {node} on {path} ({token}): {reason}")]
    MalformedPayload {
        token: CommandId,
        node: NodeId,
        path: String,
        reason: String,
    },

    // ── Scheduling errors ─────────────────────────────────

    /// No free coordinate left for the link.
    #[error("slotframe '{frame}' has no free cell for {tx} -> {}", target_label(.rx))]
    CapacityExhausted {
        frame: String,
        tx: NodeId,
        rx: Option<NodeId>,
    },

    /// A command or reservation would break a scheduling invariant.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("unknown slotframe '{0}'")]
    UnknownFrame(String),

    #[error("node {0} is not part of the topology")]
    UnknownNode(NodeId),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Session(#[from] SessionError),

    // ── Addressing / configuration ────────────────────────

    #[error("invalid node address '{0}'")]
    InvalidAddress(String),

    #[error("failed to read config file '{path}': {reason}")]
    ConfigRead { path: PathBuf, reason: String },

    #[error("failed to parse config: {0}")]
    ConfigParse(String),

    #[error("invalid value for environment variable '{name}': {message}")]
    InvalidEnvVar { name: String, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Driver ────────────────────────────────────────────

    #[error("reflector task is no longer running")]
    ChannelClosed,
}

impl ControllerError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ControllerError::Protocol { .. } => "PROTOCOL",
            ControllerError::MalformedPayload { .. } => "MALFORMED_PAYLOAD",
            ControllerError::CapacityExhausted { .. } => "CAPACITY_EXHAUSTED",
            ControllerError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            ControllerError::UnknownFrame(_) => "UNKNOWN_FRAME",
            ControllerError::UnknownNode(_) => "UNKNOWN_NODE",
            ControllerError::Link(_) => "LINK_REJECTED",
            ControllerError::Session(_) => "SESSION",
            ControllerError::InvalidAddress(_) => "INVALID_ADDRESS",
            ControllerError::ConfigRead { .. } => "CONFIG_READ",
            ControllerError::ConfigParse(_) => "CONFIG_PARSE",
            ControllerError::InvalidEnvVar { .. } => "CONFIG_ENV",
            ControllerError::InvalidConfig(_) => "CONFIG_INVALID",
            ControllerError::ChannelClosed => "CHANNEL_CLOSED",
        }
    }

    /// `true` if the controller keeps running after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ControllerError::InvalidAddress(_)
                | ControllerError::ConfigRead { .. }
                | ControllerError::ConfigParse(_)
                | ControllerError::InvalidEnvVar { .. }
                | ControllerError::InvalidConfig(_)
                | ControllerError::ChannelClosed
        )
    }
}

/// Convenience alias for `Result<T, ControllerError>`.
pub type ControllerResult<T> = Result<T, ControllerError>;
