use std::io;

use thiserror::Error;

use crate::network::{Amount, NodeId};

/// A read, write or connect failure on one channel. Only the tasks bound to
/// that channel stop; during start-up it is fatal to the branch.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("connection closed")]
    Closed,

    #[error("timed out after {0}ms")]
    Timeout(u64),
}

/// Malformed or unexpected input from a peer. Peers are assumed to cooperate,
/// so the receiving task gives up on the channel.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame length {0} is out of range")]
    FrameLength(usize),

    #[error("undecodable message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("expected hello, got {0}")]
    UnexpectedHandshake(&'static str),

    #[error("unexpected {subject} message from branch {from}")]
    UnexpectedMessage { from: NodeId, subject: &'static str },

    #[error("unknown branch {0}")]
    UnknownPeer(NodeId),

    #[error("transfer of {amount} from branch {from} overflows the balance")]
    AmountOutOfRange { from: NodeId, amount: Amount },
}

/// Anything that can go wrong while moving a frame across a channel.
#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Error)]
pub enum TransferError {
    /// Business outcome, not a fault: the sender simply retries next tick.
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Amount, available: i64 },

    #[error("transfer amount must be positive")]
    InvalidAmount,

    #[error("unknown branch {0}")]
    UnknownPeer(NodeId),

    #[error("transport failure while sending to branch {0}")]
    Transport(NodeId),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("a snapshot is already in progress on this branch")]
    AlreadyActive,

    #[error("snapshot coordinator has stopped")]
    CoordinatorStopped,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry io error: {0}")]
    Io(#[from] io::Error),

    #[error("registry document is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("registry lock poisoned or unavailable: {0}")]
    Lock(String),

    #[error("only {found} of {expected} branches registered before the timeout")]
    Timeout { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Start-up failures. Each of these terminates the branch process.
#[derive(Debug, Error)]
pub enum BankError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<WireError> for BankError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Transport(e) => BankError::Transport(e),
            WireError::Protocol(e) => BankError::Protocol(e),
        }
    }
}
