use serde::{Deserialize, Serialize};

use crate::common::Timestamp;
use crate::snapshot::{GlobalSnapshot, LocalSnapshot};

/*
    Every frame on the wire is one self-describing record tagged by its
    `subject`. Branch-to-branch channels carry transfers, markers and local
    snapshots on their way to the initiator. The observer channel carries send
    and receive events and the assembled global snapshot. `hello` is only ever
    the first frame of a freshly dialled connection and names the dialler.
*/

/// Dense, 0-based branch id handed out by the registry.
pub type NodeId = usize;

pub type Amount = u64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "subject", rename_all = "snake_case")]
pub enum Message {
    Hello { node_id: NodeId },
    Transfer { amount: Amount },
    Marker { initiator: NodeId },
    Snapshot(LocalSnapshot),
    GlobalSnapshot(GlobalSnapshot),
    Send(SendEvent),
    Receive(ReceiveEvent),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEvent {
    pub sender_id: NodeId,
    pub receiver_id: NodeId,
    pub amount: Amount,
    pub send_time: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveEvent {
    pub sender_id: NodeId,
    pub receiver_id: NodeId,
    pub amount: Amount,
    pub receive_time: Timestamp,
}

impl Message {
    pub fn subject(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::Transfer { .. } => "transfer",
            Message::Marker { .. } => "marker",
            Message::Snapshot(_) => "snapshot",
            Message::GlobalSnapshot(_) => "global_snapshot",
            Message::Send(_) => "send",
            Message::Receive(_) => "receive",
        }
    }
}
