/*
    A set of bank branches continuously move money between each other over
    point-to-point FIFO channels. At any moment one branch may ask for a
    consistent global snapshot: every branch's balance plus every amount still
    travelling on a channel, recorded without pausing the transfers.

    The snapshot follows Chandy and Lamport. The initiator records its own
    state and sends a marker on every outgoing channel. A branch that sees its
    first marker records its state, relays the marker on every outgoing channel,
    and then records each remaining incoming channel as the transfers that
    arrive on it before that channel's marker. FIFO delivery on every channel is
    what makes the cut consistent.
*/

pub mod bank;
pub mod common;
pub mod config;
pub mod network;
pub mod observer;
pub mod snapshot;

pub use bank::{Branch, BranchHandle, RunningBranch};
pub use config::{BranchConfig, ObserverConfig, RetryConfig, TransferConfig};
pub use network::{Amount, Message, NodeId};
pub use observer::{Observer, ObserverEvent};
pub use snapshot::{GlobalSnapshot, LocalSnapshot};
