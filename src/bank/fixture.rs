//! In-memory harness for a single branch. Every channel is a duplex pipe, so
//! a test plays the part of the peers and the observer frame by frame.

use std::{collections::BTreeMap, time::Duration};

use tokio::io::{duplex, DuplexStream};

use super::node::{BranchLinks, RunningBranch};
use crate::config::{BranchConfig, TransferConfig};
use crate::network::{read_frame, write_frame, Message, NodeId, OutboundChannel, Peer, Peers};

const PIPE_CAPACITY: usize = 1 << 20;

pub(crate) struct Fixture {
    pub running: RunningBranch,
    to_peer: BTreeMap<NodeId, DuplexStream>,
    from_peer: BTreeMap<NodeId, DuplexStream>,
    pub observer: DuplexStream,
}

impl Fixture {
    /// Starts branch `id` with `balance` and the given peers. The random
    /// sender loops are idle, so only what the test drives goes on the wire.
    pub fn new(id: NodeId, balance: i64, peer_ids: &[NodeId]) -> Self {
        let mut peers = Vec::new();
        let mut inbound = Vec::new();
        let mut to_peer = BTreeMap::new();
        let mut from_peer = BTreeMap::new();

        for &peer in peer_ids {
            let (outbound, remote_in) = duplex(PIPE_CAPACITY);
            peers.push(Peer {
                id: peer,
                address: format!("memory:{}", peer),
                outbound: OutboundChannel::new(format!("branch-{}", peer), Box::new(outbound)),
            });
            to_peer.insert(peer, remote_in);

            let (remote_out, local_in) = duplex(PIPE_CAPACITY);
            inbound.push((peer, Box::new(local_in) as crate::network::FrameReader));
            from_peer.insert(peer, remote_out);
        }

        let (observer_out, observer) = duplex(PIPE_CAPACITY);
        let links = BranchLinks {
            id,
            peers: Peers::new(peers),
            inbound,
            observer: OutboundChannel::new("observer", Box::new(observer_out)),
        };
        let config = BranchConfig {
            initial_balance: balance,
            transfer: TransferConfig {
                max_sends: Some(0),
                ..TransferConfig::default()
            },
            ..BranchConfig::default()
        };

        Fixture {
            running: RunningBranch::start(links, &config),
            to_peer,
            from_peer,
            observer,
        }
    }

    /// What the branch wrote on its channel to `id`.
    pub fn to_peer(&mut self, id: NodeId) -> &mut DuplexStream {
        self.to_peer.get_mut(&id).expect("unknown peer")
    }

    /// Where the test writes as peer `id`.
    pub fn from_peer(&mut self, id: NodeId) -> &mut DuplexStream {
        self.from_peer.get_mut(&id).expect("unknown peer")
    }

    /// Hangs up peer `id`'s end of the outgoing channel.
    pub fn close_peer(&mut self, id: NodeId) {
        self.to_peer.remove(&id);
    }
}

pub(crate) async fn expect_frame(stream: &mut DuplexStream) -> Message {
    tokio::time::timeout(Duration::from_secs(5), read_frame(stream))
        .await
        .expect("timed out waiting for a frame")
        .expect("read failed")
        .expect("stream closed")
}

pub(crate) async fn send_frame(stream: &mut DuplexStream, message: &Message) {
    write_frame(stream, message).await.expect("write failed");
}
