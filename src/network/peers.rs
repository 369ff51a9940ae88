use super::channel::{OutboundChannel, SendReceipt};
use super::message::{Message, NodeId};

/// This branch's view of one other branch. The inbound half of the pair is
/// owned by that peer's reader task, not stored here.
pub struct Peer {
    pub id: NodeId,
    pub address: String,
    pub outbound: OutboundChannel,
}

/// Every other branch, ordered by id.
pub struct Peers {
    members: Vec<Peer>,
}

impl Peers {
    pub fn new(mut members: Vec<Peer>) -> Self {
        members.sort_by_key(|peer| peer.id);
        Peers { members }
    }

    pub fn get(&self, id: NodeId) -> Option<&Peer> {
        self.members
            .binary_search_by_key(&id, |peer| peer.id)
            .ok()
            .map(|idx| &self.members[idx])
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter().map(|peer| peer.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_member(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Sends `message` to every peer, in id order.
    pub async fn broadcast(&self, message: &Message) -> Vec<(NodeId, SendReceipt)> {
        let mut receipts = Vec::with_capacity(self.members.len());
        for peer in &self.members {
            receipts.push((peer.id, peer.outbound.send(message).await));
        }
        receipts
    }
}
