use std::collections::BTreeMap;

use super::report::{ChannelState, LocalSnapshot};
use crate::common::{now, Timestamp};
use crate::network::{Amount, NodeId};

/*
    Recording state for one snapshot epoch on one branch. Epochs are keyed
    by initiator; concurrently initiated epochs are tracked side by side and
    never merged.

    An incoming channel starts out `Recording` and accumulates every transfer
    credited on it. Its own marker moves it to `Recorded`, after which the value
    is frozen: later markers on that channel do not change it.
*/

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelRecord {
    Recording(Amount),
    Recorded(Amount),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerOutcome {
    /// The channel was recording and is now closed with this in-flight amount.
    Closed(Amount),
    /// Duplicate or stale marker.
    Ignored,
}

#[derive(Debug)]
pub struct Epoch {
    pub initiator: NodeId,
    pub local_balance: i64,
    pub recorded_at: Timestamp,
    channels: BTreeMap<NodeId, ChannelRecord>,
}

impl Epoch {
    /// The initiator received no marker, so every incoming channel is recorded.
    pub fn initiate(
        initiator: NodeId,
        local_balance: i64,
        incoming: impl IntoIterator<Item = NodeId>,
    ) -> Self {
        Epoch {
            initiator,
            local_balance,
            recorded_at: now(),
            channels: incoming
                .into_iter()
                .map(|from| (from, ChannelRecord::Recording(0)))
                .collect(),
        }
    }

    /// A participant's first marker arrived from `first`. Nothing was in flight
    /// on that channel, so it is recorded as empty right away.
    pub fn join(
        initiator: NodeId,
        local_balance: i64,
        incoming: impl IntoIterator<Item = NodeId>,
        first: NodeId,
    ) -> Self {
        let mut epoch = Epoch::initiate(initiator, local_balance, incoming);
        epoch.channels.insert(first, ChannelRecord::Recorded(0));
        epoch
    }

    pub fn observe_transfer(&mut self, from: NodeId, amount: Amount) {
        if let Some(ChannelRecord::Recording(sum)) = self.channels.get_mut(&from) {
            *sum = sum.saturating_add(amount);
        }
    }

    pub fn close_channel(&mut self, from: NodeId) -> MarkerOutcome {
        match self.channels.get(&from).copied() {
            Some(ChannelRecord::Recording(sum)) => {
                self.channels.insert(from, ChannelRecord::Recorded(sum));
                MarkerOutcome::Closed(sum)
            }
            _ => MarkerOutcome::Ignored,
        }
    }

    pub fn channel(&self, from: NodeId) -> Option<ChannelRecord> {
        self.channels.get(&from).copied()
    }

    pub fn is_complete(&self) -> bool {
        self.channels
            .values()
            .all(|record| matches!(record, ChannelRecord::Recorded(_)))
    }

    pub fn in_flight_total(&self) -> Amount {
        self.channels
            .values()
            .map(|record| match record {
                ChannelRecord::Recording(sum) | ChannelRecord::Recorded(sum) => *sum,
            })
            .sum()
    }

    pub fn into_report(self, node_id: NodeId) -> LocalSnapshot {
        let in_flight_total = self.in_flight_total();
        LocalSnapshot {
            node_id,
            initiator: self.initiator,
            balance: self.local_balance,
            in_flight_total,
            channels: self
                .channels
                .into_iter()
                .map(|(from, record)| ChannelState {
                    from,
                    in_flight: match record {
                        ChannelRecord::Recording(sum) | ChannelRecord::Recorded(sum) => sum,
                    },
                })
                .collect(),
        }
    }
}

/// Every epoch this branch is currently recording.
#[derive(Debug, Default)]
pub struct EpochTable {
    active: BTreeMap<NodeId, Epoch>,
}

impl EpochTable {
    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn contains(&self, initiator: NodeId) -> bool {
        self.active.contains_key(&initiator)
    }

    pub fn get(&self, initiator: NodeId) -> Option<&Epoch> {
        self.active.get(&initiator)
    }

    pub fn begin(&mut self, epoch: Epoch) {
        self.active.insert(epoch.initiator, epoch);
    }

    pub fn observe_transfer(&mut self, from: NodeId, amount: Amount) {
        for epoch in self.active.values_mut() {
            epoch.observe_transfer(from, amount);
        }
    }

    pub fn close_channel(&mut self, initiator: NodeId, from: NodeId) -> MarkerOutcome {
        match self.active.get_mut(&initiator) {
            Some(epoch) => epoch.close_channel(from),
            None => MarkerOutcome::Ignored,
        }
    }

    /// Removes and returns the epoch once every channel is recorded.
    pub fn take_completed(&mut self, initiator: NodeId) -> Option<Epoch> {
        if self.active.get(&initiator)?.is_complete() {
            self.active.remove(&initiator)
        } else {
            None
        }
    }
}
