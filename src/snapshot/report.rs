use serde::{Deserialize, Serialize};

use crate::common::Timestamp;
use crate::network::{Amount, NodeId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    /// Sending end of the recorded incoming channel.
    pub from: NodeId,
    pub in_flight: Amount,
}

/// One branch's part of a snapshot: its recorded balance and the money it
/// recorded on each incoming channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    pub node_id: NodeId,
    pub initiator: NodeId,
    pub balance: i64,
    pub in_flight_total: Amount,
    #[serde(default)]
    pub channels: Vec<ChannelState>,
}

impl LocalSnapshot {
    pub fn total(&self) -> i64 {
        self.balance + self.in_flight_total as i64
    }

    pub fn channel(&self, from: NodeId) -> Option<Amount> {
        self.channels
            .iter()
            .find(|state| state.from == from)
            .map(|state| state.in_flight)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSnapshot {
    pub initiator: NodeId,
    pub request_time: Timestamp,
    pub completion_time: Timestamp,
    /// One report per branch, ordered by branch id.
    pub reports: Vec<LocalSnapshot>,
}

impl GlobalSnapshot {
    /// Recorded balances plus recorded in-flight money. Equals the sum of the
    /// initial balances for every consistent cut.
    pub fn total(&self) -> i64 {
        self.reports.iter().map(LocalSnapshot::total).sum()
    }

    pub fn report(&self, node_id: NodeId) -> Option<&LocalSnapshot> {
        self.reports.iter().find(|report| report.node_id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::now;

    #[test]
    fn test_total_sums_balances_and_channels() {
        let snapshot = GlobalSnapshot {
            initiator: 0,
            request_time: now(),
            completion_time: now(),
            reports: vec![
                LocalSnapshot {
                    node_id: 0,
                    initiator: 0,
                    balance: 900,
                    in_flight_total: 50,
                    channels: vec![
                        ChannelState { from: 1, in_flight: 50 },
                        ChannelState { from: 2, in_flight: 0 },
                    ],
                },
                LocalSnapshot {
                    node_id: 1,
                    initiator: 0,
                    balance: 450,
                    in_flight_total: 100,
                    channels: vec![ChannelState { from: 0, in_flight: 100 }],
                },
            ],
        };

        assert_eq!(snapshot.total(), 1_500);
        assert_eq!(snapshot.report(0).unwrap().channel(1), Some(50));
        assert_eq!(snapshot.report(1).unwrap().channel(2), None);
    }
}
