use std::collections::VecDeque;

use crate::common::{clock, stamp, Timestamp};
use crate::network::{Amount, NodeId, ReceiveEvent, SendEvent};
use crate::snapshot::GlobalSnapshot;

const RULE: &str = "===========================================================================";

/// A send matched with its receive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferLine {
    pub sender_id: NodeId,
    pub receiver_id: NodeId,
    pub amount: Amount,
    pub send_time: Timestamp,
    pub receive_time: Timestamp,
}

impl TransferLine {
    fn pair(send: SendEvent, receive: ReceiveEvent) -> Self {
        TransferLine {
            sender_id: send.sender_id,
            receiver_id: send.receiver_id,
            amount: send.amount,
            send_time: send.send_time,
            receive_time: receive.receive_time,
        }
    }

    pub fn render(&self, unit: &str) -> String {
        format!(
            "sender:{:>2} - send_time:{} - amount:{:>9} {} - receiver:{:>2} - receive_time:{}",
            self.sender_id,
            clock(&self.send_time),
            self.amount,
            unit,
            self.receiver_id,
            clock(&self.receive_time),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotSummary {
    /// 1-based count of global snapshots seen by this observer.
    pub ordinal: u64,
    pub snapshot: GlobalSnapshot,
}

impl SnapshotSummary {
    pub fn total(&self) -> i64 {
        self.snapshot.total()
    }

    pub fn render(&self, unit: &str) -> String {
        let mut out = format!(
            "\n{RULE}\nGlobal Snapshot #{}     Request Time:{}     Preparation Time:{}",
            self.ordinal,
            stamp(&self.snapshot.request_time),
            stamp(&self.snapshot.completion_time),
        );
        for report in &self.snapshot.reports {
            out.push_str(&format!(
                "\nBranch {:>2}: Balance:{:>9} {unit} - In Channels: {:>9} {unit}",
                report.node_id, report.balance, report.in_flight_total,
            ));
        }
        out.push_str(&format!("\nTotal Balance: {} {unit}\n{RULE}\n", self.total()));
        out
    }
}

/// Pairs sends with receives. The two halves of a transfer are reported by
/// different branches over different connections, so either may come first;
/// whichever is early waits in its queue. Matching is on sender, receiver and
/// amount, oldest first.
#[derive(Debug, Default)]
pub struct Correlator {
    sends: VecDeque<SendEvent>,
    receives: VecDeque<ReceiveEvent>,
    snapshots: u64,
}

impl Correlator {
    pub fn on_send(&mut self, send: SendEvent) -> Option<TransferLine> {
        let found = self.receives.iter().position(|r| {
            r.sender_id == send.sender_id
                && r.receiver_id == send.receiver_id
                && r.amount == send.amount
        });
        match found.and_then(|idx| self.receives.remove(idx)) {
            Some(receive) => Some(TransferLine::pair(send, receive)),
            None => {
                self.sends.push_back(send);
                None
            }
        }
    }

    pub fn on_receive(&mut self, receive: ReceiveEvent) -> Option<TransferLine> {
        let found = self.sends.iter().position(|s| {
            s.sender_id == receive.sender_id
                && s.receiver_id == receive.receiver_id
                && s.amount == receive.amount
        });
        match found.and_then(|idx| self.sends.remove(idx)) {
            Some(send) => Some(TransferLine::pair(send, receive)),
            None => {
                self.receives.push_back(receive);
                None
            }
        }
    }

    pub fn on_global_snapshot(&mut self, snapshot: GlobalSnapshot) -> SnapshotSummary {
        self.snapshots += 1;
        SnapshotSummary {
            ordinal: self.snapshots,
            snapshot,
        }
    }

    /// Unmatched (sends, receives).
    pub fn pending(&self) -> (usize, usize) {
        (self.sends.len(), self.receives.len())
    }
}
