use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::{broadcast, mpsc::UnboundedReceiver, oneshot};
use tracing::{debug, info, warn};

use super::report::{GlobalSnapshot, LocalSnapshot};
use super::state::{Epoch, MarkerOutcome};
use crate::bank::Branch;
use crate::common::{clock, now, SnapshotError, Timestamp};
use crate::network::{Message, NodeId};

/*
    Per-branch driver of the marker protocol.

    Initiate: record the local balance, then send a marker on every outgoing
    channel, both under the balance lock so no transfer can slip between the
    recording and the markers. Every incoming channel starts recording.

    First marker of an epoch, arriving from X: the same two steps, with the
    marker's initiator. Channel X is recorded as empty and every other incoming
    channel starts recording.

    Any later marker of the epoch closes the channel it arrived on. When all
    incoming channels are closed the local snapshot is complete. A participant
    sends it to the initiator over its ordinary channel. The initiator waits for
    one report from every peer, then hands the global snapshot to the observer.
*/

pub enum ControlEvent {
    /// Operator trigger: start an epoch with this branch as initiator.
    Initiate {
        reply: oneshot::Sender<Result<(), SnapshotError>>,
    },
    /// A marker came off `from`'s channel. The receiver waits on `ack`.
    Marker {
        from: NodeId,
        initiator: NodeId,
        received_at: Timestamp,
        ack: oneshot::Sender<()>,
    },
    /// A participant's local snapshot for an epoch this branch initiated.
    Report { from: NodeId, report: LocalSnapshot },
}

struct Assembly {
    request_time: Timestamp,
    own: Option<LocalSnapshot>,
    reports: BTreeMap<NodeId, LocalSnapshot>,
}

impl Assembly {
    fn new(request_time: Timestamp) -> Self {
        Assembly {
            request_time,
            own: None,
            reports: BTreeMap::new(),
        }
    }

    fn is_ready(&self, peers: usize) -> bool {
        self.own.is_some() && self.reports.len() == peers
    }

    fn into_global(self, initiator: NodeId) -> GlobalSnapshot {
        let mut reports: Vec<LocalSnapshot> = self.reports.into_values().collect();
        reports.extend(self.own);
        reports.sort_by_key(|report| report.node_id);
        GlobalSnapshot {
            initiator,
            request_time: self.request_time,
            completion_time: now(),
            reports,
        }
    }
}

pub struct SnapshotCoordinator {
    branch: Arc<Branch>,
    control_rx: UnboundedReceiver<ControlEvent>,
    completed: broadcast::Sender<GlobalSnapshot>,
    assembly: Option<Assembly>,
}

impl SnapshotCoordinator {
    pub fn new(
        branch: Arc<Branch>,
        control_rx: UnboundedReceiver<ControlEvent>,
        completed: broadcast::Sender<GlobalSnapshot>,
    ) -> Self {
        SnapshotCoordinator {
            branch,
            control_rx,
            completed,
            assembly: None,
        }
    }

    pub async fn run(mut self) {
        debug!(branch = self.branch.id, "snapshot coordinator running");
        while let Some(event) = self.control_rx.recv().await {
            match event {
                ControlEvent::Initiate { reply } => {
                    let result = self.handle_initiate().await;
                    let _ = reply.send(result);
                }
                ControlEvent::Marker {
                    from,
                    initiator,
                    received_at,
                    ack,
                } => {
                    self.handle_marker(from, initiator, received_at).await;
                    let _ = ack.send(());
                }
                ControlEvent::Report { from, report } => {
                    self.handle_report(from, report).await;
                }
            }
        }
        debug!(branch = self.branch.id, "control channel closed, coordinator stopping");
    }

    async fn handle_initiate(&mut self) -> Result<(), SnapshotError> {
        let branch = Arc::clone(&self.branch);
        let mut ledger = branch.ledger().lock().await;
        if !ledger.epochs().is_idle() || self.assembly.is_some() {
            warn!(branch = branch.id, "snapshot already in progress, request ignored");
            return Err(SnapshotError::AlreadyActive);
        }

        let epoch = Epoch::initiate(branch.id, ledger.balance(), branch.peers().ids());
        info!(branch = branch.id, balance = epoch.local_balance, "initiating snapshot");
        self.assembly = Some(Assembly::new(epoch.recorded_at));
        ledger.epochs_mut().begin(epoch);
        send_markers(&branch, branch.id).await;

        // Only a branch without peers completes here.
        let completed = ledger.epochs_mut().take_completed(branch.id);
        drop(ledger);
        if let Some(epoch) = completed {
            self.finish_epoch(epoch).await;
        }
        Ok(())
    }

    async fn handle_marker(&mut self, from: NodeId, initiator: NodeId, received_at: Timestamp) {
        let branch = Arc::clone(&self.branch);
        let mut ledger = branch.ledger().lock().await;

        if ledger.epochs().contains(initiator) {
            match ledger.epochs_mut().close_channel(initiator, from) {
                MarkerOutcome::Closed(in_flight) => {
                    debug!(
                        branch = branch.id,
                        peer = from,
                        initiator,
                        in_flight,
                        "channel recorded"
                    );
                }
                MarkerOutcome::Ignored => {
                    debug!(branch = branch.id, peer = from, initiator, "duplicate marker ignored");
                }
            }
        } else if initiator == branch.id || !branch.peers().is_member(initiator) {
            debug!(branch = branch.id, peer = from, initiator, "stale marker ignored");
            return;
        } else {
            let epoch = Epoch::join(initiator, ledger.balance(), branch.peers().ids(), from);
            info!(
                branch = branch.id,
                peer = from,
                initiator,
                balance = epoch.local_balance,
                at = %clock(&received_at),
                "snapshot requested, local state recorded"
            );
            ledger.epochs_mut().begin(epoch);
            send_markers(&branch, initiator).await;
        }

        let completed = ledger.epochs_mut().take_completed(initiator);
        drop(ledger);
        if let Some(epoch) = completed {
            self.finish_epoch(epoch).await;
        }
    }

    async fn handle_report(&mut self, from: NodeId, report: LocalSnapshot) {
        let id = self.branch.id;
        let Some(assembly) = self.assembly.as_mut() else {
            warn!(branch = id, peer = from, "local snapshot with no snapshot in progress");
            return;
        };
        if report.initiator != id || report.node_id != from {
            warn!(
                branch = id,
                peer = from,
                initiator = report.initiator,
                "local snapshot for another epoch"
            );
            return;
        }

        info!(
            branch = id,
            peer = from,
            balance = report.balance,
            in_flight = report.in_flight_total,
            "received local snapshot"
        );
        assembly.reports.insert(from, report);
        self.try_assemble().await;
    }

    async fn finish_epoch(&mut self, epoch: Epoch) {
        let branch = Arc::clone(&self.branch);
        let report = epoch.into_report(branch.id);
        info!(
            branch = branch.id,
            initiator = report.initiator,
            balance = report.balance,
            in_flight = report.in_flight_total,
            "local snapshot complete"
        );
        branch.report(Message::Snapshot(report.clone())).await;

        if report.initiator == branch.id {
            if let Some(assembly) = self.assembly.as_mut() {
                assembly.own = Some(report);
            }
            self.try_assemble().await;
            return;
        }

        let initiator = report.initiator;
        match branch.peers().get(initiator) {
            Some(peer) => {
                if !peer.outbound.send(&Message::Snapshot(report)).await.ok {
                    warn!(branch = branch.id, initiator, "failed to deliver local snapshot");
                }
            }
            None => warn!(branch = branch.id, initiator, "initiator is not a peer"),
        }
    }

    async fn try_assemble(&mut self) {
        let peers = self.branch.peers().len();
        if !self.assembly.as_ref().is_some_and(|a| a.is_ready(peers)) {
            return;
        }
        let Some(assembly) = self.assembly.take() else {
            return;
        };

        let snapshot = assembly.into_global(self.branch.id);
        info!(branch = self.branch.id, total = snapshot.total(), "global snapshot assembled");
        self.branch
            .report(Message::GlobalSnapshot(snapshot.clone()))
            .await;
        // Nobody listening is fine.
        let _ = self.completed.send(snapshot);
    }
}

async fn send_markers(branch: &Branch, initiator: NodeId) {
    for (peer, receipt) in branch.peers().broadcast(&Message::Marker { initiator }).await {
        if receipt.ok {
            debug!(branch = branch.id, peer, initiator, "sent marker");
        } else {
            warn!(branch = branch.id, peer, initiator, "failed to send marker");
        }
    }
}
