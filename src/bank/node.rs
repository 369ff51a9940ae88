use std::{collections::BTreeSet, sync::Arc, time::Duration};

use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use super::ledger::Ledger;
use super::receiver::run_receiver;
use super::transfer::{run_sender, TransferReceipt};
use crate::common::{
    BankError, ConfigError, ProtocolError, SnapshotError, TransferError, TransportError,
};
use crate::config::BranchConfig;
use crate::network::{
    accept, dial, spawn_reader, wait_for_branches, Amount, FrameReader, Message, NodeId,
    OutboundChannel, Peer, Peers, Registry,
};
use crate::snapshot::{ControlEvent, GlobalSnapshot, SnapshotCoordinator};

/// One bank branch: its balance, its peers and its reporting link to the observer.
pub struct Branch {
    pub id: NodeId,
    ledger: Mutex<Ledger>,
    peers: Peers,
    observer: OutboundChannel,
}

impl Branch {
    pub fn new(id: NodeId, initial_balance: i64, peers: Peers, observer: OutboundChannel) -> Self {
        Branch {
            id,
            ledger: Mutex::new(Ledger::new(initial_balance)),
            peers,
            observer,
        }
    }

    pub fn peers(&self) -> &Peers {
        &self.peers
    }

    pub async fn balance(&self) -> i64 {
        self.ledger.lock().await.balance()
    }

    pub(crate) fn ledger(&self) -> &Mutex<Ledger> {
        &self.ledger
    }

    /// Best effort: a lost observer costs the log line, not the branch.
    pub(crate) async fn report(&self, message: Message) {
        let subject = message.subject();
        if !self.observer.send(&message).await.ok {
            warn!(branch = self.id, subject, "failed to report to observer");
        }
    }
}

/// Connections a branch needs before it can run.
pub struct BranchLinks {
    pub id: NodeId,
    pub peers: Peers,
    /// Read side of every peer's channel into this branch.
    pub inbound: Vec<(NodeId, FrameReader)>,
    pub observer: OutboundChannel,
}

/// Binds, registers, waits for every branch to show up, then dials every
/// peer and the observer while accepting the peers' dials.
pub async fn connect(
    config: &BranchConfig,
    registry: &dyn Registry,
) -> Result<BranchLinks, BankError> {
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: config.listen_addr.clone(),
            source,
        })?;
    let address = listener
        .local_addr()
        .map_err(|source| TransportError::Bind {
            addr: config.listen_addr.clone(),
            source,
        })?
        .to_string();

    let id = registry.register(&address)?;
    if id >= config.n_branches {
        return Err(ConfigError::Invalid(format!(
            "registry already lists {} branches; clear it before a new run",
            config.n_branches
        ))
        .into());
    }
    info!(branch = id, %address, "branch started, waiting for other branches");

    let mut records = wait_for_branches(registry, config.n_branches, &config.retry).await?;
    records.truncate(config.n_branches);

    let expected: BTreeSet<NodeId> = records.iter().map(|r| r.id).filter(|&r| r != id).collect();
    let timeout_ms = config.retry.timeout_ms;
    let acceptor = tokio::spawn(accept_peers(listener, expected, timeout_ms));

    let mut peers = Vec::with_capacity(records.len().saturating_sub(1));
    for record in records.into_iter().filter(|r| r.id != id) {
        let outbound = match dial(&record.address, id, &config.retry).await {
            Ok(outbound) => outbound,
            Err(err) => {
                acceptor.abort();
                return Err(err.into());
            }
        };
        info!(branch = id, peer = record.id, address = %record.address, "connected to branch");
        peers.push(Peer {
            id: record.id,
            address: record.address,
            outbound,
        });
    }

    let inbound = acceptor.await.map_err(|_| TransportError::Closed)??;

    info!(branch = id, addr = %config.observer_addr, "connecting to observer");
    let observer = dial(&config.observer_addr, id, &config.retry).await?;
    info!(branch = id, "connected to observer");

    Ok(BranchLinks {
        id,
        peers: Peers::new(peers),
        inbound,
        observer,
    })
}

async fn accept_peers(
    listener: TcpListener,
    mut expected: BTreeSet<NodeId>,
    timeout_ms: u64,
) -> Result<Vec<(NodeId, FrameReader)>, BankError> {
    let mut inbound = Vec::with_capacity(expected.len());
    let accept_all = async {
        while !expected.is_empty() {
            let (peer, reader) = accept(&listener).await?;
            if !expected.remove(&peer) {
                return Err(BankError::from(ProtocolError::UnknownPeer(peer)));
            }
            inbound.push((peer, reader));
        }
        Ok(())
    };
    tokio::time::timeout(Duration::from_millis(timeout_ms), accept_all)
        .await
        .map_err(|_| TransportError::Timeout(timeout_ms))??;
    Ok(inbound)
}

/// Cloneable front door to a running branch: manual transfers, the snapshot
/// trigger, and a feed of the global snapshots it assembles as initiator.
#[derive(Clone)]
pub struct BranchHandle {
    branch: Arc<Branch>,
    control: mpsc::UnboundedSender<ControlEvent>,
    snapshots: broadcast::Sender<GlobalSnapshot>,
}

impl BranchHandle {
    pub fn id(&self) -> NodeId {
        self.branch.id
    }

    pub async fn balance(&self) -> i64 {
        self.branch.balance().await
    }

    pub async fn transfer(
        &self,
        amount: Amount,
        to: NodeId,
    ) -> Result<TransferReceipt, TransferError> {
        self.branch.transfer(amount, to).await
    }

    /// Starts a snapshot epoch with this branch as initiator.
    pub async fn initiate_snapshot(&self) -> Result<(), SnapshotError> {
        let (reply, response) = oneshot::channel();
        self.control
            .send(ControlEvent::Initiate { reply })
            .map_err(|_| SnapshotError::CoordinatorStopped)?;
        response.await.map_err(|_| SnapshotError::CoordinatorStopped)?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GlobalSnapshot> {
        self.snapshots.subscribe()
    }

    pub(crate) fn branch(&self) -> Arc<Branch> {
        self.branch.clone()
    }
}

/// A branch with all of its tasks spawned. Dropping it stops them.
pub struct RunningBranch {
    handle: BranchHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningBranch {
    pub async fn launch(config: &BranchConfig, registry: &dyn Registry) -> Result<Self, BankError> {
        config.validate()?;
        let links = connect(config, registry).await?;
        Ok(RunningBranch::start(links, config))
    }

    /// Spawns the coordinator, a reader and receiver per inbound channel, and
    /// a sender per outbound channel.
    pub fn start(links: BranchLinks, config: &BranchConfig) -> Self {
        let BranchLinks {
            id,
            peers,
            inbound,
            observer,
        } = links;
        let branch = Arc::new(Branch::new(id, config.initial_balance, peers, observer));
        let (control, control_rx) = mpsc::unbounded_channel();
        let (snapshots, _) = broadcast::channel(16);

        let mut tasks = Vec::new();
        let coordinator = SnapshotCoordinator::new(branch.clone(), control_rx, snapshots.clone());
        tasks.push(tokio::spawn(coordinator.run()));

        for (peer, reader) in inbound {
            let (inbox, reader_task) = spawn_reader(id, peer, reader);
            tasks.push(reader_task);
            tasks.push(tokio::spawn(run_receiver(
                branch.clone(),
                peer,
                inbox,
                control.clone(),
            )));
        }

        let targets: Vec<NodeId> = branch.peers().ids().collect();
        for peer in targets {
            tasks.push(tokio::spawn(run_sender(
                branch.clone(),
                peer,
                config.transfer.clone(),
            )));
        }

        info!(
            branch = id,
            balance = config.initial_balance,
            peers = branch.peers().len(),
            "branch running"
        );
        RunningBranch {
            handle: BranchHandle {
                branch,
                control,
                snapshots,
            },
            tasks,
        }
    }

    pub fn handle(&self) -> BranchHandle {
        self.handle.clone()
    }

    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for RunningBranch {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
