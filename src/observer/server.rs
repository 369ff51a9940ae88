use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{net::TcpListener, sync::broadcast, task::JoinSet};
use tracing::{debug, error, info, warn};

use super::correlator::{Correlator, SnapshotSummary, TransferLine};
use crate::common::{BankError, TransportError};
use crate::config::ObserverConfig;
use crate::network::{accept, read_frame, FrameReader, Message, NodeId};

#[derive(Clone, Debug)]
pub enum ObserverEvent {
    Transfer(TransferLine),
    Snapshot(SnapshotSummary),
}

/// Collects every branch's reports. Each branch gets its own connection and
/// task; the correlator is shared between them.
pub struct Observer {
    config: ObserverConfig,
    correlator: Mutex<Correlator>,
    events: broadcast::Sender<ObserverEvent>,
}

impl Observer {
    pub fn new(config: ObserverConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Observer {
            config,
            correlator: Mutex::new(Correlator::default()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.events.subscribe()
    }

    pub async fn bind(&self) -> Result<TcpListener, TransportError> {
        TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: self.config.listen_addr.clone(),
                source,
            })
    }

    /// Accepts one connection per branch and serves them until every branch
    /// has hung up.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<(), BankError> {
        info!(
            addr = ?listener.local_addr().ok(),
            branches = self.config.n_branches,
            "waiting for branches"
        );
        let mut connections = JoinSet::new();
        for _ in 0..self.config.n_branches {
            let (branch, reader) = accept(&listener).await?;
            info!(branch, "branch connected");
            connections.spawn(self.clone().serve_connection(branch, reader));
        }
        info!("all branches connected");

        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "connection task failed");
            }
        }
        let (sends, receives) = self.correlator.lock().pending();
        info!(sends, receives, "all branches gone, unmatched events left");
        Ok(())
    }

    async fn serve_connection(self: Arc<Self>, branch: NodeId, mut reader: FrameReader) {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(message)) => {
                    self.handle(branch, message);
                }
                Ok(None) => {
                    info!(branch, "branch disconnected");
                    return;
                }
                Err(err) => {
                    warn!(branch, error = %err, "dropping branch connection");
                    return;
                }
            }
        }
    }

    /// Folds one report into the correlator and publishes whatever it completes.
    pub fn handle(&self, branch: NodeId, message: Message) -> Option<ObserverEvent> {
        let unit = &self.config.money_unit;
        let event = match message {
            Message::Send(send) => self
                .correlator
                .lock()
                .on_send(send)
                .map(ObserverEvent::Transfer),
            Message::Receive(receive) => self
                .correlator
                .lock()
                .on_receive(receive)
                .map(ObserverEvent::Transfer),
            Message::GlobalSnapshot(snapshot) => Some(ObserverEvent::Snapshot(
                self.correlator.lock().on_global_snapshot(snapshot),
            )),
            Message::Snapshot(report) => {
                debug!(
                    branch,
                    node = report.node_id,
                    initiator = report.initiator,
                    "local snapshot"
                );
                None
            }
            other => {
                warn!(branch, subject = other.subject(), "unexpected report");
                None
            }
        };

        match &event {
            Some(ObserverEvent::Transfer(line)) => info!("{}", line.render(unit)),
            Some(ObserverEvent::Snapshot(summary)) => info!("{}", summary.render(unit)),
            None => {}
        }
        if let Some(event) = &event {
            let _ = self.events.send(event.clone());
        }
        event
    }
}
