use std::sync::Arc;

use tokio::sync::{
    mpsc::{UnboundedReceiver, UnboundedSender},
    oneshot,
};
use tracing::{debug, error, info};

use super::node::Branch;
use crate::common::{ProtocolError, Timestamp};
use crate::network::{Amount, Delivery, Message, NodeId, ReceiveEvent};
use crate::snapshot::ControlEvent;

impl Branch {
    /// Credits an incoming transfer. Any epoch recording this channel counts
    /// it under the same lock.
    pub async fn apply_transfer(
        &self,
        from: NodeId,
        amount: Amount,
        received_at: Timestamp,
    ) -> Result<(), ProtocolError> {
        let balance = {
            let mut ledger = self.ledger().lock().await;
            ledger.credit(from, amount)?;
            ledger.balance()
        };
        info!(branch = self.id, peer = from, amount, balance, "received transfer");

        self.report(Message::Receive(ReceiveEvent {
            sender_id: from,
            receiver_id: self.id,
            amount,
            receive_time: received_at,
        }))
        .await;
        Ok(())
    }
}

/// Consumes one peer's FIFO. Transfers go to the balance; markers and local
/// snapshots go to the coordinator. A marker is handed over synchronously:
/// nothing behind it on this channel is consumed until the coordinator has
/// acted on it.
pub async fn run_receiver(
    branch: Arc<Branch>,
    from: NodeId,
    mut inbox: UnboundedReceiver<Delivery>,
    control: UnboundedSender<ControlEvent>,
) {
    while let Some(Delivery {
        message,
        received_at,
    }) = inbox.recv().await
    {
        match message {
            Message::Transfer { amount } => {
                if let Err(err) = branch.apply_transfer(from, amount, received_at).await {
                    error!(branch = branch.id, peer = from, error = %err, "receiver stopping");
                    return;
                }
            }
            Message::Marker { initiator } => {
                let (ack, done) = oneshot::channel();
                let event = ControlEvent::Marker {
                    from,
                    initiator,
                    received_at,
                    ack,
                };
                if control.send(event).is_err() || done.await.is_err() {
                    debug!(branch = branch.id, peer = from, "coordinator gone, receiver stopping");
                    return;
                }
            }
            Message::Snapshot(report) => {
                if control.send(ControlEvent::Report { from, report }).is_err() {
                    debug!(branch = branch.id, peer = from, "coordinator gone, receiver stopping");
                    return;
                }
            }
            other => {
                let err = ProtocolError::UnexpectedMessage {
                    from,
                    subject: other.subject(),
                };
                error!(branch = branch.id, peer = from, error = %err, "receiver stopping");
                return;
            }
        }
    }
    debug!(branch = branch.id, peer = from, "inbound queue closed");
}
