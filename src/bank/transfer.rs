use std::sync::Arc;

use rand::Rng;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::node::Branch;
use crate::common::{Timestamp, TransferError};
use crate::config::TransferConfig;
use crate::network::{Amount, Message, NodeId, SendEvent};

#[derive(Clone, Debug)]
pub struct TransferReceipt {
    pub to: NodeId,
    pub amount: Amount,
    pub sent_at: Timestamp,
}

impl Branch {
    /// Moves `amount` to peer `to`. The balance lock is held from the funds
    /// check through the write, so two transfers can never spend the same
    /// money, and the balance only drops once the frame is on the channel.
    pub async fn transfer(
        &self,
        amount: Amount,
        to: NodeId,
    ) -> Result<TransferReceipt, TransferError> {
        let peer = self.peers().get(to).ok_or(TransferError::UnknownPeer(to))?;

        let mut ledger = self.ledger().lock().await;
        ledger.ensure_funds(amount)?;
        let receipt = peer.outbound.send(&Message::Transfer { amount }).await;
        if !receipt.ok {
            return Err(TransferError::Transport(to));
        }
        ledger.debit(amount);
        let balance = ledger.balance();
        drop(ledger);

        info!(branch = self.id, peer = to, amount, balance, "transferred");
        self.report(Message::Send(SendEvent {
            sender_id: self.id,
            receiver_id: to,
            amount,
            send_time: receipt.sent_at,
        }))
        .await;

        Ok(TransferReceipt {
            to,
            amount,
            sent_at: receipt.sent_at,
        })
    }
}

/// Sender loop for one peer: every tick, with the configured probability,
/// try to send a random amount. Stops after `max_sends` successful sends or on
/// the first transport failure.
pub async fn run_sender(branch: Arc<Branch>, to: NodeId, config: TransferConfig) {
    let mut sent = 0u64;
    let mut ticker = interval(config.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; every attempt waits a full tick.
    ticker.tick().await;

    loop {
        if let Some(max) = config.max_sends {
            if sent >= max {
                info!(branch = branch.id, peer = to, max, "reached the maximum number of sends");
                return;
            }
        }

        ticker.tick().await;

        let amount = {
            let mut rng = rand::thread_rng();
            if !rng.gen_bool(config.probability) {
                continue;
            }
            rng.gen_range(config.min_amount..=config.max_amount)
        };

        match branch.transfer(amount, to).await {
            Ok(_) => sent += 1,
            Err(TransferError::InsufficientFunds { requested, available }) => {
                debug!(
                    branch = branch.id,
                    peer = to,
                    requested,
                    available,
                    "transfer skipped: insufficient funds"
                );
            }
            Err(err) => {
                error!(branch = branch.id, peer = to, error = %err, "sender stopping");
                return;
            }
        }
    }
}
