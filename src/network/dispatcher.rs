use tokio::{
    io::AsyncRead,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use super::codec::read_frame;
use super::message::{Message, NodeId};
use crate::common::{now, Timestamp, WireError};

/// A message off a peer channel, stamped with the time it was read.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub message: Message,
    pub received_at: Timestamp,
}

/// Spawns the reader for one inbound channel. Frames are pushed onto an
/// unbounded per-peer FIFO in arrival order; the queue closes when the
/// channel ends or misbehaves.
pub fn spawn_reader<R>(
    local: NodeId,
    peer: NodeId,
    reader: R,
) -> (UnboundedReceiver<Delivery>, JoinHandle<()>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(read_loop(local, peer, reader, tx));
    (rx, handle)
}

async fn read_loop<R>(local: NodeId, peer: NodeId, mut reader: R, tx: UnboundedSender<Delivery>)
where
    R: AsyncRead + Send + Unpin,
{
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(message)) => {
                let delivery = Delivery {
                    message,
                    received_at: now(),
                };
                if tx.send(delivery).is_err() {
                    debug!(branch = local, peer, "receiver gone, reader stopping");
                    return;
                }
            }
            Ok(None) => {
                info!(branch = local, peer, "inbound channel closed");
                return;
            }
            Err(WireError::Protocol(err)) => {
                error!(branch = local, peer, error = %err, "protocol violation, dropping channel");
                return;
            }
            Err(WireError::Transport(err)) => {
                warn!(branch = local, peer, error = %err, "inbound channel failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::network::codec::write_frame;

    #[tokio::test]
    async fn test_delivers_in_send_order() {
        let (mut client, server) = tokio::io::duplex(128);
        let (mut inbox, handle) = spawn_reader(0, 1, server);

        let sent: Vec<Message> = (1..=50)
            .map(|i| {
                if i % 10 == 0 {
                    Message::Marker { initiator: 1 }
                } else {
                    Message::Transfer { amount: i }
                }
            })
            .collect();
        for message in &sent {
            write_frame(&mut client, message).await.unwrap();
        }
        drop(client);

        let mut received = Vec::new();
        while let Some(delivery) = inbox.recv().await {
            received.push(delivery.message);
        }
        assert_eq!(received, sent);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_queue() {
        let (mut client, server) = tokio::io::duplex(128);
        let (mut inbox, handle) = spawn_reader(0, 1, server);

        write_frame(&mut client, &Message::Transfer { amount: 5 }).await.unwrap();
        client.write_all(&3u32.to_le_bytes()).await.unwrap();
        client.write_all(b"???").await.unwrap();
        // May race the reader shutting down, so the result is irrelevant.
        let _ = write_frame(&mut client, &Message::Transfer { amount: 6 }).await;

        let first = inbox.recv().await.unwrap();
        assert_eq!(first.message, Message::Transfer { amount: 5 });
        // Nothing after the bad frame gets through.
        assert!(inbox.recv().await.is_none());
        handle.await.unwrap();
    }
}
