use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    sync::Mutex,
};
use tracing::{debug, warn};

use super::codec::{read_frame, write_frame, FrameReader, FrameWriter};
use super::message::{Message, NodeId};
use crate::common::{now, Backoff, ProtocolError, Timestamp, TransportError, WireError};
use crate::config::RetryConfig;

/// Outcome of a send. A failed send never panics or returns an error to the
/// caller; it is logged here and reported as `ok == false`.
#[derive(Clone, Copy, Debug)]
pub struct SendReceipt {
    pub ok: bool,
    pub sent_at: Timestamp,
}

/// The write side of one directed channel. The mutex keeps concurrent
/// writers (transfer engine, snapshot coordinator) from interleaving frames.
pub struct OutboundChannel {
    target: String,
    writer: Mutex<FrameWriter>,
}

impl OutboundChannel {
    pub fn new(target: impl Into<String>, writer: FrameWriter) -> Self {
        OutboundChannel {
            target: target.into(),
            writer: Mutex::new(writer),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn send(&self, message: &Message) -> SendReceipt {
        let sent_at = now();
        let mut writer = self.writer.lock().await;
        match write_frame(&mut *writer, message).await {
            Ok(()) => SendReceipt { ok: true, sent_at },
            Err(err) => {
                warn!(
                    peer = %self.target,
                    subject = message.subject(),
                    error = %err,
                    "send failed"
                );
                SendReceipt { ok: false, sent_at }
            }
        }
    }
}

/// Dials `addr` until it answers or the retry budget runs out, then introduces
/// this branch with a `hello` frame.
pub async fn dial(
    addr: &str,
    node_id: NodeId,
    retry: &RetryConfig,
) -> Result<OutboundChannel, TransportError> {
    let mut backoff = Backoff::from_config(retry);
    let stream = loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => break stream,
            Err(err) => {
                debug!(%addr, error = %err, "connect failed, retrying");
                if !backoff.wait().await {
                    return Err(TransportError::Connect {
                        addr: addr.to_string(),
                        source: err,
                    });
                }
            }
        }
    };
    stream
        .set_nodelay(true)
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;

    // Only the write half is used; the remote never answers on this connection.
    let (_read, write) = stream.into_split();
    let channel = OutboundChannel::new(addr, Box::new(write));
    if !channel.send(&Message::Hello { node_id }).await.ok {
        return Err(TransportError::Closed);
    }
    Ok(channel)
}

/// Accepts one inbound connection and reads its `hello`.
pub async fn accept(listener: &TcpListener) -> Result<(NodeId, FrameReader), WireError> {
    let (stream, addr) = listener.accept().await.map_err(TransportError::Accept)?;
    let (read, _write) = stream.into_split();
    let mut reader = BufReader::new(read);

    match read_frame(&mut reader).await? {
        Some(Message::Hello { node_id }) => {
            debug!(%addr, node_id, "accepted connection");
            Ok((node_id, Box::new(reader)))
        }
        Some(other) => Err(ProtocolError::UnexpectedHandshake(other.subject()).into()),
        None => Err(TransportError::Closed.into()),
    }
}
