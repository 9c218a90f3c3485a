//! Per-client connection actor.
//!
//! A connection is two tasks over one split transport. The read loop decodes
//! frames and turns them into hub events; the write loop drains the outbound
//! queue the hub feeds. Only the read loop ever asks the hub to unregister.
//! The write loop stops when the hub closes its queue or when a write fails.

use std::pin::pin;

use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::{
    error::{ConnectionError, HubClosed},
    hub::{ConnectionId, HubHandle, OutboundReceiver},
    message::{Message, MessageKind},
    transport::{Frame, FrameSink, FrameStream},
};

/// Name shown for a client until it sends `update-username`.
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// Join handles for a running connection.
pub struct ConnectionTasks {
    pub id: ConnectionId,
    /// Resolves with the error that ended the read loop, if any.
    pub reader: JoinHandle<Result<(), ConnectionError>>,
    pub writer: JoinHandle<()>,
}

/// Registers a new client with the hub, then starts its read and write loops.
///
/// Registration completes before either loop runs, so the client's first
/// request always reaches the hub after its own `Register`.
pub async fn spawn<S, K>(hub: &HubHandle, stream: S, sink: K) -> Result<ConnectionTasks, HubClosed>
where
    S: FrameStream,
    K: FrameSink,
{
    let id = hub.next_id();
    let (outbound, queue) = hub.outbound_channel();
    hub.register(id, DEFAULT_DISPLAY_NAME, outbound).await?;

    let reader = tokio::spawn(read_loop(id, hub.clone(), stream));
    let writer = tokio::spawn(write_loop(id, queue, sink));

    Ok(ConnectionTasks { id, reader, writer })
}

async fn read_loop<S: FrameStream>(
    id: ConnectionId,
    hub: HubHandle,
    stream: S,
) -> Result<(), ConnectionError> {
    let mut display_name = DEFAULT_DISPLAY_NAME.to_string();
    let outcome = pump_inbound(id, &hub, &mut display_name, stream).await;

    match &outcome {
        Ok(()) => debug!(connection = id, username = %display_name, "client closed the connection"),
        Err(err) => debug!(connection = id, username = %display_name, error = %err, "read loop failed"),
    }
    if let Err(err) = hub.unregister(id).await {
        debug!(connection = id, error = %err, "could not unregister");
    }

    outcome
}

async fn pump_inbound<S: FrameStream>(
    id: ConnectionId,
    hub: &HubHandle,
    display_name: &mut String,
    stream: S,
) -> Result<(), ConnectionError> {
    let mut stream = pin!(stream);

    while let Some(frame) = stream.next().await {
        let text = match frame? {
            Frame::Text(text) => text,
            Frame::Close => return Ok(()),
        };
        let message = Message::decode(&text)?;

        match message.kind {
            MessageKind::Chat => hub.broadcast(message).await?,
            MessageKind::UpdateUsername => {
                display_name.clone_from(&message.username);
                hub.update_username(id, message.username).await?;
            }
            MessageKind::Unknown => trace!(connection = id, "ignoring message of unknown type"),
        }
    }

    Ok(())
}

async fn write_loop<K: FrameSink>(id: ConnectionId, mut queue: OutboundReceiver, sink: K) {
    let mut sink = pin!(sink);

    while let Some(message) = queue.recv().await {
        let written = match message.encode() {
            Ok(text) => sink.send(Frame::Text(text)).await.map_err(ConnectionError::from),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = written {
            debug!(connection = id, error = %err, "write failed; closing transport");
            let _ = sink.close().await;
            return;
        }
    }

    // The hub closed the queue.
    if let Err(err) = sink.send(Frame::Close).await {
        debug!(connection = id, error = %err, "close handshake failed");
    }
    let _ = sink.close().await;
}
