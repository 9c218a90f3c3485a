//! Framed channel consumed by connection actors.
//!
//! The actors never see a socket type. The upgrade layer in
//! [`crate::server`] adapts a WebSocket into a [`FrameStream`] for reading
//! and a [`FrameSink`] for writing; tests plug in in-memory channels.

use futures::{Sink, Stream};

use crate::error::TransportError;

/// Close reason sent alongside the normal-closure code (1000).
pub const NORMAL_CLOSURE_REASON: &str = "Normal closure";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One encoded JSON envelope.
    Text(String),
    /// Graceful close handshake.
    Close,
}

pub trait FrameStream: Stream<Item = Result<Frame, TransportError>> + Send + 'static {}

impl<S> FrameStream for S where S: Stream<Item = Result<Frame, TransportError>> + Send + 'static {}

pub trait FrameSink: Sink<Frame, Error = TransportError> + Send + 'static {}

impl<S> FrameSink for S where S: Sink<Frame, Error = TransportError> + Send + 'static {}

/// In-process transport for driving a connection without a socket.
#[cfg(any(test, feature = "test-util"))]
pub mod memory {
    use std::io;

    use futures::{
        SinkExt, StreamExt,
        channel::mpsc::{self, SendError, UnboundedReceiver, UnboundedSender},
        sink::SinkMapErr,
    };

    use super::Frame;
    use crate::{
        error::{ProtocolError, TransportError},
        message::Message,
    };

    pub type MemoryStream = UnboundedReceiver<Result<Frame, TransportError>>;
    pub type MemorySink = SinkMapErr<UnboundedSender<Frame>, fn(SendError) -> TransportError>;

    /// The remote end of a [`pair`]: what a browser would see.
    pub struct MemoryClient {
        inbound: UnboundedSender<Result<Frame, TransportError>>,
        outbound: UnboundedReceiver<Frame>,
    }

    pub fn pair() -> (MemoryClient, MemoryStream, MemorySink) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded();
        let (outbound_tx, outbound_rx) = mpsc::unbounded();
        let sink = outbound_tx.sink_map_err(broken_pipe as fn(SendError) -> TransportError);
        let client = MemoryClient {
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        (client, inbound_rx, sink)
    }

    fn broken_pipe(_: SendError) -> TransportError {
        TransportError::Io(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    impl MemoryClient {
        pub fn send(&self, message: &Message) -> Result<(), ProtocolError> {
            self.send_text(message.encode()?);
            Ok(())
        }

        pub fn send_text(&self, text: impl Into<String>) {
            let _ = self.inbound.unbounded_send(Ok(Frame::Text(text.into())));
        }

        /// Makes the connection's next read fail with `error`.
        pub fn fail(&self, error: TransportError) {
            let _ = self.inbound.unbounded_send(Err(error));
        }

        /// Ends the inbound stream as if the peer went away.
        pub fn hang_up(&self) {
            self.inbound.close_channel();
        }

        /// Refuses further writes so the connection's next send fails.
        pub fn stop_reading(&mut self) {
            self.outbound.close();
        }

        pub async fn recv(&mut self) -> Option<Frame> {
            self.outbound.next().await
        }

        /// Next frame decoded as a message; `None` on close or hang-up.
        pub async fn recv_message(&mut self) -> Option<Message> {
            match self.recv().await? {
                Frame::Text(text) => Message::decode(&text).ok(),
                Frame::Close => None,
            }
        }
    }
}
