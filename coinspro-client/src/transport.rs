//! Transport plumbing between the session and the socket.
//!
//! A session talks to a [`Wire`]: an unbounded outbound channel of encoded
//! frames and an inbound channel of [`Inbound`] events. [`connect`] backs a
//! wire with a WebSocket; [`memory`] backs one with a scripted [`Peer`].

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::tls::create_connector;
use coinspro_protocol::{Decoder, Encoder, Frame, MessageType};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async_tls_with_config;
use tokio_tungstenite::tungstenite::Message;

/// Something that arrived from the transport.
#[derive(Debug)]
pub enum Inbound {
    /// One text frame.
    Text(String),
    /// One binary frame; decoded as UTF-8 text by the dispatcher.
    Binary(Vec<u8>),
    /// The peer closed the connection.
    Closed(Option<String>),
    /// The transport failed.
    Failed(ClientError),
}

/// Both directions of an open connection.
pub struct Wire {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Opens a WebSocket to the configured gateway.
pub async fn connect(config: &ClientConfig) -> Result<Wire, ClientError> {
    tracing::debug!("Connecting to {}...", config.url);

    let connector = create_connector(&config.tls)?;
    let (stream, _) = tokio::time::timeout(
        config.connect_timeout(),
        connect_async_tls_with_config(config.url.as_str(), None, false, connector),
    )
    .await
    .map_err(|_| {
        tracing::debug!("Connection timeout");
        ClientError::Timeout
    })?
    .map_err(|e| {
        tracing::debug!("Connection failed: {}", e);
        ClientError::from(e)
    })?;

    tracing::debug!("WebSocket connected");

    let (mut sink, mut source) = stream.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                tracing::warn!("write failed: {}", e);
                break;
            }
        }
        tracing::debug!("Shutting down writer");
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(message) = source.next().await {
            let event = match message {
                Ok(Message::Text(text)) => Inbound::Text(text.as_str().to_owned()),
                Ok(Message::Binary(bytes)) => Inbound::Binary(bytes.to_vec()),
                Ok(Message::Close(frame)) => {
                    Inbound::Closed(frame.map(|f| f.reason.as_str().to_owned()))
                }
                Ok(_) => continue,
                Err(e) => Inbound::Failed(e.into()),
            };

            let terminal = !matches!(event, Inbound::Text(_) | Inbound::Binary(_));
            if inbound_tx.send(event).is_err() || terminal {
                return;
            }
        }
        let _ = inbound_tx.send(Inbound::Closed(None));
    });

    Ok(Wire { outbound, inbound })
}

/// The far end of an in-memory wire.
pub struct Peer {
    sent: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

/// Creates an in-memory wire and the peer that drives it.
pub fn memory() -> (Wire, Peer) {
    let (outbound, sent) = mpsc::unbounded_channel();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    (
        Wire { outbound, inbound },
        Peer {
            sent,
            inbound: inbound_tx,
        },
    )
}

impl Peer {
    /// Waits for the next frame the session sent.
    pub async fn recv(&mut self) -> Option<Frame> {
        let text = self.sent.recv().await?;
        Decoder::decode(&text).ok()
    }

    /// Pushes raw text to the session.
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.inbound.send(Inbound::Text(text.into())).is_ok()
    }

    /// Pushes a binary message to the session.
    pub fn push_bytes(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.inbound.send(Inbound::Binary(bytes.into())).is_ok()
    }

    /// Pushes a frame to the session.
    pub fn push(&self, msg_type: MessageType, sequence: u64, name: &str, payload: &str) -> bool {
        match Encoder::encode(&Frame::new(msg_type, sequence, name, payload)) {
            Ok(text) => self.push_text(text),
            Err(_) => false,
        }
    }

    /// Replies to a frame the session sent.
    pub fn reply(&self, request: &Frame, payload: &str) -> bool {
        self.push(MessageType::Reply, request.sequence, &request.name, payload)
    }

    /// Closes the connection from the peer side.
    pub fn close(&self) -> bool {
        self.inbound.send(Inbound::Closed(None)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_wire_roundtrip() {
        let (mut wire, mut peer) = memory();

        let frame = Frame::new(MessageType::Request, 0, "Ping", "{}");
        wire.outbound.send(Encoder::encode(&frame).unwrap()).unwrap();
        let sent = peer.recv().await.unwrap();
        assert_eq!(sent, frame);

        assert!(peer.reply(&sent, r#"{"msg":"PONG"}"#));
        match wire.inbound.recv().await.unwrap() {
            Inbound::Text(text) => {
                let reply = Decoder::decode(&text).unwrap();
                assert_eq!(reply.msg_type, MessageType::Reply);
                assert_eq!(reply.sequence, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_memory_close() {
        let (mut wire, peer) = memory();
        assert!(peer.close());
        assert!(matches!(wire.inbound.recv().await, Some(Inbound::Closed(None))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let config = ClientConfig::default()
            .with_url("ws://127.0.0.1:1/")
            .with_connect_timeout(std::time::Duration::from_secs(2));
        assert!(connect(&config).await.is_err());
    }
}
