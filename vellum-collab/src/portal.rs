//! Transport portal: encrypt/decrypt, send, and the broadcast watermark.
//!
//! Outgoing incremental syncs only include elements whose version exceeds
//! the last version sent for that id, which bounds bandwidth for large
//! documents to what actually changed. A forced full sync ignores the
//! filter and resets the watermark map — the correctness backstop used on
//! peer join and on the periodic anti-entropy resync.
//!
//! Watermarks never regress: a portal never re-sends a version it has
//! already sent unless a full sync explicitly restarts the bookkeeping.

use std::collections::HashMap;
use tokio::sync::mpsc;
use vellum_scene::SceneElement;

use crate::crypto::{CryptoError, RoomKey};
use crate::protocol::{BroadcastPayload, ClientEvent, DeliveryClass, ProtocolError, ServerEvent};

/// How to select elements for an outgoing scene broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Send only elements newer than their per-id watermark.
    Incremental,
    /// Send everything and reset the watermark map first.
    Full,
}

/// Portal-level failures.
#[derive(Debug)]
pub enum PortalError {
    ChannelClosed,
    Crypto(CryptoError),
    Protocol(ProtocolError),
}

impl std::fmt::Display for PortalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelClosed => write!(f, "Outgoing channel closed"),
            Self::Crypto(e) => write!(f, "Crypto error: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
        }
    }
}

impl std::error::Error for PortalError {}

impl From<CryptoError> for PortalError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

impl From<ProtocolError> for PortalError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// Encrypting sender/receiver for one room connection.
pub struct TransportPortal {
    key: RoomKey,
    room_id: String,
    outgoing: mpsc::Sender<ClientEvent>,
    /// Per-element-id highest version already sent.
    watermarks: HashMap<String, u64>,
}

impl TransportPortal {
    pub fn new(key: RoomKey, room_id: impl Into<String>, outgoing: mpsc::Sender<ClientEvent>) -> Self {
        Self {
            key,
            room_id: room_id.into(),
            outgoing,
            watermarks: HashMap::new(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Last version sent for an element id.
    pub fn watermark(&self, id: &str) -> Option<u64> {
        self.watermarks.get(id).copied()
    }

    pub async fn join_room(&self) -> Result<(), PortalError> {
        self.outgoing
            .send(ClientEvent::JoinRoom {
                room_id: self.room_id.clone(),
            })
            .await
            .map_err(|_| PortalError::ChannelClosed)
    }

    pub async fn leave_room(&self) -> Result<(), PortalError> {
        self.outgoing
            .send(ClientEvent::LeaveRoom)
            .await
            .map_err(|_| PortalError::ChannelClosed)
    }

    /// Broadcast scene elements, filtered by watermark in incremental mode.
    ///
    /// Incremental: returns the number of elements sent; 0 means no frame
    /// went out at all. Full: always sends a frame — an empty snapshot is
    /// still an authoritative answer to a joining peer.
    pub async fn broadcast_scene(
        &mut self,
        elements: &[SceneElement],
        mode: SyncMode,
    ) -> Result<usize, PortalError> {
        if mode == SyncMode::Full {
            self.watermarks.clear();
        }

        let outgoing: Vec<SceneElement> = elements
            .iter()
            .filter(|e| match self.watermarks.get(&e.id) {
                Some(sent) => e.version > *sent,
                None => true,
            })
            .cloned()
            .collect();

        if outgoing.is_empty() && mode == SyncMode::Incremental {
            return Ok(0);
        }

        let count = outgoing.len();
        let payload = match mode {
            SyncMode::Full => BroadcastPayload::Init { elements: outgoing },
            SyncMode::Incremental => BroadcastPayload::Update { elements: outgoing },
        };

        // Advance watermarks only after a successful send.
        let sent_versions: Vec<(String, u64)> = match &payload {
            BroadcastPayload::Init { elements } | BroadcastPayload::Update { elements } => {
                elements.iter().map(|e| (e.id.clone(), e.version)).collect()
            }
            _ => Vec::new(),
        };

        self.send_payload(&payload, DeliveryClass::Reliable).await?;

        for (id, version) in sent_versions {
            let entry = self.watermarks.entry(id).or_insert(0);
            if version > *entry {
                *entry = version;
            }
        }

        log::debug!("broadcast_scene: sent {count} element(s) ({mode:?})");
        Ok(count)
    }

    /// Encrypt and send one payload on the chosen delivery class.
    pub async fn send_payload(
        &self,
        payload: &BroadcastPayload,
        class: DeliveryClass,
    ) -> Result<(), PortalError> {
        let plaintext = payload.encode()?;
        let sealed = self.key.seal(&plaintext)?;

        let frame = match class {
            DeliveryClass::Reliable => ClientEvent::Broadcast {
                iv: sealed.iv.to_vec(),
                ciphertext: sealed.ciphertext,
            },
            DeliveryClass::Volatile => ClientEvent::VolatileBroadcast {
                iv: sealed.iv.to_vec(),
                ciphertext: sealed.ciphertext,
            },
        };

        self.outgoing
            .send(frame)
            .await
            .map_err(|_| PortalError::ChannelClosed)
    }

    /// Decrypt and parse an inbound broadcast. Never fails — anything
    /// malformed degrades to `InvalidResponse`.
    pub fn decrypt_payload(&self, iv: &[u8], ciphertext: &[u8]) -> BroadcastPayload {
        match self.key.open(iv, ciphertext) {
            Some(plaintext) => BroadcastPayload::decode_or_invalid(&plaintext),
            None => BroadcastPayload::InvalidResponse,
        }
    }
}

/// Bridge a WebSocket connection to typed frame channels.
///
/// Spawns a writer task (client frames → binary messages) and a reader
/// task (binary messages → server frames). Undecodable inbound frames are
/// dropped with a log line; the reader closing ends the `ServerEvent`
/// stream, which the session observes as a disconnect.
pub async fn connect_ws(
    url: &str,
) -> Result<(mpsc::Sender<ClientEvent>, mpsc::Receiver<ServerEvent>), PortalError> {
    use futures_util::{SinkExt, StreamExt};

    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|_| PortalError::Protocol(ProtocolError::ConnectionClosed))?;
    let (mut ws_writer, mut ws_reader) = ws_stream.split();

    let (client_tx, mut client_rx) = mpsc::channel::<ClientEvent>(256);
    let (server_tx, server_rx) = mpsc::channel::<ServerEvent>(256);

    tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
            let bytes = match frame.encode() {
                Ok(b) => b,
                Err(e) => {
                    log::warn!("dropping unencodable outbound frame: {e}");
                    continue;
                }
            };
            if ws_writer
                .send(tokio_tungstenite::tungstenite::Message::Binary(bytes.into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(msg) = ws_reader.next().await {
            match msg {
                Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                    let bytes: Vec<u8> = data.into();
                    match ServerEvent::decode(&bytes) {
                        Ok(frame) => {
                            if server_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::debug!("dropping undecodable inbound frame: {e}"),
                    }
                }
                Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    Ok((client_tx, server_rx))
}
