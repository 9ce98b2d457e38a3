//! # vellum-collab — Encrypted multi-writer scene synchronization
//!
//! The async layer over `vellum-scene`: end-to-end-encrypted rooms where
//! several participants converge on one scene document without a central
//! merge authority.
//!
//! ## Architecture
//!
//! ```text
//!   SessionCommand ──► ┌──────────────┐ ◄── ServerEvent (frames)
//!                      │  SyncSession  │
//!   SessionEvent  ◄──  │ (one task,    │ ──► ClientEvent (frames)
//!                      │  owns scene)  │
//!                      └──────┬────────┘
//!                             │ payloads (encrypt / watermark-filter)
//!                             ▼
//!                      TransportPortal ──► AES-256-GCM ──► wire
//! ```
//!
//! The server only relays ciphertext and tracks membership; every scene
//! payload is sealed with the shared room key before it leaves the
//! process. Scene updates ride the reliable channel, presence rides the
//! volatile one.
//!
//! ## Modules
//!
//! - [`crypto`] — room keys, sealing/opening payloads and asset blobs
//! - [`protocol`] — frames, the encrypted broadcast payloads
//! - [`portal`] — encrypting sender with the per-element watermark filter
//! - [`presence`] — idle state machine, cursor throttle, collaborator map
//! - [`session`] — the session event loop and its command/event channels
//! - [`assets`] — lazy fetch/upload of encrypted binary assets

pub mod assets;
pub mod crypto;
pub mod portal;
pub mod presence;
pub mod protocol;
pub mod session;

pub use assets::{AssetError, AssetStore, AssetSyncManager, FetchBatch, HttpAssetStore, UploadReport};
pub use crypto::{CryptoError, RoomKey, SealedMessage, IV_LEN, KEY_LEN};
pub use portal::{connect_ws, PortalError, SyncMode, TransportPortal};
pub use presence::{Collaborator, CollaboratorMap, CursorThrottle, PresenceTracker};
pub use protocol::{
    BroadcastPayload, ClientEvent, DeliveryClass, ParticipantId, PresenceStatus, ProtocolError,
    ServerEvent,
};
pub use session::{
    spawn_session, spawn_session_with_assets, Role, SessionCommand, SessionConfig, SessionError,
    SessionEvent, SessionHandle, SessionPhase,
};
