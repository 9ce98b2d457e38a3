//! The sync session: one task owning the scene for the lifetime of a
//! room connection.
//!
//! All mutation funnels through a single `tokio::select!` loop — server
//! frames, local commands, the debounced broadcast deadline, the periodic
//! full-resync (anti-entropy), the presence tick, and the initial-scene
//! acknowledgement fallback. Callers talk to the loop through typed
//! channels ([`SessionCommand`] in, [`SessionEvent`] out); nothing else
//! touches the scene while the session is live.
//!
//! ```text
//!   Idle ──connect──► Connecting ──FirstInRoom / ack timeout──► Active(Leader)
//!                         │
//!                         └──────── first INIT payload ───────► Active(Follower)
//!
//!   Active ──Stop / transport closed──► Closed
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use vellum_scene::{
    apply_patch, rebase_patch, reconcile_into, validate_patch, ApplySummary, SceneElement,
    SceneState,
};

use crate::assets::{AssetStore, AssetSyncManager};
use crate::crypto::RoomKey;
use crate::portal::{PortalError, SyncMode, TransportPortal};
use crate::presence::{CollaboratorMap, CursorThrottle, PresenceTracker};
use crate::protocol::{
    BroadcastPayload, ClientEvent, DeliveryClass, ParticipantId, PresenceStatus, ServerEvent,
};

/// How many recent scene snapshots are kept for rebasing stale patches.
const SNAPSHOT_DEPTH: usize = 8;

/// Cadence of the local idle check.
const PRESENCE_TICK: Duration = Duration::from_secs(10);

/// Whether this participant seeded the room or joined an existing scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Active(Role),
    Closed,
}

/// Configuration for one room session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub room_id: String,
    pub room_key: Option<RoomKey>,
    pub username: String,
    /// No input for this long demotes Active → Idle.
    pub idle_threshold: Duration,
    /// Minimum spacing between outgoing cursor broadcasts.
    pub cursor_interval: Duration,
    /// Local edits are batched for this long before broadcasting.
    pub broadcast_debounce: Duration,
    /// Period of the anti-entropy full resync.
    pub resync_interval: Duration,
    /// If no scene arrives within this window after joining, assume leadership.
    pub init_ack_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            room_id: String::new(),
            room_key: None,
            username: String::new(),
            idle_threshold: Duration::from_secs(180),
            cursor_interval: Duration::from_millis(33),
            broadcast_debounce: Duration::from_millis(100),
            resync_interval: Duration::from_secs(20),
            init_ack_timeout: Duration::from_secs(5),
        }
    }
}

/// Commands accepted by a live session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Validate, (re)base, and apply an untyped patch document.
    ApplyPatch { patch: serde_json::Value },
    /// Replace local elements wholesale (editor-driven edits).
    UpdateLocal { elements: Vec<SceneElement> },
    PointerMoved {
        x: f32,
        y: f32,
        selected_ids: Vec<String>,
    },
    VisibilityChanged { hidden: bool },
    /// Broadcast pending local changes immediately.
    FlushNow,
    Stop,
}

/// Notifications emitted by a live session.
#[derive(Debug)]
pub enum SessionEvent {
    PhaseChanged(SessionPhase),
    /// Remote elements were merged; the broadcast watermark after the merge.
    SceneReconciled { watermark: u64 },
    /// Result of the asset backfill after a merge brought in new references.
    AssetsSynced {
        loaded: Vec<String>,
        failed: Vec<String>,
    },
    CollaboratorsChanged { count: usize },
    PatchApplied {
        summary: ApplySummary,
        warnings: Vec<String>,
    },
    PatchRejected { issues: Vec<String> },
}

/// Session startup failures. A failed connect leaves no task behind.
#[derive(Debug)]
pub enum SessionError {
    MissingRoomId,
    MissingRoomKey,
    Transport(PortalError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRoomId => write!(f, "Room id is required to connect"),
            Self::MissingRoomKey => write!(f, "Room key is required to connect"),
            Self::Transport(e) => write!(f, "Transport error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<PortalError> for SessionError {
    fn from(e: PortalError) -> Self {
        Self::Transport(e)
    }
}

/// Caller-side handle to a spawned session.
pub struct SessionHandle {
    pub participant: ParticipantId,
    commands: mpsc::Sender<SessionCommand>,
    events: Option<mpsc::Receiver<SessionEvent>>,
    join: JoinHandle<SceneState>,
}

impl SessionHandle {
    pub fn commands(&self) -> mpsc::Sender<SessionCommand> {
        self.commands.clone()
    }

    pub async fn send(&self, command: SessionCommand) {
        let _ = self.commands.send(command).await;
    }

    /// Take the event stream. Callable once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.take()
    }

    /// Stop the session and return the final scene.
    pub async fn stop(self) -> SceneState {
        let _ = self.commands.send(SessionCommand::Stop).await;
        self.join.await.unwrap_or_default()
    }
}

/// Spawn a session over an already-established frame transport.
///
/// Validates the config first: a missing room id or room key is an error
/// and nothing is spawned.
pub fn spawn_session(
    config: SessionConfig,
    scene: SceneState,
    outgoing: mpsc::Sender<ClientEvent>,
    incoming: mpsc::Receiver<ServerEvent>,
) -> Result<SessionHandle, SessionError> {
    spawn_session_with_assets(config, scene, None, outgoing, incoming)
}

/// Like [`spawn_session`], with an asset store for backfilling binary
/// files that remote merges reference but the local scene lacks.
pub fn spawn_session_with_assets(
    config: SessionConfig,
    scene: SceneState,
    asset_store: Option<Arc<dyn AssetStore>>,
    outgoing: mpsc::Sender<ClientEvent>,
    incoming: mpsc::Receiver<ServerEvent>,
) -> Result<SessionHandle, SessionError> {
    if config.room_id.is_empty() {
        return Err(SessionError::MissingRoomId);
    }
    let Some(key) = config.room_key.clone() else {
        return Err(SessionError::MissingRoomKey);
    };

    let participant = uuid::Uuid::new_v4();
    let (command_tx, command_rx) = mpsc::channel(256);
    let (event_tx, event_rx) = mpsc::channel(256);

    let portal = TransportPortal::new(key, config.room_id.clone(), outgoing);
    let worker = SessionWorker {
        participant,
        portal,
        scene,
        snapshots: VecDeque::new(),
        watermark: 0,
        phase: SessionPhase::Connecting,
        presence: PresenceTracker::new(config.idle_threshold),
        cursor_throttle: CursorThrottle::new(config.cursor_interval),
        collaborators: CollaboratorMap::new(),
        assets: AssetSyncManager::default(),
        asset_store,
        events: event_tx,
        config,
    };

    let join = tokio::spawn(worker.run(incoming, command_rx));

    Ok(SessionHandle {
        participant,
        commands: command_tx,
        events: Some(event_rx),
        join,
    })
}

struct SessionWorker {
    participant: ParticipantId,
    portal: TransportPortal,
    scene: SceneState,
    /// Recent scene versions, oldest first. Rebase targets for stale patches.
    snapshots: VecDeque<SceneState>,
    watermark: u64,
    phase: SessionPhase,
    presence: PresenceTracker,
    cursor_throttle: CursorThrottle,
    collaborators: CollaboratorMap,
    assets: AssetSyncManager,
    asset_store: Option<Arc<dyn AssetStore>>,
    events: mpsc::Sender<SessionEvent>,
    config: SessionConfig,
}

impl SessionWorker {
    async fn run(
        mut self,
        mut incoming: mpsc::Receiver<ServerEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) -> SceneState {
        self.emit(SessionEvent::PhaseChanged(self.phase)).await;

        let mut flush_at: Option<Instant> = None;
        let mut ack_at: Option<Instant> = None;
        let mut resync = tokio::time::interval(self.config.resync_interval);
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut presence_tick = tokio::time::interval(PRESENCE_TICK);
        presence_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                frame = incoming.recv() => {
                    let Some(frame) = frame else {
                        // Transport gone; the scene survives locally.
                        log::info!("server stream closed; ending session");
                        break;
                    };
                    if self.handle_frame(frame, &mut ack_at).await.is_err() {
                        break;
                    }
                }

                command = commands.recv() => {
                    match command {
                        Some(SessionCommand::Stop) | None => break,
                        Some(command) => {
                            if self.handle_command(command, &mut flush_at).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                _ = deadline(flush_at) => {
                    flush_at = None;
                    if self.broadcast(SyncMode::Incremental).await.is_err() {
                        break;
                    }
                }

                _ = deadline(ack_at) => {
                    // Nobody answered with a scene; this participant leads.
                    ack_at = None;
                    if matches!(self.phase, SessionPhase::Connecting) {
                        self.set_phase(SessionPhase::Active(Role::Leader)).await;
                        if self.broadcast(SyncMode::Full).await.is_err() {
                            break;
                        }
                    }
                }

                _ = resync.tick() => {
                    if matches!(self.phase, SessionPhase::Active(_))
                        && self.broadcast(SyncMode::Full).await.is_err()
                    {
                        break;
                    }
                }

                _ = presence_tick.tick() => {
                    if let Some(status) = self.presence.tick() {
                        let _ = self.send_idle_status(status).await;
                    }
                }
            }
        }

        let _ = self.portal.leave_room().await;
        self.collaborators.clear();
        self.assets.clear();
        self.set_phase(SessionPhase::Closed).await;
        self.scene
    }

    async fn handle_frame(
        &mut self,
        frame: ServerEvent,
        ack_at: &mut Option<Instant>,
    ) -> Result<(), PortalError> {
        match frame {
            ServerEvent::InitRoom => {
                self.portal.join_room().await?;
                *ack_at = Some(Instant::now() + self.config.init_ack_timeout);
            }
            ServerEvent::FirstInRoom => {
                *ack_at = None;
                if matches!(self.phase, SessionPhase::Connecting) {
                    self.set_phase(SessionPhase::Active(Role::Leader)).await;
                    self.broadcast(SyncMode::Full).await?;
                }
            }
            ServerEvent::NewUser { participant } => {
                log::debug!("participant {participant} joined; forcing full sync");
                self.broadcast(SyncMode::Full).await?;
            }
            ServerEvent::RoomUserChange { participants } => {
                self.collaborators.retain_participants(&participants);
                self.emit(SessionEvent::CollaboratorsChanged {
                    count: self.collaborators.len(),
                })
                .await;
            }
            ServerEvent::ClientBroadcast { iv, ciphertext } => {
                let payload = self.portal.decrypt_payload(&iv, &ciphertext);
                self.handle_payload(payload, ack_at).await;
            }
        }
        Ok(())
    }

    async fn handle_payload(&mut self, payload: BroadcastPayload, ack_at: &mut Option<Instant>) {
        match payload {
            BroadcastPayload::Init { elements } => {
                if matches!(self.phase, SessionPhase::Connecting) {
                    *ack_at = None;
                    self.set_phase(SessionPhase::Active(Role::Follower)).await;
                }
                self.reconcile_remote(elements).await;
            }
            BroadcastPayload::Update { elements } => {
                self.reconcile_remote(elements).await;
            }
            BroadcastPayload::MouseLocation {
                participant,
                x,
                y,
                selected_ids,
                username,
            } => {
                if participant != self.participant {
                    self.collaborators
                        .apply_mouse(participant, x, y, selected_ids, username);
                    self.emit(SessionEvent::CollaboratorsChanged {
                        count: self.collaborators.len(),
                    })
                    .await;
                }
            }
            BroadcastPayload::IdleStatus {
                participant,
                status,
                username,
            } => {
                if participant != self.participant {
                    self.collaborators.apply_idle(participant, status, username);
                    self.emit(SessionEvent::CollaboratorsChanged {
                        count: self.collaborators.len(),
                    })
                    .await;
                }
            }
            BroadcastPayload::InvalidResponse => {
                log::debug!("dropping undecryptable broadcast");
            }
        }
    }

    async fn handle_command(
        &mut self,
        command: SessionCommand,
        flush_at: &mut Option<Instant>,
    ) -> Result<(), PortalError> {
        match command {
            SessionCommand::ApplyPatch { patch } => {
                self.apply_patch_command(&patch).await;
                self.schedule_flush(flush_at);
            }
            SessionCommand::UpdateLocal { elements } => {
                self.remember_snapshot();
                self.scene.elements = elements;
                self.scene.version += 1;
                self.watermark = self.watermark.max(self.scene.max_element_version());
                self.schedule_flush(flush_at);
            }
            SessionCommand::PointerMoved { x, y, selected_ids } => {
                if let Some(status) = self.presence.pointer_input() {
                    self.send_idle_status(status).await?;
                }
                if self.cursor_throttle.allow() {
                    let payload = BroadcastPayload::MouseLocation {
                        participant: self.participant,
                        x,
                        y,
                        selected_ids,
                        username: self.config.username.clone(),
                    };
                    self.portal
                        .send_payload(&payload, DeliveryClass::Volatile)
                        .await?;
                }
            }
            SessionCommand::VisibilityChanged { hidden } => {
                if let Some(status) = self.presence.visibility_changed(hidden) {
                    self.send_idle_status(status).await?;
                }
            }
            SessionCommand::FlushNow => {
                *flush_at = None;
                self.broadcast(SyncMode::Incremental).await?;
            }
            // Stop is intercepted by the select loop before dispatch.
            SessionCommand::Stop => {}
        }
        Ok(())
    }

    async fn apply_patch_command(&mut self, raw: &serde_json::Value) {
        let patch = match validate_patch(raw) {
            Ok(patch) => patch,
            Err(issues) => {
                self.emit(SessionEvent::PatchRejected { issues }).await;
                return;
            }
        };

        // A stale base version gets rebased against the snapshot it was
        // computed from, when that snapshot is still in the window.
        let (patch, mut rebase_warnings) = match patch.base_version {
            Some(base) if base != self.scene.version => {
                match self.snapshots.iter().find(|s| s.version == base) {
                    Some(snapshot) => {
                        let outcome = rebase_patch(snapshot, &self.scene, &patch);
                        (outcome.patch, outcome.warnings)
                    }
                    None => {
                        let warning = format!(
                            "patch base version {base} outside the snapshot window; applying to head version {}",
                            self.scene.version
                        );
                        log::warn!("{warning}");
                        (patch, vec![warning])
                    }
                }
            }
            _ => (patch, Vec::new()),
        };

        self.remember_snapshot();
        let outcome = apply_patch(&self.scene, &patch);
        self.scene = outcome.scene;
        self.watermark = self.watermark.max(self.scene.max_element_version());

        let mut warnings = outcome.warnings;
        warnings.append(&mut rebase_warnings);
        self.emit(SessionEvent::PatchApplied {
            summary: outcome.summary,
            warnings,
        })
        .await;
    }

    async fn reconcile_remote(&mut self, elements: Vec<SceneElement>) {
        self.watermark = reconcile_into(&mut self.scene, elements, self.watermark);
        self.emit(SessionEvent::SceneReconciled {
            watermark: self.watermark,
        })
        .await;

        // Merged elements may reference assets we do not hold yet.
        if let Some(store) = self.asset_store.clone() {
            if !self.assets.missing_assets(&self.scene).is_empty() {
                let room_id = self.portal.room_id().to_string();
                let batch = self
                    .assets
                    .fetch_missing(store.as_ref(), &room_id, &mut self.scene)
                    .await;
                self.emit(SessionEvent::AssetsSynced {
                    loaded: batch.loaded,
                    failed: batch.failed,
                })
                .await;
            }
        }
    }

    async fn broadcast(&mut self, mode: SyncMode) -> Result<(), PortalError> {
        let elements = self.scene.elements.clone();
        let sent = self.portal.broadcast_scene(&elements, mode).await?;
        if sent > 0 {
            log::debug!("session broadcast: {sent} element(s) ({mode:?})");
        }
        Ok(())
    }

    async fn send_idle_status(&self, status: PresenceStatus) -> Result<(), PortalError> {
        self.portal
            .send_payload(
                &BroadcastPayload::IdleStatus {
                    participant: self.participant,
                    status,
                    username: self.config.username.clone(),
                },
                DeliveryClass::Volatile,
            )
            .await
    }

    fn schedule_flush(&self, flush_at: &mut Option<Instant>) {
        if flush_at.is_none() {
            *flush_at = Some(Instant::now() + self.config.broadcast_debounce);
        }
    }

    fn remember_snapshot(&mut self) {
        if self.snapshots.len() == SNAPSHOT_DEPTH {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(self.scene.clone());
    }

    async fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            self.phase = phase;
            self.emit(SessionEvent::PhaseChanged(phase)).await;
        }
    }

    async fn emit(&self, event: SessionEvent) {
        // A dropped event receiver never stalls the loop.
        let _ = self.events.try_send(event);
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
