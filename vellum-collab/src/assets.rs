//! Lazy binary-asset synchronization.
//!
//! Elements reference assets by `fileId`; the manager finds referenced
//! assets missing from the local file map, fetches them through an
//! [`AssetStore`], and tracks two disjoint sets per batch — loaded and
//! failed — so callers retry only the failures. An asset stuck in
//! `Pending` past the staleness timeout becomes eligible for re-fetch.
//!
//! Every failure is per-asset: one bad fetch or oversized upload never
//! fails the rest of the batch.

use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use vellum_scene::{BinaryFile, ElementType, SceneElement, SceneState};

use crate::crypto::RoomKey;

/// Default cap on a single uploaded asset.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024;

/// Default time after which a pending fetch counts as stale.
pub const DEFAULT_PENDING_STALENESS: Duration = Duration::from_secs(30);

/// Per-asset failures.
#[derive(Debug, Clone)]
pub enum AssetError {
    TooLarge { size: usize, limit: usize },
    NotFound(String),
    Transfer(String),
    Decrypt,
}

impl std::fmt::Display for AssetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLarge { size, limit } => {
                write!(f, "Asset too large: {size} bytes (limit {limit})")
            }
            Self::NotFound(id) => write!(f, "Asset not found: {id}"),
            Self::Transfer(e) => write!(f, "Transfer failed: {e}"),
            Self::Decrypt => write!(f, "Asset decryption failed"),
        }
    }
}

impl std::error::Error for AssetError {}

/// Backend that moves asset bytes in and out of the room's storage.
pub trait AssetStore: Send + Sync {
    fn fetch<'a>(
        &'a self,
        room_id: &'a str,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<BinaryFile, AssetError>>;

    fn upload<'a>(
        &'a self,
        room_id: &'a str,
        file_id: &'a str,
        file: &'a BinaryFile,
    ) -> BoxFuture<'a, Result<(), AssetError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetState {
    Pending { since: Instant },
    Loaded,
    Failed,
}

/// Outcome of one fetch batch. `loaded` and `failed` are disjoint.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub loaded: Vec<String>,
    pub failed: Vec<String>,
}

/// Outcome of one upload batch.
#[derive(Debug, Default)]
pub struct UploadReport {
    pub uploaded: Vec<String>,
    pub failed: Vec<(String, AssetError)>,
}

/// Tracks which referenced assets are resident, in flight, or broken.
pub struct AssetSyncManager {
    states: HashMap<String, AssetState>,
    pending_staleness: Duration,
    max_upload_bytes: usize,
}

impl Default for AssetSyncManager {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_STALENESS, DEFAULT_MAX_UPLOAD_BYTES)
    }
}

impl AssetSyncManager {
    pub fn new(pending_staleness: Duration, max_upload_bytes: usize) -> Self {
        Self {
            states: HashMap::new(),
            pending_staleness,
            max_upload_bytes,
        }
    }

    /// Referenced-but-absent asset ids eligible for fetching.
    ///
    /// Skips assets already resident, freshly pending, or already loaded;
    /// failed and stale-pending assets are eligible again.
    pub fn missing_assets(&self, scene: &SceneState) -> Vec<String> {
        let mut missing = Vec::new();
        for element in &scene.elements {
            let Some(file_id) = referenced_file_id(element) else {
                continue;
            };
            if scene.files.contains_key(file_id) || missing.iter().any(|m| m == file_id) {
                continue;
            }
            match self.states.get(file_id) {
                Some(AssetState::Loaded) => {}
                Some(AssetState::Pending { since }) if since.elapsed() < self.pending_staleness => {}
                _ => missing.push(file_id.to_string()),
            }
        }
        missing
    }

    /// Fetch every eligible missing asset into the scene's file map.
    pub async fn fetch_missing(
        &mut self,
        store: &dyn AssetStore,
        room_id: &str,
        scene: &mut SceneState,
    ) -> FetchBatch {
        let mut batch = FetchBatch::default();

        for file_id in self.missing_assets(scene) {
            self.states.insert(
                file_id.clone(),
                AssetState::Pending {
                    since: Instant::now(),
                },
            );

            match store.fetch(room_id, &file_id).await {
                Ok(file) => {
                    scene.files.insert(file_id.clone(), file);
                    self.states.insert(file_id.clone(), AssetState::Loaded);
                    batch.loaded.push(file_id);
                }
                Err(e) => {
                    log::warn!("asset fetch failed for \"{file_id}\": {e}");
                    self.states.insert(file_id.clone(), AssetState::Failed);
                    batch.failed.push(file_id);
                }
            }
        }

        batch
    }

    /// Upload a set of files, size-capped per asset.
    pub async fn upload_files(
        &mut self,
        store: &dyn AssetStore,
        room_id: &str,
        files: &[(String, BinaryFile)],
    ) -> UploadReport {
        let mut report = UploadReport::default();

        for (file_id, file) in files {
            if file.data.len() > self.max_upload_bytes {
                report.failed.push((
                    file_id.clone(),
                    AssetError::TooLarge {
                        size: file.data.len(),
                        limit: self.max_upload_bytes,
                    },
                ));
                continue;
            }
            match store.upload(room_id, file_id, file).await {
                Ok(()) => {
                    self.states.insert(file_id.clone(), AssetState::Loaded);
                    report.uploaded.push(file_id.clone());
                }
                Err(e) => {
                    log::warn!("asset upload failed for \"{file_id}\": {e}");
                    report.failed.push((file_id.clone(), e));
                }
            }
        }

        report
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

/// `fileId` reference carried by image/embed elements.
fn referenced_file_id(element: &SceneElement) -> Option<&str> {
    if !matches!(element.element_type, ElementType::Image | ElementType::Embed) {
        return None;
    }
    element.extra.get("fileId").and_then(|v| v.as_str())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetMetadata {
    mime_type: String,
    #[serde(default)]
    created: u64,
}

/// HTTP-backed asset store.
///
/// Upload: POST of raw encrypted bytes addressed by `(room_id, file_id)`.
/// Download: metadata JSON first, then the byte blob, then local
/// decryption (blob layout: IV ‖ ciphertext).
pub struct HttpAssetStore {
    base_url: String,
    client: reqwest::Client,
    key: RoomKey,
}

impl HttpAssetStore {
    pub fn new(base_url: impl Into<String>, key: RoomKey) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            key,
        }
    }

    fn file_url(&self, room_id: &str, file_id: &str) -> String {
        format!("{}/rooms/{room_id}/files/{file_id}", self.base_url)
    }
}

impl AssetStore for HttpAssetStore {
    fn fetch<'a>(
        &'a self,
        room_id: &'a str,
        file_id: &'a str,
    ) -> BoxFuture<'a, Result<BinaryFile, AssetError>> {
        Box::pin(async move {
            let url = self.file_url(room_id, file_id);

            let meta_resp = self
                .client
                .get(format!("{url}/meta"))
                .send()
                .await
                .map_err(|e| AssetError::Transfer(e.to_string()))?;
            if meta_resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(AssetError::NotFound(file_id.to_string()));
            }
            let meta: AssetMetadata = meta_resp
                .error_for_status()
                .map_err(|e| AssetError::Transfer(e.to_string()))?
                .json()
                .await
                .map_err(|e| AssetError::Transfer(e.to_string()))?;

            let blob = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| AssetError::Transfer(e.to_string()))?
                .error_for_status()
                .map_err(|e| AssetError::Transfer(e.to_string()))?
                .bytes()
                .await
                .map_err(|e| AssetError::Transfer(e.to_string()))?;

            let data = self.key.open_blob(&blob).ok_or(AssetError::Decrypt)?;
            Ok(BinaryFile {
                mime_type: meta.mime_type,
                created: meta.created,
                data,
            })
        })
    }

    fn upload<'a>(
        &'a self,
        room_id: &'a str,
        file_id: &'a str,
        file: &'a BinaryFile,
    ) -> BoxFuture<'a, Result<(), AssetError>> {
        Box::pin(async move {
            let blob = self
                .key
                .seal_blob(&file.data)
                .map_err(|e| AssetError::Transfer(e.to_string()))?;

            self.client
                .post(self.file_url(room_id, file_id))
                .header("content-type", "application/octet-stream")
                .body(blob)
                .send()
                .await
                .map_err(|e| AssetError::Transfer(e.to_string()))?
                .error_for_status()
                .map_err(|e| AssetError::Transfer(e.to_string()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct MockStore {
        available: HashMap<String, BinaryFile>,
        fail_ids: Vec<String>,
        uploads: Mutex<Vec<String>>,
    }

    impl MockStore {
        fn new() -> Self {
            Self {
                available: HashMap::new(),
                fail_ids: Vec::new(),
                uploads: Mutex::new(Vec::new()),
            }
        }
    }

    impl AssetStore for MockStore {
        fn fetch<'a>(
            &'a self,
            _room_id: &'a str,
            file_id: &'a str,
        ) -> BoxFuture<'a, Result<BinaryFile, AssetError>> {
            Box::pin(async move {
                if self.fail_ids.iter().any(|id| id == file_id) {
                    return Err(AssetError::Transfer("boom".to_string()));
                }
                self.available
                    .get(file_id)
                    .cloned()
                    .ok_or_else(|| AssetError::NotFound(file_id.to_string()))
            })
        }

        fn upload<'a>(
            &'a self,
            _room_id: &'a str,
            file_id: &'a str,
            _file: &'a BinaryFile,
        ) -> BoxFuture<'a, Result<(), AssetError>> {
            Box::pin(async move {
                if self.fail_ids.iter().any(|id| id == file_id) {
                    return Err(AssetError::Transfer("boom".to_string()));
                }
                self.uploads.lock().unwrap().push(file_id.to_string());
                Ok(())
            })
        }
    }

    fn image(id: &str, file_id: &str) -> SceneElement {
        let mut el = SceneElement::new(id, ElementType::Image);
        el.extra.insert("fileId".to_string(), json!(file_id));
        el
    }

    #[tokio::test]
    async fn test_fetch_batch_isolates_failures() {
        let mut store = MockStore::new();
        store
            .available
            .insert("good".to_string(), BinaryFile::new("image/png", vec![1]));
        store.fail_ids.push("bad".to_string());

        let mut scene = SceneState::new();
        scene.elements = vec![image("i1", "good"), image("i2", "bad")];

        let mut manager = AssetSyncManager::default();
        let batch = manager.fetch_missing(&store, "room-1", &mut scene).await;

        assert_eq!(batch.loaded, vec!["good".to_string()]);
        assert_eq!(batch.failed, vec!["bad".to_string()]);
        assert!(scene.files.contains_key("good"));
        assert!(!scene.files.contains_key("bad"));
    }

    #[tokio::test]
    async fn test_failed_assets_are_retried() {
        let mut store = MockStore::new();
        store.fail_ids.push("flaky".to_string());

        let mut scene = SceneState::new();
        scene.elements = vec![image("i1", "flaky")];

        let mut manager = AssetSyncManager::default();
        let batch = manager.fetch_missing(&store, "room-1", &mut scene).await;
        assert_eq!(batch.failed.len(), 1);

        // The backend recovered; a failed asset is eligible again.
        let mut store = MockStore::new();
        store
            .available
            .insert("flaky".to_string(), BinaryFile::new("image/png", vec![2]));
        let batch = manager.fetch_missing(&store, "room-1", &mut scene).await;
        assert_eq!(batch.loaded, vec!["flaky".to_string()]);
    }

    #[tokio::test]
    async fn test_fresh_pending_not_refetched_stale_pending_is() {
        let scene = {
            let mut s = SceneState::new();
            s.elements = vec![image("i1", "slow")];
            s
        };

        let mut manager = AssetSyncManager::new(Duration::from_secs(3600), 1024);
        manager.states.insert(
            "slow".to_string(),
            AssetState::Pending {
                since: Instant::now(),
            },
        );
        assert!(manager.missing_assets(&scene).is_empty());

        // Simulate a fetch that has been pending past the staleness window.
        manager.states.insert(
            "slow".to_string(),
            AssetState::Pending {
                since: Instant::now() - Duration::from_secs(7200),
            },
        );
        assert_eq!(manager.missing_assets(&scene), vec!["slow".to_string()]);
    }

    #[tokio::test]
    async fn test_resident_and_non_image_elements_ignored() {
        let mut scene = SceneState::new();
        scene.elements = vec![
            image("i1", "here"),
            SceneElement::new("r1", ElementType::Rectangle),
        ];
        scene
            .files
            .insert("here".to_string(), BinaryFile::new("image/png", vec![1]));

        let manager = AssetSyncManager::default();
        assert!(manager.missing_assets(&scene).is_empty());
    }

    #[tokio::test]
    async fn test_upload_size_cap_per_asset() {
        let store = MockStore::new();
        let mut manager = AssetSyncManager::new(DEFAULT_PENDING_STALENESS, 4);

        let files = vec![
            ("small".to_string(), BinaryFile::new("image/png", vec![1, 2])),
            ("huge".to_string(), BinaryFile::new("image/png", vec![0; 64])),
        ];
        let report = manager.upload_files(&store, "room-1", &files).await;

        assert_eq!(report.uploaded, vec!["small".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, AssetError::TooLarge { .. }));
        assert_eq!(*store.uploads.lock().unwrap(), vec!["small".to_string()]);
    }
}
