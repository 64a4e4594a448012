//! On-disk state kept next to the app: check-ins, the HD blob cache and the
//! queue of composites still waiting for upload.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinInfo {
    pub has_image: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl CheckinInfo {
    pub fn without_image() -> Self {
        Self {
            has_image: false,
            url: None,
        }
    }
}

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::json(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Write via a temp file + rename so a crash never leaves half a file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;
    write_atomic(path, &bytes).await
}

/// Point id -> check-in state, persisted as `checkins.json`.
pub struct CheckinStore {
    path: PathBuf,
    entries: BTreeMap<String, CheckinInfo>,
}

impl CheckinStore {
    pub async fn open(path: PathBuf) -> Result<Self, StoreError> {
        let entries = read_json(&path).await?;
        Ok(Self { path, entries })
    }

    /// Pick up changes other processes sharing the state dir wrote since.
    pub async fn reload(&mut self) -> Result<(), StoreError> {
        self.entries = read_json(&self.path).await?;
        Ok(())
    }

    pub fn get(&self, point_id: &str) -> Option<&CheckinInfo> {
        self.entries.get(point_id)
    }

    pub fn entries(&self) -> &BTreeMap<String, CheckinInfo> {
        &self.entries
    }

    pub fn is_checked(&self, point_id: &str) -> bool {
        self.entries.contains_key(point_id)
    }

    pub async fn set(&mut self, point_id: &str, info: CheckinInfo) -> Result<(), StoreError> {
        self.reload().await?;
        self.entries.insert(point_id.to_string(), info);
        write_json(&self.path, &self.entries).await
    }

    pub async fn remove(&mut self, point_id: &str) -> Result<Option<CheckinInfo>, StoreError> {
        self.reload().await?;
        let removed = self.entries.remove(point_id);
        if removed.is_some() {
            write_json(&self.path, &self.entries).await?;
        }
        Ok(removed)
    }
}

/// Full-resolution composites kept locally for offline viewing.
pub struct BlobCache {
    dir: PathBuf,
}

impl BlobCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.jpg", file_stem(key)))
    }

    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        write_atomic(&self.path_for(key), bytes).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.path_for(key)).await
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Hex of the key's bytes: one file per distinct key, never a path separator.
fn file_stem(key: &str) -> String {
    key.bytes().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingUpload {
    pub id: String,
    pub point_id: String,
    /// Remote object key the buffer is destined for.
    pub key: String,
    pub created_at: u64,
    #[serde(default)]
    pub attempts: u32,
}

/// FIFO of composites that failed to upload for a transient reason.
/// Buffers live beside the `queue.json` manifest.
pub struct PendingQueue {
    dir: PathBuf,
    entries: Vec<PendingUpload>,
}

impl PendingQueue {
    pub async fn open(dir: PathBuf) -> Result<Self, StoreError> {
        let entries = read_json(&dir.join("queue.json")).await?;
        Ok(Self { dir, entries })
    }

    /// Re-read the manifest; another process may have queued or flushed entries.
    pub async fn reload(&mut self) -> Result<(), StoreError> {
        self.entries = read_json(&self.dir.join("queue.json")).await?;
        Ok(())
    }

    pub fn entries(&self) -> &[PendingUpload] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn buffer_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", id))
    }

    async fn save(&self) -> Result<(), StoreError> {
        write_json(&self.dir.join("queue.json"), &self.entries).await
    }

    /// Queue a buffer. A newer composite for the same point replaces the old one.
    pub async fn enqueue(
        &mut self,
        point_id: &str,
        key: &str,
        bytes: &[u8],
    ) -> Result<PendingUpload, StoreError> {
        self.reload().await?;
        let entry = PendingUpload {
            id: uuid::Uuid::new_v4().simple().to_string(),
            point_id: point_id.to_string(),
            key: key.to_string(),
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            attempts: 0,
        };
        write_atomic(&self.buffer_path(&entry.id), bytes).await?;

        // Old buffers go only once the manifest no longer lists them.
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.point_id == point_id)
            .map(|e| e.id.clone())
            .collect();
        self.entries.retain(|e| e.point_id != point_id);
        self.entries.push(entry.clone());
        self.save().await?;
        for id in &stale {
            remove_if_exists(&self.buffer_path(id)).await?;
        }
        Ok(entry)
    }

    pub async fn read(&self, entry: &PendingUpload) -> Result<Vec<u8>, StoreError> {
        let path = self.buffer_path(&entry.id);
        tokio::fs::read(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))
    }

    pub async fn record_attempt(&mut self, id: &str) -> Result<(), StoreError> {
        self.reload().await?;
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.attempts += 1;
            self.save().await?;
        }
        Ok(())
    }

    pub async fn remove(&mut self, id: &str) -> Result<(), StoreError> {
        self.reload().await?;
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        if self.entries.len() != before {
            remove_if_exists(&self.buffer_path(id)).await?;
            self.save().await?;
        }
        Ok(())
    }

    pub async fn remove_point(&mut self, point_id: &str) -> Result<(), StoreError> {
        self.reload().await?;
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.point_id == point_id)
            .map(|e| e.id.clone())
            .collect();
        for id in ids {
            self.remove(&id).await?;
        }
        Ok(())
    }
}
