use base64::Engine;
use std::path::Path;

use crate::config::ComposeConfig;
use crate::encode::{self, EncodeFormat};
use crate::error::{PublishError, StoreError, UploadError};
use crate::local::{BlobCache, CheckinInfo, CheckinStore, PendingQueue};
use crate::storage::BlobStore;

/// Remote key for a point's composite.
pub fn object_key(point_id: &str) -> String {
    format!("public/{}.jpg", point_id)
}

/// In-memory URL for a buffer that is not (yet) hosted anywhere.
pub fn draft_url(bytes: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Uploaded { url: String },
    /// Offline: the buffer is queued and only a local draft URL exists.
    Queued { draft_url: String, entry_id: String },
}

#[derive(Debug, Default)]
pub struct RetryReport {
    pub uploaded: Vec<(String, String)>,
    pub rejected: Vec<(String, String)>,
    pub remaining: usize,
}

/// Hands finished composites to the object store, falling back to the
/// pending queue when the network is down.
pub struct PersistenceBridge {
    store: BlobStore,
    cache: BlobCache,
    queue: PendingQueue,
    checkins: CheckinStore,
    upload_max_width: u32,
    upload_quality: u8,
}

impl PersistenceBridge {
    pub async fn open(
        store: BlobStore,
        state_dir: &Path,
        compose: &ComposeConfig,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            store,
            cache: BlobCache::new(state_dir.join("cache")),
            queue: PendingQueue::open(state_dir.join("pending")).await?,
            checkins: CheckinStore::open(state_dir.join("checkins.json")).await?,
            upload_max_width: compose.upload_max_width,
            upload_quality: compose.upload_quality,
        })
    }

    pub fn checkins(&self) -> &CheckinStore {
        &self.checkins
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    /// Re-read check-ins and the queue manifest. Other CLI invocations share
    /// the state dir, so anything long-lived calls this before acting.
    pub async fn refresh(&mut self) -> Result<(), StoreError> {
        self.checkins.reload().await?;
        self.queue.reload().await
    }

    /// Mark a point visited without a composite.
    pub async fn check_in(&mut self, point_id: &str) -> Result<(), StoreError> {
        self.refresh().await?;
        if self.checkins.is_checked(point_id) {
            return Ok(());
        }
        self.checkins.set(point_id, CheckinInfo::without_image()).await
    }

    /// Withdraw a check-in entirely, composite included.
    pub async fn cancel_check_in(&mut self, point_id: &str) -> Result<(), PublishError> {
        self.remove(point_id).await?;
        self.checkins.remove(point_id).await?;
        Ok(())
    }

    /// Compress, cache the HD original, upload, record the check-in.
    pub async fn publish(
        &mut self,
        point_id: &str,
        composite: &[u8],
    ) -> Result<PublishOutcome, PublishError> {
        let compressed =
            encode::compress_for_upload(composite, self.upload_max_width, self.upload_quality)?;
        let previous = self.cache.get(point_id).await?;
        self.cache.put(point_id, composite).await?;

        let key = object_key(point_id);
        match self
            .store
            .upload(compressed.clone(), &key, EncodeFormat::Jpeg.content_type())
            .await
        {
            Ok(url) => {
                // Supersedes anything still queued for this point.
                self.queue.remove_point(point_id).await?;
                self.checkins
                    .set(
                        point_id,
                        CheckinInfo {
                            has_image: true,
                            url: Some(url.clone()),
                        },
                    )
                    .await?;
                Ok(PublishOutcome::Uploaded { url })
            }
            Err(UploadError::Network(reason)) => {
                tracing::warn!(
                    "Upload of {} failed ({}), queued for retry",
                    point_id,
                    reason
                );
                let entry = self.queue.enqueue(point_id, &key, &compressed).await?;
                self.checkins
                    .set(
                        point_id,
                        CheckinInfo {
                            has_image: true,
                            url: None,
                        },
                    )
                    .await?;
                Ok(PublishOutcome::Queued {
                    draft_url: draft_url(&compressed),
                    entry_id: entry.id,
                })
            }
            Err(e) => {
                tracing::error!("Storage rejected composite for {}: {}", point_id, e);
                // The check-in still describes the previous composite.
                match previous {
                    Some(bytes) => self.cache.put(point_id, &bytes).await?,
                    None => self.cache.remove(point_id).await?,
                }
                Err(e.into())
            }
        }
    }

    /// Push queued buffers in order. Stops at the first transient failure;
    /// permanent rejections are dropped from the queue and reported.
    pub async fn retry_pending(&mut self) -> Result<RetryReport, StoreError> {
        self.refresh().await?;
        let mut report = RetryReport::default();
        let entries = self.queue.entries().to_vec();

        for entry in entries {
            let bytes = match self.queue.read(&entry).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() => {
                    tracing::error!("Pending upload {} lost its buffer, dropping: {}", entry.id, e);
                    self.queue.remove(&entry.id).await?;
                    report.rejected.push((entry.point_id, e.to_string()));
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Pending upload {} unreadable, keeping it: {}", entry.id, e);
                    break;
                }
            };

            self.queue.record_attempt(&entry.id).await?;
            match self
                .store
                .upload(bytes, &entry.key, EncodeFormat::Jpeg.content_type())
                .await
            {
                Ok(url) => {
                    self.queue.remove(&entry.id).await?;
                    self.checkins
                        .set(
                            &entry.point_id,
                            CheckinInfo {
                                has_image: true,
                                url: Some(url.clone()),
                            },
                        )
                        .await?;
                    report.uploaded.push((entry.point_id, url));
                }
                Err(UploadError::Network(reason)) => {
                    tracing::info!("Still offline ({}), keeping {} queued", reason, self.queue.len());
                    break;
                }
                Err(e) => {
                    tracing::error!("Dropping queued upload for {}: {}", entry.point_id, e);
                    self.queue.remove(&entry.id).await?;
                    report.rejected.push((entry.point_id, e.to_string()));
                }
            }
        }

        report.remaining = self.queue.len();
        Ok(report)
    }

    /// Delete a point's composite remotely and locally; the point stays checked.
    pub async fn remove(&mut self, point_id: &str) -> Result<(), PublishError> {
        self.refresh().await?;
        let had_remote = self
            .checkins
            .get(point_id)
            .map(|info| info.url.is_some())
            .unwrap_or(false);
        if had_remote {
            self.store.delete(&object_key(point_id)).await?;
        }
        self.queue.remove_point(point_id).await?;
        self.cache.remove(point_id).await?;
        if self.checkins.is_checked(point_id) {
            self.checkins
                .set(point_id, CheckinInfo::without_image())
                .await?;
        }
        Ok(())
    }

    pub async fn retrieve_cached_copy(&self, point_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.cache.get(point_id).await
    }

    /// Best URL to show for a point. The hosted copy while the store is
    /// reachable, otherwise a draft of the cached HD copy. A hosted URL is still
    /// returned offline when nothing is cached.
    pub async fn display_url(
        &mut self,
        point_id: &str,
        online: bool,
    ) -> Result<Option<String>, StoreError> {
        self.checkins.reload().await?;
        let Some(info) = self.checkins.get(point_id).cloned() else {
            return Ok(None);
        };
        if !info.has_image {
            return Ok(None);
        }
        if online {
            if let Some(url) = info.url {
                return Ok(Some(url));
            }
        }
        match self.retrieve_cached_copy(point_id).await? {
            Some(bytes) => Ok(Some(draft_url(&bytes))),
            None => Ok(info.url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::testing::{dead_addr, spawn, FakeStore};
    use image::{ImageBuffer, Rgba};

    fn composite() -> Vec<u8> {
        let img = ImageBuffer::from_fn(1200, 600, |x, y| Rgba([x as u8, y as u8, 0, 255]));
        encode::encode(&img, EncodeFormat::Jpeg, 92).unwrap()
    }

    fn store_for(endpoint: String) -> BlobStore {
        BlobStore::with_client(
            reqwest::Client::new(),
            &StorageConfig {
                endpoint,
                bucket: "compressed-images".to_string(),
                api_key: None,
                public_base: None,
                timeout_secs: 5,
            },
        )
    }

    async fn bridge(dir: &Path, endpoint: String) -> PersistenceBridge {
        PersistenceBridge::open(store_for(endpoint), dir, &ComposeConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn online_publish_uploads_compressed_and_caches_hd() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeStore::default();
        let addr = spawn(fake.clone()).await;
        let mut b = bridge(dir.path(), format!("http://{}", addr)).await;

        let hd = composite();
        let outcome = b.publish("p1", &hd).await.unwrap();
        let PublishOutcome::Uploaded { url } = outcome.clone() else {
            panic!("expected upload, got {:?}", outcome);
        };
        assert!(url.ends_with("/compressed-images/public/p1.jpg"));

        let uploaded = fake.objects.lock().unwrap()["public/p1.jpg"].clone();
        assert_eq!(image::load_from_memory(&uploaded).unwrap().width(), 720);
        assert_eq!(b.retrieve_cached_copy("p1").await.unwrap().unwrap(), hd);
        assert_eq!(b.checkins().get("p1").unwrap().url.as_deref(), Some(url.as_str()));
        assert_eq!(b.display_url("p1", true).await.unwrap(), Some(url));
    }

    #[tokio::test]
    async fn offline_viewing_falls_back_to_cached_copy() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeStore::default();
        let addr = spawn(fake.clone()).await;
        let mut b = bridge(dir.path(), format!("http://{}", addr)).await;

        let hd = composite();
        b.publish("p1", &hd).await.unwrap();
        let shown = b.display_url("p1", false).await.unwrap().unwrap();
        assert_eq!(shown, draft_url(&hd));

        // No cached copy left: the hosted URL is the only thing to offer.
        b.cache.remove("p1").await.unwrap();
        let shown = b.display_url("p1", false).await.unwrap().unwrap();
        assert!(shown.ends_with("/public/p1.jpg"));
    }

    #[tokio::test]
    async fn rejected_publish_keeps_previous_cached_copy() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeStore::default();
        let addr = spawn(fake.clone()).await;
        let mut b = bridge(dir.path(), format!("http://{}", addr)).await;

        let first = composite();
        b.publish("p1", &first).await.unwrap();

        *fake.fail_with.lock().unwrap() = Some(400);
        let second = encode::encode(
            &ImageBuffer::from_pixel(64, 64, Rgba([1, 2, 3, 255])),
            EncodeFormat::Jpeg,
            92,
        )
        .unwrap();
        assert!(b.publish("p1", &second).await.is_err());
        assert_eq!(b.retrieve_cached_copy("p1").await.unwrap(), Some(first));

        // Nothing cached before a rejected first publish: nothing cached after.
        assert!(b.publish("p2", &second).await.is_err());
        assert_eq!(b.retrieve_cached_copy("p2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn separate_bridges_on_one_state_dir_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeStore::default();
        let addr = spawn(fake.clone()).await;
        // Long-running flusher opened first, store reachable.
        let mut flusher = bridge(dir.path(), format!("http://{}", addr)).await;

        // A separate offline compose queues a composite.
        let offline = dead_addr().await;
        let mut composer = bridge(dir.path(), format!("http://{}", offline)).await;
        composer.publish("p1", &composite()).await.unwrap();

        let report = flusher.retry_pending().await.unwrap();
        assert_eq!(report.uploaded.len(), 1);
        assert!(fake.objects.lock().unwrap().contains_key("public/p1.jpg"));

        flusher.check_in("p2").await.unwrap();

        let reopened = bridge(dir.path(), format!("http://{}", addr)).await;
        assert!(reopened.queue().is_empty());
        assert!(reopened.checkins().get("p1").unwrap().url.is_some());
        assert!(reopened.checkins().is_checked("p2"));
    }

    #[tokio::test]
    async fn unreadable_buffer_stays_queued() {
        let dir = tempfile::tempdir().unwrap();
        let offline = dead_addr().await;
        let mut b = bridge(dir.path(), format!("http://{}", offline)).await;
        b.publish("p1", &composite()).await.unwrap();

        // A directory where the buffer should be: reading fails, but not with NotFound.
        let id = b.queue().entries()[0].id.clone();
        let buffer = dir.path().join("pending").join(format!("{}.bin", id));
        std::fs::remove_file(&buffer).unwrap();
        std::fs::create_dir(&buffer).unwrap();

        let fake = FakeStore::default();
        let addr = spawn(fake.clone()).await;
        let mut b = bridge(dir.path(), format!("http://{}", addr)).await;
        let report = b.retry_pending().await.unwrap();
        assert!(report.rejected.is_empty());
        assert_eq!(report.remaining, 1);

        // A buffer that is really gone is dropped.
        std::fs::remove_dir(&buffer).unwrap();
        let report = b.retry_pending().await.unwrap();
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.remaining, 0);
    }

    #[tokio::test]
    async fn offline_publish_queues_then_retry_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let offline = dead_addr().await;
        let mut b = bridge(dir.path(), format!("http://{}", offline)).await;

        let outcome = b.publish("p1", &composite()).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Queued { ref draft_url, .. }
            if draft_url.starts_with("data:image/jpeg;base64,")));
        assert_eq!(b.queue().len(), 1);
        assert_eq!(
            b.checkins().get("p1"),
            Some(&CheckinInfo { has_image: true, url: None })
        );
        assert!(b.display_url("p1", false).await.unwrap().unwrap().starts_with("data:"));

        // Still offline: nothing moves.
        let report = b.retry_pending().await.unwrap();
        assert_eq!(report.remaining, 1);
        assert!(report.uploaded.is_empty());

        // Connectivity returns: same state dir, reachable store.
        let fake = FakeStore::default();
        let addr = spawn(fake.clone()).await;
        let mut b = bridge(dir.path(), format!("http://{}", addr)).await;
        assert_eq!(b.queue().len(), 1);
        assert_eq!(b.queue().entries()[0].attempts, 1);

        let report = b.retry_pending().await.unwrap();
        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(report.remaining, 0);
        assert!(b.queue().is_empty());
        let url = &report.uploaded[0].1;
        assert_eq!(b.checkins().get("p1").unwrap().url.as_ref(), Some(url));
        assert!(fake.objects.lock().unwrap().contains_key("public/p1.jpg"));
    }

    #[tokio::test]
    async fn storage_rejection_is_not_queued() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeStore::default();
        *fake.fail_with.lock().unwrap() = Some(400);
        let addr = spawn(fake.clone()).await;
        let mut b = bridge(dir.path(), format!("http://{}", addr)).await;

        let err = b.publish("p1", &composite()).await.unwrap_err();
        assert!(matches!(err, PublishError::Upload(UploadError::Storage { status: 400, .. })));
        assert!(b.queue().is_empty());
    }

    #[tokio::test]
    async fn retry_drops_permanently_rejected_entries() {
        let dir = tempfile::tempdir().unwrap();
        let offline = dead_addr().await;
        let mut b = bridge(dir.path(), format!("http://{}", offline)).await;
        b.publish("p1", &composite()).await.unwrap();

        let fake = FakeStore::default();
        *fake.fail_with.lock().unwrap() = Some(403);
        let addr = spawn(fake.clone()).await;
        let mut b = bridge(dir.path(), format!("http://{}", addr)).await;

        let report = b.retry_pending().await.unwrap();
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.remaining, 0);
    }

    #[tokio::test]
    async fn remove_clears_remote_and_local_but_keeps_checkin() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeStore::default();
        let addr = spawn(fake.clone()).await;
        let mut b = bridge(dir.path(), format!("http://{}", addr)).await;

        b.publish("p1", &composite()).await.unwrap();
        b.remove("p1").await.unwrap();

        assert!(fake.objects.lock().unwrap().is_empty());
        assert_eq!(b.retrieve_cached_copy("p1").await.unwrap(), None);
        assert_eq!(b.checkins().get("p1"), Some(&CheckinInfo::without_image()));
        assert_eq!(b.display_url("p1", true).await.unwrap(), None);

        b.cancel_check_in("p1").await.unwrap();
        assert!(!b.checkins().is_checked("p1"));
    }

    #[tokio::test]
    async fn check_in_without_image() {
        let dir = tempfile::tempdir().unwrap();
        let offline = dead_addr().await;
        let mut b = bridge(dir.path(), format!("http://{}", offline)).await;
        b.check_in("p9").await.unwrap();
        assert_eq!(b.checkins().get("p9"), Some(&CheckinInfo::without_image()));
        assert_eq!(b.display_url("p9", true).await.unwrap(), None);
    }
}
