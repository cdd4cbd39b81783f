use std::path::{Path, PathBuf};

use async_trait::async_trait;
use url::Url;
use uuid::Uuid;

use crate::core::error::{ChatError, ChatResult};
use crate::core::mime::extension_for;
use crate::core::models::{now_millis, MediaId, Upload};
use crate::core::store::StoreHandle;

/// Host media subsystem: keeps uploaded files and hands out display URLs.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Persist an upload whose type has already been validated as `mime`.
    async fn store(&self, upload: &Upload, mime: &str) -> ChatResult<MediaId>;

    async fn url(&self, id: MediaId) -> ChatResult<Option<String>>;

    /// Drop media that was stored but never attached to a message.
    async fn discard(&self, id: MediaId) -> ChatResult<()>;
}

/// Files on local disk, indexed in the `media` table.
pub struct FsMediaStore {
    root: PathBuf,
    base_url: Url,
    index: StoreHandle,
}

impl FsMediaStore {
    pub fn new(root: &Path, base_url: &str, index: StoreHandle) -> ChatResult<Self> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| ChatError::InvalidRequest(format!("media base url {base_url:?}: {e}")))?;
        Ok(FsMediaStore {
            root: root.to_path_buf(),
            base_url,
            index,
        })
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn store(&self, upload: &Upload, mime: &str) -> ChatResult<MediaId> {
        let failed = |reason: String| ChatError::UploadFailed {
            reason,
            retryable: false,
        };

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| failed(format!("create media dir: {e}")))?;

        let file_name = format!("{}.{}", Uuid::new_v4(), extension_for(mime));
        let path = self.root.join(&file_name);
        tokio::fs::write(&path, &upload.bytes)
            .await
            .map_err(|e| failed(format!("write {}: {e}", path.display())))?;

        match self
            .index
            .insert_media(&file_name, mime, upload.bytes.len() as u64, now_millis())
            .await
        {
            Ok(id) => {
                log::debug!("Stored attachment {:?} as media {id}", upload.file_name);
                Ok(id)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    log::warn!("Failed to remove unindexed upload {}: {rm}", path.display());
                }
                Err(failed(e.to_string()))
            }
        }
    }

    async fn url(&self, id: MediaId) -> ChatResult<Option<String>> {
        let Some(record) = self.index.media(id).await? else {
            return Ok(None);
        };
        let url = self
            .base_url
            .join(&record.file_name)
            .map_err(|e| ChatError::Storage(format!("media url for {id}: {e}")))?;
        Ok(Some(url.to_string()))
    }

    async fn discard(&self, id: MediaId) -> ChatResult<()> {
        let Some(record) = self.index.delete_media(id).await? else {
            return Ok(());
        };
        let path = self.root.join(&record.file_name);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            log::warn!("Failed to remove discarded media {}: {e}", path.display());
        }
        log::debug!("Discarded media {id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_file_and_builds_url() {
        let dir = tempfile::tempdir().unwrap();
        let index = StoreHandle::open_in_memory().unwrap();
        let media = FsMediaStore::new(dir.path(), "https://portal.example.org/media", index).unwrap();

        let upload = Upload {
            file_name: "receipt.png".into(),
            content_type: "image/png".into(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        };
        let id = media.store(&upload, "image/png").await.unwrap();
        let url = media.url(id).await.unwrap().unwrap();

        assert!(url.starts_with("https://portal.example.org/media/"));
        assert!(url.ends_with(".png"));

        let file_name = url.rsplit('/').next().unwrap();
        let on_disk = std::fs::read(dir.path().join(file_name)).unwrap();
        assert_eq!(on_disk, upload.bytes);
        assert!(media.url(id + 100).await.unwrap().is_none());

        media.discard(id).await.unwrap();
        assert!(!dir.path().join(file_name).exists());
        assert!(media.url(id).await.unwrap().is_none());
        // Already gone.
        media.discard(id).await.unwrap();
    }
}
