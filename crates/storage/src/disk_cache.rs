//! Second-tier render cache on the local filesystem.
//!
//! Layout: `<root>/<first two hex chars>/<fingerprint>.<ext>` for the image
//! and a `.json` sidecar for its metadata. Freshness comes from the image
//! file's modification time. Writes go to a temp file and are renamed into
//! place, so readers never see a partial image. Every failure is logged and
//! treated as a miss.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use map_common::{Fingerprint, ImageFormat};

use crate::render_cache::CachedRender;

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    format: ImageFormat,
    width: u32,
    height: u32,
    feature_count: usize,
    render_time_ms: u64,
}

pub struct DiskCache {
    root: PathBuf,
    ttl: Duration,
    temp_counter: AtomicU64,
}

impl DiskCache {
    /// Create the cache directory if needed.
    pub async fn open(root: impl Into<PathBuf>, ttl: Duration) -> std::io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            ttl,
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard(&self, fingerprint: &Fingerprint) -> PathBuf {
        let hex = fingerprint.as_str();
        self.root.join(hex.get(..2).unwrap_or("00"))
    }

    fn sidecar_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.shard(fingerprint)
            .join(format!("{}.json", fingerprint.as_str()))
    }

    fn image_path(&self, fingerprint: &Fingerprint, format: ImageFormat) -> PathBuf {
        self.shard(fingerprint)
            .join(format!("{}.{}", fingerprint.as_str(), format.extension()))
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<CachedRender> {
        let sidecar_path = self.sidecar_path(fingerprint);
        let sidecar: Sidecar = match tokio::fs::read(&sidecar_path).await {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(sidecar) => sidecar,
                Err(e) => {
                    warn!(path = %sidecar_path.display(), error = %e, "Corrupt disk cache sidecar");
                    return None;
                }
            },
            Err(_) => return None,
        };

        let image_path = self.image_path(fingerprint, sidecar.format);
        let modified = tokio::fs::metadata(&image_path)
            .await
            .and_then(|m| m.modified())
            .ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > self.ttl {
            debug!(fingerprint = %fingerprint, age_secs = age.as_secs(), "Disk cache entry expired");
            let _ = tokio::fs::remove_file(&image_path).await;
            let _ = tokio::fs::remove_file(&sidecar_path).await;
            return None;
        }

        match tokio::fs::read(&image_path).await {
            Ok(bytes) => Some(CachedRender {
                bytes: Bytes::from(bytes),
                format: sidecar.format,
                width: sidecar.width,
                height: sidecar.height,
                feature_count: sidecar.feature_count,
                render_time_ms: sidecar.render_time_ms,
            }),
            Err(e) => {
                warn!(path = %image_path.display(), error = %e, "Failed to read disk cache entry");
                None
            }
        }
    }

    /// Best-effort write. Returns whether both files landed.
    pub async fn put(&self, fingerprint: &Fingerprint, render: &CachedRender) -> bool {
        let sidecar = Sidecar {
            format: render.format,
            width: render.width,
            height: render.height,
            feature_count: render.feature_count,
            render_time_ms: render.render_time_ms,
        };
        let sidecar_json = match serde_json::to_vec(&sidecar) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize disk cache sidecar");
                return false;
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(self.shard(fingerprint)).await {
            warn!(error = %e, "Failed to create disk cache directory");
            return false;
        }

        // Image first: a sidecar without its image reads as a miss.
        let image_path = self.image_path(fingerprint, render.format);
        if let Err(e) = self.write_atomic(&image_path, &render.bytes).await {
            warn!(path = %image_path.display(), error = %e, "Failed to write disk cache entry");
            return false;
        }
        let sidecar_path = self.sidecar_path(fingerprint);
        if let Err(e) = self.write_atomic(&sidecar_path, &sidecar_json).await {
            warn!(path = %sidecar_path.display(), error = %e, "Failed to write disk cache sidecar");
            return false;
        }
        true
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp-{}-{}", std::process::id(), n));
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp() -> Fingerprint {
        Fingerprint::from_hex("ab".repeat(32)).unwrap()
    }

    fn render() -> CachedRender {
        CachedRender {
            bytes: Bytes::from_static(b"\x89PNG fake"),
            format: ImageFormat::Png,
            width: 256,
            height: 256,
            feature_count: 7,
            render_time_ms: 12,
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), Duration::from_secs(60)).await.unwrap();

        assert!(cache.get(&fp()).await.is_none());
        assert!(cache.put(&fp(), &render()).await);

        let back = cache.get(&fp()).await.unwrap();
        assert_eq!(back, render());
        assert!(dir.path().join("ab").join(format!("{}.png", fp())).exists());
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), Duration::ZERO).await.unwrap();
        cache.put(&fp(), &render()).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get(&fp()).await.is_none());
        assert!(!dir.path().join("ab").join(format!("{}.png", fp())).exists());
    }

    #[tokio::test]
    async fn test_missing_image_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), Duration::from_secs(60)).await.unwrap();
        cache.put(&fp(), &render()).await;
        std::fs::remove_file(dir.path().join("ab").join(format!("{}.png", fp()))).unwrap();
        assert!(cache.get(&fp()).await.is_none());
    }
}
