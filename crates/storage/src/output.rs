//! Best-effort persistence of generated maps and tiles.

use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use map_common::{ImageFormat, TileCoord};

/// Writes rendered output under a directory. Failures are logged, never returned.
#[derive(Debug, Clone)]
pub struct OutputSink {
    dir: PathBuf,
}

impl OutputSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save as `map_<millis>.<ext>`, adding a suffix if that name is taken.
    pub async fn save_map(&self, bytes: &[u8], format: ImageFormat) -> Option<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "Failed to create output directory");
            return None;
        }

        let stamp = Utc::now().timestamp_millis();
        for attempt in 0..100u32 {
            let name = if attempt == 0 {
                format!("map_{}.{}", stamp, format.extension())
            } else {
                format!("map_{}_{}.{}", stamp, attempt, format.extension())
            };
            let path = self.dir.join(name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    return match file.write_all(bytes).await {
                        Ok(()) => {
                            debug!(path = %path.display(), size = bytes.len(), "Saved map");
                            Some(path)
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Failed to save map");
                            None
                        }
                    };
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to save map");
                    return None;
                }
            }
        }
        warn!(dir = %self.dir.display(), "No free output file name for map");
        None
    }

    /// Save as `tiles/tile_<z>_<x>_<y>.png`, replacing any previous copy.
    pub async fn save_tile(&self, coord: &TileCoord, bytes: &[u8]) -> Option<PathBuf> {
        let tiles = self.dir.join("tiles");
        if let Err(e) = tokio::fs::create_dir_all(&tiles).await {
            warn!(dir = %tiles.display(), error = %e, "Failed to create tile output directory");
            return None;
        }
        let path = tiles.join(format!("tile_{}_{}_{}.png", coord.z, coord.x, coord.y));
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to save tile");
                None
            }
        }
    }
}
