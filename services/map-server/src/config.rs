//! Server configuration.
//!
//! Values come from an optional YAML or JSON file, then `MAP_SERVER_*`
//! environment variables, then command-line flags. Every field has a default
//! so an empty file (or no file) yields a runnable server.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use map_common::RenderLimits;
use renderer::PngOptions;
use storage::PoolConfig;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "MAP_SERVER_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub cache: CacheSection,
    pub limits: LimitsSection,
    pub encoder: EncoderSection,
    /// Where generated maps and tiles are saved. `None` disables saving.
    pub output_dir: Option<PathBuf>,
    /// Optional JSON style sheet merged over the built-in layer styles.
    pub styles_path: Option<PathBuf>,
    pub log: LogSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub worker_threads: usize,
    pub request_timeout_secs: u64,
    /// Largest accepted request body in bytes.
    pub max_request_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            worker_threads: 4,
            request_timeout_secs: 30,
            max_request_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: PathBuf,
    pub connection_pool_size: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./spatial_data.db"),
            connection_pool_size: 5,
            acquire_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub memory_max_items: usize,
    /// Second-tier cache directory. `None` keeps everything in memory.
    pub disk_cache_dir: Option<PathBuf>,
    pub ttl_seconds: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            memory_max_items: 100,
            disk_cache_dir: Some(PathBuf::from("./tile_cache")),
            ttl_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_image_width: u32,
    pub max_image_height: u32,
    pub max_features_per_request: usize,
    pub render_timeout_ms: u64,
    /// Only accept lon/lat boxes.
    pub geographic_bbox_only: bool,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_image_width: 4096,
            max_image_height: 4096,
            max_features_per_request: 10_000,
            render_timeout_ms: 10_000,
            geographic_bbox_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSection {
    pub compression_level: u8,
    pub interlaced: bool,
}

impl Default for EncoderSection {
    fn default() -> Self {
        let png = PngOptions::default();
        Self {
            compression_level: png.compression_level,
            interlaced: png.interlaced,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
    /// JSON lines when true, human-readable text otherwise.
    pub json: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            database: DatabaseSection::default(),
            cache: CacheSection::default(),
            limits: LimitsSection::default(),
            encoder: EncoderSection::default(),
            output_dir: Some(PathBuf::from("./leaf/output")),
            styles_path: None,
            log: LogSection::default(),
        }
    }
}

impl ServerConfig {
    /// Read the file (if any), apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse YAML or JSON text. Sections left out take their defaults.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply `MAP_SERVER_*` overrides. `lookup` is `std::env::var` outside tests.
    ///
    /// An empty value for a directory option disables that feature.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        set_parsed(&get, "PORT", &mut self.server.port)?;
        set_parsed(&get, "WORKER_THREADS", &mut self.server.worker_threads)?;
        set_parsed(&get, "REQUEST_TIMEOUT_SECS", &mut self.server.request_timeout_secs)?;
        set_parsed(&get, "MAX_REQUEST_SIZE", &mut self.server.max_request_size)?;

        if let Some(path) = get("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        set_parsed(&get, "POOL_SIZE", &mut self.database.connection_pool_size)?;
        set_parsed(&get, "ACQUIRE_TIMEOUT_MS", &mut self.database.acquire_timeout_ms)?;

        set_parsed(&get, "CACHE_MAX_ITEMS", &mut self.cache.memory_max_items)?;
        set_parsed(&get, "CACHE_TTL_SECONDS", &mut self.cache.ttl_seconds)?;
        if let Some(dir) = get("DISK_CACHE_DIR") {
            self.cache.disk_cache_dir = optional_dir(dir);
        }

        set_parsed(&get, "MAX_IMAGE_WIDTH", &mut self.limits.max_image_width)?;
        set_parsed(&get, "MAX_IMAGE_HEIGHT", &mut self.limits.max_image_height)?;
        set_parsed(&get, "MAX_FEATURES", &mut self.limits.max_features_per_request)?;
        set_parsed(&get, "RENDER_TIMEOUT_MS", &mut self.limits.render_timeout_ms)?;
        set_parsed(&get, "GEOGRAPHIC_BBOX_ONLY", &mut self.limits.geographic_bbox_only)?;

        set_parsed(&get, "COMPRESSION_LEVEL", &mut self.encoder.compression_level)?;
        set_parsed(&get, "INTERLACED", &mut self.encoder.interlaced)?;

        if let Some(dir) = get("OUTPUT_DIR") {
            self.output_dir = optional_dir(dir);
        }
        if let Some(path) = get("STYLES_PATH") {
            self.styles_path = optional_dir(path);
        }

        if let Some(level) = get("LOG_LEVEL") {
            self.log.level = level;
        }
        set_parsed(&get, "LOG_JSON", &mut self.log.json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        if self.server.worker_threads == 0 {
            bail!("server.worker_threads must be at least 1");
        }
        if self.server.max_request_size == 0 {
            bail!("server.max_request_size must be at least 1 byte");
        }
        if self.database.connection_pool_size == 0 {
            bail!("database.connection_pool_size must be at least 1");
        }
        if self.cache.memory_max_items == 0 {
            bail!("cache.memory_max_items must be at least 1");
        }
        if self.cache.ttl_seconds == 0 {
            bail!("cache.ttl_seconds must be at least 1");
        }
        if self.limits.max_image_width == 0 || self.limits.max_image_height == 0 {
            bail!("limits.max_image_width and limits.max_image_height must be non-zero");
        }
        if self.limits.max_features_per_request == 0 {
            bail!("limits.max_features_per_request must be at least 1");
        }
        if self.limits.render_timeout_ms == 0 {
            bail!("limits.render_timeout_ms must be at least 1");
        }
        if self.encoder.compression_level > 9 {
            bail!(
                "encoder.compression_level must be 0-9, got {}",
                self.encoder.compression_level
            );
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse()
            .with_context(|| format!("Invalid listen address {}", addr))
    }

    pub fn render_limits(&self) -> RenderLimits {
        RenderLimits {
            max_width: self.limits.max_image_width,
            max_height: self.limits.max_image_height,
            max_features: self.limits.max_features_per_request,
            geographic_bbox_only: self.limits.geographic_bbox_only,
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(&self.database.path)
            .with_size(self.database.connection_pool_size)
            .with_acquire_timeout(Duration::from_millis(self.database.acquire_timeout_ms))
    }

    pub fn png_options(&self) -> PngOptions {
        PngOptions::default()
            .with_compression(self.encoder.compression_level)
            .interlaced(self.encoder.interlaced)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.limits.render_timeout_ms)
    }
}

fn set_parsed<T, G>(get: &G, name: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(name) {
        *slot = raw.trim().parse().map_err(|e: T::Err| {
            anyhow::anyhow!("Invalid value {:?} for {}{}: {}", raw, ENV_PREFIX, name, e)
        })?;
    }
    Ok(())
}

fn optional_dir(value: String) -> Option<PathBuf> {
    if value.trim().is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}
