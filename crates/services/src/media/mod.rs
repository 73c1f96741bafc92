//! Media pipeline: download, probe, frame extraction, thumbnail encoding
//! and artifact storage for a single clip.
//!
//! The HTTP client is constructed once and shared across calls so TLS setup
//! is amortized; ffmpeg/ffprobe run as subprocesses and never block the
//! runtime. Scratch files live in a per-clip temp directory that is removed
//! on every exit path.

use std::{path::Path, sync::Arc, time::Duration};

use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::storage::{StorageBackend, StorageError};

pub mod encode;
pub mod probe;

use encode::EncodedImage;
use probe::VideoMetadata;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Probe failed: {0}")]
    Probe(String),
    #[error("Frame extraction failed: {0}")]
    Extract(String),
    #[error("Encode failed: {0}")]
    Encode(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub small_width: u32,
    pub small_height: u32,
    pub large_width: u32,
    pub large_height: u32,
    /// Seconds into the video to grab the frame from.
    pub frame_timestamp: f64,
    pub quality: f32,
    pub download_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            small_width: 320,
            small_height: 180,
            large_width: 640,
            large_height: 360,
            frame_timestamp: 1.0,
            quality: 85.0,
            download_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl MediaConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            small_width: env_u32("THUMBNAIL_SMALL_WIDTH", defaults.small_width),
            small_height: env_u32("THUMBNAIL_SMALL_HEIGHT", defaults.small_height),
            large_width: env_u32("THUMBNAIL_LARGE_WIDTH", defaults.large_width),
            large_height: env_u32("THUMBNAIL_LARGE_HEIGHT", defaults.large_height),
            frame_timestamp: env_f64("THUMBNAIL_TIMESTAMP", defaults.frame_timestamp),
            quality: env_f64("THUMBNAIL_QUALITY", defaults.quality as f64) as f32,
            download_timeout: Duration::from_secs_f64(env_f64(
                "VIDEO_DOWNLOAD_TIMEOUT",
                defaults.download_timeout.as_secs_f64(),
            )),
            connect_timeout: Duration::from_secs_f64(env_f64(
                "VIDEO_DOWNLOAD_CONNECT_TIMEOUT",
                defaults.connect_timeout.as_secs_f64(),
            )),
        }
    }
}

/// Stable blob path for a clip thumbnail.
pub fn thumbnail_storage_path(guild_id: &str, clip_id: &str, size: &str) -> String {
    format!("thumbnails/guild_{guild_id}/{clip_id}_{size}.webp")
}

#[derive(Debug, Clone)]
pub struct GeneratedThumbnail {
    pub storage_path: String,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
}

/// Everything the pipeline learned and produced for one clip.
#[derive(Debug, Clone)]
pub struct MediaArtifacts {
    pub small: GeneratedThumbnail,
    pub large: GeneratedThumbnail,
    pub mime_type: Option<String>,
    pub duration: Option<f64>,
    pub resolution: Option<String>,
}

pub struct MediaPipeline {
    client: reqwest::Client,
    storage: Arc<dyn StorageBackend>,
    ffmpeg: std::path::PathBuf,
    ffprobe: std::path::PathBuf,
    config: MediaConfig,
}

impl MediaPipeline {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        config: MediaConfig,
    ) -> Result<Self, MediaError> {
        let client = reqwest::Client::builder()
            .timeout(config.download_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        let ffmpeg = probe::discover_binary("ffmpeg");
        let ffprobe = probe::discover_binary("ffprobe");
        info!(
            "Media pipeline using ffmpeg={} ffprobe={}",
            ffmpeg.display(),
            ffprobe.display()
        );

        Ok(Self {
            client,
            storage,
            ffmpeg,
            ffprobe,
            config,
        })
    }

    /// True when both raster sizes are already present in blob storage.
    pub async fn artifacts_exist(&self, guild_id: &str, clip_id: &str) -> Result<bool, MediaError> {
        let small = self
            .storage
            .exists(&thumbnail_storage_path(guild_id, clip_id, "small"))
            .await?;
        let large = self
            .storage
            .exists(&thumbnail_storage_path(guild_id, clip_id, "large"))
            .await?;
        Ok(small && large)
    }

    /// Run the full pipeline for one clip and persist both thumbnails.
    pub async fn generate(
        &self,
        guild_id: &str,
        clip_id: &str,
        cdn_url: &str,
    ) -> Result<MediaArtifacts, MediaError> {
        let scratch = tempfile::tempdir()?;
        let video_path = scratch.path().join("source");
        let frame_path = scratch.path().join("frame.png");

        self.download(cdn_url, &video_path).await?;
        let metadata = self.probe(&video_path).await?;
        self.extract_frame(&video_path, &frame_path).await?;

        let small = encode::render_webp(
            &frame_path,
            self.config.small_width,
            self.config.small_height,
            self.config.quality,
        )
        .await?;
        let large = encode::render_webp(
            &frame_path,
            self.config.large_width,
            self.config.large_height,
            self.config.quality,
        )
        .await?;

        let small = self.store(guild_id, clip_id, "small", small).await?;
        let large = self.store(guild_id, clip_id, "large", large).await?;

        Ok(MediaArtifacts {
            small,
            large,
            mime_type: metadata.output_mime_type().map(str::to_string),
            duration: metadata.duration,
            resolution: metadata.resolution(),
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), MediaError> {
        debug!("Downloading media from {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn probe(&self, path: &Path) -> Result<VideoMetadata, MediaError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await
            .map_err(|e| MediaError::Probe(format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(MediaError::Probe(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        VideoMetadata::parse(&output.stdout)
            .map_err(|e| MediaError::Probe(format!("unparseable ffprobe output: {e}")))
    }

    async fn extract_frame(&self, video: &Path, frame: &Path) -> Result<(), MediaError> {
        let timestamp = format!("{}", self.config.frame_timestamp);
        let output = Command::new(&self.ffmpeg)
            .arg("-y")
            .args(["-ss", &timestamp])
            .arg("-i")
            .arg(video)
            .args(["-vframes", "1", "-f", "image2", "-vcodec", "png"])
            .arg(frame)
            .output()
            .await
            .map_err(|e| MediaError::Extract(format!("failed to run ffmpeg: {e}")))?;

        if !output.status.success() {
            return Err(MediaError::Extract(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        if !frame.exists() {
            return Err(MediaError::Extract("ffmpeg produced no frame".into()));
        }
        Ok(())
    }

    async fn store(
        &self,
        guild_id: &str,
        clip_id: &str,
        size: &str,
        image: EncodedImage,
    ) -> Result<GeneratedThumbnail, MediaError> {
        let storage_path = thumbnail_storage_path(guild_id, clip_id, size);
        let file_size = image.bytes.len() as u64;
        self.storage.save(&image.bytes, &storage_path).await?;
        Ok(GeneratedThumbnail {
            storage_path,
            width: image.width,
            height: image.height,
            file_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_paths_are_stable() {
        assert_eq!(
            thumbnail_storage_path("123", "abc", "small"),
            "thumbnails/guild_123/abc_small.webp"
        );
        assert_eq!(
            thumbnail_storage_path("123", "abc", "large"),
            "thumbnails/guild_123/abc_large.webp"
        );
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = MediaConfig::default();
        assert_eq!((config.small_width, config.small_height), (320, 180));
        assert_eq!((config.large_width, config.large_height), (640, 360));
        assert_eq!(config.frame_timestamp, 1.0);
        assert_eq!(config.quality, 85.0);
        assert_eq!(config.download_timeout, Duration::from_secs(300));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }
}
