//! ffprobe envelope parsing and output mime-type selection.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ProbeEnvelope {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

/// What the probe learned about a downloaded clip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoMetadata {
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codec_name: Option<String>,
    pub format_name: Option<String>,
}

impl VideoMetadata {
    /// Parse the ffprobe JSON envelope, reading the first video stream.
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let envelope: ProbeEnvelope = serde_json::from_slice(raw)?;

        let video = envelope
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"));

        let duration = video
            .and_then(|s| s.duration.as_deref())
            .or(envelope
                .format
                .as_ref()
                .and_then(|f| f.duration.as_deref()))
            .and_then(|d| d.parse().ok());

        Ok(Self {
            duration,
            width: video.and_then(|s| s.width),
            height: video.and_then(|s| s.height),
            codec_name: video.and_then(|s| s.codec_name.clone()),
            format_name: envelope.format.and_then(|f| f.format_name),
        })
    }

    pub fn resolution(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(format!("{w}x{h}")),
            _ => None,
        }
    }

    /// Output mime type. Codec wins over the container (the ambiguous
    /// `mov,mp4,m4a` container still maps to mp4 for h264 family codecs),
    /// then the container name decides, then mp4.
    pub fn output_mime_type(&self) -> Option<&'static str> {
        if self.codec_name.is_none() && self.format_name.is_none() {
            return None;
        }

        if let Some(codec) = self.codec_name.as_deref() {
            match codec {
                "h264" | "h265" | "hevc" | "mpeg4" | "avc1" => return Some("video/mp4"),
                "vp8" | "vp9" => return Some("video/webm"),
                _ => {}
            }
        }

        if let Some(format) = self.format_name.as_deref() {
            let format = format.to_ascii_lowercase();
            let has = |token: &str| format.split(',').any(|part| part.trim() == token);
            if has("webm") {
                return Some("video/webm");
            }
            if has("matroska") || has("mkv") {
                return Some("video/x-matroska");
            }
            if has("avi") {
                return Some("video/x-msvideo");
            }
            if has("flv") {
                return Some("video/x-flv");
            }
            if has("mp4") {
                return Some("video/mp4");
            }
            if has("mov") || has("quicktime") {
                return Some("video/quicktime");
            }
        }

        Some("video/mp4")
    }
}

const MANIFEST_DIR: &str = env!("CARGO_MANIFEST_DIR");

/// Workspace root, anchored at compile time so binary discovery does not
/// depend on the process working directory.
fn repo_root() -> &'static Path {
    // MANIFEST_DIR is <root>/crates/services.
    Path::new(MANIFEST_DIR)
        .ancestors()
        .nth(2)
        .unwrap_or(Path::new(MANIFEST_DIR))
}

/// Locate a media binary. A repo-local `bin/ffmpeg` install wins over PATH.
pub fn discover_binary(name: &str) -> PathBuf {
    let exe = if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    };

    let root = repo_root();
    let candidates = [
        root.join("bin").join("ffmpeg").join("bin").join(&exe),
        root.join("bin").join("ffmpeg").join(&exe),
    ];
    for candidate in candidates {
        if candidate.exists() {
            return candidate;
        }
    }
    PathBuf::from(exe)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"codec_type": "audio", "codec_name": "aac"},
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080, "duration": "12.480000"}
        ],
        "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "12.52"}
    }"#;

    #[test]
    fn parses_the_first_video_stream() {
        let metadata = VideoMetadata::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(metadata.codec_name.as_deref(), Some("h264"));
        assert_eq!(metadata.width, Some(1920));
        assert_eq!(metadata.height, Some(1080));
        assert_eq!(metadata.duration, Some(12.48));
        assert_eq!(metadata.resolution().as_deref(), Some("1920x1080"));
    }

    #[test]
    fn duration_falls_back_to_the_format_section() {
        let raw = r#"{
            "streams": [{"codec_type": "video", "codec_name": "vp9", "width": 640, "height": 360}],
            "format": {"format_name": "webm", "duration": "3.5"}
        }"#;
        let metadata = VideoMetadata::parse(raw.as_bytes()).unwrap();
        assert_eq!(metadata.duration, Some(3.5));
    }

    fn meta(codec: Option<&str>, format: Option<&str>) -> VideoMetadata {
        VideoMetadata {
            codec_name: codec.map(str::to_string),
            format_name: format.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn codec_overrides_ambiguous_container() {
        assert_eq!(
            meta(Some("h264"), Some("mov,mp4,m4a,3gp,3g2,mj2")).output_mime_type(),
            Some("video/mp4")
        );
        assert_eq!(
            meta(Some("hevc"), Some("matroska,webm")).output_mime_type(),
            Some("video/mp4")
        );
        assert_eq!(
            meta(Some("vp9"), Some("matroska,webm")).output_mime_type(),
            Some("video/webm")
        );
    }

    #[test]
    fn container_decides_for_unknown_codecs() {
        assert_eq!(meta(Some("theora"), Some("webm")).output_mime_type(), Some("video/webm"));
        assert_eq!(
            meta(None, Some("matroska")).output_mime_type(),
            Some("video/x-matroska")
        );
        assert_eq!(meta(None, Some("avi")).output_mime_type(), Some("video/x-msvideo"));
        assert_eq!(meta(None, Some("flv")).output_mime_type(), Some("video/x-flv"));
        assert_eq!(
            meta(None, Some("mov,quicktime")).output_mime_type(),
            Some("video/quicktime")
        );
    }

    #[test]
    fn defaults_to_mp4_when_nothing_matches() {
        assert_eq!(meta(Some("weird"), Some("unknown")).output_mime_type(), Some("video/mp4"));
        assert_eq!(meta(None, None).output_mime_type(), None);
    }
}
