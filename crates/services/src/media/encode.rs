//! Frame resizing and WebP encoding.
//!
//! CPU-heavy work runs on the blocking pool so pipeline tasks keep yielding.

use std::path::Path;

use super::MediaError;

#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Dimensions after fitting `(width, height)` inside `(max_width,
/// max_height)` while preserving aspect ratio.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let ratio = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let fitted_width = ((width as f64 * ratio).round() as u32).max(1);
    let fitted_height = ((height as f64 * ratio).round() as u32).max(1);
    (fitted_width, fitted_height)
}

/// Load the extracted frame, fit it into the target box and encode lossy
/// WebP at the given quality.
pub async fn render_webp(
    frame_path: &Path,
    max_width: u32,
    max_height: u32,
    quality: f32,
) -> Result<EncodedImage, MediaError> {
    let frame_path = frame_path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let img = image::open(&frame_path)
            .map_err(|e| MediaError::Encode(format!("failed to load frame: {e}")))?;

        // Fit inside the box without upscaling small sources.
        let (target_width, target_height) =
            fit_within(img.width(), img.height(), max_width, max_height);
        let resized = if (target_width, target_height) == (img.width(), img.height()) {
            img
        } else {
            img.resize_exact(
                target_width,
                target_height,
                image::imageops::FilterType::Lanczos3,
            )
        };
        let rgb = resized.to_rgb8();
        let (width, height) = (rgb.width(), rgb.height());

        let encoder = webp::Encoder::from_rgb(rgb.as_raw(), width, height);
        let bytes = encoder.encode(quality).to_vec();

        Ok(EncodedImage {
            bytes,
            width,
            height,
        })
    })
    .await
    .map_err(|e| MediaError::Encode(format!("encode task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_video_fits_the_box_by_width() {
        assert_eq!(fit_within(1920, 1080, 320, 180), (320, 180));
        assert_eq!(fit_within(1280, 720, 640, 360), (640, 360));
    }

    #[test]
    fn portrait_video_fits_the_box_by_height() {
        assert_eq!(fit_within(1080, 1920, 320, 180), (101, 180));
    }

    #[test]
    fn small_sources_are_not_upscaled() {
        assert_eq!(fit_within(160, 90, 320, 180), (160, 90));
    }

    #[tokio::test]
    async fn render_encodes_a_png_frame_to_webp() {
        let dir = tempfile::tempdir().unwrap();
        let frame = dir.path().join("frame.png");

        let img = image::RgbImage::from_fn(64, 36, |x, _| image::Rgb([(x * 4) as u8, 64, 128]));
        img.save(&frame).unwrap();

        let encoded = render_webp(&frame, 32, 18, 85.0).await.unwrap();
        assert_eq!((encoded.width, encoded.height), (32, 18));
        assert!(!encoded.bytes.is_empty());
        // RIFF....WEBP magic.
        assert_eq!(&encoded.bytes[0..4], b"RIFF");
        assert_eq!(&encoded.bytes[8..12], b"WEBP");
    }
}
