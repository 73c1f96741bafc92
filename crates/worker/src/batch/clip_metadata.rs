//! Clip extraction from platform messages.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use services::settings::ResolvedSettings;

use crate::platform::{PlatformAttachment, PlatformMessage};

use super::validators::{filter_video_attachments, matches_regex_filter};

/// Extracted clip information for one attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipInfo {
    pub clip_id: String,
    pub message_id: String,
    pub filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub cdn_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Content fingerprint: md5 over `message_id:channel_id:filename:timestamp`
/// with the timestamp rendered as ISO-8601. The same attachment always
/// yields the same id, which is what makes redelivery idempotent.
pub fn generate_clip_id(
    message_id: &str,
    channel_id: &str,
    filename: &str,
    timestamp: &DateTime<Utc>,
) -> String {
    let data = format!(
        "{}:{}:{}:{}",
        message_id,
        channel_id,
        filename,
        timestamp.to_rfc3339()
    );
    format!("{:x}", md5::compute(data.as_bytes()))
}

/// Expiry baked into a CDN URL as the hex-encoded `ex=` query parameter.
/// URLs without one are assumed to live 24 hours.
pub fn extract_cdn_expiry(cdn_url: &str) -> DateTime<Utc> {
    if let Ok(url) = reqwest::Url::parse(cdn_url) {
        for (key, value) in url.query_pairs() {
            if key == "ex" {
                if let Ok(unix) = i64::from_str_radix(&value, 16) {
                    if let Some(expiry) = DateTime::from_timestamp(unix, 0) {
                        return expiry;
                    }
                }
            }
        }
    }
    Utc::now() + Duration::hours(24)
}

/// Fallback mime type for attachments the platform didn't label.
pub fn guess_mime_type(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "flv" => "video/x-flv",
        "m4v" => "video/x-m4v",
        _ => "video/mp4",
    }
}

pub fn attachment_mime_type(attachment: &PlatformAttachment) -> String {
    attachment
        .content_type
        .clone()
        .unwrap_or_else(|| guess_mime_type(&attachment.filename).to_string())
}

pub fn extract_clip_info(
    attachment: &PlatformAttachment,
    message: &PlatformMessage,
    channel_id: &str,
) -> ClipInfo {
    ClipInfo {
        clip_id: generate_clip_id(
            &message.id,
            channel_id,
            &attachment.filename,
            &message.timestamp,
        ),
        message_id: message.id.clone(),
        filename: attachment.filename.clone(),
        file_size: attachment.size,
        mime_type: attachment_mime_type(attachment),
        cdn_url: attachment.url.clone(),
        expires_at: extract_cdn_expiry(&attachment.url),
    }
}

/// Map of message id to the clips it contributes. The regex filter runs
/// before attachment extraction: a non-matching message contributes
/// nothing.
pub fn build_clip_id_map(
    messages: &[PlatformMessage],
    channel_id: &str,
    settings: &ResolvedSettings,
) -> HashMap<String, Vec<ClipInfo>> {
    let allowed = settings.allowed_mime_types();
    let mut clip_map = HashMap::new();

    for message in messages {
        if !matches_regex_filter(&message.content, settings.match_regex()) {
            continue;
        }
        let clips: Vec<ClipInfo> = filter_video_attachments(&message.attachments, &allowed)
            .into_iter()
            .map(|attachment| extract_clip_info(attachment, message, channel_id))
            .collect();
        if !clips.is_empty() {
            clip_map.insert(message.id.clone(), clips);
        }
    }
    clip_map
}

pub fn all_clip_ids(clip_map: &HashMap<String, Vec<ClipInfo>>) -> Vec<String> {
    clip_map
        .values()
        .flatten()
        .map(|clip| clip.clip_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn clip_id_is_md5_of_the_fingerprint_string() {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let id = generate_clip_id("111", "222", "clip.mp4", &timestamp);

        let expected = format!(
            "{:x}",
            md5::compute(format!("111:222:clip.mp4:{}", timestamp.to_rfc3339()).as_bytes())
        );
        assert_eq!(id, expected);
        assert_eq!(id.len(), 32);
    }

    #[test]
    fn clip_id_uses_iso_timestamps_not_epoch() {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let id = generate_clip_id("111", "222", "clip.mp4", &timestamp);
        let epoch_variant = format!(
            "{:x}",
            md5::compute(format!("111:222:clip.mp4:{}", timestamp.timestamp()).as_bytes())
        );
        assert_ne!(id, epoch_variant);
    }

    #[test]
    fn cdn_expiry_decodes_the_hex_parameter() {
        // 0x66aa0000 = 1722351616 unix seconds.
        let url = "https://cdn.example.com/attachments/1/2/clip.mp4?ex=66aa0000&is=1&hm=2";
        let expiry = extract_cdn_expiry(url);
        assert_eq!(expiry, DateTime::from_timestamp(0x66aa0000, 0).unwrap());
    }

    #[test]
    fn cdn_expiry_defaults_to_24_hours() {
        let before = Utc::now() + Duration::hours(24);
        let expiry = extract_cdn_expiry("https://cdn.example.com/clip.mp4");
        let after = Utc::now() + Duration::hours(24);
        assert!(expiry >= before - Duration::seconds(1));
        assert!(expiry <= after + Duration::seconds(1));
    }

    #[test]
    fn cdn_expiry_ignores_malformed_hex() {
        let before = Utc::now() + Duration::hours(24);
        let expiry = extract_cdn_expiry("https://cdn.example.com/clip.mp4?ex=zzzz");
        assert!(expiry >= before - Duration::seconds(1));
    }

    #[test]
    fn mime_guessing_covers_common_containers() {
        assert_eq!(guess_mime_type("a.MP4"), "video/mp4");
        assert_eq!(guess_mime_type("a.webm"), "video/webm");
        assert_eq!(guess_mime_type("a.mov"), "video/quicktime");
        assert_eq!(guess_mime_type("a.mkv"), "video/x-matroska");
        assert_eq!(guess_mime_type("a.unknown"), "video/mp4");
    }
}
