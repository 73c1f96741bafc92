//! Message and attachment filters.

use regex::Regex;
use tracing::warn;

use services::settings::ResolvedSettings;

use crate::platform::{PlatformAttachment, PlatformMessage};

const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mov", ".webm", ".avi", ".mkv", ".flv", ".wmv"];

/// Content filter. Absent content is treated as the empty string, so a
/// pattern that matches "" passes and anything else fails.
pub fn matches_regex_filter(content: &str, pattern: Option<&str>) -> bool {
    let Some(pattern) = pattern else {
        return true;
    };
    match Regex::new(pattern) {
        Ok(regex) => regex.is_match(content),
        Err(err) => {
            warn!("Ignoring invalid match_regex '{}': {}", pattern, err);
            true
        }
    }
}

/// Video check: labeled attachments must carry an allowed MIME type;
/// unlabeled ones fall back to the filename extension (old messages often
/// have no content type).
pub fn is_video_attachment(attachment: &PlatformAttachment, allowed_mime_types: &[String]) -> bool {
    match attachment.content_type.as_deref() {
        Some(content_type) => allowed_mime_types.iter().any(|m| m == content_type),
        None => {
            let filename = attachment.filename.to_ascii_lowercase();
            VIDEO_EXTENSIONS.iter().any(|ext| filename.ends_with(ext))
        }
    }
}

pub fn filter_video_attachments<'a>(
    attachments: &'a [PlatformAttachment],
    allowed_mime_types: &[String],
) -> Vec<&'a PlatformAttachment> {
    attachments
        .iter()
        .filter(|a| is_video_attachment(a, allowed_mime_types))
        .collect()
}

/// Whether a message can contribute clips at all.
pub fn should_process_message(message: &PlatformMessage, settings: &ResolvedSettings) -> bool {
    if message.attachments.is_empty() {
        return false;
    }
    if !matches_regex_filter(&message.content, settings.match_regex()) {
        return false;
    }
    !filter_video_attachments(&message.attachments, &settings.allowed_mime_types()).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn attachment(content_type: Option<&str>, filename: &str) -> PlatformAttachment {
        PlatformAttachment {
            filename: filename.into(),
            size: 1024,
            content_type: content_type.map(str::to_string),
            url: "https://cdn.example.com/x".into(),
        }
    }

    fn allowed() -> Vec<String> {
        vec!["video/mp4".into(), "video/webm".into()]
    }

    #[test]
    fn labeled_attachments_must_match_the_allow_list() {
        assert!(is_video_attachment(&attachment(Some("video/mp4"), "a.mp4"), &allowed()));
        assert!(!is_video_attachment(&attachment(Some("image/png"), "a.png"), &allowed()));
        // A disallowed label is not rescued by the extension.
        assert!(!is_video_attachment(
            &attachment(Some("application/octet-stream"), "a.mp4"),
            &allowed()
        ));
    }

    #[test]
    fn unlabeled_attachments_fall_back_to_the_extension() {
        assert!(is_video_attachment(&attachment(None, "old_clip.MOV"), &allowed()));
        assert!(!is_video_attachment(&attachment(None, "readme.txt"), &allowed()));
    }

    #[test]
    fn regex_filter_handles_missing_pattern_and_content() {
        assert!(matches_regex_filter("anything", None));
        assert!(matches_regex_filter("the clip here", Some("clip")));
        assert!(!matches_regex_filter("no match", Some("clip")));
        // Empty content matches only patterns that match the empty string.
        assert!(matches_regex_filter("", Some(".*")));
        assert!(!matches_regex_filter("", Some("clip")));
    }

    #[test]
    fn message_processing_requires_a_video_attachment() {
        let settings = ResolvedSettings::from_layers(&[]);
        let message = PlatformMessage {
            id: "1".into(),
            author: crate::platform::PlatformUser {
                id: "2".into(),
                username: "user".into(),
                discriminator: None,
                display_name: "user".into(),
                avatar_url: None,
            },
            content: String::new(),
            timestamp: Utc::now(),
            attachments: vec![attachment(Some("image/png"), "a.png")],
        };
        assert!(!should_process_message(&message, &settings));

        let mut with_video = message.clone();
        with_video.attachments.push(attachment(Some("video/mp4"), "b.mp4"));
        assert!(should_process_message(&with_video, &settings));
    }
}
