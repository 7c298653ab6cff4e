use crate::error::Result;
use crate::extraction::{ExtractionResult, InfoDict};
use crate::models::{OrderedBy, SourceFields, VideoFields, VideoStub};

use super::{entry_url, parse_unix_timestamp, parse_url, required, video_fields};

pub const DOMAINS: &[&str] = &["rumble.com", "www.rumble.com"];
pub const USE_PROXY: bool = false;

/// Plugin extractors that must be loaded for Rumble channels and embeds.
const CUSTOM_EXTRACTORS: &[&str] = &["CustomRumbleChannel", "CustomRumbleEmbed"];
const ALLOWED_EXTRACTORS: &[&str] = &["CustomRumbleEmbed", "CustomRumbleChannel"];

pub(super) fn custom_extractors() -> Vec<String> {
    CUSTOM_EXTRACTORS.iter().map(|name| name.to_string()).collect()
}

pub(super) fn allowed_extractors() -> Vec<String> {
    ALLOWED_EXTRACTORS.iter().map(|name| name.to_string()).collect()
}

/// Rumble video pages are addressed by path; query and fragment are noise.
pub fn sanitize_video_url(url: &str) -> Result<String> {
    let mut parsed = parse_url(url)?;
    parsed.set_query(None);
    parsed.set_fragment(None);
    Ok(parsed.to_string())
}

pub fn map_source_result_to_fields(
    raw: &ExtractionResult,
    videos: Vec<VideoStub>,
) -> Result<SourceFields> {
    let info = &raw.info;
    Ok(SourceFields {
        url: raw.url.clone(),
        name: required(info.title.clone(), "title", &raw.url)?,
        author: info.uploader.clone(),
        logo: info.thumbnail.clone(),
        description: None,
        ordered_by: OrderedBy::Release,
        extractor: info.extractor_key.clone(),
        videos,
    })
}

/// Flat Rumble listings carry nothing but the URL.
pub fn map_source_entry_to_video_stub(source_id: &str, entry: &InfoDict) -> Result<VideoStub> {
    Ok(VideoStub {
        source_id: source_id.to_string(),
        url: sanitize_video_url(entry_url(entry)?)?,
        title: None,
        description: None,
        released_at: None,
    })
}

pub fn map_video_result_to_fields(info: &InfoDict) -> Result<VideoFields> {
    let released_at = info.timestamp.and_then(parse_unix_timestamp);
    video_fields(info, info.uploader.clone(), None, released_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::extraction::{ExtractionOptions, FormatInfo};
    use chrono::{TimeZone, Utc};

    #[test]
    fn sanitize_strips_query_and_fragment() {
        assert_eq!(
            sanitize_video_url("https://rumble.com/v4abc-episode-1.html?mref=x&mc=3#t=10").unwrap(),
            "https://rumble.com/v4abc-episode-1.html"
        );
        assert!(matches!(
            sanitize_video_url("rumble.com/v4abc"),
            Err(Error::InvalidRecord(_))
        ));
    }

    #[test]
    fn maps_source_without_description() {
        let raw = ExtractionResult {
            url: "https://rumble.com/c/Alice".into(),
            options: ExtractionOptions::default(),
            info: InfoDict {
                title: Some("Alice".into()),
                uploader: Some("Alice".into()),
                thumbnail: Some("https://sp.rmbl.ws/logo.jpg".into()),
                description: Some("ignored".into()),
                extractor_key: Some("CustomRumbleChannel".into()),
                ..InfoDict::default()
            },
        };
        let fields = map_source_result_to_fields(&raw, Vec::new()).unwrap();
        assert_eq!(fields.logo.as_deref(), Some("https://sp.rmbl.ws/logo.jpg"));
        assert_eq!(fields.description, None);
        assert_eq!(fields.extractor.as_deref(), Some("CustomRumbleChannel"));
    }

    #[test]
    fn stub_has_only_url() {
        let entry = InfoDict {
            url: Some("https://rumble.com/v4abc-episode-1.html?e9s=src".into()),
            title: Some("ignored".into()),
            ..InfoDict::default()
        };
        let stub = map_source_entry_to_video_stub("src", &entry).unwrap();
        assert_eq!(stub.url, "https://rumble.com/v4abc-episode-1.html");
        assert_eq!(stub.title, None);
        assert_eq!(stub.released_at, None);
    }

    #[test]
    fn maps_full_video_from_timestamp() {
        let info = InfoDict {
            title: Some("Episode 1".into()),
            uploader: Some("Alice".into()),
            duration: Some(59.9),
            timestamp: Some(1_704_067_200.0),
            original_url: Some("https://rumble.com/v4abc-episode-1.html".into()),
            format_id: Some("mp4-720p".into()),
            formats: vec![FormatInfo {
                format_id: Some("mp4-720p".into()),
                url: Some("https://hugh.cdn.rumble.cloud/video/abc.mp4".into()),
                filesize: Some(1000.0),
                ..FormatInfo::default()
            }],
            ..InfoDict::default()
        };
        let fields = map_video_result_to_fields(&info).unwrap();
        assert_eq!(fields.uploader_id.as_deref(), Some("Alice"));
        assert_eq!(fields.description, None);
        assert_eq!(fields.duration, Some(60));
        assert_eq!(fields.media_filesize, Some(1000));
        assert_eq!(
            fields.released_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }
}
