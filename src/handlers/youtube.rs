use crate::error::{Error, Result};
use crate::extraction::{ExtractionResult, InfoDict};
use crate::models::{OrderedBy, SourceFields, VideoFields, VideoStub};

use super::{entry_url, parse_unix_timestamp, parse_upload_date, parse_url, required, video_fields};

pub const DOMAINS: &[&str] = &["youtube.com", "www.youtube.com", "m.youtube.com", "youtu.be"];
pub const USE_PROXY: bool = true;

const WATCH_URL: &str = "https://www.youtube.com/watch";

/// Forces every video URL into `https://www.youtube.com/watch?v={id}`.
pub fn sanitize_video_url(url: &str) -> Result<String> {
    let parsed = parse_url(url)?;
    let video_id = if parsed.host_str() == Some("youtu.be") {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next())
            .map(str::to_string)
    } else if let Some(rest) = parsed.path().strip_prefix("/shorts/") {
        rest.split('/').next().map(str::to_string)
    } else if parsed.path() == "/watch" {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
    } else {
        None
    };
    let video_id = video_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::invalid(format!("Invalid YouTube video URL '{url}'")))?;
    Ok(format!("{WATCH_URL}?v={video_id}"))
}

pub fn map_source_result_to_fields(
    raw: &ExtractionResult,
    videos: Vec<VideoStub>,
) -> Result<SourceFields> {
    let info = &raw.info;
    // Channel tabs list avatar sizes smallest first; the third is a usable logo.
    let logo = info
        .thumbnails
        .get(2)
        .or(info.thumbnails.last())
        .and_then(|thumbnail| thumbnail.url.clone());
    Ok(SourceFields {
        url: raw.url.clone(),
        name: required(info.title.clone(), "title", &raw.url)?,
        author: info.uploader.clone().or_else(|| info.channel.clone()),
        logo,
        description: info.description.clone(),
        ordered_by: OrderedBy::Release,
        extractor: info.extractor_key.clone(),
        videos,
    })
}

pub fn map_source_entry_to_video_stub(source_id: &str, entry: &InfoDict) -> Result<VideoStub> {
    Ok(VideoStub {
        source_id: source_id.to_string(),
        url: sanitize_video_url(entry_url(entry)?)?,
        title: entry.title.clone(),
        description: entry.description.clone(),
        released_at: entry.upload_date.as_deref().and_then(parse_upload_date),
    })
}

pub fn map_video_result_to_fields(info: &InfoDict) -> Result<VideoFields> {
    let released_at = info
        .upload_date
        .as_deref()
        .and_then(parse_upload_date)
        .or_else(|| {
            info.release_timestamp
                .or(info.timestamp)
                .and_then(parse_unix_timestamp)
        });
    video_fields(
        info,
        info.uploader_id.clone(),
        info.description.clone(),
        released_at,
    )
}
