//! Platform handlers: URL canonicalization, extraction options and the
//! mapping from raw extraction results onto records.
//!
//! The set of platforms is closed, so a handler is a plain enum and the
//! registry is a static domain table.

pub mod rumble;
pub mod youtube;

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::extraction::{ExtractionOptions, ExtractionResult, InfoDict};
use crate::models::{SourceFields, VideoFields, VideoStub};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Handler {
    #[serde(rename = "YoutubeHandler")]
    Youtube,
    #[serde(rename = "RumbleHandler")]
    Rumble,
}

const ALL_HANDLERS: [Handler; 2] = [Handler::Youtube, Handler::Rumble];

/// Listing limits shared by every handler's source options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLimits {
    pub recent_videos: u32,
    pub dateafter: String,
}

/// Picks the handler whose domain table contains the URL's host.
pub fn select(url: &str) -> Result<Handler> {
    let parsed = parse_url(url)?;
    let host = parsed.host_str().unwrap_or_default();
    ALL_HANDLERS
        .into_iter()
        .find(|handler| handler.domains().contains(&host))
        .ok_or_else(|| Error::HandlerNotFound(url.to_string()))
}

impl Handler {
    /// Name persisted in the `handler` column.
    pub fn name(self) -> &'static str {
        match self {
            Self::Youtube => "YoutubeHandler",
            Self::Rumble => "RumbleHandler",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        ALL_HANDLERS
            .into_iter()
            .find(|handler| handler.name() == name)
            .ok_or_else(|| Error::HandlerNotFound(name.to_string()))
    }

    pub fn domains(self) -> &'static [&'static str] {
        match self {
            Self::Youtube => youtube::DOMAINS,
            Self::Rumble => rumble::DOMAINS,
        }
    }

    /// Whether media is relayed through this service instead of redirected.
    pub fn use_proxy(self) -> bool {
        match self {
            Self::Youtube => youtube::USE_PROXY,
            Self::Rumble => rumble::USE_PROXY,
        }
    }

    pub fn sanitize_source_url(self, url: &str) -> Result<String> {
        match self {
            Self::Youtube | Self::Rumble => sanitize_url(url),
        }
    }

    pub fn sanitize_video_url(self, url: &str) -> Result<String> {
        match self {
            Self::Youtube => youtube::sanitize_video_url(url),
            Self::Rumble => rumble::sanitize_video_url(url),
        }
    }

    pub fn build_source_extraction_options(
        self,
        flatten: bool,
        limits: &ListingLimits,
    ) -> ExtractionOptions {
        let base = ExtractionOptions {
            extract_flat: flatten,
            playlist_reverse: true,
            playlist_end: Some(limits.recent_videos),
            dateafter: Some(limits.dateafter.clone()),
            ..ExtractionOptions::default()
        };
        match self {
            Self::Youtube => base,
            Self::Rumble => ExtractionOptions {
                allowed_extractors: rumble::allowed_extractors(),
                custom_extractors: rumble::custom_extractors(),
                ..base
            },
        }
    }

    pub fn build_video_extraction_options(self) -> ExtractionOptions {
        match self {
            Self::Youtube => ExtractionOptions::default(),
            Self::Rumble => ExtractionOptions {
                custom_extractors: rumble::custom_extractors(),
                ..ExtractionOptions::default()
            },
        }
    }

    pub fn map_source_result_to_fields(
        self,
        raw: &ExtractionResult,
        child_video_entries: Vec<VideoStub>,
    ) -> Result<SourceFields> {
        match self {
            Self::Youtube => youtube::map_source_result_to_fields(raw, child_video_entries),
            Self::Rumble => rumble::map_source_result_to_fields(raw, child_video_entries),
        }
    }

    pub fn map_source_entry_to_video_stub(
        self,
        source_id: &str,
        raw_entry: &InfoDict,
    ) -> Result<VideoStub> {
        match self {
            Self::Youtube => youtube::map_source_entry_to_video_stub(source_id, raw_entry),
            Self::Rumble => rumble::map_source_entry_to_video_stub(source_id, raw_entry),
        }
    }

    pub fn map_video_result_to_fields(self, raw: &InfoDict) -> Result<VideoFields> {
        match self {
            Self::Youtube => youtube::map_video_result_to_fields(raw),
            Self::Rumble => rumble::map_video_result_to_fields(raw),
        }
    }
}

fn parse_url(url: &str) -> Result<Url> {
    let parsed =
        Url::parse(url.trim()).map_err(|err| Error::invalid(format!("Invalid URL '{url}': {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(Error::invalid(format!("Invalid URL '{url}'")));
    }
    Ok(parsed)
}

/// Canonical text form of a URL (lowercased scheme and host, normalized path).
pub fn sanitize_url(url: &str) -> Result<String> {
    Ok(parse_url(url)?.to_string())
}

pub(crate) fn required(value: Option<String>, field: &str, url: &str) -> Result<String> {
    value.ok_or_else(|| Error::invalid(format!("'{field}' missing from extraction of {url}")))
}

/// Entry URL as listed: the page URL when present, else the bare `url`.
pub(crate) fn entry_url<'a>(entry: &'a InfoDict) -> Result<&'a str> {
    entry
        .webpage_url
        .as_deref()
        .or(entry.url.as_deref())
        .ok_or_else(|| Error::invalid("listing entry has no url"))
}

/// Parses yt-dlp's `YYYYMMDD` upload date as midnight UTC.
pub(crate) fn parse_upload_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub(crate) fn parse_unix_timestamp(seconds: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds.trunc() as i64, 0)
}

pub(crate) fn whole_seconds(duration: Option<f64>) -> Option<i64> {
    duration.map(|seconds| seconds.round() as i64)
}

/// Resolved media location and its size in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Rendition {
    pub url: String,
    pub size: i64,
}

/// The format the tool selected (`format_id`), else the tallest muxed format
/// with a URL, else the top-level URL.
pub(crate) fn select_rendition(info: &InfoDict) -> Option<Rendition> {
    let selected = info.format_id.as_deref().and_then(|format_id| {
        info.formats
            .iter()
            .find(|format| format.format_id.as_deref() == Some(format_id) && format.url.is_some())
    });
    let chosen = selected.or_else(|| {
        info.formats
            .iter()
            .filter(|format| format.url.is_some() && format.has_audio_and_video())
            .max_by(|a, b| a.height.unwrap_or(0.0).total_cmp(&b.height.unwrap_or(0.0)))
    });
    if let Some(format) = chosen
        && let Some(url) = &format.url
    {
        return Some(Rendition {
            url: url.clone(),
            size: format.size(),
        });
    }
    info.url.clone().map(|url| Rendition {
        url,
        size: info
            .filesize
            .or(info.filesize_approx)
            .map(|size| size.round() as i64)
            .unwrap_or(0),
    })
}

/// Shared shape of a single-video mapping once the platform-specific fields
/// have been picked.
pub(crate) fn video_fields(
    info: &InfoDict,
    uploader_id: Option<String>,
    description: Option<String>,
    released_at: Option<DateTime<Utc>>,
) -> Result<VideoFields> {
    let page = info
        .webpage_url
        .as_deref()
        .or(info.original_url.as_deref())
        .unwrap_or("video");
    let rendition = select_rendition(info)
        .ok_or_else(|| Error::invalid(format!("no playable media url in extraction of {page}")))?;
    Ok(VideoFields {
        title: info.title.clone(),
        uploader: info.uploader.clone(),
        uploader_id,
        description,
        duration: whole_seconds(info.duration),
        media_url: Some(rendition.url),
        media_filesize: Some(rendition.size),
        thumbnail: info.thumbnail.clone(),
        released_at,
    })
}
