//! Persisted records and the factories that stamp identities onto them.
//!
//! `id` fields are always derived from the canonical URL (or username) via
//! [`derive_id`]; the partial update types deliberately have no way to touch
//! them.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::handlers::Handler;
use crate::identity::derive_id;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: &str, email: Option<String>) -> Self {
        Self {
            id: derive_id(username),
            username: username.to_string(),
            email,
            added_at: now(),
        }
    }
}

/// How a source wants its items ordered in the feed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderedBy {
    #[default]
    Release,
    Added,
}

impl OrderedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::Added => "added",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "release" => Some(Self::Release),
            "added" => Some(Self::Added),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: String,
    pub url: String,
    pub name: String,
    pub author: Option<String>,
    pub logo: Option<String>,
    pub description: Option<String>,
    pub ordered_by: OrderedBy,
    pub feed_url: String,
    pub extractor: Option<String>,
    pub handler: Handler,
    pub created_by: String,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Video {
    pub id: String,
    pub source_id: String,
    pub handler: Handler,
    pub uploader: Option<String>,
    pub uploader_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Seconds.
    pub duration: Option<i64>,
    pub thumbnail: Option<String>,
    pub url: String,
    /// Ephemeral upstream media location; `None` until the first detail fetch.
    pub media_url: Option<String>,
    /// Stable public address served in the feed.
    pub feed_media_url: String,
    pub media_filesize: Option<i64>,
    pub released_at: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A source together with its persisted videos, as returned by a fetch.
#[derive(Debug, Clone, Serialize)]
pub struct SourceWithVideos {
    #[serde(flatten)]
    pub source: Source,
    pub videos: Vec<Video>,
}

/// Source-level fields produced by a handler from a listing result.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFields {
    pub url: String,
    pub name: String,
    pub author: Option<String>,
    pub logo: Option<String>,
    pub description: Option<String>,
    pub ordered_by: OrderedBy,
    pub extractor: Option<String>,
    pub videos: Vec<VideoStub>,
}

/// Minimal video record discovered in a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStub {
    pub source_id: String,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub released_at: Option<DateTime<Utc>>,
}

/// Video detail produced by a handler from a single-video extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFields {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub uploader_id: Option<String>,
    pub description: Option<String>,
    pub duration: Option<i64>,
    pub media_url: Option<String>,
    pub media_filesize: Option<i64>,
    pub thumbnail: Option<String>,
    pub released_at: Option<DateTime<Utc>>,
}

/// Partial source update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceUpdate {
    pub name: Option<String>,
    pub author: Option<String>,
    pub logo: Option<String>,
    pub description: Option<String>,
    pub ordered_by: Option<OrderedBy>,
    pub extractor: Option<String>,
}

/// A listing refresh never touches `ordered_by`; that is the owner's choice.
impl From<&SourceFields> for SourceUpdate {
    fn from(fields: &SourceFields) -> Self {
        Self {
            name: Some(fields.name.clone()),
            author: fields.author.clone(),
            logo: fields.logo.clone(),
            description: fields.description.clone(),
            ordered_by: None,
            extractor: fields.extractor.clone(),
        }
    }
}

/// Partial video update; `None` keeps the stored value. Identity fields
/// (`id`, `source_id`, `url`, `feed_media_url`) are not representable here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoUpdate {
    pub uploader: Option<String>,
    pub uploader_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub duration: Option<i64>,
    pub thumbnail: Option<String>,
    pub media_url: Option<String>,
    pub media_filesize: Option<i64>,
    pub released_at: Option<DateTime<Utc>>,
}

impl From<VideoFields> for VideoUpdate {
    fn from(fields: VideoFields) -> Self {
        Self {
            uploader: fields.uploader,
            uploader_id: fields.uploader_id,
            title: fields.title,
            description: fields.description,
            duration: fields.duration,
            thumbnail: fields.thumbnail,
            media_url: fields.media_url,
            media_filesize: fields.media_filesize,
            released_at: fields.released_at,
        }
    }
}

/// Current time at the precision the store keeps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn feed_url(base_url: &str, source_id: &str) -> String {
    format!("{}/feed/{source_id}", base_url.trim_end_matches('/'))
}

pub fn feed_media_url(base_url: &str, video_id: &str) -> String {
    format!("{}/media/{video_id}", base_url.trim_end_matches('/'))
}

/// Builds a new source record; `url` must already be sanitized.
pub fn new_source(handler: Handler, fields: &SourceFields, owner_id: &str, base_url: &str) -> Source {
    let id = derive_id(&fields.url);
    let now = now();
    Source {
        feed_url: feed_url(base_url, &id),
        id,
        url: fields.url.clone(),
        name: fields.name.clone(),
        author: fields.author.clone(),
        logo: fields.logo.clone(),
        description: fields.description.clone(),
        ordered_by: fields.ordered_by,
        extractor: fields.extractor.clone(),
        handler,
        created_by: owner_id.to_string(),
        added_at: now,
        updated_at: now,
    }
}

/// Builds a stub video with no resolved media yet; `stub.url` must already be
/// sanitized.
pub fn new_video_stub(handler: Handler, stub: &VideoStub, base_url: &str) -> Video {
    let id = derive_id(&stub.url);
    let now = now();
    Video {
        feed_media_url: feed_media_url(base_url, &id),
        id,
        source_id: stub.source_id.clone(),
        handler,
        uploader: None,
        uploader_id: None,
        title: stub.title.clone(),
        description: stub.description.clone(),
        duration: None,
        thumbnail: None,
        url: stub.url.clone(),
        media_url: None,
        media_filesize: None,
        released_at: stub.released_at,
        added_at: now,
        updated_at: now,
    }
}
