//! Materializes one RSS 2.0 podcast file per source.
//!
//! Files live at `{feeds_dir}/{source_id}.rss` and are always replaced
//! atomically, so readers see either the previous or the new document.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use mime_guess::MimeGuess;
use reqwest::Url;
use rss::{
    Channel, ChannelBuilder, EnclosureBuilder, GuidBuilder, Item, ItemBuilder,
    extension::{
        atom::{AtomExtension, AtomExtensionBuilder, Link},
        dublincore::DublinCoreExtensionBuilder,
        itunes::{ITunesChannelExtensionBuilder, ITunesItemExtensionBuilder},
    },
};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{OrderedBy, Source, Video};

const DEFAULT_MEDIA_TYPE: &str = "video/mp4";
const FEED_MEDIA_TYPE: &str = "application/rss+xml";

#[derive(Debug, Clone)]
pub struct FeedStore {
    dir: PathBuf,
}

impl FeedStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, source_id: &str) -> PathBuf {
        self.dir.join(format!("{source_id}.rss"))
    }

    /// Renders the feed and swaps it into place. Returns the file path.
    pub async fn build(&self, source: &Source, videos: &[Video]) -> Result<PathBuf> {
        let mut document = Vec::new();
        render(source, videos).write_to(&mut document)?;

        let dir = self.dir.clone();
        let path = self.path_for(&source.id);
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&dir, &target, &document))
            .await
            .map_err(|err| Error::Io(std::io::Error::other(err)))??;
        info!(source_id = %source.id, items = videos.len(), "feed written");
        Ok(path)
    }

    pub async fn get(&self, source_id: &str) -> Result<PathBuf> {
        let path = self.path_for(source_id);
        if tokio::fs::try_exists(&path).await? {
            Ok(path)
        } else {
            Err(Error::not_found(format!(
                "RSS file ({source_id}.rss) does not exist for (source_id='{source_id}')"
            )))
        }
    }

    /// Removes the feed file; a missing file is not an error.
    pub async fn delete(&self, source_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(source_id)).await {
            Ok(()) => {
                debug!(source_id, "feed removed");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn write_atomically(dir: &Path, target: &Path, contents: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|err| Error::Io(err.error))?;
    Ok(())
}

/// Builds the channel document. Items are newest first; with release ordering,
/// videos with no known release date go last. The channel points back at its
/// own `feed_url` and carries the source id as `dc:identifier`.
pub fn render(source: &Source, videos: &[Video]) -> Channel {
    let mut ordered: Vec<&Video> = videos.iter().collect();
    match source.ordered_by {
        OrderedBy::Release => ordered.sort_by(|a, b| match (a.released_at, b.released_at) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.added_at.cmp(&a.added_at),
        }),
        OrderedBy::Added => ordered.sort_by(|a, b| b.added_at.cmp(&a.added_at)),
    }

    let description = source
        .description
        .clone()
        .unwrap_or_else(|| source.name.clone());
    let itunes = ITunesChannelExtensionBuilder::default()
        .author(source.author.clone())
        .image(source.logo.clone())
        .subtitle(Some(source.name.clone()))
        .summary(source.description.clone())
        .build();

    ChannelBuilder::default()
        .title(source.name.clone())
        .link(source.url.clone())
        .description(description)
        .generator(Some(format!("feedtube {}", env!("CARGO_PKG_VERSION"))))
        .last_build_date(Some(source.updated_at.to_rfc2822()))
        .itunes_ext(Some(itunes))
        .atom_ext(Some(self_link(&source.feed_url)))
        .dublin_core_ext(Some(
            DublinCoreExtensionBuilder::default()
                .identifiers(vec![source.id.clone()])
                .build(),
        ))
        .items(ordered.into_iter().map(render_item).collect::<Vec<_>>())
        .build()
}

fn self_link(feed_url: &str) -> AtomExtension {
    let mut link = Link::default();
    link.set_href(feed_url);
    link.set_rel("self");
    link.set_mime_type(Some(FEED_MEDIA_TYPE.to_string()));
    AtomExtensionBuilder::default().links(vec![link]).build()
}

fn render_item(video: &Video) -> Item {
    let title = video.title.clone().unwrap_or_else(|| video.url.clone());
    let enclosure = EnclosureBuilder::default()
        .url(video.feed_media_url.clone())
        .length(video.media_filesize.unwrap_or(0).to_string())
        .mime_type(media_type(video))
        .build();
    let guid = GuidBuilder::default()
        .value(video.url.clone())
        .permalink(true)
        .build();
    let itunes = ITunesItemExtensionBuilder::default()
        .author(video.uploader.clone())
        .image(video.thumbnail.clone())
        .duration(video.duration.map(format_duration))
        .subtitle(Some(title.clone()))
        .summary(video.description.clone())
        .build();

    ItemBuilder::default()
        .title(Some(title))
        .link(Some(video.url.clone()))
        .description(video.description.clone())
        .author(video.uploader.clone())
        .guid(Some(guid))
        .pub_date(video.released_at.map(|at| at.to_rfc2822()))
        .enclosure(Some(enclosure))
        .itunes_ext(Some(itunes))
        .build()
}

/// Guessed from the upstream media path; platforms mostly serve mp4.
fn media_type(video: &Video) -> String {
    video
        .media_url
        .as_deref()
        .and_then(|url| Url::parse(url).ok())
        .and_then(|url| MimeGuess::from_path(url.path()).first())
        .filter(|mime| matches!(mime.type_().as_str(), "video" | "audio"))
        .map(|mime| mime.to_string())
        .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_string())
}

/// `HH:MM:SS` as expected by podcast clients.
fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
