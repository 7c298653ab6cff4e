//! Reconciliation of extracted metadata into the store.
//!
//! A source fetch lists the channel, inserts videos it has not seen before,
//! optionally prunes videos that fell out of the listing, refreshes stale
//! video detail and rebuilds the feed. Fetches of the same source are
//! serialized; different sources proceed in parallel.

use std::{collections::HashMap, collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::extraction::ExtractionGateway;
use crate::feed::FeedStore;
use crate::handlers::{self, Handler, ListingLimits};
use crate::identity::derive_id;
use crate::models::{
    Source, SourceFields, SourceUpdate, SourceWithVideos, Video, VideoStub, VideoUpdate,
    new_source, new_video_stub,
};
use crate::scheduler;
use crate::store::Store;

/// Knobs the reconciler needs from [`Settings`].
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub base_url: String,
    pub listing: ListingLimits,
    pub max_video_age: chrono::Duration,
    pub prune_orphaned_videos: bool,
}

impl From<&Settings> for ReconcileSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            listing: ListingLimits {
                recent_videos: settings.build_feed_recent_videos,
                dateafter: settings.build_feed_dateafter.clone(),
            },
            max_video_age: settings.max_video_age(),
            prune_orphaned_videos: settings.prune_orphaned_videos,
        }
    }
}

/// One mutex per source id.
#[derive(Default)]
struct SourceLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SourceLocks {
    fn lock_for(&self, source_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .lock()
            .entry(source_id.to_string())
            .or_default()
            .clone()
    }

    fn forget(&self, source_id: &str) {
        self.inner.lock().remove(source_id);
    }
}

/// Outcome of a fetch across every source.
#[derive(Debug, Default, Serialize)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<FailedSource>,
}

#[derive(Debug, Serialize)]
pub struct FailedSource {
    pub source_id: String,
    pub reason: String,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Store,
    gateway: ExtractionGateway,
    feeds: FeedStore,
    settings: Arc<ReconcileSettings>,
    locks: Arc<SourceLocks>,
}

impl Reconciler {
    pub fn new(
        store: Store,
        gateway: ExtractionGateway,
        feeds: FeedStore,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            feeds,
            settings: Arc::new(settings),
            locks: Arc::default(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn feeds(&self) -> &FeedStore {
        &self.feeds
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Lists `url`, stores the source and its stub videos, then runs a full
    /// fetch so the feed exists when this returns.
    pub async fn create_source(&self, url: &str, owner_id: &str) -> Result<SourceWithVideos> {
        let handler = handlers::select(url)?;
        let url = handler.sanitize_source_url(url)?;
        let source_id = derive_id(&url);
        if self.store.get_source_or_none(&source_id).await?.is_some() {
            return Err(Error::AlreadyExists("Source already exists".into()));
        }

        let fields = self.list_source(handler, &source_id, &url).await?;
        let source = new_source(handler, &fields, owner_id, &self.settings.base_url);
        let source = self.store.create_source(&source).await?;
        let inserted = self.add_new_videos(&source, &fields.videos).await?;
        info!(source_id = %source.id, url = %source.url, inserted, "source created");

        self.fetch_source(&source.id).await
    }

    /// Re-lists a source, merges new videos, refreshes stale ones and rebuilds
    /// its feed.
    pub async fn fetch_source(&self, source_id: &str) -> Result<SourceWithVideos> {
        let (_guard, source) = self.lock_existing(source_id).await?;
        let fields = self
            .list_source(source.handler, &source.id, &source.url)
            .await?;
        self.store
            .update_source(&source.id, &SourceUpdate::from(&fields))
            .await?;

        let inserted = self.add_new_videos(&source, &fields.videos).await?;
        let pruned = if self.settings.prune_orphaned_videos {
            self.delete_orphaned_videos(&source.id, &fields.videos).await?
        } else {
            0
        };

        let videos = self.store.list_videos_for_source(&source.id).await?;
        let refreshed =
            scheduler::refresh_videos(self, &videos, self.settings.max_video_age).await;
        info!(
            source_id = %source.id,
            listed = fields.videos.len(),
            inserted,
            pruned,
            refreshed = refreshed.len(),
            "source fetched"
        );

        let source = self.store.get_source(&source.id).await?;
        self.write_feed(source).await
    }

    /// Fetches every source; one failing source never stops the others.
    pub async fn fetch_all_sources(&self) -> Result<RefreshReport> {
        let mut report = RefreshReport::default();
        for source in self.store.list_sources().await? {
            match self.fetch_source(&source.id).await {
                Ok(_) => report.refreshed.push(source.id),
                Err(err) => {
                    warn!(source_id = %source.id, error = %err, "source fetch failed");
                    report.failed.push(FailedSource {
                        source_id: source.id,
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Re-extracts one video and stores its resolved detail.
    pub async fn fetch_video(&self, video_id: &str) -> Result<Video> {
        let video = self.store.get_video(video_id).await?;
        let options = video.handler.build_video_extraction_options();
        let result = self.gateway.extract(&video.url, &options).await?;
        let fields = video.handler.map_video_result_to_fields(&result.info)?;
        self.store
            .update_video(&video.id, &VideoUpdate::from(fields))
            .await
    }

    /// Deletes the source, its videos and its feed file.
    pub async fn delete_source(&self, source_id: &str) -> Result<()> {
        let (guard, _) = self.lock_existing(source_id).await?;
        self.store.delete_source(source_id).await?;
        self.feeds.delete(source_id).await?;
        drop(guard);
        self.locks.forget(source_id);
        info!(source_id, "source deleted");
        Ok(())
    }

    /// Inserts the listed videos that are not stored yet. Existing videos are
    /// left untouched, so resolved detail is never clobbered by a flat listing.
    pub async fn add_new_videos(&self, source: &Source, listed: &[VideoStub]) -> Result<usize> {
        let mut inserted = 0;
        for stub in listed {
            let video = new_video_stub(source.handler, stub, &self.settings.base_url);
            if self.store.insert_video_if_absent(&video).await? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Deletes stored videos of `source_id` missing from the listing.
    pub async fn delete_orphaned_videos(
        &self,
        source_id: &str,
        listed: &[VideoStub],
    ) -> Result<usize> {
        let keep: HashSet<String> = listed.iter().map(|stub| derive_id(&stub.url)).collect();
        let mut deleted = 0;
        for video in self.store.list_videos_for_source(source_id).await? {
            if !keep.contains(&video.id) {
                self.store.delete_video(&video.id).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Re-renders the feed of a source from the store. Waits for any fetch or
    /// delete of the same source, so a deleted source never gets its file back.
    pub async fn rebuild_feed(&self, source_id: &str) -> Result<SourceWithVideos> {
        let (_guard, source) = self.lock_existing(source_id).await?;
        self.write_feed(source).await
    }

    /// Takes the source's lock and loads it. An unknown id leaves no lock
    /// entry behind.
    async fn lock_existing(&self, source_id: &str) -> Result<(OwnedMutexGuard<()>, Source)> {
        let guard = self.locks.lock_for(source_id).lock_owned().await;
        match self.store.get_source(source_id).await {
            Ok(source) => Ok((guard, source)),
            Err(err) => {
                drop(guard);
                if err.is_not_found() {
                    self.locks.forget(source_id);
                }
                Err(err)
            }
        }
    }

    /// Caller holds the source's lock.
    async fn write_feed(&self, source: Source) -> Result<SourceWithVideos> {
        let videos = self.store.list_videos_for_source(&source.id).await?;
        self.feeds.build(&source, &videos).await?;
        Ok(SourceWithVideos { source, videos })
    }

    async fn list_source(
        &self,
        handler: Handler,
        source_id: &str,
        url: &str,
    ) -> Result<SourceFields> {
        let options = handler.build_source_extraction_options(true, &self.settings.listing);
        let result = self.gateway.extract(url, &options).await?;
        let mut stubs = Vec::new();
        for entry in result.info.video_entries() {
            match handler.map_source_entry_to_video_stub(source_id, entry) {
                Ok(stub) => stubs.push(stub),
                Err(err) => warn!(source_id, error = %err, "skipping listing entry"),
            }
        }
        handler.map_source_result_to_fields(&result, stubs)
    }
}
