//! Shared fixtures: an in-memory extractor with canned results and a
//! reconciler wired to a temporary data directory.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::extraction::{ExtractionGateway, ExtractionOptions, Extractor, FormatInfo, InfoDict};
use crate::feed::FeedStore;
use crate::handlers::ListingLimits;
use crate::models::User;
use crate::reconcile::{ReconcileSettings, Reconciler};
use crate::store::Store;

pub const BASE_URL: &str = "http://feeds.test";

/// Answers from a URL-keyed table; unknown URLs fail like a dead video.
#[derive(Default)]
pub struct FakeExtractor {
    responses: Mutex<HashMap<String, InfoDict>>,
    calls: Mutex<Vec<(String, ExtractionOptions)>>,
    in_flight: Mutex<HashMap<String, usize>>,
    peaks: Mutex<HashMap<String, usize>>,
}

impl FakeExtractor {
    pub fn set(&self, url: &str, info: InfoDict) {
        self.responses.lock().insert(url.to_string(), info);
    }

    pub fn remove(&self, url: &str) {
        self.responses.lock().remove(url);
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|(called, _)| called == url).count()
    }

    pub fn last_options(&self, url: &str) -> Option<ExtractionOptions> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|(called, _)| called == url)
            .map(|(_, options)| options.clone())
    }

    /// Highest number of simultaneous extractions seen for `url`.
    pub fn max_concurrent(&self, url: &str) -> usize {
        self.peaks.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, url: &str, options: &ExtractionOptions) -> Result<InfoDict> {
        self.calls.lock().push((url.to_string(), options.clone()));
        {
            let mut in_flight = self.in_flight.lock();
            let current = in_flight.entry(url.to_string()).or_default();
            *current += 1;
            let mut peaks = self.peaks.lock();
            let peak = peaks.entry(url.to_string()).or_default();
            *peak = (*peak).max(*current);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        if let Some(current) = self.in_flight.lock().get_mut(url) {
            *current -= 1;
        }

        self.responses
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::extraction(url, options, "ERROR: Video unavailable"))
    }
}

pub fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={id}")
}

/// Flat channel listing with one entry per YouTube video id.
pub fn channel_listing(name: &str, ids: &[&str]) -> InfoDict {
    InfoDict {
        kind: Some("playlist".into()),
        title: Some(name.to_string()),
        uploader: Some(name.to_string()),
        description: Some(format!("Videos by {name}")),
        extractor_key: Some("YoutubeTab".into()),
        entries: ids
            .iter()
            .map(|id| InfoDict {
                url: Some(watch_url(id)),
                title: Some(format!("Video {id}")),
                ..InfoDict::default()
            })
            .collect(),
        ..InfoDict::default()
    }
}

/// Fully resolved YouTube video released on 2024-01-`day`; `revision` changes
/// the media URL the way an expiring signature would.
pub fn youtube_video_info(id: &str, day: u32, revision: &str) -> InfoDict {
    InfoDict {
        id: Some(id.to_string()),
        title: Some(format!("Video {id}")),
        description: Some(format!("Notes for {id}")),
        uploader: Some("Alice".into()),
        uploader_id: Some("@alice".into()),
        thumbnail: Some(format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg")),
        webpage_url: Some(watch_url(id)),
        upload_date: Some(format!("202401{day:02}")),
        duration: Some(300.0),
        format_id: Some("18".into()),
        formats: vec![FormatInfo {
            format_id: Some("18".into()),
            url: Some(format!(
                "https://rr1.googlevideo.com/videoplayback?id={id}&sig={revision}"
            )),
            ext: Some("mp4".into()),
            height: Some(360.0),
            vcodec: Some("avc1".into()),
            acodec: Some("mp4a".into()),
            filesize: Some(1_000_000.0),
            ..FormatInfo::default()
        }],
        ..InfoDict::default()
    }
}

pub fn rumble_video_info(timestamp: f64) -> InfoDict {
    InfoDict {
        title: Some("Episode".into()),
        uploader: Some("Bob".into()),
        timestamp: Some(timestamp),
        duration: Some(120.0),
        format_id: Some("mp4-480p".into()),
        formats: vec![FormatInfo {
            format_id: Some("mp4-480p".into()),
            url: Some("https://hugh.cdn.rumble.cloud/video/episode.mp4".into()),
            filesize: Some(2_000.0),
            ..FormatInfo::default()
        }],
        ..InfoDict::default()
    }
}

pub fn test_settings(prune_orphaned_videos: bool) -> ReconcileSettings {
    ReconcileSettings {
        base_url: BASE_URL.to_string(),
        listing: ListingLimits {
            recent_videos: 20,
            dateafter: "now-2month".into(),
        },
        max_video_age: chrono::Duration::hours(8),
        prune_orphaned_videos,
    }
}

pub struct TestContext {
    pub dir: TempDir,
    pub fake: Arc<FakeExtractor>,
    pub reconciler: Reconciler,
    pub owner: User,
}

impl TestContext {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("database.sqlite3"))
            .await
            .expect("open store");
        let owner = store.ensure_user("admin").await.expect("admin user");
        let fake = Arc::new(FakeExtractor::default());
        let reconciler = Reconciler::new(
            store,
            gateway(&fake),
            FeedStore::new(dir.path().join("feeds")),
            test_settings(false),
        );
        Self {
            dir,
            fake,
            reconciler,
            owner,
        }
    }

    /// A second reconciler over the same store and feeds that prunes orphans.
    pub async fn with_pruning(ctx: &TestContext) -> Reconciler {
        Reconciler::new(
            ctx.reconciler.store().clone(),
            gateway(&ctx.fake),
            ctx.reconciler.feeds().clone(),
            test_settings(true),
        )
    }
}

fn gateway(fake: &Arc<FakeExtractor>) -> ExtractionGateway {
    ExtractionGateway::new(fake.clone(), Duration::from_secs(5))
}
