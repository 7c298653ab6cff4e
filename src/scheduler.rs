//! Staleness-driven refresh of video detail, plus the two periodic loops that
//! keep listings and videos current.

use std::{collections::BTreeSet, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::models::Video;
use crate::reconcile::Reconciler;

const MIN_LOOP_PERIOD: Duration = Duration::from_secs(1);

fn needs_refresh(video: &Video, cutoff: DateTime<Utc>) -> bool {
    video.updated_at < cutoff || video.released_at.is_none() || video.media_url.is_none()
}

/// Videos due for re-extraction, stalest `updated_at` first.
pub fn select_for_refresh<'a>(
    videos: &'a [Video],
    max_age: chrono::Duration,
    now: DateTime<Utc>,
) -> Vec<&'a Video> {
    let cutoff = now
        .checked_sub_signed(max_age)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let mut due: Vec<&Video> = videos
        .iter()
        .filter(|video| needs_refresh(video, cutoff))
        .collect();
    due.sort_by_key(|video| video.updated_at);
    due
}

/// Re-extracts the due subset of `videos`. A failing video is logged and
/// skipped. Returns the ids that were refreshed.
pub async fn refresh_videos(
    reconciler: &Reconciler,
    videos: &[Video],
    max_age: chrono::Duration,
) -> Vec<String> {
    let due = select_for_refresh(videos, max_age, Utc::now());
    let mut refreshed = Vec::with_capacity(due.len());
    for video in due {
        match reconciler.fetch_video(&video.id).await {
            Ok(updated) => {
                debug!(video_id = %updated.id, "video refreshed");
                refreshed.push(updated.id);
            }
            Err(err) => warn!(video_id = %video.id, url = %video.url, error = %err, "video refresh failed"),
        }
    }
    refreshed
}

/// Refreshes due videos across every source and rebuilds the feeds of the
/// sources that changed.
pub async fn refresh_all_videos(reconciler: &Reconciler) -> Result<Vec<String>> {
    let videos = reconciler.store().list_videos().await?;
    let refreshed =
        refresh_videos(reconciler, &videos, reconciler.settings().max_video_age).await;

    let touched: BTreeSet<&str> = videos
        .iter()
        .filter(|video| refreshed.contains(&video.id))
        .map(|video| video.source_id.as_str())
        .collect();
    for source_id in touched {
        if let Err(err) = reconciler.rebuild_feed(source_id).await {
            warn!(source_id, error = %err, "feed rebuild failed");
        }
    }
    Ok(refreshed)
}

/// Handles of the two refresh loops; dropping them leaves the loops running.
pub struct BackgroundLoops {
    pub sources: JoinHandle<()>,
    pub videos: JoinHandle<()>,
}

impl BackgroundLoops {
    pub fn abort(&self) {
        self.sources.abort();
        self.videos.abort();
    }
}

/// Starts the source-listing loop and the video-detail loop. Both fire
/// immediately, then once per period.
pub fn spawn_background_loops(
    reconciler: &Reconciler,
    sources_every: Duration,
    videos_every: Duration,
) -> BackgroundLoops {
    let sources_reconciler = reconciler.clone();
    let sources = tokio::spawn(async move {
        let mut ticker = interval(sources_every.max(MIN_LOOP_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sources_reconciler.fetch_all_sources().await {
                Ok(report) => info!(
                    refreshed = report.refreshed.len(),
                    failed = report.failed.len(),
                    "source refresh finished"
                ),
                Err(err) => error!(error = %err, "source refresh aborted"),
            }
        }
    });

    let videos_reconciler = reconciler.clone();
    let videos = tokio::spawn(async move {
        let mut ticker = interval(videos_every.max(MIN_LOOP_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match refresh_all_videos(&videos_reconciler).await {
                Ok(refreshed) => info!(refreshed = refreshed.len(), "video refresh finished"),
                Err(err) => error!(error = %err, "video refresh aborted"),
            }
        }
    });

    BackgroundLoops { sources, videos }
}
