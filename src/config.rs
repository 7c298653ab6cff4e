use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_RECENT_VIDEOS: u32 = 20;
pub const DEFAULT_DATEAFTER: &str = "now-2month";
pub const DEFAULT_MAX_VIDEO_AGE_HOURS: u64 = 8;
pub const DEFAULT_SOURCES_INTERVAL_MINUTES: u64 = 60;
pub const DEFAULT_VIDEOS_INTERVAL_MINUTES: u64 = 15;
pub const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_YTDLP_PATH: &str = "yt-dlp";

// Upper bounds; larger values fall back to the default.
const MAX_VIDEO_AGE_HOURS_LIMIT: u64 = 24 * 365 * 100;
const MAX_INTERVAL_MINUTES: u64 = 60 * 24 * 365;
const MAX_EXTRACTION_TIMEOUT_SECS: u64 = 24 * 3600;

const DATABASE_FILE: &str = "database.sqlite3";
const FEEDS_SUBDIR: &str = "feeds";

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// Public prefix for `feed_url` and `feed_media_url`, without a trailing slash.
    pub base_url: String,
    pub build_feed_recent_videos: u32,
    pub build_feed_dateafter: String,
    pub max_video_age_hours: u64,
    pub refresh_sources_interval_minutes: u64,
    pub refresh_videos_interval_minutes: u64,
    pub extraction_timeout_secs: u64,
    pub prune_orphaned_videos: bool,
    pub ytdlp_path: PathBuf,
    pub ytdlp_plugin_dir: Option<PathBuf>,
}

impl Settings {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn feeds_dir(&self) -> PathBuf {
        self.data_dir.join(FEEDS_SUBDIR)
    }

    pub fn max_video_age(&self) -> chrono::Duration {
        i64::try_from(self.max_video_age_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or_else(|| chrono::Duration::hours(DEFAULT_MAX_VIDEO_AGE_HOURS as i64))
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn refresh_sources_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_sources_interval_minutes.saturating_mul(60))
    }

    pub fn refresh_videos_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_videos_interval_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub data_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<Settings> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);
    let parsed = |key: &str| lookup(key).and_then(|value| value.parse::<u64>().ok());

    let data_dir = overrides
        .data_dir
        .or_else(|| lookup("FEEDTUBE_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("FEEDTUBE_HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup("FEEDTUBE_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORT);
    let base_url = lookup("FEEDTUBE_BASE_URL")
        .unwrap_or_else(|| format!("http://{host}:{port}"))
        .trim_end_matches('/')
        .to_string();

    let build_feed_recent_videos = lookup("BUILD_FEED_RECENT_VIDEOS")
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(DEFAULT_RECENT_VIDEOS);
    let build_feed_dateafter =
        lookup("BUILD_FEED_DATEAFTER").unwrap_or_else(|| DEFAULT_DATEAFTER.to_string());
    let prune_orphaned_videos = lookup("PRUNE_ORPHANED_VIDEOS")
        .map(|value| parse_bool(&value).with_context(|| format!("PRUNE_ORPHANED_VIDEOS={value}")))
        .transpose()?
        .unwrap_or(false);

    Ok(Settings {
        data_dir,
        host,
        port,
        base_url,
        build_feed_recent_videos,
        build_feed_dateafter,
        max_video_age_hours: parsed("MAX_VIDEO_AGE_HOURS")
            .filter(|hours| *hours <= MAX_VIDEO_AGE_HOURS_LIMIT)
            .unwrap_or(DEFAULT_MAX_VIDEO_AGE_HOURS),
        refresh_sources_interval_minutes: parsed("REFRESH_SOURCES_INTERVAL_MINUTES")
            .filter(|minutes| (1..=MAX_INTERVAL_MINUTES).contains(minutes))
            .unwrap_or(DEFAULT_SOURCES_INTERVAL_MINUTES),
        refresh_videos_interval_minutes: parsed("REFRESH_VIDEOS_INTERVAL_MINUTES")
            .filter(|minutes| (1..=MAX_INTERVAL_MINUTES).contains(minutes))
            .unwrap_or(DEFAULT_VIDEOS_INTERVAL_MINUTES),
        extraction_timeout_secs: parsed("EXTRACTION_TIMEOUT_SECS")
            .filter(|secs| (1..=MAX_EXTRACTION_TIMEOUT_SECS).contains(secs))
            .unwrap_or(DEFAULT_EXTRACTION_TIMEOUT_SECS),
        prune_orphaned_videos,
        ytdlp_path: lookup("YTDLP_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_PATH)),
        ytdlp_plugin_dir: lookup("YTDLP_PLUGIN_DIR").map(PathBuf::from),
    })
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got '{other}'"),
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
