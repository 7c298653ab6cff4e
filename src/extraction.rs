//! Gateway to the external extraction tool (yt-dlp).
//!
//! Handlers describe *what* to extract through [`ExtractionOptions`]; the
//! gateway runs the tool, bounds it with a timeout and decodes the
//! `--dump-single-json` payload into an [`InfoDict`] tree. Every failure on
//! this path surfaces as [`Error::ExtractionError`].

use std::{
    path::PathBuf,
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const DEFAULT_FORMAT: &str = "b";

/// Options handed to the extraction tool for one call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionOptions {
    pub format: String,
    /// List playlist entries without resolving each video.
    pub extract_flat: bool,
    pub playlist_reverse: bool,
    pub playlist_end: Option<u32>,
    /// yt-dlp date expression such as `now-2month`.
    pub dateafter: Option<String>,
    pub allowed_extractors: Vec<String>,
    /// Plugin extractors that must be registered before the call.
    pub custom_extractors: Vec<String>,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            format: DEFAULT_FORMAT.to_string(),
            extract_flat: false,
            playlist_reverse: false,
            playlist_end: None,
            dateafter: None,
            allowed_extractors: Vec::new(),
            custom_extractors: Vec::new(),
        }
    }
}

impl ExtractionOptions {
    /// Command line flags for everything except plugin registration.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["--format".to_string(), self.format.clone()];
        if self.extract_flat {
            args.push("--flat-playlist".into());
        }
        if self.playlist_reverse {
            args.push("--playlist-reverse".into());
        }
        if let Some(end) = self.playlist_end {
            args.push("--playlist-end".into());
            args.push(end.to_string());
        }
        if let Some(dateafter) = &self.dateafter {
            args.push("--dateafter".into());
            args.push(dateafter.clone());
        }
        if !self.allowed_extractors.is_empty() {
            args.push("--use-extractors".into());
            args.push(self.allowed_extractors.join(","));
        }
        args
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Thumbnail {
    pub url: Option<String>,
    pub id: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

/// One downloadable rendition reported by the tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FormatInfo {
    pub format_id: Option<String>,
    pub url: Option<String>,
    pub ext: Option<String>,
    pub height: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
}

impl FormatInfo {
    pub fn has_audio_and_video(&self) -> bool {
        let present = |codec: &Option<String>| codec.as_deref().is_some_and(|codec| codec != "none");
        present(&self.vcodec) && present(&self.acodec)
    }

    /// Exact size, else the approximation, else zero.
    pub fn size(&self) -> i64 {
        self.filesize
            .or(self.filesize_approx)
            .map(|size| size.round() as i64)
            .unwrap_or(0)
    }
}

/// Subset of yt-dlp's info dictionary. Everything is optional because
/// platforms and flat listings omit most fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InfoDict {
    pub id: Option<String>,
    #[serde(rename = "_type")]
    pub kind: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub uploader: Option<String>,
    pub uploader_id: Option<String>,
    pub channel: Option<String>,
    pub thumbnail: Option<String>,
    #[serde(default, deserialize_with = "non_null_items")]
    pub thumbnails: Vec<Thumbnail>,
    pub url: Option<String>,
    pub webpage_url: Option<String>,
    pub original_url: Option<String>,
    /// `YYYYMMDD`.
    pub upload_date: Option<String>,
    pub timestamp: Option<f64>,
    pub release_timestamp: Option<f64>,
    pub duration: Option<f64>,
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
    #[serde(default, deserialize_with = "non_null_items")]
    pub formats: Vec<FormatInfo>,
    #[serde(default, deserialize_with = "non_null_items")]
    pub entries: Vec<InfoDict>,
    pub extractor_key: Option<String>,
}

impl InfoDict {
    fn is_playlist(&self) -> bool {
        !self.entries.is_empty() || self.kind.as_deref() == Some("playlist")
    }

    /// Leaf video entries in listing order; nested playlists (channel tabs)
    /// are flattened.
    pub fn video_entries(&self) -> Vec<&InfoDict> {
        fn collect<'a>(entries: &'a [InfoDict], out: &mut Vec<&'a InfoDict>) {
            for entry in entries {
                if entry.is_playlist() {
                    collect(&entry.entries, out);
                } else {
                    out.push(entry);
                }
            }
        }
        let mut out = Vec::new();
        collect(&self.entries, &mut out);
        out
    }
}

/// yt-dlp emits `null` for entries it failed to resolve.
fn non_null_items<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let items: Option<Vec<Option<T>>> = Option::deserialize(deserializer)?;
    Ok(items.unwrap_or_default().into_iter().flatten().collect())
}

/// Raw result of one extraction, tagged with the URL that was requested.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub url: String,
    pub options: ExtractionOptions,
    pub info: InfoDict,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str, options: &ExtractionOptions) -> Result<InfoDict>;
}

/// Runs the yt-dlp binary as a subprocess.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
    plugin_dir: Option<PathBuf>,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>, plugin_dir: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            plugin_dir,
        }
    }

    fn command(&self, url: &str, options: &ExtractionOptions) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-progress")
            .args(options.to_args());
        if !options.custom_extractors.is_empty() {
            match &self.plugin_dir {
                Some(dir) => {
                    command.arg("--plugin-dirs").arg(dir);
                }
                None => warn!(
                    extractors = ?options.custom_extractors,
                    "custom extractors requested but YTDLP_PLUGIN_DIR is not set"
                ),
            }
        }
        command
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Extractor for YtDlp {
    async fn extract(&self, url: &str, options: &ExtractionOptions) -> Result<InfoDict> {
        let output = self
            .command(url, options)
            .output()
            .await
            .map_err(|err| {
                Error::extraction(
                    url,
                    options,
                    format!("running {}: {err}", self.binary.display()),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no error output");
            return Err(Error::extraction(
                url,
                options,
                format!("{} ({})", reason.trim(), output.status),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let payload = stdout.trim();
        if payload.is_empty() || payload == "null" {
            return Err(Error::extraction(url, options, "extraction returned no result"));
        }
        serde_json::from_str(payload)
            .map_err(|err| Error::extraction(url, options, format!("decoding result: {err}")))
    }
}

/// Timeout-bounded front door used by the reconciler.
#[derive(Clone)]
pub struct ExtractionGateway {
    extractor: Arc<dyn Extractor>,
    timeout: Duration,
}

impl ExtractionGateway {
    pub fn new(extractor: Arc<dyn Extractor>, timeout: Duration) -> Self {
        Self { extractor, timeout }
    }

    pub async fn extract(&self, url: &str, options: &ExtractionOptions) -> Result<ExtractionResult> {
        debug!(url, flat = options.extract_flat, "extracting");
        let info = tokio::time::timeout(self.timeout, self.extractor.extract(url, options))
            .await
            .map_err(|_| {
                Error::extraction(
                    url,
                    options,
                    format!("timed out after {}s", self.timeout.as_secs_f32()),
                )
            })?
            .map_err(|err| {
                if err.is_extraction() {
                    err
                } else {
                    Error::extraction(url, options, err.to_string())
                }
            })?;
        Ok(ExtractionResult {
            url: url.to_string(),
            options: options.clone(),
            info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;
    use std::{fs, path::Path};
    use tempfile::tempdir;

    #[cfg(unix)]
    fn install_ytdlp_stub(dir: &Path, body: &str) -> Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;
        let script_path = dir.join("yt-dlp");
        fs::write(&script_path, format!("#!/usr/bin/env bash\nset -eu\n{body}\n"))?;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
        Ok(script_path)
    }

    #[test]
    fn options_render_listing_flags() {
        let options = ExtractionOptions {
            extract_flat: true,
            playlist_reverse: true,
            playlist_end: Some(20),
            dateafter: Some("now-2month".into()),
            allowed_extractors: vec!["CustomRumbleEmbed".into(), "CustomRumbleChannel".into()],
            ..ExtractionOptions::default()
        };
        assert_eq!(
            options.to_args(),
            vec![
                "--format",
                "b",
                "--flat-playlist",
                "--playlist-reverse",
                "--playlist-end",
                "20",
                "--dateafter",
                "now-2month",
                "--use-extractors",
                "CustomRumbleEmbed,CustomRumbleChannel",
            ]
        );
        assert_eq!(ExtractionOptions::default().to_args(), vec!["--format", "b"]);
    }

    #[test]
    fn info_dict_skips_null_entries_and_flattens_tabs() {
        let info: InfoDict = serde_json::from_value(json!({
            "title": "Alice",
            "_type": "playlist",
            "entries": [
                {"_type": "playlist", "title": "Videos", "entries": [
                    {"url": "https://www.youtube.com/watch?v=a"},
                    null,
                    {"url": "https://www.youtube.com/watch?v=b"}
                ]},
                {"_type": "playlist", "title": "Shorts", "entries": []},
                {"url": "https://www.youtube.com/watch?v=c"}
            ],
            "thumbnails": null
        }))
        .unwrap();
        let urls: Vec<_> = info
            .video_entries()
            .into_iter()
            .filter_map(|entry| entry.url.as_deref())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://www.youtube.com/watch?v=a",
                "https://www.youtube.com/watch?v=b",
                "https://www.youtube.com/watch?v=c"
            ]
        );
        assert!(info.thumbnails.is_empty());
    }

    #[test]
    fn format_size_prefers_exact_then_approx() {
        let exact = FormatInfo {
            filesize: Some(10.0),
            filesize_approx: Some(20.0),
            ..FormatInfo::default()
        };
        let approx = FormatInfo {
            filesize_approx: Some(20.4),
            ..FormatInfo::default()
        };
        assert_eq!(exact.size(), 10);
        assert_eq!(approx.size(), 20);
        assert_eq!(FormatInfo::default().size(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn yt_dlp_passes_flags_and_decodes_output() -> Result<()> {
        let temp = tempdir()?;
        let args_file = temp.path().join("args.txt");
        let stub = install_ytdlp_stub(
            temp.path(),
            &format!(
                "printf '%s\\n' \"$@\" > '{}'\necho '{{\"title\":\"Alice\",\"entries\":[{{\"url\":\"u1\"}}]}}'",
                args_file.display()
            ),
        )?;
        let plugins = temp.path().join("plugins");
        let ytdlp = YtDlp::new(&stub, Some(plugins.clone()));
        let options = ExtractionOptions {
            extract_flat: true,
            custom_extractors: vec!["CustomRumbleChannel".into()],
            ..ExtractionOptions::default()
        };

        let info = ytdlp.extract("https://rumble.com/c/Alice", &options).await?;
        assert_eq!(info.title.as_deref(), Some("Alice"));
        assert_eq!(info.video_entries().len(), 1);

        let args = fs::read_to_string(&args_file)?;
        let args: Vec<_> = args.lines().collect();
        assert_eq!(&args[..4], &["--dump-single-json", "--skip-download", "--no-warnings", "--no-progress"]);
        assert!(args.contains(&"--flat-playlist"));
        let plugin_flag = args.iter().position(|arg| *arg == "--plugin-dirs").unwrap();
        assert_eq!(args[plugin_flag + 1], plugins.display().to_string());
        assert_eq!(args.last(), Some(&"https://rumble.com/c/Alice"));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn yt_dlp_failure_becomes_extraction_error() -> Result<()> {
        let temp = tempdir()?;
        let stub = install_ytdlp_stub(
            temp.path(),
            "echo 'ERROR: [youtube] abc: Video unavailable' >&2\nexit 1",
        )?;
        let err = YtDlp::new(&stub, None)
            .extract("https://www.youtube.com/watch?v=abc", &ExtractionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_extraction());
        assert!(err.to_string().contains("Video unavailable"));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn null_output_is_an_extraction_error() -> Result<()> {
        let temp = tempdir()?;
        let stub = install_ytdlp_stub(temp.path(), "echo null")?;
        let err = YtDlp::new(&stub, None)
            .extract("https://www.youtube.com/watch?v=abc", &ExtractionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_extraction());
        Ok(())
    }

    #[tokio::test]
    async fn missing_binary_is_an_extraction_error() {
        let gateway = ExtractionGateway::new(
            Arc::new(YtDlp::new("/nonexistent/yt-dlp", None)),
            Duration::from_secs(5),
        );
        let err = gateway
            .extract("https://www.youtube.com/watch?v=abc", &ExtractionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_extraction());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn gateway_times_out_slow_extractions() -> Result<()> {
        let temp = tempdir()?;
        let stub = install_ytdlp_stub(temp.path(), "sleep 5\necho '{}'")?;
        let gateway =
            ExtractionGateway::new(Arc::new(YtDlp::new(&stub, None)), Duration::from_millis(200));
        let err = gateway
            .extract("https://www.youtube.com/watch?v=abc", &ExtractionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_extraction());
        assert!(err.to_string().contains("timed out"));
        Ok(())
    }
}
