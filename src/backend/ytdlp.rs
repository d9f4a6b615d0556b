//! [`ExtractionBackend`] backed by the `yt-dlp` executable.
//!
//! Metadata comes from `--dump-json` (items) and `--flat-playlist --dump-json`
//! (collection pages, sliced with `--playlist-items`). Downloads stream a
//! machine-readable `--progress-template` on stdout; stderr is matched
//! against known messages to pick a [`BackendError`] variant.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{BackendResult, CollectionPage, DownloadRequest, ExtractionBackend, TransferProgress};
use crate::config::BackendConfig;
use crate::error::{BackendError, Error, Result};
use crate::types::{EncodingOption, MediaId, MediaRef};

/// Prefix of progress lines produced by [`PROGRESS_TEMPLATE`]
const PROGRESS_PREFIX: &str = "progress:";

/// downloaded|total|total_estimate|speed
const PROGRESS_TEMPLATE: &str = "download:progress:%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress.speed)s";

/// Extensions of files yt-dlp leaves behind while a transfer is running
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FailureKind {
    Auth,
    RateLimit,
    Missing,
    Network,
    /// Local filesystem refused the output; retrying cannot help
    Filesystem,
}

/// Ordered stderr rules; the first match wins
const FAILURE_PATTERNS: &[(&str, FailureKind)] = &[
    (
        r"file name too long|errno 36|no space left on device|permission denied|read-only file system",
        FailureKind::Filesystem,
    ),
    (
        r"sign in to confirm|not a bot|use --cookies|cookies-from-browser|login required|members[- ]only|private video|requires authentication",
        FailureKind::Auth,
    ),
    (r"http error 429|too many requests|rate[- ]?limit", FailureKind::RateLimit),
    (
        r"video unavailable|does not exist|http error 404|not available|unsupported url|incomplete youtube id|has been removed",
        FailureKind::Missing,
    ),
    (
        r"timed out|connection reset|temporary failure|http error 5\d\d|unable to download|incompleteread|remote end closed|network is unreachable|connection refused",
        FailureKind::Network,
    ),
];

static FAILURE_RULES: LazyLock<Vec<(Regex, FailureKind)>> = LazyLock::new(|| {
    FAILURE_PATTERNS
        .iter()
        .filter_map(|(pattern, kind)| {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => Some((re, *kind)),
                Err(e) => {
                    warn!("Invalid failure pattern '{}': {}", pattern, e);
                    None
                }
            }
        })
        .collect()
});

/// Production backend driving the `yt-dlp` command-line tool
#[derive(Clone, Debug)]
pub struct YtDlpBackend {
    binary_path: PathBuf,
    cookies_file: Option<PathBuf>,
    collection_url_base: String,
    item_url_base: String,
}

impl YtDlpBackend {
    /// Create a backend using the given executable
    pub fn new(binary_path: PathBuf) -> Self {
        let defaults = BackendConfig::default();
        Self {
            binary_path,
            cookies_file: None,
            collection_url_base: defaults.collection_url_base,
            item_url_base: defaults.item_url_base,
        }
    }

    /// Attempt to find yt-dlp in PATH
    pub fn from_path() -> Option<Self> {
        which::which("yt-dlp").ok().map(Self::new)
    }

    /// Build a backend from configuration
    ///
    /// Uses `ytdlp_path` when set, otherwise searches PATH if `search_path`
    /// allows it.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let binary_path = match &config.ytdlp_path {
            Some(path) => path.clone(),
            None if config.search_path => which::which("yt-dlp")
                .map_err(|e| Error::config(format!("yt-dlp not found in PATH: {e}"), "ytdlp_path"))?,
            None => {
                return Err(Error::config(
                    "no yt-dlp path configured and PATH search disabled",
                    "ytdlp_path",
                ));
            }
        };

        Ok(Self {
            binary_path,
            cookies_file: config.cookies_file.clone(),
            collection_url_base: config.collection_url_base.clone(),
            item_url_base: config.item_url_base.clone(),
        })
    }

    /// Pass a cookie file to every invocation
    pub fn with_cookies(mut self, cookies_file: impl Into<PathBuf>) -> Self {
        self.cookies_file = Some(cookies_file.into());
        self
    }

    /// Path of the executable in use
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("--no-warnings").arg("--no-color");
        if let Some(cookies) = &self.cookies_file {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn collection_url(&self, target: &str) -> String {
        if target.contains("://") {
            target.to_string()
        } else {
            format!("{}{}", self.collection_url_base, target)
        }
    }

    fn item_url(&self, target: &str) -> String {
        if target.contains("://") {
            target.to_string()
        } else {
            format!("{}{}", self.item_url_base, target)
        }
    }
}

#[async_trait::async_trait]
impl ExtractionBackend for YtDlpBackend {
    async fn resolve_item(&self, target: &str) -> BackendResult<MediaRef> {
        let url = self.item_url(target);
        let output = self
            .command()
            .args(["--dump-json", "--no-playlist", "--skip-download"])
            .arg(&url)
            .output()
            .await
            .map_err(|e| BackendError::Other(format!("failed to execute yt-dlp: {e}")))?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        let json: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| BackendError::Other(format!("yt-dlp returned invalid JSON: {e}")))?;
        parse_item_json(&json, &url)
    }

    async fn resolve_page(
        &self,
        target: &str,
        continuation: Option<&str>,
        page_size: usize,
    ) -> BackendResult<CollectionPage> {
        let start = match continuation {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| BackendError::Other(format!("invalid continuation token {token}")))?,
            None => 1,
        };
        let end = start + page_size.max(1) - 1;
        let url = self.collection_url(target);

        let output = self
            .command()
            .args(["--flat-playlist", "--dump-json", "--playlist-items"])
            .arg(format!("{start}:{end}"))
            .arg(&url)
            .output()
            .await
            .map_err(|e| BackendError::Other(format!("failed to execute yt-dlp: {e}")))?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut page = parse_flat_page(&stdout, &self.item_url_base);
        if page.entries.len() >= page_size.max(1) {
            page.continuation = Some((end + 1).to_string());
        }
        debug!(
            collection = target,
            start,
            entries = page.entries.len(),
            "fetched collection page"
        );
        Ok(page)
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::Sender<TransferProgress>,
    ) -> BackendResult<PathBuf> {
        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .map_err(|e| BackendError::Other(format!("failed to create output directory: {e}")))?;

        let mut child = self
            .command()
            .args(["--no-playlist", "--newline", "--continue", "--progress"])
            .arg("-f")
            .arg(&request.format_token)
            .arg("--progress-template")
            .arg(PROGRESS_TEMPLATE)
            .args(["--print", "after_move:filepath"])
            .arg("-o")
            .arg(request.output_template())
            .arg(&request.url)
            .spawn()
            .map_err(|e| BackendError::Other(format!("failed to start yt-dlp: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Other("yt-dlp stdout unavailable".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackendError::Other("yt-dlp stderr unavailable".to_string()))?;

        let stderr_reader = tokio::spawn(async move {
            let mut buf = String::new();
            stderr.read_to_string(&mut buf).await.ok();
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut printed_path = None;
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(update) = parse_progress_line(&line) {
                // Receiver may be gone; progress is best-effort
                progress.try_send(update).ok();
            } else if !line.trim().is_empty() {
                printed_path = Some(PathBuf::from(line.trim()));
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| BackendError::Transient(format!("yt-dlp process failed: {e}")))?;
        let stderr_text = stderr_reader.await.unwrap_or_default();

        if !status.success() {
            return Err(classify_failure(&stderr_text));
        }

        match printed_path {
            Some(path) if path.is_file() => Ok(path),
            _ => find_output_file(&request.output_dir, &request.file_stem)
                .await
                .ok_or_else(|| {
                    BackendError::Other(format!(
                        "downloaded file not found in {}",
                        request.output_dir.display()
                    ))
                }),
        }
    }
}

/// Map yt-dlp's stderr to a failure class
fn classify_failure(stderr: &str) -> BackendError {
    let message = stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .unwrap_or("yt-dlp exited with an error")
        .trim()
        .to_string();

    let kind = FAILURE_RULES
        .iter()
        .find(|(re, _)| re.is_match(stderr))
        .map(|(_, kind)| *kind);

    match kind {
        Some(FailureKind::Auth) => BackendError::AuthRequired(message),
        Some(FailureKind::RateLimit) => BackendError::RateLimited(message),
        Some(FailureKind::Missing) => BackendError::NotFound(message),
        Some(FailureKind::Filesystem) => BackendError::Other(message),
        // Unrecognized failures are treated as transient so they get retried
        Some(FailureKind::Network) | None => BackendError::Transient(message),
    }
}

fn parse_progress_line(line: &str) -> Option<TransferProgress> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.split('|').map(parse_number);
    let downloaded = fields.next().flatten()?;
    let total = fields.next().flatten();
    let estimate = fields.next().flatten();
    let speed = fields.next().flatten();

    Some(TransferProgress {
        downloaded_bytes: downloaded,
        total_bytes: total.or(estimate),
        speed_bps: speed,
    })
}

/// yt-dlp prints "NA" or "None" for unknown fields and floats for estimates
fn parse_number(field: &str) -> Option<u64> {
    let value: f64 = field.trim().parse().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value as u64)
    } else {
        None
    }
}

fn str_field(json: &serde_json::Value, key: &str) -> Option<String> {
    json.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn thumbnail_of(json: &serde_json::Value) -> Option<String> {
    str_field(json, "thumbnail").or_else(|| {
        json.get("thumbnails")
            .and_then(|v| v.as_array())
            .and_then(|thumbs| thumbs.iter().rev().find_map(|t| str_field(t, "url")))
    })
}

fn parse_item_json(json: &serde_json::Value, fallback_url: &str) -> BackendResult<MediaRef> {
    let id = str_field(json, "id")
        .ok_or_else(|| BackendError::Other("yt-dlp output has no id".to_string()))?;

    Ok(MediaRef {
        url: str_field(json, "webpage_url").unwrap_or_else(|| fallback_url.to_string()),
        title: str_field(json, "title").unwrap_or_else(|| id.clone()),
        thumbnail: thumbnail_of(json),
        duration_secs: json.get("duration").and_then(|v| v.as_f64()),
        encodings: parse_formats(json),
        id: MediaId::new(id),
    })
}

fn parse_formats(json: &serde_json::Value) -> Vec<EncodingOption> {
    let Some(formats) = json.get("formats").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    formats
        .iter()
        .filter_map(|f| {
            let token = str_field(f, "format_id")?;
            let vcodec = str_field(f, "vcodec");
            let acodec = str_field(f, "acodec");
            Some(EncodingOption {
                token,
                container: str_field(f, "ext").unwrap_or_default().to_ascii_lowercase(),
                height: f.get("height").and_then(|v| v.as_u64()).map(|v| v as u32),
                fps: f.get("fps").and_then(|v| v.as_f64()),
                filesize: f
                    .get("filesize")
                    .and_then(|v| v.as_u64())
                    .or_else(|| f.get("filesize_approx").and_then(|v| v.as_u64())),
                has_video: vcodec.as_deref().is_some_and(|v| v != "none"),
                has_audio: acodec.as_deref().is_some_and(|a| a != "none"),
                note: str_field(f, "format_note"),
            })
        })
        .collect()
}

fn parse_flat_page(stdout: &str, item_url_base: &str) -> CollectionPage {
    let mut page = CollectionPage::default();

    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let json: serde_json::Value = match serde_json::from_str(line) {
            Ok(json) => json,
            Err(e) => {
                debug!(error = %e, "skipping unparsable playlist line");
                continue;
            }
        };

        if page.title.is_none() {
            page.title = str_field(&json, "playlist_title").or_else(|| str_field(&json, "playlist"));
        }

        let Some(id) = str_field(&json, "id") else {
            continue;
        };
        page.entries.push(MediaRef {
            url: str_field(&json, "url")
                .filter(|u| u.contains("://"))
                .unwrap_or_else(|| format!("{item_url_base}{id}")),
            title: str_field(&json, "title").unwrap_or_else(|| id.clone()),
            thumbnail: thumbnail_of(&json),
            duration_secs: json.get("duration").and_then(|v| v.as_f64()),
            encodings: Vec::new(),
            id: MediaId::new(id),
        });
    }

    page
}

async fn find_output_file(output_dir: &Path, file_stem: &str) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(output_dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path.is_file() || PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            continue;
        }
        if path.file_stem().and_then(|s| s.to_str()) == Some(file_stem) {
            return Some(path);
        }
    }
    None
}
