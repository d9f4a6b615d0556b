//! Configuration types for media-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, path::PathBuf, time::Duration};

/// Download behavior configuration (directory, concurrency, file naming)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum concurrent downloads (default: 1)
    ///
    /// One item at a time keeps the backend happy; higher values switch the
    /// scheduler to a bounded worker pool.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// How output filenames are derived from a media item
    #[serde(default)]
    pub filename_policy: FilenamePolicy,

    /// Maximum length of the title part of a filename, in characters (default: 200)
    #[serde(default = "default_max_title_len")]
    pub max_title_len: usize,

    /// Remove partial files when a task is cancelled or fails for good (default: true)
    #[serde(default = "default_true")]
    pub cleanup_partial_files: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            filename_policy: FilenamePolicy::default(),
            max_title_len: default_max_title_len(),
            cleanup_partial_files: true,
        }
    }
}

/// Output filename policy
///
/// Human titles collide easily, so every policy keeps the media identifier in
/// the filename. Titles are for display only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilenamePolicy {
    /// `{title} [{id}].{ext}` (default)
    #[default]
    TitleWithId,
    /// `{id}.{ext}`
    IdOnly,
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries per task, across all passes (default: 3)
    ///
    /// A task is attempted at most `1 + max_retries` times.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Batch-level retry configuration
///
/// Separate from [`RetryConfig`]: this bounds how many times the orchestrator
/// sweeps over the set of failed tasks, not how often one task is attempted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Total passes over a batch, including the first (default: 2)
    #[serde(default = "default_max_batch_passes")]
    pub max_batch_passes: u32,

    /// Pause before each re-pass (default: 5 seconds)
    #[serde(default = "default_repass_cooldown", with = "duration_serde")]
    pub repass_cooldown: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_passes: default_max_batch_passes(),
            repass_cooldown: default_repass_cooldown(),
        }
    }
}

/// Metadata resolution configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Collection members requested per backend call (default: 50)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Upper bound on pages fetched for one collection (default: 200)
    ///
    /// Reaching the bound stops pagination and flags the collection as
    /// interrupted rather than looping against a misbehaving backend.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

/// Encoding allow-list applied to the backend's raw format list
///
/// An empty set means "allow everything" for that dimension.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingFilter {
    /// Allowed container types, lowercase (e.g. "mp4", "webm")
    #[serde(default)]
    pub allowed_containers: BTreeSet<String>,

    /// Allowed vertical resolutions (e.g. 360, 720, 1080)
    #[serde(default)]
    pub allowed_resolutions: BTreeSet<u32>,

    /// Drop options without an audio track (default: false)
    #[serde(default)]
    pub require_audio: bool,
}

impl EncodingFilter {
    /// Filter accepting `containers` at any of `resolutions`
    pub fn new<C, S>(containers: C, resolutions: impl IntoIterator<Item = u32>) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_containers: containers
                .into_iter()
                .map(|c| c.into().to_ascii_lowercase())
                .collect(),
            allowed_resolutions: resolutions.into_iter().collect(),
            require_audio: false,
        }
    }
}

/// Extraction backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Path to yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Whether to search PATH for the executable if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Netscape-format cookie file handed to the backend, read-only
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,

    /// Minimum interval between backend requests (default: none)
    #[serde(default, with = "optional_duration_serde")]
    pub min_request_interval: Option<Duration>,

    /// Base URL used to build item links from bare identifiers
    #[serde(default = "default_item_url_base")]
    pub item_url_base: String,

    /// Base URL used to build collection links from bare identifiers
    #[serde(default = "default_collection_url_base")]
    pub collection_url_base: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            search_path: true,
            cookies_file: None,
            min_request_interval: None,
            item_url_base: default_item_url_base(),
            collection_url_base: default_collection_url_base(),
        }
    }
}

/// Main configuration for [`MediaDownloader`](crate::MediaDownloader)
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) - directory, concurrency, filenames
/// - [`retry`](RetryConfig) - per-task retry budget and backoff
/// - [`batch`](BatchConfig) - bounded re-passes over failed tasks
/// - [`resolver`](ResolverConfig) - collection paging
/// - [`encoding_filter`](EncodingFilter) - which renditions are offered
/// - [`backend`](BackendConfig) - extraction backend and credentials
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Per-task retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Batch re-pass policy
    #[serde(default)]
    pub batch: BatchConfig,

    /// Metadata resolution settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Encoding allow-list
    #[serde(default)]
    pub encoding_filter: EncodingFilter,

    /// Extraction backend settings
    #[serde(default)]
    pub backend: BackendConfig,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Check that every field holds a usable value
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::config(
                "must be at least 1",
                "max_concurrent_downloads",
            ));
        }
        if self.download.max_title_len == 0 {
            return Err(Error::config("must be at least 1", "max_title_len"));
        }
        if self.batch.max_batch_passes == 0 {
            return Err(Error::config("must be at least 1", "max_batch_passes"));
        }
        if self.resolver.page_size == 0 {
            return Err(Error::config("must be at least 1", "page_size"));
        }
        if self.resolver.max_pages == 0 {
            return Err(Error::config("must be at least 1", "max_pages"));
        }
        if self.retry.backoff_multiplier.is_nan() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "must be a number >= 1.0",
                "backoff_multiplier",
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(Error::config(
                "initial_delay must not exceed max_delay",
                "initial_delay",
            ));
        }
        if let Some(cookies) = &self.backend.cookies_file
            && !cookies.is_file()
        {
            return Err(Error::config(
                format!("cookie file {} does not exist", cookies.display()),
                "cookies_file",
            ));
        }
        for (key, base) in [
            ("item_url_base", &self.backend.item_url_base),
            ("collection_url_base", &self.backend.collection_url_base),
        ] {
            url::Url::parse(base)
                .map_err(|e| Error::config(format!("invalid base URL {base}: {e}"), key))?;
        }
        Ok(())
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_concurrent() -> usize {
    1
}

fn default_max_title_len() -> usize {
    200
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_batch_passes() -> u32 {
    2
}

fn default_repass_cooldown() -> Duration {
    Duration::from_secs(5)
}

fn default_page_size() -> usize {
    50
}

fn default_max_pages() -> usize {
    200
}

fn default_item_url_base() -> String {
    "https://www.youtube.com/watch?v=".to_string()
}

fn default_collection_url_base() -> String {
    "https://www.youtube.com/playlist?list=".to_string()
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper (milliseconds, request pacing is sub-second)
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
