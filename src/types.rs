//! Core types for media-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BackendError, Error, Result, UserFacing};

/// Stable identifier of a single downloadable item (e.g. a video id)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(pub String);

/// Stable identifier of a collection (e.g. a playlist id)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(pub String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Create a new identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(MediaId);
string_id!(CollectionId);

/// Unique identifier for a download task within this process
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Allocate a fresh task id
    pub fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One retrievable rendition of a media item
///
/// Several options may share a container; a download picks exactly one
/// `token` per item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncodingOption {
    /// Backend-specific format token (e.g. a yt-dlp `format_id`)
    pub token: String,
    /// Container type, lowercase (e.g. "mp4")
    pub container: String,
    /// Vertical resolution in pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Frame rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// Size in bytes (exact or approximate)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    /// Carries a video track
    pub has_video: bool,
    /// Carries an audio track
    pub has_audio: bool,
    /// Free-form label from the backend (e.g. "720p")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Resolved identity of a single downloadable item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Stable identifier
    pub id: MediaId,
    /// Source URL handed to the backend
    pub url: String,
    /// Human-readable title, for display only
    pub title: String,
    /// Thumbnail URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Duration in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Filtered renditions; empty for collection members that were listed flat
    #[serde(default)]
    pub encodings: Vec<EncodingOption>,
}

impl MediaRef {
    /// Whether the rendition list has been resolved
    pub fn has_encodings(&self) -> bool {
        !self.encodings.is_empty()
    }

    /// Look up one of this item's renditions by token
    pub fn encoding(&self, token: &str) -> Option<&EncodingOption> {
        self.encodings.iter().find(|e| e.token == token)
    }
}

/// Resolved identity of an ordered grouping of media items
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionRef {
    /// Stable identifier
    pub id: CollectionId,
    /// Collection title
    pub title: String,
    /// Source URL
    pub url: String,
    /// Members in backend order
    pub members: Vec<MediaRef>,
}

impl CollectionRef {
    /// Find a member by id
    pub fn member(&self, id: &MediaId) -> Option<&MediaRef> {
        self.members.iter().find(|m| &m.id == id)
    }

    /// Members in the 1-based inclusive range `start..=end`, clamped to the collection
    pub fn range(&self, start: usize, end: usize) -> &[MediaRef] {
        let len = self.members.len();
        let start = start.max(1).min(len + 1) - 1;
        let end = end.min(len).max(start);
        &self.members[start..end]
    }
}

/// A media item paired with the rendition to fetch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Task identifier, key in the status sink
    pub id: TaskId,
    /// What to download
    pub media: MediaRef,
    /// Which rendition, always one of `media.encodings`
    pub encoding: EncodingOption,
}

impl DownloadTask {
    /// Build a task for `media` using the rendition identified by `token`.
    ///
    /// Fails with [`Error::InvalidEncoding`] if `token` is not one of the
    /// item's own resolved renditions.
    pub fn new(media: MediaRef, token: &str) -> Result<Self> {
        let encoding = media
            .encoding(token)
            .cloned()
            .ok_or_else(|| Error::InvalidEncoding {
                media_id: media.id.to_string(),
                token: token.to_string(),
            })?;
        Ok(Self {
            id: TaskId::next(),
            media,
            encoding,
        })
    }
}

/// Task lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting to start (also after being re-enqueued for a re-pass)
    Pending,
    /// Backend transfer running
    InProgress,
    /// Finished, file on disk
    Completed,
    /// Gave up
    Failed,
}

impl TaskState {
    /// Completed or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// Point-in-time status of one task, as kept by the status sink
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Lifecycle state
    pub state: TaskState,
    /// Completion fraction of the current attempt, 0.0 to 1.0
    pub fraction: f32,
    /// Last reported throughput in bytes per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_bps: Option<u64>,
    /// Attempts made so far
    pub attempts: u32,
    /// Last error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Output file once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// When this status last changed
    pub updated_at: DateTime<Utc>,
}

impl TaskStatus {
    /// Fresh status in the given state
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            fraction: 0.0,
            speed_bps: None,
            attempts: 0,
            error: None,
            output: None,
            updated_at: Utc::now(),
        }
    }
}

/// Event emitted during a batch run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task registered, waiting for a worker
    TaskQueued {
        /// Task ID
        id: TaskId,
        /// Media identifier
        media_id: MediaId,
        /// Display title
        title: String,
    },

    /// Attempt started (Pending -> InProgress)
    TaskStarted {
        /// Task ID
        id: TaskId,
        /// 1-based attempt number
        attempt: u32,
    },

    /// Transfer progress for the running attempt
    TaskProgress {
        /// Task ID
        id: TaskId,
        /// Completion fraction, 0.0 to 1.0, non-decreasing within one task
        fraction: f32,
        /// Instantaneous throughput in bytes per second
        #[serde(skip_serializing_if = "Option::is_none")]
        speed_bps: Option<u64>,
    },

    /// Attempt failed, another one follows
    TaskRetrying {
        /// Task ID
        id: TaskId,
        /// The attempt that failed
        attempt: u32,
        /// Error message
        error: String,
        /// Delay before the next attempt, in milliseconds (0 when deferred to a re-pass)
        delay_ms: u64,
    },

    /// InProgress -> Completed
    TaskCompleted {
        /// Task ID
        id: TaskId,
        /// Output file
        path: PathBuf,
    },

    /// InProgress -> Failed
    TaskFailed {
        /// Task ID
        id: TaskId,
        /// Error message
        error: String,
        /// Machine-readable error code
        code: String,
        /// Whether another pass will pick the task up again
        will_retry: bool,
    },

    /// A pass over the batch started
    BatchPassStarted {
        /// 1-based pass number
        pass: u32,
        /// Tasks in this pass
        tasks: usize,
    },

    /// Whole batch finished
    BatchFinished {
        /// Completed task count
        completed: usize,
        /// Failed task count
        failed: usize,
    },
}

impl Event {
    /// Task this event refers to, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Event::TaskQueued { id, .. }
            | Event::TaskStarted { id, .. }
            | Event::TaskProgress { id, .. }
            | Event::TaskRetrying { id, .. }
            | Event::TaskCompleted { id, .. }
            | Event::TaskFailed { id, .. } => Some(*id),
            Event::BatchPassStarted { .. } | Event::BatchFinished { .. } => None,
        }
    }
}

/// A task that finished successfully
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletedItem {
    /// Task ID
    pub task_id: TaskId,
    /// What was downloaded
    pub media: MediaRef,
    /// Where it landed
    pub path: PathBuf,
    /// Attempts used
    pub attempts: u32,
}

/// A task that ended in the Failed state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    /// Task ID
    pub task_id: TaskId,
    /// What could not be downloaded
    pub media: MediaRef,
    /// Last error message
    pub error: String,
    /// Machine-readable error code
    pub code: String,
    /// Classification for display
    pub user_facing: UserFacing,
    /// Attempts used
    pub attempts: u32,
}

/// Structured outcome of a batch run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Finished tasks, in completion order
    pub completed: Vec<CompletedItem>,
    /// Failed tasks
    pub failed: Vec<FailedItem>,
    /// Passes run over the batch
    pub passes: u32,
    /// Backend download calls made
    pub attempts: u32,
    /// Set when the collection behind this batch was only partially listed;
    /// members past the failure were never queued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_interrupted: Option<BackendError>,
}

impl BatchResult {
    /// No task failed and nothing was left unlisted
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.listing_interrupted.is_none()
    }

    /// Output files of completed tasks, ready for the archive packager
    pub fn completed_paths(&self) -> Vec<PathBuf> {
        self.completed.iter().map(|c| c.path.clone()).collect()
    }
}
