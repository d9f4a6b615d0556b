use super::test_helpers::{ScriptedBackend, create_test_downloader, fast_retry, flat, media};
use super::*;
use crate::error::BackendError;
use crate::types::{TaskState, TaskStatus};
use std::time::Duration;

mod planning;

/// Tasks for `ids`, each using the 720p rendition
fn tasks(ids: &[&str]) -> Vec<DownloadTask> {
    ids.iter()
        .map(|id| DownloadTask::new(media(id, &format!("Video {id}")), "22").unwrap())
        .collect()
}

/// Drain every event currently buffered in `rx`
fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn states(snapshot: &std::collections::HashMap<TaskId, TaskStatus>) -> Vec<TaskState> {
    let mut states: Vec<_> = snapshot.values().map(|s| s.state).collect();
    states.sort_by_key(|s| format!("{s:?}"));
    states
}
