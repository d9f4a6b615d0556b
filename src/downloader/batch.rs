//! Batch scheduling: passes over the task set with a bounded worker pool.
//!
//! Each pass runs its tasks through `buffer_unordered(max_concurrent_downloads)`;
//! with the default of 1 that is a plain sequential loop. Tasks deferred by
//! a pass (rate limited, budget left) make up the next pass, up to
//! `batch.max_batch_passes`. The last pass never defers, so every task
//! ends up in either `completed` or `failed`.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::info;

use super::task::{TaskOutcome, TaskRunner};
use crate::types::{BatchResult, DownloadTask, Event};

pub(crate) async fn run_batch(runner: Arc<TaskRunner>, tasks: Vec<DownloadTask>) -> BatchResult {
    let mut result = BatchResult::default();
    let concurrency = runner.config.download.max_concurrent_downloads.max(1);
    let max_passes = runner.config.batch.max_batch_passes.max(1);

    for task in &tasks {
        runner
            .emit(Event::TaskQueued {
                id: task.id,
                media_id: task.media.id.clone(),
                title: task.media.title.clone(),
            })
            .await;
    }

    info!(
        tasks = tasks.len(),
        concurrency,
        max_passes,
        max_retries = runner.max_retries,
        "starting batch"
    );

    let mut pending: Vec<(DownloadTask, u32)> = tasks.into_iter().map(|t| (t, 0)).collect();

    while !pending.is_empty() && result.passes < max_passes {
        if result.passes > 0 {
            let cooldown = runner.config.batch.repass_cooldown;
            info!(
                deferred = pending.len(),
                cooldown_secs = cooldown.as_secs_f64(),
                "re-running deferred tasks after cooldown"
            );
            tokio::select! {
                _ = runner.cancel.cancelled() => {}
                _ = tokio::time::sleep(cooldown) => {}
            }
        }

        result.passes += 1;
        let last_pass = result.passes == max_passes;
        runner
            .emit(Event::BatchPassStarted {
                pass: result.passes,
                tasks: pending.len(),
            })
            .await;

        let outcomes: Vec<TaskOutcome> = stream::iter(std::mem::take(&mut pending))
            .map(|(task, attempts)| {
                let runner = runner.clone();
                async move { runner.run(task, attempts, last_pass).await }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                TaskOutcome::Completed(item) => {
                    result.attempts += item.attempts;
                    result.completed.push(item);
                }
                TaskOutcome::Failed(item) => {
                    result.attempts += item.attempts;
                    result.failed.push(item);
                }
                TaskOutcome::Deferred { task, attempts } => pending.push((task, attempts)),
            }
        }
    }

    info!(
        completed = result.completed.len(),
        failed = result.failed.len(),
        passes = result.passes,
        attempts = result.attempts,
        "batch finished"
    );
    runner
        .emit(Event::BatchFinished {
            completed: result.completed.len(),
            failed: result.failed.len(),
        })
        .await;

    result
}
