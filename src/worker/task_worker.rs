/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! The task worker: pops pending tasks, dispatches handlers with bounded
//! concurrency, and synthesizes resolutions as handlers settle.
//!
//! Refill strategy: the worker remembers whether the last pop returned a
//! full batch. While it did, a settling handler that drops the in-flight
//! count below `refill_threshold × max_concurrency` nudges the loop to fetch
//! again immediately instead of waiting out the poll interval.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::task::TaskTracker;
use tracing::debug;

use super::base::PollWorker;
use crate::error::BusError;
use crate::models::{ClaimedTask, TaskResolution, TaskState};
use crate::registry::HandlerOutcome;
use crate::util::completion_payload;

/// Storage and dispatch seam for the task worker.
///
/// The bus implements this over the DAL and registry; tests implement it in
/// memory.
#[async_trait]
pub trait TaskDispatch: Send + Sync {
    /// Claims up to `amount` pending tasks.
    async fn pop_tasks(&self, amount: usize) -> Result<Vec<ClaimedTask>, BusError>;

    /// Runs the handler for `task` under its deadline.
    async fn run_task(&self, task: &ClaimedTask) -> HandlerOutcome;

    /// Enqueues a resolution for batched write-back.
    async fn resolve_task(&self, resolution: TaskResolution);

    /// Flushes all enqueued resolutions and waits for the write.
    async fn flush_resolved(&self);
}

/// Task worker tuning.
#[derive(Debug, Clone)]
pub struct TaskWorkerConfig {
    /// Maximum in-flight handlers per process.
    pub max_concurrency: usize,
    /// Poll interval when idle.
    pub poll_interval: Duration,
    /// Fraction of `max_concurrency` below which an early refetch fires
    /// while more work is known to be available. In `(0, 1]`.
    pub refill_threshold: f64,
}

impl Default for TaskWorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 25,
            poll_interval: Duration::from_millis(1500),
            refill_threshold: 0.33,
        }
    }
}

struct TaskWorkerInner {
    dispatch: Arc<dyn TaskDispatch>,
    config: TaskWorkerConfig,
    in_flight: AtomicUsize,
    has_more: AtomicBool,
    tracker: TaskTracker,
}

/// Cooperative task scheduler: at most `max_concurrency` handlers in flight,
/// opportunistic refills, batched resolutions.
pub struct TaskWorker {
    worker: PollWorker,
    inner: Arc<TaskWorkerInner>,
}

impl TaskWorker {
    /// Creates a task worker. `notify` is the wake-up handle shared with
    /// local producers (debounced `send` notifications land on it).
    pub fn new(
        dispatch: Arc<dyn TaskDispatch>,
        config: TaskWorkerConfig,
        notify: Arc<Notify>,
    ) -> Self {
        let inner = Arc::new(TaskWorkerInner {
            dispatch,
            config: config.clone(),
            in_flight: AtomicUsize::new(0),
            has_more: AtomicBool::new(false),
            tracker: TaskTracker::new(),
        });

        let step_inner = inner.clone();
        let step_notify = notify.clone();
        let worker = PollWorker::from_fn("task-worker", config.poll_interval, notify, move || {
            let inner = step_inner.clone();
            let notify = step_notify.clone();
            async move { step(inner, notify).await }
        });

        Self { worker, inner }
    }

    /// Starts the worker loop.
    pub async fn start(&self) {
        self.inner.tracker.reopen();
        self.worker.start().await;
    }

    /// Wakes the loop for an early fetch.
    pub fn notify(&self) {
        self.worker.notify();
    }

    /// Stops the loop, waits for every in-flight handler to settle, then
    /// flushes the resolution batch.
    pub async fn stop(&self) {
        self.worker.stop().await;
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.dispatch.flush_resolved().await;
    }

    /// Number of handlers currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }
}

async fn step(inner: Arc<TaskWorkerInner>, notify: Arc<Notify>) -> Result<bool, BusError> {
    let active = inner.in_flight.load(Ordering::SeqCst);
    if active >= inner.config.max_concurrency {
        return Ok(false);
    }

    let amount = inner.config.max_concurrency - active;
    let tasks = inner.dispatch.pop_tasks(amount).await?;
    inner
        .has_more
        .store(tasks.len() == amount, Ordering::SeqCst);

    if !tasks.is_empty() {
        debug!(count = tasks.len(), requested = amount, "dispatching tasks");
    }

    for task in tasks {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let inner = inner.clone();
        let notify = notify.clone();
        let tracker = inner.tracker.clone();
        let _ = tracker.spawn(async move {
            let outcome = inner.dispatch.run_task(&task).await;
            let resolution = resolution_for(&task, outcome);
            inner.dispatch.resolve_task(resolution).await;

            let remaining = inner.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
            let threshold =
                inner.config.refill_threshold * inner.config.max_concurrency as f64;
            if inner.has_more.load(Ordering::SeqCst) && (remaining as f64) < threshold {
                notify.notify_one();
            }
        });
    }

    // Refills are driven by settling handlers (above), not by hot-looping
    // the step: a full pop means the worker is now at capacity anyway.
    Ok(false)
}

/// Maps a handler outcome onto the task's next state.
///
/// Success completes. Failure and expiry retry while `retrycount` is below
/// the task's retry limit, with `retry_delay · 2^retrycount` seconds of
/// backoff when enabled; past the limit they go terminal — `failed` for a
/// handler failure, `expired` for a deadline breach.
pub fn resolution_for(task: &ClaimedTask, outcome: HandlerOutcome) -> TaskResolution {
    let (output, terminal) = match outcome {
        HandlerOutcome::Success(output) => {
            return TaskResolution {
                id: task.id,
                state: TaskState::Completed,
                output: completion_payload(output),
                start_after_seconds: None,
            };
        }
        HandlerOutcome::Failure(output) => (output, TaskState::Failed),
        HandlerOutcome::Expired(output) => (output, TaskState::Expired),
    };

    if task.retrycount < task.config.retry_limit {
        let delay = task.config.retry_delay_seconds as f64;
        let start_after = if task.config.retry_backoff {
            delay * 2f64.powi(task.retrycount as i32)
        } else {
            delay
        };
        TaskResolution {
            id: task.id,
            state: TaskState::Retry,
            output: completion_payload(output),
            start_after_seconds: Some(start_after),
        }
    } else {
        TaskResolution {
            id: task.id,
            state: terminal,
            output: completion_payload(output),
            start_after_seconds: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskConfig, TaskTrigger};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tokio::time::timeout;

    fn claimed(id: i64, retrycount: i16, config: TaskConfig) -> ClaimedTask {
        ClaimedTask {
            id,
            queue: "q".into(),
            task_name: "t".into(),
            trigger: TaskTrigger::Direct,
            data: json!({}),
            retrycount,
            config,
            expire_in_seconds: 300.0,
        }
    }

    #[test]
    fn success_completes_without_reschedule() {
        let task = claimed(1, 0, TaskConfig::default());
        let resolution = resolution_for(&task, HandlerOutcome::Success(json!({"ok": true})));
        assert_eq!(resolution.state, TaskState::Completed);
        assert_eq!(resolution.output, json!({"ok": true}));
        assert_eq!(resolution.start_after_seconds, None);
    }

    #[test]
    fn scalar_success_output_is_wrapped() {
        let task = claimed(1, 0, TaskConfig::default());
        let resolution = resolution_for(&task, HandlerOutcome::Success(json!("done")));
        assert_eq!(resolution.output, json!({"value": "done"}));
    }

    #[test]
    fn failure_below_the_limit_retries_with_flat_delay() {
        let config = TaskConfig {
            retry_limit: 2,
            retry_delay_seconds: 1,
            retry_backoff: false,
            ..TaskConfig::default()
        };
        let task = claimed(1, 0, config);
        let resolution = resolution_for(&task, HandlerOutcome::Failure(json!({"message": "x"})));
        assert_eq!(resolution.state, TaskState::Retry);
        assert_eq!(resolution.start_after_seconds, Some(1.0));
    }

    #[test]
    fn backoff_doubles_with_each_recorded_retry() {
        let config = TaskConfig {
            retry_limit: 8,
            retry_delay_seconds: 2,
            retry_backoff: true,
            ..TaskConfig::default()
        };
        for (retrycount, expected) in [(0, 2.0), (1, 4.0), (2, 8.0), (3, 16.0)] {
            let task = claimed(1, retrycount, config.clone());
            let resolution =
                resolution_for(&task, HandlerOutcome::Failure(json!({"message": "x"})));
            assert_eq!(resolution.start_after_seconds, Some(expected));
        }
    }

    #[test]
    fn failure_at_the_limit_goes_failed() {
        let config = TaskConfig {
            retry_limit: 2,
            ..TaskConfig::default()
        };
        let task = claimed(1, 2, config);
        let resolution = resolution_for(&task, HandlerOutcome::Failure(json!({"message": "x"})));
        assert_eq!(resolution.state, TaskState::Failed);
        assert_eq!(resolution.start_after_seconds, None);
    }

    #[test]
    fn expiry_at_the_limit_goes_expired_not_failed() {
        let config = TaskConfig {
            retry_limit: 1,
            ..TaskConfig::default()
        };
        let task = claimed(1, 1, config);
        let resolution = resolution_for(&task, HandlerOutcome::Expired(json!({"message": "x"})));
        assert_eq!(resolution.state, TaskState::Expired);
    }

    #[test]
    fn expiry_below_the_limit_still_retries() {
        let config = TaskConfig {
            retry_limit: 1,
            retry_delay_seconds: 5,
            ..TaskConfig::default()
        };
        let task = claimed(1, 0, config);
        let resolution = resolution_for(&task, HandlerOutcome::Expired(json!({"message": "x"})));
        assert_eq!(resolution.state, TaskState::Retry);
        assert_eq!(resolution.start_after_seconds, Some(5.0));
    }

    // ─── worker loop tests over an in-memory dispatch ───

    struct ScriptedDispatch {
        batches: Mutex<Vec<Vec<ClaimedTask>>>,
        pops: AtomicUsize,
        resolved: Mutex<Vec<TaskResolution>>,
        flushes: AtomicUsize,
    }

    impl ScriptedDispatch {
        fn new(batches: Vec<Vec<ClaimedTask>>) -> Self {
            Self {
                batches: Mutex::new(batches),
                pops: AtomicUsize::new(0),
                resolved: Mutex::new(Vec::new()),
                flushes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TaskDispatch for ScriptedDispatch {
        async fn pop_tasks(&self, amount: usize) -> Result<Vec<ClaimedTask>, BusError> {
            self.pops.fetch_add(1, Ordering::SeqCst);
            let mut batches = self.batches.lock();
            if batches.is_empty() {
                return Ok(Vec::new());
            }
            let mut batch = batches.remove(0);
            batch.truncate(amount);
            Ok(batch)
        }

        async fn run_task(&self, _task: &ClaimedTask) -> HandlerOutcome {
            HandlerOutcome::Success(Value::Null)
        }

        async fn resolve_task(&self, resolution: TaskResolution) {
            self.resolved.lock().push(resolution);
        }

        async fn flush_resolved(&self) {
            self.flushes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn worker_with(
        dispatch: Arc<ScriptedDispatch>,
        max_concurrency: usize,
    ) -> TaskWorker {
        TaskWorker::new(
            dispatch,
            TaskWorkerConfig {
                max_concurrency,
                poll_interval: Duration::from_secs(60),
                refill_threshold: 0.5,
            },
            Arc::new(Notify::new()),
        )
    }

    #[tokio::test]
    async fn dispatches_and_resolves_a_batch() {
        let tasks = vec![
            claimed(1, 0, TaskConfig::default()),
            claimed(2, 0, TaskConfig::default()),
        ];
        let dispatch = Arc::new(ScriptedDispatch::new(vec![tasks]));
        let worker = worker_with(dispatch.clone(), 4);

        worker.start().await;
        timeout(Duration::from_secs(1), async {
            loop {
                if dispatch.resolved.lock().len() == 2 {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        worker.stop().await;

        let resolved = dispatch.resolved.lock();
        assert!(resolved.iter().all(|r| r.state == TaskState::Completed));
    }

    #[tokio::test]
    async fn a_full_batch_triggers_an_early_refetch() {
        // First pop fills the worker (2 of 2); the settle-side notify must
        // drive a second pop long before the 60s poll interval.
        let first = vec![
            claimed(1, 0, TaskConfig::default()),
            claimed(2, 0, TaskConfig::default()),
        ];
        let second = vec![claimed(3, 0, TaskConfig::default())];
        let dispatch = Arc::new(ScriptedDispatch::new(vec![first, second]));
        let worker = worker_with(dispatch.clone(), 2);

        worker.start().await;
        timeout(Duration::from_secs(1), async {
            loop {
                if dispatch.resolved.lock().len() == 3 {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        worker.stop().await;
        assert!(dispatch.pops.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn stop_flushes_the_resolution_batch() {
        let dispatch = Arc::new(ScriptedDispatch::new(vec![]));
        let worker = worker_with(dispatch.clone(), 2);
        worker.start().await;
        worker.stop().await;
        assert_eq!(dispatch.flushes.load(Ordering::SeqCst), 1);
    }
}
