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

//! The fanout worker: projects committed events onto tasks for one queue.
//!
//! Each step locks the queue's cursor (contention means another worker is
//! fanning out — not an error, just "no work"), reads events strictly after
//! the cursor in position order, asks the registry to synthesize tasks, and
//! advances the cursor while inserting those tasks in a single statement.
//! The cursor therefore never moves without its tasks, and never moves
//! backwards.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::base::PollWorker;
use crate::dal::Cursor;
use crate::error::BusError;
use crate::models::EventRecord;
use crate::registry::Registry;

/// Storage seam for the fanout worker.
#[async_trait]
pub trait FanoutStore: Send + Sync {
    /// Locks this queue's cursor; `None` when another worker holds it.
    async fn acquire_cursor(&self) -> Result<Option<Cursor>, BusError>;

    /// Events strictly after `pos`, ascending, at most `limit`.
    async fn fetch_events(&self, pos: i64, limit: i64) -> Result<Vec<EventRecord>, BusError>;

    /// Releases the cursor lock without advancing.
    async fn release_cursor(&self, cursor_id: i32) -> Result<(), BusError>;

    /// Advances the cursor to `pos`, releases the lock, and inserts `tasks`
    /// atomically.
    async fn advance_cursor(
        &self,
        cursor_id: i32,
        pos: i64,
        tasks: Vec<crate::models::OutgoingTask>,
    ) -> Result<(), BusError>;
}

/// Fanout worker tuning.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Events fetched per step.
    pub fetch_size: i64,
    /// Poll interval when idle.
    pub poll_interval: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            fetch_size: 200,
            poll_interval: Duration::from_millis(1500),
        }
    }
}

/// Per-queue fanout worker.
pub struct FanoutWorker {
    worker: PollWorker,
}

impl FanoutWorker {
    /// Creates a fanout worker over `store` and `registry`. `notify` is the
    /// wake-up handle shared with local publishers.
    pub fn new(
        store: Arc<dyn FanoutStore>,
        registry: Arc<Registry>,
        config: FanoutConfig,
        notify: Arc<Notify>,
    ) -> Self {
        let fetch_size = config.fetch_size;
        let worker = PollWorker::from_fn(
            "fanout-worker",
            config.poll_interval,
            notify,
            move || {
                let store = store.clone();
                let registry = registry.clone();
                async move { step(store, registry, fetch_size).await }
            },
        );
        Self { worker }
    }

    /// Starts the worker loop.
    pub async fn start(&self) {
        self.worker.start().await;
    }

    /// Wakes the loop for an early pass.
    pub fn notify(&self) {
        self.worker.notify();
    }

    /// Stops the loop, waiting for an in-flight pass to finish.
    pub async fn stop(&self) {
        self.worker.stop().await;
    }
}

async fn step(
    store: Arc<dyn FanoutStore>,
    registry: Arc<Registry>,
    fetch_size: i64,
) -> Result<bool, BusError> {
    let Some(cursor) = store.acquire_cursor().await? else {
        // Another worker is fanning out for this queue.
        return Ok(false);
    };

    let events = match store.fetch_events(cursor.last_pos, fetch_size).await {
        Ok(events) => events,
        Err(e) => {
            release_quietly(&store, cursor.id).await;
            return Err(e);
        }
    };

    if events.is_empty() {
        store.release_cursor(cursor.id).await?;
        return Ok(false);
    }

    let tasks = registry.events_to_tasks(&events);
    // Within one fetch the scan guarantees ascending positions.
    let last_pos = events.last().map(|e| e.pos).unwrap_or(cursor.last_pos);

    debug!(
        events = events.len(),
        tasks = tasks.len(),
        from = cursor.last_pos,
        to = last_pos,
        "fanning out events"
    );

    if let Err(e) = store.advance_cursor(cursor.id, last_pos, tasks).await {
        release_quietly(&store, cursor.id).await;
        return Err(e);
    }

    Ok(events.len() as i64 == fetch_size)
}

/// Best-effort release on an error path; the lock TTL recovers the cursor if
/// this fails too.
async fn release_quietly(store: &Arc<dyn FanoutStore>, cursor_id: i32) {
    if let Err(e) = store.release_cursor(cursor_id).await {
        warn!(cursor_id, error = %e, "failed to release cursor after error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutgoingTask, TaskTrigger};
    use crate::registry::{
        task_handler, EventDefinition, Subscription, SubscriptionConfig,
    };
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::timeout;

    struct MemoryStore {
        cursor: Mutex<Cursor>,
        locked: AtomicBool,
        events: Mutex<Vec<EventRecord>>,
        inserted: Mutex<Vec<OutgoingTask>>,
        releases: Mutex<Vec<i32>>,
    }

    impl MemoryStore {
        fn with_events(events: Vec<EventRecord>) -> Self {
            Self {
                cursor: Mutex::new(Cursor {
                    id: 1,
                    queue: "q".into(),
                    last_pos: 0,
                }),
                locked: AtomicBool::new(false),
                events: Mutex::new(events),
                inserted: Mutex::new(Vec::new()),
                releases: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FanoutStore for MemoryStore {
        async fn acquire_cursor(&self) -> Result<Option<Cursor>, BusError> {
            if self.locked.swap(true, Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(Some(self.cursor.lock().clone()))
        }

        async fn fetch_events(&self, pos: i64, limit: i64) -> Result<Vec<EventRecord>, BusError> {
            Ok(self
                .events
                .lock()
                .iter()
                .filter(|e| e.pos > pos)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn release_cursor(&self, cursor_id: i32) -> Result<(), BusError> {
            self.releases.lock().push(cursor_id);
            self.locked.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn advance_cursor(
            &self,
            _cursor_id: i32,
            pos: i64,
            tasks: Vec<OutgoingTask>,
        ) -> Result<(), BusError> {
            self.cursor.lock().last_pos = pos;
            self.inserted.lock().extend(tasks);
            self.locked.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry_with_subscription() -> Arc<Registry> {
        let registry = Registry::new("q").unwrap();
        registry
            .on(
                &EventDefinition::new("E"),
                Subscription {
                    task_name: "on_e".into(),
                    handler: task_handler(|_d, _c| async { Ok(Value::Null) }),
                    config: SubscriptionConfig::default(),
                },
            )
            .unwrap();
        Arc::new(registry)
    }

    fn event(pos: i64) -> EventRecord {
        EventRecord {
            id: pos,
            event_name: "E".into(),
            event_data: json!({"pos": pos}),
            pos,
        }
    }

    #[tokio::test]
    async fn a_pass_projects_events_and_advances_the_cursor() {
        let store = Arc::new(MemoryStore::with_events(vec![event(1), event(2)]));
        let registry = registry_with_subscription();

        let more = step(store.clone(), registry, 200).await.unwrap();
        assert!(!more, "partial batch means no more work");
        assert_eq!(store.cursor.lock().last_pos, 2);

        let inserted = store.inserted.lock();
        assert_eq!(inserted.len(), 2);
        assert!(matches!(
            inserted[0].trigger,
            TaskTrigger::Event { event_id: 1, .. }
        ));
    }

    #[tokio::test]
    async fn a_full_batch_reports_more_work() {
        let store = Arc::new(MemoryStore::with_events(vec![event(1), event(2), event(3)]));
        let registry = registry_with_subscription();

        let more = step(store.clone(), registry.clone(), 2).await.unwrap();
        assert!(more);
        assert_eq!(store.cursor.lock().last_pos, 2);

        let more = step(store.clone(), registry, 2).await.unwrap();
        assert!(!more);
        assert_eq!(store.cursor.lock().last_pos, 3);
    }

    #[tokio::test]
    async fn no_events_unlocks_without_advancing() {
        let store = Arc::new(MemoryStore::with_events(vec![]));
        let registry = registry_with_subscription();

        let more = step(store.clone(), registry, 200).await.unwrap();
        assert!(!more);
        assert_eq!(store.cursor.lock().last_pos, 0);
        assert_eq!(store.releases.lock().as_slice(), &[1]);
    }

    #[tokio::test]
    async fn contention_is_no_work_not_an_error() {
        let store = Arc::new(MemoryStore::with_events(vec![event(1)]));
        store.locked.store(true, Ordering::SeqCst);
        let registry = registry_with_subscription();

        let more = step(store.clone(), registry, 200).await.unwrap();
        assert!(!more);
        assert!(store.inserted.lock().is_empty());
    }

    #[tokio::test]
    async fn the_worker_loop_drains_the_log() {
        let store = Arc::new(MemoryStore::with_events(vec![
            event(1),
            event(2),
            event(3),
            event(4),
            event(5),
        ]));
        let registry = registry_with_subscription();
        let worker = FanoutWorker::new(
            store.clone(),
            registry,
            FanoutConfig {
                fetch_size: 2,
                poll_interval: Duration::from_secs(60),
            },
            Arc::new(Notify::new()),
        );

        worker.start().await;
        timeout(Duration::from_secs(1), async {
            loop {
                if store.inserted.lock().len() == 5 {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        worker.stop().await;

        assert_eq!(store.cursor.lock().last_pos, 5);
        // Cursor positions never decreased while draining.
        let positions: Vec<i64> = store
            .inserted
            .lock()
            .iter()
            .map(|t| match &t.trigger {
                TaskTrigger::Event { event_id, .. } => *event_id,
                TaskTrigger::Direct => unreachable!(),
            })
            .collect();
        assert_eq!(positions, vec![1, 2, 3, 4, 5]);
    }
}
