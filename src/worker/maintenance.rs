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

//! The maintenance worker: two independent loops.
//!
//! The expire loop (default 30 s) resolves active tasks that outlived their
//! wall-clock budget — workers that died mid-task leave exactly this trace —
//! and releases fanout cursor locks whose TTL passed. The cleanup loop
//! (default 300 s) enforces retention: expired events and archived tasks
//! past `keep_until` are deleted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::base::PollWorker;
use crate::error::BusError;

/// Storage seam for the maintenance loops.
#[async_trait]
pub trait MaintenanceStore: Send + Sync {
    /// Expires up to `limit` stuck active tasks; returns how many.
    async fn expire_active_tasks(&self, limit: i64) -> Result<usize, BusError>;

    /// Releases cursor locks past their TTL; returns how many.
    async fn release_stale_cursor_locks(&self) -> Result<usize, BusError>;

    /// Deletes events past retention; returns how many.
    async fn delete_expired_events(&self) -> Result<usize, BusError>;

    /// Deletes archived tasks past `keep_until`; returns how many.
    async fn purge_archived_tasks(&self) -> Result<usize, BusError>;
}

/// Maintenance tuning.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Expire loop interval.
    pub expire_interval: Duration,
    /// Cleanup loop interval.
    pub cleanup_interval: Duration,
    /// Maximum tasks expired per pass.
    pub expire_batch_size: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            expire_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(300),
            expire_batch_size: 300,
        }
    }
}

/// The two maintenance loops as one start/stop unit.
pub struct MaintenanceWorker {
    expire: PollWorker,
    cleanup: PollWorker,
}

impl MaintenanceWorker {
    /// Creates the maintenance loops over `store`.
    pub fn new(store: Arc<dyn MaintenanceStore>, config: MaintenanceConfig) -> Self {
        let batch_size = config.expire_batch_size;
        let expire_store = store.clone();
        let expire = PollWorker::from_fn(
            "maintenance-expire",
            config.expire_interval,
            Arc::new(Notify::new()),
            move || {
                let store = expire_store.clone();
                async move {
                    let expired = store.expire_active_tasks(batch_size).await?;
                    let released = store.release_stale_cursor_locks().await?;
                    if expired > 0 || released > 0 {
                        info!(expired, released, "maintenance expire pass");
                    }
                    // A full batch hints that more stuck tasks are waiting.
                    Ok(expired as i64 == batch_size)
                }
            },
        );

        let cleanup = PollWorker::from_fn(
            "maintenance-cleanup",
            config.cleanup_interval,
            Arc::new(Notify::new()),
            move || {
                let store = store.clone();
                async move {
                    let events = store.delete_expired_events().await?;
                    let archived = store.purge_archived_tasks().await?;
                    if events > 0 || archived > 0 {
                        debug!(events, archived, "maintenance cleanup pass");
                    }
                    Ok(false)
                }
            },
        );

        Self { expire, cleanup }
    }

    /// Starts both loops.
    pub async fn start(&self) {
        self.expire.start().await;
        self.cleanup.start().await;
    }

    /// Stops both loops, waiting for in-flight passes.
    pub async fn stop(&self) {
        tokio::join!(self.expire.stop(), self.cleanup.stop());
    }
}
