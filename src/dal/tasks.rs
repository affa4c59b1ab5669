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

//! Task table operations: insert, fetch-and-start, resolve.

use diesel::prelude::*;
use diesel::sql_types::{Integer, Jsonb, Text};
use tracing::debug;

use super::models::{ResolutionWire, TaskRow, TaskWire};
use super::DAL;
use crate::error::BusError;
use crate::models::{ClaimedTask, OutgoingTask, TaskResolution};

/// Task table operations.
pub struct TaskDAL<'a> {
    pub(crate) dal: &'a DAL,
}

impl<'a> TaskDAL<'a> {
    /// Inserts a batch of tasks through `create_bus_tasks`.
    ///
    /// Singleton conflicts are swallowed by the server function's
    /// `ON CONFLICT DO NOTHING`: when two publishers race on the same
    /// singleton key, exactly one row persists and neither caller errors.
    pub async fn create(&self, tasks: &[OutgoingTask]) -> Result<(), BusError> {
        if tasks.is_empty() {
            return Ok(());
        }
        let wires: Vec<TaskWire> = tasks.iter().map(TaskWire::from).collect();
        let payload = serde_json::to_value(&wires)?;
        let sql = self.dal.plans.create_tasks.clone();
        self.dal
            .with_conn(move |conn| {
                diesel::sql_query(sql)
                    .bind::<Jsonb, _>(payload)
                    .execute(conn)
                    .map(|_| ())
            })
            .await
    }

    /// Atomically claims up to `amount` pending tasks on `queue`.
    ///
    /// The server function selects candidates with `FOR UPDATE SKIP LOCKED`
    /// and flips them to `active` in the same statement, so a claimed row is
    /// owned by exactly one worker.
    pub async fn fetch_and_start(
        &self,
        queue: &str,
        amount: i32,
    ) -> Result<Vec<ClaimedTask>, BusError> {
        let sql = self.dal.plans.fetch_and_start.clone();
        let queue = queue.to_string();
        let rows: Vec<TaskRow> = self
            .dal
            .with_conn(move |conn| {
                diesel::sql_query(sql)
                    .bind::<Text, _>(queue)
                    .bind::<Integer, _>(amount)
                    .load(conn)
            })
            .await?;

        if !rows.is_empty() {
            debug!(claimed = rows.len(), "claimed tasks");
        }

        rows.into_iter()
            .map(|row| ClaimedTask::try_from(row).map_err(BusError::from))
            .collect()
    }

    /// Applies a batch of resolutions through `resolve_tasks`.
    ///
    /// Terminal states move the row into the archive; `retry` updates it in
    /// place. Rows no longer in `active` state are skipped, which makes a
    /// late resolve after a maintenance expiry a no-op.
    pub async fn resolve(&self, resolutions: &[TaskResolution]) -> Result<(), BusError> {
        if resolutions.is_empty() {
            return Ok(());
        }
        let wires: Vec<ResolutionWire> = resolutions.iter().map(ResolutionWire::from).collect();
        let payload = serde_json::to_value(&wires)?;
        let sql = self.dal.plans.resolve_tasks.clone();
        self.dal
            .with_conn(move |conn| {
                diesel::sql_query(sql)
                    .bind::<Jsonb, _>(payload)
                    .execute(conn)
                    .map(|_| ())
            })
            .await
    }
}
