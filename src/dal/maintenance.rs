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

//! Maintenance operations: expiry of stuck active tasks, retention-based
//! deletion of events and archived tasks.

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Jsonb};
use serde_json::json;
use tracing::debug;

use super::models::{ExpireCandidateRow, ResolutionWire};
use super::DAL;
use crate::error::BusError;
use crate::models::{TaskConfig, TaskState};

/// Maintenance operations.
pub struct MaintenanceDAL<'a> {
    pub(crate) dal: &'a DAL,
}

impl<'a> MaintenanceDAL<'a> {
    /// Expires active tasks whose wall-clock budget has passed.
    ///
    /// Candidates are locked with `FOR UPDATE SKIP LOCKED` and resolved
    /// through `resolve_tasks` inside the same transaction: back to `retry`
    /// when retries remain (honoring the task's backoff policy), otherwise to
    /// the terminal `expired` state. Returns the number of tasks touched.
    pub async fn expire_active(&self, limit: i64) -> Result<usize, BusError> {
        let select_sql = self.dal.plans.select_expire_candidates.clone();
        let resolve_sql = self.dal.plans.resolve_tasks.clone();
        let expired = self
            .dal
            .with_conn(move |conn| {
                conn.transaction::<usize, diesel::result::Error, _>(|conn| {
                    let rows: Vec<ExpireCandidateRow> = diesel::sql_query(select_sql)
                        .bind::<BigInt, _>(limit)
                        .load(conn)?;
                    if rows.is_empty() {
                        return Ok(0);
                    }

                    let resolutions: Vec<ResolutionWire> =
                        rows.iter().map(expiry_resolution).collect();
                    let payload = serde_json::to_value(&resolutions).map_err(|e| {
                        diesel::result::Error::SerializationError(Box::new(e))
                    })?;
                    diesel::sql_query(resolve_sql)
                        .bind::<Jsonb, _>(payload)
                        .execute(conn)?;
                    Ok(rows.len())
                })
            })
            .await?;

        if expired > 0 {
            debug!(expired, "expired stuck active tasks");
        }
        Ok(expired)
    }

    /// Deletes events past their retention date. Returns the number deleted.
    pub async fn delete_expired_events(&self) -> Result<usize, BusError> {
        let sql = self.dal.plans.delete_expired_events.clone();
        self.dal
            .with_conn(move |conn| diesel::sql_query(sql).execute(conn))
            .await
    }

    /// Deletes archived tasks past `keep_until`. Returns the number deleted.
    pub async fn purge_archived_tasks(&self) -> Result<usize, BusError> {
        let sql = self.dal.plans.purge_archived_tasks.clone();
        self.dal
            .with_conn(move |conn| diesel::sql_query(sql).execute(conn))
            .await
    }
}

/// Computes the resolution for one expiry candidate: retry with the task's
/// own delay policy while retries remain, terminal `expired` otherwise.
fn expiry_resolution(row: &ExpireCandidateRow) -> ResolutionWire {
    let config: TaskConfig =
        serde_json::from_value(row.config.clone()).unwrap_or_default();
    let output = json!({"message": "task execution expired"});

    if row.retrycount < config.retry_limit {
        let delay = config.retry_delay_seconds as f64;
        let saf = if config.retry_backoff {
            delay * 2f64.powi(row.retrycount as i32)
        } else {
            delay
        };
        ResolutionWire {
            id: row.id,
            s: TaskState::Retry.as_i16(),
            out: output,
            saf: Some(saf),
        }
    } else {
        ResolutionWire {
            id: row.id,
            s: TaskState::Expired.as_i16(),
            out: output,
            saf: None,
        }
    }
}
