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

//! Row and wire types for the storage layer.
//!
//! The wire structs serialize to the short-code JSON shapes consumed by the
//! server-side functions; the renames are storage contract, not style. The
//! row structs are `QueryableByName` targets for the raw plans.

use chrono::{DateTime, Utc};
use diesel::sql_types::{BigInt, Integer, Jsonb, Nullable, SmallInt, Text, Timestamptz};
use diesel::QueryableByName;
use serde::Serialize;
use serde_json::Value;

use crate::models::{
    ClaimedTask, EventRecord, NewEvent, OutgoingTask, TaskConfig, TaskMeta, TaskResolution,
};

/// One element of the `create_bus_tasks` jsonb array.
#[derive(Debug, Serialize)]
pub(crate) struct TaskWire {
    #[serde(rename = "q")]
    pub queue: String,
    /// Initial state; omitted means `created`.
    #[serde(rename = "s", skip_serializing_if = "Option::is_none")]
    pub state: Option<i16>,
    #[serde(rename = "d")]
    pub data: Value,
    #[serde(rename = "md")]
    pub meta: TaskMeta,
    #[serde(rename = "cf")]
    pub config: TaskConfig,
    #[serde(rename = "skey")]
    pub singleton_key: Option<String>,
    #[serde(rename = "saf")]
    pub start_after_seconds: u32,
    #[serde(rename = "eis")]
    pub expire_in_seconds: u32,
}

impl From<&OutgoingTask> for TaskWire {
    fn from(task: &OutgoingTask) -> Self {
        Self {
            queue: task.queue.clone(),
            state: None,
            data: task.data.clone(),
            meta: TaskMeta {
                task_name: task.task_name.clone(),
                trace: task.trigger.clone(),
            },
            config: task.config.clone(),
            singleton_key: task.config.singleton_key.clone(),
            start_after_seconds: task.config.start_after_seconds,
            expire_in_seconds: task.config.expire_in_seconds,
        }
    }
}

/// One element of the `create_bus_events` jsonb array.
#[derive(Debug, Serialize)]
pub(crate) struct EventWire {
    #[serde(rename = "e_n")]
    pub event_name: String,
    #[serde(rename = "d")]
    pub data: Value,
    #[serde(rename = "rid", skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<i32>,
}

impl EventWire {
    pub fn new(event: &NewEvent, retention_days: i32) -> Self {
        Self {
            event_name: event.event_name.clone(),
            data: event.data.clone(),
            retention_days: Some(retention_days),
        }
    }
}

/// One element of the `resolve_tasks` jsonb array.
#[derive(Debug, Serialize)]
pub(crate) struct ResolutionWire {
    pub id: i64,
    pub s: i16,
    pub out: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saf: Option<f64>,
}

impl From<&TaskResolution> for ResolutionWire {
    fn from(resolution: &TaskResolution) -> Self {
        Self {
            id: resolution.id,
            s: resolution.state.as_i16(),
            out: resolution.output.clone(),
            saf: resolution.start_after_seconds,
        }
    }
}

/// Row returned by `get_tasks`.
#[derive(Debug, QueryableByName)]
pub(crate) struct TaskRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    #[diesel(sql_type = Text)]
    pub queue: String,
    #[diesel(sql_type = SmallInt)]
    #[allow(dead_code)]
    pub state: i16,
    #[diesel(sql_type = Nullable<Jsonb>)]
    pub data: Option<Value>,
    #[diesel(sql_type = Nullable<Jsonb>)]
    pub meta_data: Option<Value>,
    #[diesel(sql_type = Jsonb)]
    pub config: Value,
    #[diesel(sql_type = SmallInt)]
    pub retrycount: i16,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    #[allow(dead_code)]
    pub started_on: Option<DateTime<Utc>>,
    #[diesel(sql_type = Timestamptz)]
    #[allow(dead_code)]
    pub created_on: DateTime<Utc>,
    #[diesel(sql_type = diesel::sql_types::Double)]
    pub expire_in_seconds: f64,
}

impl TryFrom<TaskRow> for ClaimedTask {
    type Error = serde_json::Error;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let meta: TaskMeta = serde_json::from_value(row.meta_data.unwrap_or(Value::Null))?;
        let config: TaskConfig = serde_json::from_value(row.config)?;
        Ok(ClaimedTask {
            id: row.id,
            queue: row.queue,
            task_name: meta.task_name,
            trigger: meta.trace,
            data: row.data.unwrap_or(Value::Null),
            retrycount: row.retrycount,
            config,
            expire_in_seconds: row.expire_in_seconds,
        })
    }
}

/// Row returned by the event scan.
#[derive(Debug, QueryableByName)]
pub(crate) struct EventRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    #[diesel(sql_type = Text)]
    pub event_name: String,
    #[diesel(sql_type = Nullable<Jsonb>)]
    pub event_data: Option<Value>,
    #[diesel(sql_type = BigInt)]
    pub pos: i64,
}

impl From<EventRow> for EventRecord {
    fn from(row: EventRow) -> Self {
        EventRecord {
            id: row.id,
            event_name: row.event_name,
            event_data: row.event_data.unwrap_or(Value::Null),
            pos: row.pos,
        }
    }
}

/// Row returned by cursor acquisition.
#[derive(Debug, QueryableByName)]
pub(crate) struct CursorRow {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Text)]
    pub queue: String,
    #[diesel(sql_type = BigInt)]
    pub last_pos: i64,
}

/// Scalar row for `last_event_position`.
#[derive(Debug, QueryableByName)]
pub(crate) struct PositionRow {
    #[diesel(sql_type = BigInt)]
    pub pos: i64,
}

/// Row returned by the expiry candidate scan.
#[derive(Debug, QueryableByName)]
pub(crate) struct ExpireCandidateRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    #[diesel(sql_type = SmallInt)]
    pub retrycount: i16,
    #[diesel(sql_type = Jsonb)]
    pub config: Value,
}
