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

//! Event log operations.
//!
//! Events are append-only. Insertion goes through `create_bus_events`; the
//! deferred trigger installed by the migrations assigns `pos` at commit time,
//! so a freshly inserted row is invisible to the ordered scan until its
//! transaction commits.

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Jsonb};

use super::models::{EventRow, EventWire, PositionRow};
use super::DAL;
use crate::error::BusError;
use crate::models::{EventRecord, NewEvent};

/// Event log operations.
pub struct EventDAL<'a> {
    pub(crate) dal: &'a DAL,
}

impl<'a> EventDAL<'a> {
    /// Appends a batch of events with the given retention.
    pub async fn create(&self, events: &[NewEvent], retention_days: i32) -> Result<(), BusError> {
        if events.is_empty() {
            return Ok(());
        }
        let wires: Vec<EventWire> = events
            .iter()
            .map(|e| EventWire::new(e, retention_days))
            .collect();
        let payload = serde_json::to_value(&wires)?;
        let sql = self.dal.plans.create_events.clone();
        self.dal
            .with_conn(move |conn| {
                diesel::sql_query(sql)
                    .bind::<Jsonb, _>(payload)
                    .execute(conn)
                    .map(|_| ())
            })
            .await
    }

    /// Reads up to `limit` committed events strictly after `pos`, in
    /// ascending position order.
    pub async fn fetch_since(&self, pos: i64, limit: i64) -> Result<Vec<EventRecord>, BusError> {
        let sql = self.dal.plans.fetch_events_since.clone();
        let rows: Vec<EventRow> = self
            .dal
            .with_conn(move |conn| {
                diesel::sql_query(sql)
                    .bind::<BigInt, _>(pos)
                    .bind::<BigInt, _>(limit)
                    .load(conn)
            })
            .await?;
        Ok(rows.into_iter().map(EventRecord::from).collect())
    }

    /// The highest committed event position, 0 when the log is empty.
    ///
    /// Used at startup to seed a new queue's cursor so it ignores history.
    pub async fn last_position(&self) -> Result<i64, BusError> {
        let sql = self.dal.plans.last_event_position.clone();
        let row: PositionRow = self
            .dal
            .with_conn(move |conn| diesel::sql_query(sql).get_result(conn))
            .await?;
        Ok(row.pos)
    }
}
