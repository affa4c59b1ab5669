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

//! Fanout cursor operations.
//!
//! One cursor row per subscribing queue marks the highest event position
//! already fanned out. Acquisition combines a row lock (`FOR UPDATE SKIP
//! LOCKED`) with a soft `locked` flag: the row lock is what actually excludes
//! concurrent fanout workers; the flag plus its TTL make the lock observable
//! and recoverable if the holder dies between statements.

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Double, Integer, Jsonb, Text};

use super::models::{CursorRow, TaskWire};
use super::DAL;
use crate::error::BusError;
use crate::models::OutgoingTask;

/// An acquired fanout cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// Row id, used for release and advance.
    pub id: i32,
    /// Queue this cursor belongs to.
    pub queue: String,
    /// Highest position already fanned out.
    pub last_pos: i64,
}

/// Fanout cursor operations.
pub struct CursorDAL<'a> {
    pub(crate) dal: &'a DAL,
}

impl<'a> CursorDAL<'a> {
    /// Creates the cursor row for `queue` at `pos` if it does not exist.
    pub async fn ensure(&self, queue: &str, pos: i64) -> Result<(), BusError> {
        let sql = self.dal.plans.ensure_cursor.clone();
        let queue = queue.to_string();
        self.dal
            .with_conn(move |conn| {
                diesel::sql_query(sql)
                    .bind::<Text, _>(queue)
                    .bind::<BigInt, _>(pos)
                    .execute(conn)
                    .map(|_| ())
            })
            .await
    }

    /// Locks the cursor for `queue`, or returns `None` when another worker
    /// holds it. Contention is not an error.
    pub async fn acquire(
        &self,
        queue: &str,
        lock_ttl_seconds: f64,
    ) -> Result<Option<Cursor>, BusError> {
        let sql = self.dal.plans.acquire_cursor.clone();
        let queue = queue.to_string();
        let rows: Vec<CursorRow> = self
            .dal
            .with_conn(move |conn| {
                diesel::sql_query(sql)
                    .bind::<Text, _>(queue)
                    .bind::<Double, _>(lock_ttl_seconds)
                    .load(conn)
            })
            .await?;
        Ok(rows.into_iter().next().map(|row| Cursor {
            id: row.id,
            queue: row.queue,
            last_pos: row.last_pos,
        }))
    }

    /// Releases the lock without advancing the position.
    pub async fn release(&self, cursor_id: i32) -> Result<(), BusError> {
        let sql = self.dal.plans.release_cursor.clone();
        self.dal
            .with_conn(move |conn| {
                diesel::sql_query(sql)
                    .bind::<Integer, _>(cursor_id)
                    .execute(conn)
                    .map(|_| ())
            })
            .await
    }

    /// Advances the cursor to `pos`, releases the lock, and inserts the
    /// fanned-out tasks — all in one statement, so a crash cannot advance
    /// the cursor without the tasks or vice versa.
    pub async fn advance_and_create_tasks(
        &self,
        cursor_id: i32,
        pos: i64,
        tasks: &[OutgoingTask],
    ) -> Result<(), BusError> {
        let wires: Vec<TaskWire> = tasks.iter().map(TaskWire::from).collect();
        let payload = serde_json::to_value(&wires)?;
        let sql = self.dal.plans.advance_cursor_and_create_tasks.clone();
        self.dal
            .with_conn(move |conn| {
                diesel::sql_query(sql)
                    .bind::<Integer, _>(cursor_id)
                    .bind::<BigInt, _>(pos)
                    .bind::<Jsonb, _>(payload)
                    .execute(conn)
                    .map(|_| ())
            })
            .await
    }

    /// Releases every cursor lock whose TTL has passed. Returns the number
    /// of locks released.
    pub async fn release_stale(&self) -> Result<usize, BusError> {
        let sql = self.dal.plans.release_stale_cursor_locks.clone();
        self.dal
            .with_conn(move |conn| diesel::sql_query(sql).execute(conn))
            .await
    }
}
