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

//! Event shapes: the publish-side payload and the committed log record read
//! back by fanout.

use serde_json::Value;

/// A validated event on its way to `publish`.
///
/// Produced by `EventDefinition::from`. Events carry no policy beyond the
/// bus-level retention; they are append-only facts.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Event name; fanout matches subscriptions against it.
    pub event_name: String,
    /// Application payload.
    pub data: Value,
}

/// A committed event read from the log in `pos` order.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Row id.
    pub id: i64,
    /// Event name.
    pub event_name: String,
    /// Application payload.
    pub event_data: Value,
    /// Commit-order position; strictly positive once visible to fanout.
    pub pos: i64,
}
