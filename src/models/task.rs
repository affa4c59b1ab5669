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

//! Task lifecycle states, trigger descriptors, and the task shapes flowing
//! between the registry, the workers, and the storage layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::{PartialTaskConfig, TaskConfig};

/// Lifecycle state of a task.
///
/// The numeric values are stored in the `state` column and the *order* is
/// semantic: SQL predicates use `state < 2` for "pending", `state = 2` for
/// "running", and `state < 4` for "counts toward singleton uniqueness".
/// Renumbering breaks every one of those predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i16)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Inserted, waiting for its `start_after` time.
    Created = 0,
    /// Failed or expired with retries remaining; waiting to run again.
    Retry = 1,
    /// Claimed by a worker.
    Active = 2,
    /// Finished successfully; archived.
    Completed = 3,
    /// Ran out of wall-clock budget with no retries left; archived.
    Expired = 4,
    /// Cancelled before completion; archived.
    Cancelled = 5,
    /// Failed with no retries left; archived.
    Failed = 6,
}

impl TaskState {
    /// The stored `smallint` representation.
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    /// Parses the stored representation.
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(TaskState::Created),
            1 => Some(TaskState::Retry),
            2 => Some(TaskState::Active),
            3 => Some(TaskState::Completed),
            4 => Some(TaskState::Expired),
            5 => Some(TaskState::Cancelled),
            6 => Some(TaskState::Failed),
            _ => None,
        }
    }

    /// True for states past `Active`: the task has left the active table.
    pub fn is_terminal(self) -> bool {
        self.as_i16() > TaskState::Active.as_i16()
    }
}

/// How a task came to exist.
///
/// Serialized under the `trace` key of the task's `meta_data` column, and as
/// the `tr` field of a remote task over the webhook transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskTrigger {
    /// Scheduled by a caller through `send`.
    Direct,
    /// Synthesized by fanout from a committed event.
    Event {
        /// Row id of the source event.
        event_id: i64,
        /// Name of the source event.
        event_name: String,
    },
}

/// The `md` column payload: task routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    /// Name the worker uses to look up the handler.
    #[serde(rename = "tn")]
    pub task_name: String,
    /// Provenance of the task.
    pub trace: TaskTrigger,
}

/// A validated task on its way to `send`.
///
/// Produced by `TaskDefinition::from`; the config stays partial so the bus
/// can materialize its own defaults underneath it.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Task name; the consuming queue must have a handler registered for it.
    pub task_name: String,
    /// Target queue; `None` sends to the bus's own queue.
    pub queue: Option<String>,
    /// Application payload.
    pub data: Value,
    /// Definition config plus send-time overrides.
    pub config: PartialTaskConfig,
}

/// A fully-materialized task ready for insertion.
///
/// This is the shape handed to `create_bus_tasks`, either from `send` (with a
/// [`TaskTrigger::Direct`] trace) or from fanout (with an event trace).
#[derive(Debug, Clone)]
pub struct OutgoingTask {
    /// Destination queue.
    pub queue: String,
    /// Handler lookup name.
    pub task_name: String,
    /// Application payload.
    pub data: Value,
    /// Materialized policy.
    pub config: TaskConfig,
    /// Provenance.
    pub trigger: TaskTrigger,
}

/// A task row claimed by `get_tasks`: state already flipped to `Active`,
/// `started_on` stamped, retrycount bumped if it came out of `Retry`.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    /// Row id.
    pub id: i64,
    /// Queue the row was claimed from.
    pub queue: String,
    /// Handler lookup name (from `meta_data.tn`).
    pub task_name: String,
    /// Provenance (from `meta_data.trace`).
    pub trigger: TaskTrigger,
    /// Application payload.
    pub data: Value,
    /// Retries recorded so far, including the bump for this very attempt.
    pub retrycount: i16,
    /// Retry policy parsed from the `config` column.
    pub config: TaskConfig,
    /// Wall-clock budget for this attempt, in seconds.
    pub expire_in_seconds: f64,
}

/// The outcome of one task attempt, queued for the resolve batch.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResolution {
    /// Row id.
    pub id: i64,
    /// New state: `Retry`, `Completed`, `Expired`, or `Failed`.
    pub state: TaskState,
    /// Normalized completion payload recorded on the row.
    pub output: Value,
    /// For `Retry`, the delay before the row becomes eligible again.
    pub start_after_seconds: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_order_is_total_and_stable() {
        use TaskState::*;
        let states = [Created, Retry, Active, Completed, Expired, Cancelled, Failed];
        for (i, state) in states.iter().enumerate() {
            assert_eq!(state.as_i16(), i as i16);
            assert_eq!(TaskState::from_i16(i as i16), Some(*state));
        }
        assert!(Created < Retry && Retry < Active && Active < Completed);
        assert!(Completed < Expired && Expired < Cancelled && Cancelled < Failed);
        assert_eq!(TaskState::from_i16(7), None);
    }

    #[test]
    fn terminal_states_are_past_active() {
        assert!(!TaskState::Created.is_terminal());
        assert!(!TaskState::Retry.is_terminal());
        assert!(!TaskState::Active.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Expired.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(TaskState::Failed.is_terminal());
    }

    #[test]
    fn trigger_serializes_with_type_tag() {
        assert_eq!(
            serde_json::to_value(TaskTrigger::Direct).unwrap(),
            json!({"type": "direct"})
        );
        assert_eq!(
            serde_json::to_value(TaskTrigger::Event {
                event_id: 42,
                event_name: "user_created".into()
            })
            .unwrap(),
            json!({"type": "event", "event_id": 42, "event_name": "user_created"})
        );
    }

    #[test]
    fn meta_serializes_under_short_codes() {
        let meta = TaskMeta {
            task_name: "welcome".into(),
            trace: TaskTrigger::Direct,
        };
        let wire = serde_json::to_value(&meta).unwrap();
        assert_eq!(wire, json!({"tn": "welcome", "trace": {"type": "direct"}}));
        let back: TaskMeta = serde_json::from_value(wire).unwrap();
        assert_eq!(back, meta);
    }
}
