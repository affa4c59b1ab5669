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

//! Per-invocation task context.
//!
//! Handlers receive a [`TaskContext`] describing the attempt and exposing two
//! short-circuit channels: [`TaskContext::resolve`] completes the task with a
//! payload even if the handler later errors, and [`TaskContext::fail`]
//! records a failure payload even if the handler later returns. Both are
//! one-shot: the first writer wins, later writes are no-ops.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::models::{ClaimedTask, TaskTrigger};

/// Outcome recorded through the context's short-circuit channels.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Completion {
    /// The task completes with this payload regardless of a later error.
    Completed(Value),
    /// The task fails with this payload regardless of a later return.
    Failed(Value),
}

/// One-shot completion cell: first writer wins.
#[derive(Debug, Default)]
pub(crate) struct CompletionCell(Mutex<Option<Completion>>);

impl CompletionCell {
    pub(crate) fn set(&self, completion: Completion) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(completion);
        }
    }

    pub(crate) fn take(&self) -> Option<Completion> {
        self.0.lock().take()
    }
}

/// Execution context handed to a task handler.
#[derive(Clone)]
pub struct TaskContext {
    /// Task row id (or remote id over the webhook transport).
    pub id: i64,
    /// Name the handler was looked up under.
    pub task_name: String,
    /// How the task came to exist.
    pub trigger: TaskTrigger,
    /// Retries recorded so far for this attempt.
    pub retried: i16,
    /// Wall-clock budget for this attempt, in seconds.
    pub expire_in_seconds: f64,
    pub(crate) completion: Arc<CompletionCell>,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("task_name", &self.task_name)
            .field("trigger", &self.trigger)
            .field("retried", &self.retried)
            .field("expire_in_seconds", &self.expire_in_seconds)
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    /// Builds the context for a claimed task.
    pub fn for_task(task: &ClaimedTask) -> Self {
        Self {
            id: task.id,
            task_name: task.task_name.clone(),
            trigger: task.trigger.clone(),
            retried: task.retrycount,
            expire_in_seconds: task.expire_in_seconds,
            completion: Arc::new(CompletionCell::default()),
        }
    }

    /// Builds a context from raw attempt fields (webhook transport).
    pub fn from_parts(
        id: i64,
        task_name: impl Into<String>,
        trigger: TaskTrigger,
        retried: i16,
        expire_in_seconds: f64,
    ) -> Self {
        Self {
            id,
            task_name: task_name.into(),
            trigger,
            retried,
            expire_in_seconds,
            completion: Arc::new(CompletionCell::default()),
        }
    }

    /// Completes the task with `output`, winning over any later handler
    /// error. No-op if an outcome was already recorded.
    pub fn resolve(&self, output: Value) {
        self.completion.set(Completion::Completed(output));
    }

    /// Fails the task with `output`, winning over any later handler return.
    /// No-op if an outcome was already recorded.
    pub fn fail(&self, output: Value) {
        self.completion.set(Completion::Failed(output));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> TaskContext {
        TaskContext::from_parts(1, "t", TaskTrigger::Direct, 0, 300.0)
    }

    #[test]
    fn first_writer_wins() {
        let ctx = ctx();
        ctx.resolve(json!({"first": true}));
        ctx.fail(json!({"second": true}));
        assert_eq!(
            ctx.completion.take(),
            Some(Completion::Completed(json!({"first": true})))
        );
    }

    #[test]
    fn fail_then_resolve_keeps_the_failure() {
        let ctx = ctx();
        ctx.fail(json!({"custom": "failure"}));
        ctx.resolve(json!({"late": true}));
        assert_eq!(
            ctx.completion.take(),
            Some(Completion::Failed(json!({"custom": "failure"})))
        );
    }

    #[test]
    fn take_drains_the_cell() {
        let ctx = ctx();
        ctx.resolve(json!(1));
        assert!(ctx.completion.take().is_some());
        assert!(ctx.completion.take().is_none());
    }

    #[test]
    fn untouched_cell_is_empty() {
        assert!(ctx().completion.take().is_none());
    }
}
