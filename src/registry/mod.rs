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

//! Per-queue task registry.
//!
//! The registry maps task names to handler functions and event names to
//! task bindings for one queue. It is the routing core shared by every
//! front-end: the database worker drives it through [`Registry::handle_task`]
//! and [`Registry::events_to_tasks`], and the webhook transport drives the
//! very same code paths over HTTP.

pub mod context;
pub mod definition;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::RegistrationError;
use crate::models::{EventRecord, OutgoingTask, PartialTaskConfig, TaskConfig, TaskTrigger};
use crate::util::{completion_payload, flatten_error, with_deadline};

pub use context::TaskContext;
pub use definition::{
    AnyPayload, EventDefinition, PayloadValidator, TaskBuilder, TaskClient, TaskDefinition,
    TypedPayload,
};

use context::Completion;

/// Queue name reserved for internal use.
pub const RESERVED_QUEUE: &str = "__maintenance__";

/// A task handler: an async function from payload and context to a result
/// payload or an opaque error.
pub type TaskHandler =
    Arc<dyn Fn(Value, TaskContext) -> BoxFuture<'static, Result<Value, anyhow::Error>> + Send + Sync>;

/// Lifts an async closure into a [`TaskHandler`].
pub fn task_handler<F, Fut>(f: F) -> TaskHandler
where
    F: Fn(Value, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value, anyhow::Error>> + Send + 'static,
{
    Arc::new(move |data, ctx| Box::pin(f(data, ctx)))
}

/// Subscription config: fixed at registration time, or computed from the
/// event payload at fanout time.
#[derive(Clone)]
pub enum SubscriptionConfig {
    /// The same partial config for every event.
    Static(PartialTaskConfig),
    /// Evaluated against each event's payload during fanout, never earlier.
    Dynamic(Arc<dyn Fn(&Value) -> PartialTaskConfig + Send + Sync>),
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        SubscriptionConfig::Static(PartialTaskConfig::default())
    }
}

impl std::fmt::Debug for SubscriptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionConfig::Static(partial) => {
                f.debug_tuple("Static").field(partial).finish()
            }
            SubscriptionConfig::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl SubscriptionConfig {
    fn materialize(&self, payload: &Value) -> PartialTaskConfig {
        match self {
            SubscriptionConfig::Static(partial) => partial.clone(),
            SubscriptionConfig::Dynamic(f) => f(payload),
        }
    }
}

/// An event subscription: the task to synthesize and how to configure it.
pub struct Subscription {
    /// Name the synthesized tasks are routed under.
    pub task_name: String,
    /// Handler registered for that task name.
    pub handler: TaskHandler,
    /// Config applied to synthesized tasks.
    pub config: SubscriptionConfig,
}

/// Outcome of one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// The task completed with this payload.
    Success(Value),
    /// The handler failed; payload describes the failure.
    Failure(Value),
    /// The handler ran past its wall-clock budget.
    Expired(Value),
}

impl HandlerOutcome {
    /// The payload regardless of variant.
    pub fn payload(&self) -> &Value {
        match self {
            HandlerOutcome::Success(v)
            | HandlerOutcome::Failure(v)
            | HandlerOutcome::Expired(v) => v,
        }
    }
}

struct RegisteredTask {
    handler: TaskHandler,
    config: TaskConfig,
}

struct EventBinding {
    event_name: String,
    task_name: String,
    config: SubscriptionConfig,
}

struct RegistryInner {
    tasks: HashMap<String, RegisteredTask>,
    bindings: Vec<EventBinding>,
}

/// Serializable description of a registry, used by the webhook transport.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RegistryState {
    /// Queue this registry serves.
    pub queue: String,
    /// Registered task names, sorted.
    pub tasks: Vec<String>,
    /// Event bindings as `(event_name, task_name)` pairs, in binding order.
    pub events: Vec<(String, String)>,
}

/// Per-process, per-queue registry of task definitions and event bindings.
pub struct Registry {
    queue: String,
    defaults: TaskConfig,
    inner: RwLock<RegistryInner>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("queue", &self.queue).finish()
    }
}

impl Registry {
    /// Creates a registry for `queue` with library-default task config.
    pub fn new(queue: impl Into<String>) -> Result<Self, RegistrationError> {
        Self::with_defaults(queue, TaskConfig::default())
    }

    /// Creates a registry with a custom base config (the bus passes its own
    /// retention defaults through here).
    pub fn with_defaults(
        queue: impl Into<String>,
        defaults: TaskConfig,
    ) -> Result<Self, RegistrationError> {
        let queue = queue.into();
        if queue == RESERVED_QUEUE {
            return Err(RegistrationError::ReservedQueue(queue));
        }
        if queue.is_empty() {
            return Err(RegistrationError::InvalidQueue(
                "queue name must not be empty".into(),
            ));
        }
        Ok(Self {
            queue,
            defaults,
            inner: RwLock::new(RegistryInner {
                tasks: HashMap::new(),
                bindings: Vec::new(),
            }),
        })
    }

    /// The queue this registry serves.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// The base config synthesized tasks start from.
    pub fn defaults(&self) -> &TaskConfig {
        &self.defaults
    }

    /// Binds `handler` to a task definition.
    ///
    /// Rejects duplicate task names and definitions pinned to a different
    /// queue. `override_config` layers over the definition's defaults.
    pub fn register_task(
        &self,
        definition: &TaskDefinition,
        handler: TaskHandler,
        override_config: Option<PartialTaskConfig>,
    ) -> Result<(), RegistrationError> {
        if let Some(task_queue) = definition.queue() {
            if task_queue != self.queue {
                return Err(RegistrationError::QueueMismatch {
                    task_name: definition.task_name().to_string(),
                    task_queue: task_queue.to_string(),
                    registry_queue: self.queue.clone(),
                });
            }
        }

        let mut config = self.defaults.clone().merged(definition.config());
        if let Some(over) = override_config {
            config = config.merged(&over);
        }

        let mut inner = self.inner.write();
        if inner.tasks.contains_key(definition.task_name()) {
            return Err(RegistrationError::DuplicateTask(
                definition.task_name().to_string(),
            ));
        }
        debug!(task = definition.task_name(), queue = %self.queue, "registered task");
        inner.tasks.insert(
            definition.task_name().to_string(),
            RegisteredTask { handler, config },
        );
        Ok(())
    }

    /// Subscribes this queue to an event: every committed event with the
    /// definition's name fans out into one task per subscription.
    pub fn on(
        &self,
        event: &EventDefinition,
        subscription: Subscription,
    ) -> Result<(), RegistrationError> {
        let mut inner = self.inner.write();
        if inner.tasks.contains_key(&subscription.task_name) {
            return Err(RegistrationError::DuplicateTask(subscription.task_name));
        }
        debug!(
            event = event.event_name(),
            task = %subscription.task_name,
            queue = %self.queue,
            "bound event subscription"
        );
        inner.tasks.insert(
            subscription.task_name.clone(),
            RegisteredTask {
                handler: subscription.handler,
                config: self.defaults.clone(),
            },
        );
        inner.bindings.push(EventBinding {
            event_name: event.event_name().to_string(),
            task_name: subscription.task_name,
            config: subscription.config,
        });
        Ok(())
    }

    /// Projects committed events onto outgoing tasks for this queue.
    ///
    /// One task per matching binding per event, in the order the events were
    /// given (fanout feeds them in ascending position order). Performs no
    /// payload validation: events here are already-committed facts.
    pub fn events_to_tasks(&self, events: &[EventRecord]) -> Vec<OutgoingTask> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        for event in events {
            for binding in inner
                .bindings
                .iter()
                .filter(|b| b.event_name == event.event_name)
            {
                let partial = binding.config.materialize(&event.event_data);
                out.push(OutgoingTask {
                    queue: self.queue.clone(),
                    task_name: binding.task_name.clone(),
                    data: event.event_data.clone(),
                    config: self.defaults.clone().merged(&partial),
                    trigger: TaskTrigger::Event {
                        event_id: event.id,
                        event_name: event.event_name.clone(),
                    },
                });
            }
        }
        out
    }

    /// Runs the handler registered for `ctx.task_name` under the attempt's
    /// wall-clock deadline.
    ///
    /// Outcome precedence: an early `ctx.resolve` wins over a later error, an
    /// early `ctx.fail` wins over any return, otherwise the handler's
    /// return/error decides. A deadline breach maps to [`HandlerOutcome::Expired`]
    /// with the observable `handler execution exceeded <ms>ms` message.
    pub async fn handle_task(&self, data: Value, ctx: TaskContext) -> HandlerOutcome {
        let handler = {
            let inner = self.inner.read();
            inner.tasks.get(&ctx.task_name).map(|t| t.handler.clone())
        };
        let Some(handler) = handler else {
            return HandlerOutcome::Failure(serde_json::json!({
                "message": format!("no handler registered for task {}", ctx.task_name),
            }));
        };

        let limit = deadline_for(ctx.expire_in_seconds);
        let cell = ctx.completion.clone();
        let result = with_deadline(handler(data, ctx), limit).await;

        match cell.take() {
            Some(Completion::Completed(output)) => HandlerOutcome::Success(output),
            Some(Completion::Failed(output)) => HandlerOutcome::Failure(output),
            None => match result {
                Ok(Ok(output)) => HandlerOutcome::Success(output),
                Ok(Err(error)) => HandlerOutcome::Failure(flatten_error(&error)),
                Err(expired) => HandlerOutcome::Expired(
                    completion_payload(serde_json::json!({"message": expired.to_string()})),
                ),
            },
        }
    }

    /// Serializable description of the registry.
    pub fn get_state(&self) -> RegistryState {
        let inner = self.inner.read();
        let mut tasks: Vec<String> = inner.tasks.keys().cloned().collect();
        tasks.sort();
        RegistryState {
            queue: self.queue.clone(),
            tasks,
            events: inner
                .bindings
                .iter()
                .map(|b| (b.event_name.clone(), b.task_name.clone()))
                .collect(),
        }
    }
}

fn deadline_for(expire_in_seconds: f64) -> Duration {
    if expire_in_seconds.is_finite() && expire_in_seconds > 0.0 {
        Duration::from_secs_f64(expire_in_seconds)
    } else {
        Duration::from_secs(u64::from(crate::models::DEFAULT_EXPIRE_IN_SECONDS))
    }
}
