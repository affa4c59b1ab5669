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

//! Typed task and event definitions.
//!
//! A definition pairs a name with a payload validator and default config.
//! `from` is the only way to turn application input into something the bus
//! will accept, so every stored payload has passed its schema exactly once —
//! at publish time, in the publishing process.
//!
//! The validator is a seam: [`TypedPayload`] validates by deserializing into
//! a concrete type, which is the serde-native equivalent of an external
//! JSON-schema check. Anything implementing [`PayloadValidator`] can be
//! plugged instead.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{RegistrationError, ValidationError};
use crate::models::{NewEvent, NewTask, PartialTaskConfig};

/// Validates a JSON payload against a schema.
pub trait PayloadValidator: Send + Sync {
    /// Returns a human-readable reason on mismatch.
    fn validate(&self, payload: &Value) -> Result<(), String>;
}

/// Accepts any payload. The default when a definition has no schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyPayload;

impl PayloadValidator for AnyPayload {
    fn validate(&self, _payload: &Value) -> Result<(), String> {
        Ok(())
    }
}

/// Validates by deserializing into `T`.
pub struct TypedPayload<T>(PhantomData<fn() -> T>);

impl<T> TypedPayload<T> {
    /// Creates the validator.
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for TypedPayload<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> PayloadValidator for TypedPayload<T> {
    fn validate(&self, payload: &Value) -> Result<(), String> {
        serde_json::from_value::<T>(payload.clone())
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// A named task shape: payload schema plus default config.
#[derive(Clone)]
pub struct TaskDefinition {
    task_name: String,
    queue: Option<String>,
    validator: Arc<dyn PayloadValidator>,
    config: PartialTaskConfig,
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("task_name", &self.task_name)
            .field("queue", &self.queue)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskDefinition {
    /// A definition that accepts any payload.
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            queue: None,
            validator: Arc::new(AnyPayload),
            config: PartialTaskConfig::default(),
        }
    }

    /// A definition whose payloads must deserialize into `T`.
    pub fn typed<T: DeserializeOwned + 'static>(task_name: impl Into<String>) -> Self {
        Self::new(task_name).with_validator(Arc::new(TypedPayload::<T>::new()))
    }

    /// Pins the definition to a queue. `from` output will route there even
    /// when sent through a bus serving another queue.
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Sets default config for tasks created from this definition.
    pub fn with_config(mut self, config: PartialTaskConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the payload validator.
    pub fn with_validator(mut self, validator: Arc<dyn PayloadValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// The task name.
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// The pinned queue, if any.
    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// The definition's default config.
    pub fn config(&self) -> &PartialTaskConfig {
        &self.config
    }

    /// Validates `input` and builds a sendable task.
    ///
    /// `override_config` is layered over the definition defaults; both stay
    /// partial so bus-level defaults can still apply underneath.
    pub fn from<T: Serialize>(
        &self,
        input: T,
        override_config: Option<PartialTaskConfig>,
    ) -> Result<NewTask, ValidationError> {
        let data = serde_json::to_value(input).map_err(|e| ValidationError::Task {
            name: self.task_name.clone(),
            reason: e.to_string(),
        })?;
        self.validator
            .validate(&data)
            .map_err(|reason| ValidationError::Task {
                name: self.task_name.clone(),
                reason,
            })?;

        let mut config = self.config.clone();
        if let Some(over) = override_config {
            config = config.overlaid(&over);
        }
        Ok(NewTask {
            task_name: self.task_name.clone(),
            queue: self.queue.clone(),
            data,
            config,
        })
    }
}

/// A named event shape.
#[derive(Clone)]
pub struct EventDefinition {
    event_name: String,
    validator: Arc<dyn PayloadValidator>,
}

impl std::fmt::Debug for EventDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDefinition")
            .field("event_name", &self.event_name)
            .finish_non_exhaustive()
    }
}

impl EventDefinition {
    /// A definition that accepts any payload.
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            validator: Arc::new(AnyPayload),
        }
    }

    /// A definition whose payloads must deserialize into `T`.
    pub fn typed<T: DeserializeOwned + 'static>(event_name: impl Into<String>) -> Self {
        Self::new(event_name).with_validator(Arc::new(TypedPayload::<T>::new()))
    }

    /// Replaces the payload validator.
    pub fn with_validator(mut self, validator: Arc<dyn PayloadValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// The event name.
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Validates `input` and builds a publishable event.
    pub fn from<T: Serialize>(&self, input: T) -> Result<NewEvent, ValidationError> {
        let data = serde_json::to_value(input).map_err(|e| ValidationError::Event {
            name: self.event_name.clone(),
            reason: e.to_string(),
        })?;
        self.validator
            .validate(&data)
            .map_err(|reason| ValidationError::Event {
                name: self.event_name.clone(),
                reason,
            })?;
        Ok(NewEvent {
            event_name: self.event_name.clone(),
            data,
        })
    }
}

/// Accumulates task definitions for one queue.
///
/// `compile` freezes the set into an immutable [`TaskClient`] that another
/// process can import to publish typed tasks without owning the handlers.
#[derive(Debug)]
pub struct TaskBuilder {
    queue: String,
    definitions: HashMap<String, TaskDefinition>,
}

impl TaskBuilder {
    /// Starts a builder for `queue`.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            definitions: HashMap::new(),
        }
    }

    /// Adds a definition, pinning it to the builder's queue.
    pub fn define(mut self, definition: TaskDefinition) -> Result<Self, RegistrationError> {
        if let Some(task_queue) = definition.queue() {
            if task_queue != self.queue {
                return Err(RegistrationError::QueueMismatch {
                    task_name: definition.task_name().to_string(),
                    task_queue: task_queue.to_string(),
                    registry_queue: self.queue.clone(),
                });
            }
        }
        let name = definition.task_name().to_string();
        if self.definitions.contains_key(&name) {
            return Err(RegistrationError::DuplicateTask(name));
        }
        let pinned = definition.on_queue(self.queue.clone());
        self.definitions.insert(name, pinned);
        Ok(self)
    }

    /// Freezes the accumulated definitions.
    pub fn compile(self) -> TaskClient {
        TaskClient {
            queue: self.queue,
            definitions: Arc::new(
                self.definitions
                    .into_iter()
                    .map(|(name, def)| (name, Arc::new(def)))
                    .collect(),
            ),
        }
    }
}

/// An immutable name → definition mapping for one queue.
#[derive(Debug, Clone)]
pub struct TaskClient {
    queue: String,
    definitions: Arc<HashMap<String, Arc<TaskDefinition>>>,
}

impl TaskClient {
    /// The queue every definition routes to.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Looks up a definition by task name.
    pub fn definition(&self, task_name: &str) -> Option<&Arc<TaskDefinition>> {
        self.definitions.get(task_name)
    }

    /// All task names in this client.
    pub fn task_names(&self) -> Vec<&str> {
        self.definitions.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Works {
        works: String,
    }

    #[test]
    fn typed_from_accepts_matching_input() {
        let def = TaskDefinition::typed::<Works>("t");
        let task = def.from(json!({"works": "abcd"}), None).unwrap();
        assert_eq!(task.task_name, "t");
        assert_eq!(task.data, json!({"works": "abcd"}));
        assert!(task.queue.is_none());
    }

    #[test]
    fn typed_from_rejects_mismatching_input() {
        let def = TaskDefinition::typed::<Works>("t");
        let err = def.from(json!({"nope": 1}), None).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("invalid input for task t:"), "{msg}");
    }

    #[test]
    fn event_from_is_symmetric() {
        let def = EventDefinition::typed::<Works>("e");
        assert!(def.from(json!({"works": "x"})).is_ok());
        let err = def.from(json!(42)).unwrap_err();
        assert!(err.to_string().starts_with("invalid input for event e:"));
    }

    #[test]
    fn override_config_wins_over_definition_defaults() {
        let def = TaskDefinition::new("t")
            .with_config(PartialTaskConfig::new().retry_limit(2).expire_in_seconds(10));
        let task = def
            .from(
                json!({}),
                Some(PartialTaskConfig::new().retry_limit(6).singleton_key("s")),
            )
            .unwrap();
        assert_eq!(task.config.retry_limit, Some(6));
        assert_eq!(task.config.expire_in_seconds, Some(10));
        assert_eq!(task.config.singleton_key.as_deref(), Some("s"));
    }

    #[test]
    fn builder_rejects_duplicates_and_foreign_queues() {
        let builder = TaskBuilder::new("emails")
            .define(TaskDefinition::new("welcome"))
            .unwrap();
        let err = builder
            .define(TaskDefinition::new("welcome"))
            .unwrap_err();
        assert_eq!(err, RegistrationError::DuplicateTask("welcome".into()));

        let err = TaskBuilder::new("emails")
            .define(TaskDefinition::new("cleanup").on_queue("billing"))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::QueueMismatch { .. }));
    }

    #[test]
    fn compiled_client_pins_definitions_to_the_queue() {
        let client = TaskBuilder::new("emails")
            .define(TaskDefinition::new("welcome"))
            .unwrap()
            .define(TaskDefinition::new("digest"))
            .unwrap()
            .compile();

        assert_eq!(client.queue(), "emails");
        let task = client
            .definition("welcome")
            .unwrap()
            .from(json!({}), None)
            .unwrap();
        assert_eq!(task.queue.as_deref(), Some("emails"));
        let mut names = client.task_names();
        names.sort();
        assert_eq!(names, vec!["digest", "welcome"]);
    }
}
