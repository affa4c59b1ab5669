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

//! The outbound half of the webhook transport.
//!
//! Instead of writing to PostgreSQL, a webhook-fronted service hands its
//! tasks and events to an external dispatcher. [`WebhookService`] is that
//! dispatcher's contract; [`RemoteBus`] is the drop-in `send`/`publish`
//! surface over it, reusing the same registry and validation code paths as
//! the database-backed bus.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BusError;
use crate::models::{NewEvent, NewTask, OutgoingTask};
use crate::registry::Registry;

/// Contract of the external dispatcher behind the webhook transport.
#[async_trait]
pub trait WebhookService: Send + Sync {
    /// Hands off published events for durable dispatch.
    async fn submit_events(&self, events: Vec<NewEvent>) -> Result<(), BusError>;

    /// Hands off materialized tasks for durable dispatch.
    async fn submit_tasks(&self, tasks: Vec<OutgoingTask>) -> Result<(), BusError>;
}

/// A bus front-end whose `send`/`publish` go out over HTTP instead of SQL.
pub struct RemoteBus {
    registry: Arc<Registry>,
    service: Arc<dyn WebhookService>,
}

impl RemoteBus {
    /// Wraps `registry` and `service` into a publish surface.
    pub fn new(registry: Arc<Registry>, service: Arc<dyn WebhookService>) -> Self {
        Self { registry, service }
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Submits a task to the dispatcher, materialized exactly as the
    /// database-backed bus would materialize it.
    pub async fn send(&self, task: NewTask) -> Result<(), BusError> {
        let outgoing = crate::bus::materialize_task(
            task,
            self.registry.queue(),
            self.registry.defaults(),
        );
        self.service.submit_tasks(vec![outgoing]).await
    }

    /// Submits an event to the dispatcher.
    pub async fn publish(&self, event: NewEvent) -> Result<(), BusError> {
        self.service.submit_events(vec![event]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PartialTaskConfig, TaskTrigger};
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingService {
        events: Mutex<Vec<NewEvent>>,
        tasks: Mutex<Vec<OutgoingTask>>,
    }

    #[async_trait]
    impl WebhookService for RecordingService {
        async fn submit_events(&self, events: Vec<NewEvent>) -> Result<(), BusError> {
            self.events.lock().extend(events);
            Ok(())
        }

        async fn submit_tasks(&self, tasks: Vec<OutgoingTask>) -> Result<(), BusError> {
            self.tasks.lock().extend(tasks);
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_materializes_and_submits() {
        let registry = Arc::new(Registry::new("emails").unwrap());
        let service = Arc::new(RecordingService::default());
        let remote = RemoteBus::new(registry, service.clone());

        remote
            .send(NewTask {
                task_name: "welcome".into(),
                queue: None,
                data: json!({"to": "a@b.c"}),
                config: PartialTaskConfig::new().retry_limit(1),
            })
            .await
            .unwrap();

        let tasks = service.tasks.lock();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].queue, "emails");
        assert_eq!(tasks[0].config.retry_limit, 1);
        assert_eq!(tasks[0].trigger, TaskTrigger::Direct);
    }

    #[tokio::test]
    async fn publish_submits_the_event() {
        let registry = Arc::new(Registry::new("emails").unwrap());
        let service = Arc::new(RecordingService::default());
        let remote = RemoteBus::new(registry, service.clone());

        remote
            .publish(NewEvent {
                event_name: "user_created".into(),
                data: json!({"id": 9}),
            })
            .await
            .unwrap();

        let events = service.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name, "user_created");
    }
}
