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

//! # taskbus
//!
//! A durable task and event bus backed by PostgreSQL.
//!
//! Define **tasks** (named units of work with a typed payload and a
//! retry/expiry policy) and **events** (append-only typed facts). Worker
//! processes sharing a logical *queue* name cooperatively execute tasks
//! addressed to that queue; published events are fanned out into tasks for
//! every queue that subscribed a handler, through a per-queue cursor over
//! the event log. All cross-process coordination happens in SQL — row locks,
//! a partial unique index for singletons, and advisory locks — so any number
//! of identical processes can share a queue.
//!
//! ```rust,ignore
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//! use taskbus::{TaskBus, TaskDefinition, task_handler};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Welcome { to: String }
//!
//! # async fn example() -> Result<(), taskbus::BusError> {
//! let bus = TaskBus::builder("emails")
//!     .database_url("postgres://localhost/app")
//!     .build()
//!     .await?;
//!
//! let welcome = TaskDefinition::typed::<Welcome>("welcome");
//! bus.register_task(&welcome, task_handler(|data, _ctx| async move {
//!     // deliver the email...
//!     Ok(json!({"delivered": true}))
//! }), None)?;
//!
//! bus.start().await?;
//! bus.send(welcome.from(Welcome { to: "a@b.c".into() }, None)?).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Delivery semantics: at most one worker executes a given task at a time,
//! and failed tasks are retried up to their retry limit — handlers therefore
//! must be idempotent, since a crash between execution and resolution
//! re-runs the task.

pub mod bus;
pub mod config;
pub mod dal;
pub mod database;
pub mod error;
pub mod models;
pub mod registry;
pub mod util;
pub mod webhook;
pub mod worker;

pub use bus::{TaskBus, TaskBusBuilder};
pub use config::{BusConfig, BusConfigBuilder};
pub use error::{BusError, MigrationError, RegistrationError, ValidationError};
pub use models::{
    ClaimedTask, EventRecord, NewEvent, NewTask, OutgoingTask, PartialTaskConfig, TaskConfig,
    TaskResolution, TaskState, TaskTrigger,
};
pub use registry::{
    task_handler, EventDefinition, HandlerOutcome, Registry, RegistryState, Subscription,
    SubscriptionConfig, TaskBuilder, TaskClient, TaskContext, TaskDefinition, TaskHandler,
    RESERVED_QUEUE,
};
