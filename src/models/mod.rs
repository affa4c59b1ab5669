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

//! Domain models shared across the storage layer, the workers, and the
//! registry: task states and configs, trigger descriptors, and the in-memory
//! representations of rows on their way into and out of the database.

mod config;
mod event;
mod task;

pub use config::{
    PartialTaskConfig, TaskConfig, DEFAULT_EXPIRE_IN_SECONDS, DEFAULT_KEEP_IN_SECONDS,
    DEFAULT_RETRY_DELAY_SECONDS, DEFAULT_RETRY_LIMIT,
};
pub use event::{EventRecord, NewEvent};
pub use task::{
    ClaimedTask, NewTask, OutgoingTask, TaskMeta, TaskResolution, TaskState, TaskTrigger,
};
