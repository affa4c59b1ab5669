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

//! Worker loops: the base interval primitive and the three workers built on
//! it (task dispatch, event fanout, maintenance), plus the resolve batcher.

pub mod base;
pub mod batcher;
pub mod fanout;
pub mod maintenance;
pub mod task_worker;

pub use base::{PollWorker, WorkerStep};
pub use batcher::{Batcher, FlushFn};
pub use fanout::{FanoutConfig, FanoutStore, FanoutWorker};
pub use maintenance::{MaintenanceConfig, MaintenanceStore, MaintenanceWorker};
pub use task_worker::{resolution_for, TaskDispatch, TaskWorker, TaskWorkerConfig};
