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

//! Small shared primitives: deadline racing, notify debouncing, and JSON
//! normalization of handler outcomes.

pub mod deadline;
pub mod debounce;
pub mod json_error;

pub use deadline::{with_deadline, DeadlineExceeded};
pub use debounce::Debouncer;
pub use json_error::{completion_payload, flatten_error};
