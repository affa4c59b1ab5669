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

//! Webhook transport: an HTTP front-end over the same registry the
//! database-backed workers use. Inbound requests invoke handlers or fan
//! events out; outbound `send`/`publish` go to an external dispatcher.

pub mod server;
pub mod service;
pub mod signature;

pub use server::{router, WebhookState};
pub use service::{RemoteBus, WebhookService};
pub use signature::{compute_signature, verify_signature, SIGNATURE_HEADER};
