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

//! The inbound half of the webhook transport.
//!
//! The dispatcher POSTs `{t: true, b: <task>}` to invoke a handler, or
//! `{e: true, b: <event>}` to fan an event out through this registry's
//! bindings and hand the synthesized tasks back to the dispatcher. The
//! registry code path is identical to the database-backed worker's.
//!
//! When a signing secret is configured, the raw body's HMAC is verified
//! before anything is parsed.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::service::WebhookService;
use super::signature::{verify_signature, SIGNATURE_HEADER};
use crate::models::{EventRecord, TaskTrigger};
use crate::registry::{Registry, TaskContext};
use crate::util::completion_payload;

/// Shared state of the webhook handler.
pub struct WebhookState {
    registry: Arc<Registry>,
    service: Arc<dyn WebhookService>,
    signing_secret: Option<Vec<u8>>,
}

impl WebhookState {
    /// Creates handler state. With a `signing_secret`, every request must
    /// carry a valid `x-body-signature`.
    pub fn new(
        registry: Arc<Registry>,
        service: Arc<dyn WebhookService>,
        signing_secret: Option<Vec<u8>>,
    ) -> Self {
        Self {
            registry,
            service,
            signing_secret,
        }
    }
}

/// Builds the webhook router: a single POST endpoint at `/`.
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new().route("/", post(handle)).with_state(state)
}

/// Request envelope: exactly one of `t` or `e` marks the payload kind.
#[derive(Debug, Deserialize)]
struct IncomingBody {
    #[serde(default)]
    t: bool,
    #[serde(default)]
    e: bool,
    b: Value,
}

/// A task invocation pushed by the dispatcher.
#[derive(Debug, Deserialize)]
struct IncomingRemoteTask {
    id: i64,
    #[serde(rename = "tn")]
    task_name: String,
    #[serde(rename = "d")]
    data: Value,
    #[serde(rename = "es")]
    expire_seconds: f64,
    #[serde(rename = "r")]
    retried: i16,
    #[serde(rename = "tr", default = "default_trigger")]
    trigger: TaskTrigger,
}

fn default_trigger() -> TaskTrigger {
    TaskTrigger::Direct
}

/// An event pushed by the dispatcher for fanout through this registry.
#[derive(Debug, Deserialize)]
struct IncomingRemoteEvent {
    id: i64,
    #[serde(rename = "n")]
    event_name: String,
    #[serde(rename = "d")]
    data: Value,
}

async fn handle(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(ref secret) = state.signing_secret {
        let Some(signature) = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return (
                StatusCode::FORBIDDEN,
                format!("forbidden: missing {SIGNATURE_HEADER}"),
            )
                .into_response();
        };
        if !verify_signature(&body, signature, secret) {
            warn!("webhook body signature mismatch");
            return (StatusCode::FORBIDDEN, "forbidden: invalid signature").into_response();
        }
    }

    let Ok(envelope) = serde_json::from_slice::<IncomingBody>(&body) else {
        return unknown_body();
    };

    if envelope.t {
        let Ok(task) = serde_json::from_value::<IncomingRemoteTask>(envelope.b) else {
            return unknown_body();
        };
        debug!(task = %task.task_name, id = task.id, "webhook task invocation");
        let ctx = TaskContext::from_parts(
            task.id,
            task.task_name,
            task.trigger,
            task.retried,
            task.expire_seconds,
        );
        let outcome = state.registry.handle_task(task.data, ctx).await;
        return (
            StatusCode::OK,
            Json(completion_payload(outcome.payload().clone())),
        )
            .into_response();
    }

    if envelope.e {
        let Ok(event) = serde_json::from_value::<IncomingRemoteEvent>(envelope.b) else {
            return unknown_body();
        };
        debug!(event = %event.event_name, id = event.id, "webhook event fanout");
        let record = EventRecord {
            id: event.id,
            event_name: event.event_name,
            event_data: event.data,
            pos: 0,
        };
        let tasks = state.registry.events_to_tasks(std::slice::from_ref(&record));
        let count = tasks.len();
        if let Err(e) = state.service.submit_tasks(tasks).await {
            warn!(error = %e, "webhook fanout submission failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"message": e.to_string()})),
            )
                .into_response();
        }
        return (
            StatusCode::OK,
            Json(completion_payload(json!(count))),
        )
            .into_response();
    }

    unknown_body()
}

fn unknown_body() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"message": "unknown body"})),
    )
        .into_response()
}
