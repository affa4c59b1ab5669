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

//! JSON normalization of handler outcomes.
//!
//! Whatever a handler returns, raises, or records through `resolve`/`fail`
//! lands in the archive's `output` column. This module defines the
//! normalization applied on the way there; it is observable by anything
//! querying the archive, so the shapes here are contract.

use serde_json::{json, Value};

/// Flattens an opaque handler error into a plain JSON object with `message`
/// and `stack` fields. `stack` carries the full error chain (and backtrace
/// when captured), so it is never empty.
pub fn flatten_error(error: &anyhow::Error) -> Value {
    json!({
        "message": error.to_string(),
        "stack": format!("{error:?}"),
    })
}

/// Normalizes a completion payload for storage.
///
/// Objects pass through untouched and `null` stays `null`; any other value
/// is wrapped as `{"value": x}` so the column always holds an object when it
/// holds anything.
pub fn completion_payload(value: Value) -> Value {
    match value {
        Value::Object(_) | Value::Null => value,
        other => json!({ "value": other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattened_error_has_message_and_nonempty_stack() {
        let err = anyhow::anyhow!("fail");
        let flat = flatten_error(&err);
        assert_eq!(flat["message"], "fail");
        let stack = flat["stack"].as_str().unwrap();
        assert!(!stack.is_empty());
    }

    #[test]
    fn flattened_error_stack_carries_the_cause_chain() {
        let root = anyhow::anyhow!("connection refused");
        let err = root.context("sending welcome email");
        let flat = flatten_error(&err);
        assert_eq!(flat["message"], "sending welcome email");
        let stack = flat["stack"].as_str().unwrap();
        assert!(stack.contains("connection refused"));
    }

    #[test]
    fn objects_and_null_pass_through() {
        let obj = json!({"success": "with result"});
        assert_eq!(completion_payload(obj.clone()), obj);
        assert_eq!(completion_payload(Value::Null), Value::Null);
    }

    #[test]
    fn scalars_and_arrays_are_wrapped() {
        assert_eq!(completion_payload(json!(5)), json!({"value": 5}));
        assert_eq!(completion_payload(json!("done")), json!({"value": "done"}));
        assert_eq!(completion_payload(json!(true)), json!({"value": true}));
        assert_eq!(
            completion_payload(json!([1, 2])),
            json!({"value": [1, 2]})
        );
    }
}
