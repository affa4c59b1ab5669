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

//! Per-task retry and expiry configuration.
//!
//! A [`TaskConfig`] is the fully-materialized policy stored with a task row.
//! Definitions and subscriptions carry a [`PartialTaskConfig`] instead, so
//! that bus-level defaults (archive retention, for instance) can be applied
//! at send or fanout time without the definition knowing about them.
//!
//! Only the retry policy and archive retention travel in the `cf` column;
//! scheduling (`saf`), expiry (`eis`) and the singleton key are separate
//! columns on the task row. The serde renames below are the storage contract
//! and must not change.

use serde::{Deserialize, Serialize};

/// Default number of retries after the first attempt.
pub const DEFAULT_RETRY_LIMIT: i16 = 3;
/// Default delay between attempts, in seconds.
pub const DEFAULT_RETRY_DELAY_SECONDS: u32 = 5;
/// Default wall-clock budget for a single handler invocation, in seconds.
pub const DEFAULT_EXPIRE_IN_SECONDS: u32 = 300;
/// Default archive retention for completed tasks: seven days.
pub const DEFAULT_KEEP_IN_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Materialized task policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// How many times a failing task is rescheduled before it goes terminal.
    #[serde(rename = "r_l")]
    pub retry_limit: i16,

    /// Base delay before a retry becomes eligible, in seconds.
    #[serde(rename = "r_d")]
    pub retry_delay_seconds: u32,

    /// When set, the retry delay doubles with every recorded retry.
    #[serde(rename = "r_b")]
    pub retry_backoff: bool,

    /// How long the archived row is kept after completion, in seconds.
    #[serde(rename = "ki_s")]
    pub keep_in_seconds: u64,

    /// Earliest-start offset from insertion, in seconds.
    #[serde(skip, default)]
    pub start_after_seconds: u32,

    /// Wall-clock budget for one handler invocation, in seconds.
    #[serde(skip, default = "default_expire_in")]
    pub expire_in_seconds: u32,

    /// Uniqueness scope within the queue across non-terminal states.
    #[serde(skip, default)]
    pub singleton_key: Option<String>,
}

fn default_expire_in() -> u32 {
    DEFAULT_EXPIRE_IN_SECONDS
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_delay_seconds: DEFAULT_RETRY_DELAY_SECONDS,
            retry_backoff: false,
            keep_in_seconds: DEFAULT_KEEP_IN_SECONDS,
            start_after_seconds: 0,
            expire_in_seconds: DEFAULT_EXPIRE_IN_SECONDS,
            singleton_key: None,
        }
    }
}

impl TaskConfig {
    /// Returns a copy with every field present in `partial` overridden.
    pub fn merged(mut self, partial: &PartialTaskConfig) -> Self {
        if let Some(v) = partial.retry_limit {
            self.retry_limit = v;
        }
        if let Some(v) = partial.retry_delay_seconds {
            self.retry_delay_seconds = v;
        }
        if let Some(v) = partial.retry_backoff {
            self.retry_backoff = v;
        }
        if let Some(v) = partial.keep_in_seconds {
            self.keep_in_seconds = v;
        }
        if let Some(v) = partial.start_after_seconds {
            self.start_after_seconds = v;
        }
        if let Some(v) = partial.expire_in_seconds {
            self.expire_in_seconds = v;
        }
        if let Some(ref v) = partial.singleton_key {
            self.singleton_key = Some(v.clone());
        }
        self
    }
}

/// A partially-specified [`TaskConfig`].
///
/// Unset fields fall through to the next layer: definition defaults, then
/// send-time overrides, then the bus-level base config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialTaskConfig {
    /// See [`TaskConfig::retry_limit`].
    pub retry_limit: Option<i16>,
    /// See [`TaskConfig::retry_delay_seconds`].
    pub retry_delay_seconds: Option<u32>,
    /// See [`TaskConfig::retry_backoff`].
    pub retry_backoff: Option<bool>,
    /// See [`TaskConfig::keep_in_seconds`].
    pub keep_in_seconds: Option<u64>,
    /// See [`TaskConfig::start_after_seconds`].
    pub start_after_seconds: Option<u32>,
    /// See [`TaskConfig::expire_in_seconds`].
    pub expire_in_seconds: Option<u32>,
    /// See [`TaskConfig::singleton_key`].
    pub singleton_key: Option<String>,
}

impl PartialTaskConfig {
    /// An empty partial config; every field falls through.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry limit.
    pub fn retry_limit(mut self, value: i16) -> Self {
        self.retry_limit = Some(value);
        self
    }

    /// Sets the base retry delay in seconds.
    pub fn retry_delay_seconds(mut self, value: u32) -> Self {
        self.retry_delay_seconds = Some(value);
        self
    }

    /// Enables or disables exponential backoff.
    pub fn retry_backoff(mut self, value: bool) -> Self {
        self.retry_backoff = Some(value);
        self
    }

    /// Sets the archive retention in seconds.
    pub fn keep_in_seconds(mut self, value: u64) -> Self {
        self.keep_in_seconds = Some(value);
        self
    }

    /// Sets the earliest-start offset in seconds.
    pub fn start_after_seconds(mut self, value: u32) -> Self {
        self.start_after_seconds = Some(value);
        self
    }

    /// Sets the handler wall-clock budget in seconds.
    pub fn expire_in_seconds(mut self, value: u32) -> Self {
        self.expire_in_seconds = Some(value);
        self
    }

    /// Sets the singleton key.
    pub fn singleton_key(mut self, value: impl Into<String>) -> Self {
        self.singleton_key = Some(value.into());
        self
    }

    /// Layers `other` on top of this partial; fields set in `other` win.
    pub fn overlaid(mut self, other: &PartialTaskConfig) -> Self {
        if other.retry_limit.is_some() {
            self.retry_limit = other.retry_limit;
        }
        if other.retry_delay_seconds.is_some() {
            self.retry_delay_seconds = other.retry_delay_seconds;
        }
        if other.retry_backoff.is_some() {
            self.retry_backoff = other.retry_backoff;
        }
        if other.keep_in_seconds.is_some() {
            self.keep_in_seconds = other.keep_in_seconds;
        }
        if other.start_after_seconds.is_some() {
            self.start_after_seconds = other.start_after_seconds;
        }
        if other.expire_in_seconds.is_some() {
            self.expire_in_seconds = other.expire_in_seconds;
        }
        if other.singleton_key.is_some() {
            self.singleton_key = other.singleton_key.clone();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = TaskConfig::default();
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.retry_delay_seconds, 5);
        assert!(!config.retry_backoff);
        assert_eq!(config.start_after_seconds, 0);
        assert_eq!(config.expire_in_seconds, 300);
        assert_eq!(config.keep_in_seconds, 604_800);
        assert!(config.singleton_key.is_none());
    }

    #[test]
    fn merged_overrides_only_set_fields() {
        let partial = PartialTaskConfig::new().retry_limit(8).retry_backoff(true);
        let config = TaskConfig::default().merged(&partial);
        assert_eq!(config.retry_limit, 8);
        assert!(config.retry_backoff);
        // Untouched fields keep their defaults.
        assert_eq!(config.retry_delay_seconds, 5);
        assert_eq!(config.expire_in_seconds, 300);
    }

    #[test]
    fn overlaid_later_layer_wins() {
        let base = PartialTaskConfig::new().retry_limit(2).expire_in_seconds(10);
        let over = PartialTaskConfig::new().retry_limit(5);
        let merged = base.overlaid(&over);
        assert_eq!(merged.retry_limit, Some(5));
        assert_eq!(merged.expire_in_seconds, Some(10));
    }

    #[test]
    fn wire_shape_uses_short_codes_only() {
        let config = TaskConfig {
            retry_limit: 2,
            retry_delay_seconds: 1,
            retry_backoff: true,
            keep_in_seconds: 60,
            start_after_seconds: 9,
            expire_in_seconds: 30,
            singleton_key: Some("k".into()),
        };
        let wire = serde_json::to_value(&config).unwrap();
        assert_eq!(
            wire,
            serde_json::json!({"r_l": 2, "r_d": 1, "r_b": true, "ki_s": 60})
        );
    }

    #[test]
    fn wire_config_roundtrips_with_defaults_for_local_fields() {
        let wire = serde_json::json!({"r_l": 1, "r_d": 7, "r_b": false, "ki_s": 120});
        let config: TaskConfig = serde_json::from_value(wire).unwrap();
        assert_eq!(config.retry_limit, 1);
        assert_eq!(config.retry_delay_seconds, 7);
        assert_eq!(config.keep_in_seconds, 120);
        // Columns that never travel in `cf` come back as defaults.
        assert_eq!(config.expire_in_seconds, 300);
        assert!(config.singleton_key.is_none());
    }
}
