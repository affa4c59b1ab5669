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

//! Bus configuration.
//!
//! Built through [`BusConfig::builder`]; every knob has a production default.
//! The schema name is destructive to change on an existing deployment — the
//! bus will happily migrate a fresh schema next to the old one.

use std::time::Duration;

use crate::error::BusError;

/// Configuration for a [`crate::bus::TaskBus`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct BusConfig {
    schema: String,
    pool_size: usize,
    retention_in_days: i32,
    keep_in_seconds: u64,
    worker_concurrency: usize,
    worker_interval: Duration,
    worker_refill_factor: f64,
    events_fetch_size: i64,
    expire_interval: Duration,
    cleanup_interval: Duration,
    expire_batch_size: i64,
    cursor_lock_ttl: Duration,
}

impl BusConfig {
    /// Creates a builder with default values.
    pub fn builder() -> BusConfigBuilder {
        BusConfigBuilder::default()
    }

    /// SQL schema the bus tables live in.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Connection pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Default retention for published events, in days.
    pub fn retention_in_days(&self) -> i32 {
        self.retention_in_days
    }

    /// Default archive retention for completed tasks, in seconds.
    pub fn keep_in_seconds(&self) -> u64 {
        self.keep_in_seconds
    }

    /// Maximum in-flight handlers per process.
    pub fn worker_concurrency(&self) -> usize {
        self.worker_concurrency
    }

    /// Task worker poll interval.
    pub fn worker_interval(&self) -> Duration {
        self.worker_interval
    }

    /// Refill threshold as a fraction of concurrency, in `(0, 1]`.
    pub fn worker_refill_factor(&self) -> f64 {
        self.worker_refill_factor
    }

    /// Events fetched per fanout pass.
    pub fn events_fetch_size(&self) -> i64 {
        self.events_fetch_size
    }

    /// Maintenance expire loop interval.
    pub fn expire_interval(&self) -> Duration {
        self.expire_interval
    }

    /// Maintenance cleanup loop interval.
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Maximum tasks expired per maintenance pass.
    pub fn expire_batch_size(&self) -> i64 {
        self.expire_batch_size
    }

    /// TTL on the fanout cursor lock before maintenance reclaims it.
    pub fn cursor_lock_ttl(&self) -> Duration {
        self.cursor_lock_ttl
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfigBuilder::default().build().expect("defaults are valid")
    }
}

/// Builder for [`BusConfig`].
#[derive(Debug, Clone)]
pub struct BusConfigBuilder {
    config: BusConfig,
}

impl Default for BusConfigBuilder {
    fn default() -> Self {
        Self {
            config: BusConfig {
                schema: "taskbus".to_string(),
                pool_size: 10,
                retention_in_days: 30,
                keep_in_seconds: 7 * 24 * 60 * 60,
                worker_concurrency: 25,
                worker_interval: Duration::from_millis(1500),
                worker_refill_factor: 0.33,
                events_fetch_size: 200,
                expire_interval: Duration::from_secs(30),
                cleanup_interval: Duration::from_secs(300),
                expire_batch_size: 300,
                cursor_lock_ttl: Duration::from_secs(60),
            },
        }
    }
}

impl BusConfigBuilder {
    /// Sets the SQL schema name.
    pub fn schema(mut self, value: impl Into<String>) -> Self {
        self.config.schema = value.into();
        self
    }

    /// Sets the connection pool size.
    pub fn pool_size(mut self, value: usize) -> Self {
        self.config.pool_size = value;
        self
    }

    /// Sets the default event retention in days.
    pub fn retention_in_days(mut self, value: i32) -> Self {
        self.config.retention_in_days = value;
        self
    }

    /// Sets the default archive retention in seconds.
    pub fn keep_in_seconds(mut self, value: u64) -> Self {
        self.config.keep_in_seconds = value;
        self
    }

    /// Sets the maximum in-flight handlers.
    pub fn worker_concurrency(mut self, value: usize) -> Self {
        self.config.worker_concurrency = value;
        self
    }

    /// Sets the task worker poll interval.
    pub fn worker_interval(mut self, value: Duration) -> Self {
        self.config.worker_interval = value;
        self
    }

    /// Sets the refill threshold fraction.
    pub fn worker_refill_factor(mut self, value: f64) -> Self {
        self.config.worker_refill_factor = value;
        self
    }

    /// Sets the fanout fetch size.
    pub fn events_fetch_size(mut self, value: i64) -> Self {
        self.config.events_fetch_size = value;
        self
    }

    /// Sets the expire loop interval.
    pub fn expire_interval(mut self, value: Duration) -> Self {
        self.config.expire_interval = value;
        self
    }

    /// Sets the cleanup loop interval.
    pub fn cleanup_interval(mut self, value: Duration) -> Self {
        self.config.cleanup_interval = value;
        self
    }

    /// Sets the expire batch size.
    pub fn expire_batch_size(mut self, value: i64) -> Self {
        self.config.expire_batch_size = value;
        self
    }

    /// Sets the cursor lock TTL.
    pub fn cursor_lock_ttl(mut self, value: Duration) -> Self {
        self.config.cursor_lock_ttl = value;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<BusConfig, BusError> {
        let config = self.config;
        if config.worker_concurrency == 0 {
            return Err(BusError::Configuration(
                "worker_concurrency must be at least 1".into(),
            ));
        }
        if !(config.worker_refill_factor > 0.0 && config.worker_refill_factor <= 1.0) {
            return Err(BusError::Configuration(
                "worker_refill_factor must be in (0, 1]".into(),
            ));
        }
        if config.events_fetch_size <= 0 {
            return Err(BusError::Configuration(
                "events_fetch_size must be positive".into(),
            ));
        }
        if config.retention_in_days <= 0 {
            return Err(BusError::Configuration(
                "retention_in_days must be positive".into(),
            ));
        }
        Ok(config)
    }
}
