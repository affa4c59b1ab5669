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

//! Error types for the task bus.
//!
//! Errors are split by failure domain: [`RegistrationError`] and
//! [`ValidationError`] surface synchronously to the caller at registration or
//! publish time and are never written to storage; [`MigrationError`] is fatal
//! at startup; [`BusError`] covers everything that can go wrong while talking
//! to the database at runtime. Handler failures are *not* errors of the bus —
//! they are application payloads recorded on the task's `output` column.

use thiserror::Error;

/// Top-level runtime error for bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// A database statement failed.
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// The connection pool failed to hand out a connection, or the
    /// blocking interact closure panicked or was aborted.
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Applying or verifying migrations failed.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// A task or event definition could not be registered.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// A payload failed validation at publish time.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Invalid bus configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// JSON (de)serialization of a wire payload failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BusError {
    /// Maps any pool-layer error into [`BusError::Pool`].
    ///
    /// `deadpool` surfaces several distinct error types (pool exhaustion,
    /// interact panics, closed pools); all of them mean the same thing to
    /// callers: the statement never reached the database.
    pub(crate) fn pool<E: std::fmt::Display>(err: E) -> Self {
        BusError::Pool(err.to_string())
    }
}

/// Fatal configuration errors raised while wiring up a registry or bus.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    /// A task with the same name is already bound on this registry.
    #[error("task {0} is already registered")]
    DuplicateTask(String),

    /// The definition names a queue other than the registry's.
    #[error("task {task_name} targets queue {task_queue}, but the registry serves queue {registry_queue}")]
    QueueMismatch {
        /// Name of the offending task definition.
        task_name: String,
        /// Queue the definition was pinned to.
        task_queue: String,
        /// Queue this registry serves.
        registry_queue: String,
    },

    /// The queue name is reserved for internal use.
    #[error("queue name {0} is reserved")]
    ReservedQueue(String),

    /// The queue name is empty or otherwise unusable.
    #[error("invalid queue name: {0}")]
    InvalidQueue(String),
}

/// A payload rejected by a definition's validator.
///
/// Raised synchronously to the publisher; invalid payloads are never written
/// to storage.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Task payload did not match the definition's schema.
    #[error("invalid input for task {name}: {reason}")]
    Task {
        /// Task name from the definition.
        name: String,
        /// Validator diagnostic.
        reason: String,
    },

    /// Event payload did not match the definition's schema.
    #[error("invalid input for event {name}: {reason}")]
    Event {
        /// Event name from the definition.
        name: String,
        /// Validator diagnostic.
        reason: String,
    },
}

/// Errors raised while applying the schema migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The SQL text of an already-applied migration no longer matches the
    /// hash recorded at apply time. Continuing would leave the schema in an
    /// unknown state, so startup aborts.
    #[error("migration {name} changed after it was applied (recorded hash {recorded}, current hash {current})")]
    HashMismatch {
        /// Migration name.
        name: String,
        /// Hash stored in the migrations table.
        recorded: String,
        /// Hash of the SQL text shipped with this build.
        current: String,
    },

    /// A DDL statement failed.
    #[error("migration {name} failed: {source}")]
    Failed {
        /// Migration name.
        name: String,
        /// Underlying database error.
        #[source]
        source: diesel::result::Error,
    },

    /// Reading or updating the migrations table failed.
    #[error("migration bookkeeping failed: {0}")]
    Bookkeeping(#[from] diesel::result::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_are_precise() {
        let err = ValidationError::Task {
            name: "send_email".into(),
            reason: "missing field `to`".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid input for task send_email: missing field `to`"
        );

        let err = ValidationError::Event {
            name: "user_created".into(),
            reason: "expected object".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid input for event user_created: expected object"
        );
    }

    #[test]
    fn hash_mismatch_names_both_hashes() {
        let err = MigrationError::HashMismatch {
            name: "0001_create_tasks".into(),
            recorded: "aaaa".into(),
            current: "bbbb".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0001_create_tasks"));
        assert!(msg.contains("aaaa"));
        assert!(msg.contains("bbbb"));
    }
}
