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

//! Parameterized SQL for every table operation, rendered once per schema.
//!
//! Everything the bus says to PostgreSQL is in this file. The hot-path
//! operations go through the server-side functions installed by the
//! migrations (`create_bus_tasks`, `create_bus_events`, `get_tasks`,
//! `resolve_tasks`); the cursor and maintenance operations are plain
//! statements. All of them are schema-qualified.

/// Rendered SQL statements for one schema.
#[derive(Debug, Clone)]
pub struct Plans {
    /// `SELECT create_bus_tasks($1)` — jsonb array of task inserts.
    pub create_tasks: String,
    /// `SELECT create_bus_events($1)` — jsonb array of event inserts.
    pub create_events: String,
    /// Fetch-and-start: claims up to `$2` pending tasks on queue `$1`.
    pub fetch_and_start: String,
    /// `SELECT resolve_tasks($1)` — jsonb array of resolutions.
    pub resolve_tasks: String,
    /// Events strictly after a position, ascending, bounded.
    pub fetch_events_since: String,
    /// Highest committed event position, 0 when the log is empty.
    pub last_event_position: String,
    /// Creates the cursor row for a queue if it does not exist.
    pub ensure_cursor: String,
    /// Locks the cursor row for fanout, or returns nothing on contention.
    pub acquire_cursor: String,
    /// Releases a cursor lock without advancing.
    pub release_cursor: String,
    /// Advances the cursor, releases the lock, and inserts the fanned-out
    /// tasks — one statement.
    pub advance_cursor_and_create_tasks: String,
    /// Releases cursor locks whose TTL has passed.
    pub release_stale_cursor_locks: String,
    /// Active tasks past their expiry, locked for resolution.
    pub select_expire_candidates: String,
    /// Deletes events past their retention date.
    pub delete_expired_events: String,
    /// Deletes archived tasks past their retention timestamp.
    pub purge_archived_tasks: String,
}

impl Plans {
    /// Renders all statements for `schema`.
    pub fn new(schema: &str) -> Self {
        Self {
            create_tasks: format!("SELECT {schema}.create_bus_tasks($1)"),
            create_events: format!("SELECT {schema}.create_bus_events($1)"),
            fetch_and_start: format!("SELECT * FROM {schema}.get_tasks($1, $2)"),
            resolve_tasks: format!("SELECT {schema}.resolve_tasks($1)"),
            // The redundant `pos > 0` matches the partial index predicate.
            fetch_events_since: format!(
                "SELECT e.id, e.event_name, e.event_data, e.pos \
                 FROM {schema}.events e \
                 WHERE e.pos > $1 AND e.pos > 0 \
                 ORDER BY e.pos ASC \
                 LIMIT $2"
            ),
            last_event_position: format!(
                "SELECT COALESCE(MAX(e.pos), 0) AS pos FROM {schema}.events e"
            ),
            ensure_cursor: format!(
                "INSERT INTO {schema}.cursors (queue, last_pos) VALUES ($1, $2) \
                 ON CONFLICT (queue) DO NOTHING"
            ),
            acquire_cursor: format!(
                "UPDATE {schema}.cursors c \
                 SET locked = true, expire_lock_at = now() + make_interval(secs => $2) \
                 FROM ( \
                     SELECT id FROM {schema}.cursors \
                     WHERE queue = $1 AND locked = false \
                     FOR UPDATE SKIP LOCKED \
                 ) candidate \
                 WHERE c.id = candidate.id \
                 RETURNING c.id, c.queue, c.last_pos"
            ),
            release_cursor: format!(
                "UPDATE {schema}.cursors SET locked = false, expire_lock_at = NULL WHERE id = $1"
            ),
            advance_cursor_and_create_tasks: format!(
                "WITH advanced AS ( \
                     UPDATE {schema}.cursors \
                     SET last_pos = $2, locked = false, expire_lock_at = NULL \
                     WHERE id = $1 \
                 ) \
                 SELECT {schema}.create_bus_tasks($3)"
            ),
            release_stale_cursor_locks: format!(
                "UPDATE {schema}.cursors SET locked = false, expire_lock_at = NULL \
                 WHERE locked = true AND expire_lock_at < now()"
            ),
            select_expire_candidates: format!(
                "SELECT t.id, t.retrycount, t.config FROM {schema}.tasks t \
                 WHERE t.state = 2 AND t.started_on + t.expire_in < now() \
                 ORDER BY t.started_on ASC \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED"
            ),
            delete_expired_events: format!("DELETE FROM {schema}.events WHERE expire_at < now()"),
            purge_archived_tasks: format!(
                "DELETE FROM {schema}.tasks_completed WHERE keep_until < now()"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_plan_is_schema_qualified() {
        let plans = Plans::new("tenant_3");
        for (name, sql) in [
            ("create_tasks", &plans.create_tasks),
            ("create_events", &plans.create_events),
            ("fetch_and_start", &plans.fetch_and_start),
            ("resolve_tasks", &plans.resolve_tasks),
            ("fetch_events_since", &plans.fetch_events_since),
            ("last_event_position", &plans.last_event_position),
            ("ensure_cursor", &plans.ensure_cursor),
            ("acquire_cursor", &plans.acquire_cursor),
            ("release_cursor", &plans.release_cursor),
            (
                "advance_cursor_and_create_tasks",
                &plans.advance_cursor_and_create_tasks,
            ),
            (
                "release_stale_cursor_locks",
                &plans.release_stale_cursor_locks,
            ),
            (
                "select_expire_candidates",
                &plans.select_expire_candidates,
            ),
            ("delete_expired_events", &plans.delete_expired_events),
            ("purge_archived_tasks", &plans.purge_archived_tasks),
        ] {
            assert!(sql.contains("tenant_3."), "{name} is not schema-qualified");
        }
    }

    #[test]
    fn contended_plans_skip_locked_rows() {
        let plans = Plans::new("taskbus");
        assert!(plans.acquire_cursor.contains("FOR UPDATE SKIP LOCKED"));
        assert!(plans
            .select_expire_candidates
            .contains("FOR UPDATE SKIP LOCKED"));
    }

    #[test]
    fn cursor_acquisition_requires_an_unlocked_row() {
        let plans = Plans::new("taskbus");
        assert!(plans.acquire_cursor.contains("locked = false"));
        assert!(plans.acquire_cursor.contains("SET locked = true"));
    }

    #[test]
    fn event_scan_matches_the_partial_index() {
        let plans = Plans::new("taskbus");
        assert!(plans.fetch_events_since.contains("e.pos > $1 AND e.pos > 0"));
        assert!(plans.fetch_events_since.contains("ORDER BY e.pos ASC"));
    }

    #[test]
    fn advance_plan_is_a_single_statement() {
        let plans = Plans::new("taskbus");
        let sql = &plans.advance_cursor_and_create_tasks;
        assert!(sql.starts_with("WITH advanced AS"));
        assert!(sql.contains("create_bus_tasks($3)"));
        assert!(!sql.contains(';'), "must stay a single statement");
    }
}
