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

//! Ordered, hash-stamped schema migrations.
//!
//! Migrations are rendered per schema, hashed (sha1 of the SQL text), and
//! applied inside a single transaction that holds a per-schema advisory lock,
//! so any number of processes can start concurrently against the same
//! database: one of them applies, the rest wait and then see everything
//! already applied.
//!
//! On every startup the recorded hash of each applied migration is compared
//! against the SQL shipped with this build. A mismatch means someone edited a
//! migration after the fact; the schema is in an unknown state and startup
//! fails with [`MigrationError::HashMismatch`].

use std::collections::HashMap;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use sha1::{Digest, Sha1};
use tracing::{debug, info};

use crate::database::connection::Database;
use crate::error::{BusError, MigrationError};

/// One rendered migration: a stable name, the schema-qualified SQL, and the
/// sha1-hex stamp recorded in the migrations table.
#[derive(Debug, Clone)]
pub struct MigrationScript {
    /// Stable, ordered name. Never reuse or rename.
    pub name: &'static str,
    /// Rendered DDL for the target schema.
    pub sql: String,
    /// sha1-hex of `sql`.
    pub hash: String,
}

impl MigrationScript {
    fn new(name: &'static str, sql: String) -> Self {
        let hash = hex::encode(Sha1::digest(sql.as_bytes()));
        Self { name, sql, hash }
    }
}

/// Renders the full migration list for a schema.
pub fn migration_scripts(schema: &str) -> Vec<MigrationScript> {
    vec![
        MigrationScript::new("0001_create_tasks", create_tasks_sql(schema)),
        MigrationScript::new("0002_create_completed_archive", create_archive_sql(schema)),
        MigrationScript::new("0003_create_events", create_events_sql(schema)),
        MigrationScript::new("0004_create_cursors", create_cursors_sql(schema)),
        MigrationScript::new("0005_create_functions", create_functions_sql(schema)),
    ]
}

fn create_tasks_sql(schema: &str) -> String {
    format!(
        r#"
CREATE TABLE {schema}.tasks (
    id bigserial PRIMARY KEY,
    queue text NOT NULL,
    state smallint NOT NULL DEFAULT 0,
    data jsonb,
    meta_data jsonb,
    config jsonb NOT NULL,
    retrycount smallint NOT NULL DEFAULT 0,
    started_on timestamptz,
    created_on timestamptz NOT NULL DEFAULT now(),
    start_after timestamptz NOT NULL DEFAULT now(),
    expire_in interval NOT NULL,
    singleton_key text,
    output jsonb
);
CREATE INDEX idx_tasks_pending ON {schema}.tasks (queue, start_after) WHERE state < 2;
CREATE INDEX idx_tasks_active ON {schema}.tasks (state) WHERE state = 2;
CREATE UNIQUE INDEX idx_tasks_singleton ON {schema}.tasks (queue, singleton_key) WHERE state < 4;
"#
    )
}

fn create_archive_sql(schema: &str) -> String {
    format!(
        r#"
CREATE TABLE {schema}.tasks_completed (
    id bigint PRIMARY KEY,
    queue text NOT NULL,
    state smallint NOT NULL,
    data jsonb,
    meta_data jsonb,
    config jsonb NOT NULL,
    output jsonb,
    retrycount smallint NOT NULL,
    started_on timestamptz,
    created_on timestamptz NOT NULL,
    completed_on timestamptz NOT NULL DEFAULT now(),
    keep_until timestamptz NOT NULL
);
CREATE INDEX idx_tasks_completed_keep_until ON {schema}.tasks_completed (keep_until);
"#
    )
}

fn create_events_sql(schema: &str) -> String {
    // pos is assigned at commit time by a deferred constraint trigger holding
    // an advisory transaction lock, which serializes the order in which
    // committed events become visible. An ascending scan over pos therefore
    // never misses an earlier-committed row that surfaces later.
    format!(
        r#"
CREATE SEQUENCE {schema}.event_order AS bigint;
CREATE TABLE {schema}.events (
    id bigserial PRIMARY KEY,
    event_name text NOT NULL,
    event_data jsonb,
    pos bigint NOT NULL DEFAULT 0,
    created_at timestamptz NOT NULL DEFAULT now(),
    expire_at date NOT NULL DEFAULT (now() + interval '30 days')::date
);
CREATE INDEX idx_events_expire_at ON {schema}.events (expire_at);
CREATE INDEX idx_events_pos ON {schema}.events (pos) WHERE pos > 0;
CREATE FUNCTION {schema}.assign_event_position() RETURNS trigger AS $trg$
BEGIN
    PERFORM pg_advisory_xact_lock(('x' || md5('{schema}.events.pos'))::bit(64)::bigint);
    UPDATE {schema}.events SET pos = nextval('{schema}.event_order') WHERE id = NEW.id;
    RETURN NULL;
END;
$trg$ LANGUAGE plpgsql;
CREATE CONSTRAINT TRIGGER trg_assign_event_position
    AFTER INSERT ON {schema}.events
    DEFERRABLE INITIALLY DEFERRED
    FOR EACH ROW EXECUTE FUNCTION {schema}.assign_event_position();
"#
    )
}

fn create_cursors_sql(schema: &str) -> String {
    format!(
        r#"
CREATE TABLE {schema}.cursors (
    id serial PRIMARY KEY,
    queue text NOT NULL UNIQUE,
    last_pos bigint NOT NULL DEFAULT 0,
    locked boolean NOT NULL DEFAULT false,
    expire_lock_at timestamptz,
    created_at timestamptz NOT NULL DEFAULT now()
);
"#
    )
}

fn create_functions_sql(schema: &str) -> String {
    format!(
        r#"
CREATE FUNCTION {schema}.create_bus_tasks(tasks jsonb) RETURNS void AS $fn$
    INSERT INTO {schema}.tasks (queue, state, data, meta_data, config, start_after, expire_in, singleton_key)
    SELECT
        t->>'q',
        COALESCE((t->>'s')::smallint, 0),
        t->'d',
        t->'md',
        t->'cf',
        now() + make_interval(secs => COALESCE((t->>'saf')::double precision, 0)),
        make_interval(secs => (t->>'eis')::double precision),
        t->>'skey'
    FROM jsonb_array_elements(tasks) t
    ON CONFLICT DO NOTHING
$fn$ LANGUAGE sql;

CREATE FUNCTION {schema}.create_bus_events(events jsonb) RETURNS void AS $fn$
    INSERT INTO {schema}.events (event_name, event_data, expire_at)
    SELECT
        e->>'e_n',
        e->'d',
        (now() + make_interval(days => COALESCE((e->>'rid')::integer, 30)))::date
    FROM jsonb_array_elements(events) e
$fn$ LANGUAGE sql;

CREATE FUNCTION {schema}.get_tasks(target_queue text, amount integer)
RETURNS TABLE (
    id bigint,
    queue text,
    state smallint,
    data jsonb,
    meta_data jsonb,
    config jsonb,
    retrycount smallint,
    started_on timestamptz,
    created_on timestamptz,
    expire_in_seconds double precision
) AS $fn$
    WITH next_tasks AS (
        SELECT t.id FROM {schema}.tasks t
        WHERE t.queue = target_queue AND t.state < 2 AND t.start_after <= now()
        ORDER BY t.created_on ASC
        LIMIT amount
        FOR UPDATE SKIP LOCKED
    )
    UPDATE {schema}.tasks t SET
        state = 2,
        started_on = now(),
        retrycount = CASE WHEN t.state = 1 THEN t.retrycount + 1 ELSE t.retrycount END
    FROM next_tasks n
    WHERE t.id = n.id
    RETURNING t.id, t.queue, t.state, t.data, t.meta_data, t.config,
              t.retrycount, t.started_on, t.created_on,
              extract(epoch FROM t.expire_in)::double precision
$fn$ LANGUAGE sql;

CREATE FUNCTION {schema}.resolve_tasks(resolutions jsonb) RETURNS void AS $fn$
    WITH res AS (
        SELECT
            (r->>'id')::bigint AS task_id,
            (r->>'s')::smallint AS new_state,
            r->'out' AS output,
            (r->>'saf')::double precision AS start_after_seconds
        FROM jsonb_array_elements(resolutions) r
    ),
    finished AS (
        DELETE FROM {schema}.tasks t
        USING res
        WHERE t.id = res.task_id AND t.state = 2 AND res.new_state > 2
        RETURNING t.id, t.queue, res.new_state, t.data, t.meta_data, t.config,
                  res.output, t.retrycount, t.started_on, t.created_on
    ),
    archived AS (
        INSERT INTO {schema}.tasks_completed
            (id, queue, state, data, meta_data, config, output, retrycount,
             started_on, created_on, completed_on, keep_until)
        SELECT f.id, f.queue, f.new_state, f.data, f.meta_data, f.config,
               f.output, f.retrycount, f.started_on, f.created_on, now(),
               now() + make_interval(secs => COALESCE((f.config->>'ki_s')::double precision, 604800))
        FROM finished f
    )
    UPDATE {schema}.tasks t SET
        state = 1,
        start_after = now() + make_interval(secs => COALESCE(res.start_after_seconds, 0)),
        output = res.output
    FROM res
    WHERE t.id = res.task_id AND t.state = 2 AND res.new_state = 1
$fn$ LANGUAGE sql;
"#
    )
}

#[derive(QueryableByName)]
struct LockKey {
    #[diesel(sql_type = BigInt)]
    key: i64,
}

#[derive(QueryableByName)]
struct AppliedMigration {
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Text)]
    hash: String,
}

/// Applies all pending migrations, verifying the hashes of already-applied
/// ones. Returns the number of migrations applied by this call.
///
/// Safe to call from any number of processes concurrently: the whole run
/// happens in one transaction under a per-schema advisory lock.
pub async fn migrate(database: &Database) -> Result<usize, BusError> {
    let schema = database.schema().to_string();
    let scripts = migration_scripts(&schema);
    let conn = database.conn().await?;

    let applied = conn
        .interact(move |conn| apply_all(conn, &schema, &scripts))
        .await
        .map_err(BusError::pool)??;

    if applied > 0 {
        info!(applied, "schema migrations applied");
    } else {
        debug!("schema migrations already up to date");
    }
    Ok(applied)
}

fn apply_all(
    conn: &mut PgConnection,
    schema: &str,
    scripts: &[MigrationScript],
) -> Result<usize, MigrationError> {
    conn.transaction::<usize, MigrationError, _>(|conn| {
        // Serialize concurrent migrators on a lock scoped to this database
        // and schema. The key derivation is part of the storage contract.
        let lock: LockKey = diesel::sql_query(
            "SELECT ('x' || md5(current_database() || '.tb.' || $1))::bit(64)::bigint AS key",
        )
        .bind::<Text, _>(schema.to_string())
        .get_result(conn)?;
        diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
            .bind::<BigInt, _>(lock.key)
            .execute(conn)?;

        conn.batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))?;
        conn.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {schema}.migrations (
                id serial PRIMARY KEY,
                name text NOT NULL UNIQUE,
                hash text NOT NULL,
                created_at timestamptz NOT NULL DEFAULT now()
            )"
        ))?;

        let recorded: Vec<AppliedMigration> = diesel::sql_query(format!(
            "SELECT name, hash FROM {schema}.migrations ORDER BY id ASC"
        ))
        .load(conn)?;
        let recorded: HashMap<String, String> =
            recorded.into_iter().map(|m| (m.name, m.hash)).collect();

        let mut applied = 0;
        for script in scripts {
            if let Some(hash) = recorded.get(script.name) {
                if *hash != script.hash {
                    return Err(MigrationError::HashMismatch {
                        name: script.name.to_string(),
                        recorded: hash.clone(),
                        current: script.hash.clone(),
                    });
                }
                continue;
            }

            debug!(migration = script.name, "applying migration");
            conn.batch_execute(&script.sql)
                .map_err(|e| MigrationError::Failed {
                    name: script.name.to_string(),
                    source: e,
                })?;
            diesel::sql_query(format!(
                "INSERT INTO {schema}.migrations (name, hash) VALUES ($1, $2)"
            ))
            .bind::<Text, _>(script.name)
            .bind::<Text, _>(script.hash.clone())
            .execute(conn)?;
            applied += 1;
        }
        Ok(applied)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_are_ordered_and_uniquely_named() {
        let scripts = migration_scripts("taskbus");
        let names: Vec<_> = scripts.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "0001_create_tasks",
                "0002_create_completed_archive",
                "0003_create_events",
                "0004_create_cursors",
                "0005_create_functions",
            ]
        );
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted, "names must sort in application order");
    }

    #[test]
    fn hashes_are_sha1_hex_of_the_rendered_sql() {
        let scripts = migration_scripts("taskbus");
        for script in &scripts {
            assert_eq!(script.hash.len(), 40);
            assert_eq!(
                script.hash,
                hex::encode(Sha1::digest(script.sql.as_bytes()))
            );
        }
    }

    #[test]
    fn hashes_change_with_the_schema_name() {
        let a = migration_scripts("schema_a");
        let b = migration_scripts("schema_b");
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.name, y.name);
            assert_ne!(x.hash, y.hash);
        }
    }

    #[test]
    fn ddl_is_schema_qualified() {
        for script in migration_scripts("tenant_7") {
            assert!(
                script.sql.contains("tenant_7."),
                "{} is not schema-qualified",
                script.name
            );
        }
    }

    #[test]
    fn events_migration_defers_position_assignment() {
        let events = migration_scripts("taskbus")
            .into_iter()
            .find(|s| s.name == "0003_create_events")
            .unwrap();
        assert!(events.sql.contains("CREATE CONSTRAINT TRIGGER"));
        assert!(events.sql.contains("DEFERRABLE INITIALLY DEFERRED"));
        assert!(events.sql.contains("pg_advisory_xact_lock"));
        assert!(events.sql.contains("WHERE pos > 0"));
    }

    #[test]
    fn functions_migration_defines_the_four_server_functions() {
        let functions = migration_scripts("taskbus")
            .into_iter()
            .find(|s| s.name == "0005_create_functions")
            .unwrap();
        for name in [
            "create_bus_tasks",
            "create_bus_events",
            "get_tasks",
            "resolve_tasks",
        ] {
            assert!(
                functions.sql.contains(&format!("taskbus.{name}")),
                "missing function {name}"
            );
        }
        assert!(functions.sql.contains("FOR UPDATE SKIP LOCKED"));
        assert!(functions.sql.contains("ON CONFLICT DO NOTHING"));
    }

    #[test]
    fn singleton_uniqueness_spans_non_terminal_states_only() {
        let tasks = migration_scripts("taskbus")
            .into_iter()
            .find(|s| s.name == "0001_create_tasks")
            .unwrap();
        assert!(tasks
            .sql
            .contains("UNIQUE INDEX idx_tasks_singleton ON taskbus.tasks (queue, singleton_key) WHERE state < 4"));
    }
}
