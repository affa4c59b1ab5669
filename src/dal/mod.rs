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

//! Data access layer.
//!
//! The [`DAL`] owns the pool and the per-schema [`Plans`], and hands out
//! scoped sub-DALs per table group. Every operation checks out a pooled
//! connection and runs its statement inside `interact`, the blocking-safe
//! calling convention for diesel under tokio.

pub mod cursors;
pub mod events;
pub mod maintenance;
mod models;
pub mod plans;
pub mod tasks;

use std::sync::Arc;

use diesel::PgConnection;

use crate::database::connection::Database;
use crate::error::BusError;

pub use cursors::{Cursor, CursorDAL};
pub use events::EventDAL;
pub use maintenance::MaintenanceDAL;
pub use plans::Plans;
pub use tasks::TaskDAL;

/// Data access layer for all bus tables.
#[derive(Clone)]
pub struct DAL {
    pub(crate) database: Database,
    pub(crate) plans: Arc<Plans>,
}

impl DAL {
    /// Creates a DAL over `database`, rendering the plans for its schema.
    pub fn new(database: Database) -> Self {
        let plans = Arc::new(Plans::new(database.schema()));
        Self { database, plans }
    }

    /// Task table operations.
    pub fn tasks(&self) -> TaskDAL<'_> {
        TaskDAL { dal: self }
    }

    /// Event log operations.
    pub fn events(&self) -> EventDAL<'_> {
        EventDAL { dal: self }
    }

    /// Fanout cursor operations.
    pub fn cursors(&self) -> CursorDAL<'_> {
        CursorDAL { dal: self }
    }

    /// Expiry, purge, and lock-recovery operations.
    pub fn maintenance(&self) -> MaintenanceDAL<'_> {
        MaintenanceDAL { dal: self }
    }

    /// Checks out a connection and runs `f` on the blocking pool.
    pub(crate) async fn with_conn<R, F>(&self, f: F) -> Result<R, BusError>
    where
        F: FnOnce(&mut PgConnection) -> Result<R, diesel::result::Error> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.database.conn().await?;
        conn.interact(f)
            .await
            .map_err(BusError::pool)?
            .map_err(BusError::from)
    }
}
