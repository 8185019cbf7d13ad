//! Write path: run a mutation once per parameter row.

use crate::database::{Database, Tag};
use crate::error::Result;
use crate::statement::Statement;
use crate::value::Value;

impl Database {
    /// Prepare a mutation that can be executed repeatedly with different rows.
    pub fn prepare_update(&self, sql: impl Into<String>) -> UpdateSql {
        UpdateSql {
            database: self.clone(),
            statement: Statement::mutation(sql),
            changes: None,
        }
    }
}

/// A reusable mutation (INSERT, UPDATE, DELETE, DDL).
///
/// Each `execute` checks a handle out of the database, binds the row, runs it
/// to completion and releases the handle again. A released handle is reset
/// and its bindings cleared before it goes back to the pool, so the next call
/// starts from a freshly prepared state without compiling the SQL again. Open
/// the database with `max_idle_handles = 0` to compile on every call.
pub struct UpdateSql {
    database: Database,
    statement: Statement,
    changes: Option<i64>,
}

impl UpdateSql {
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// The number of changed rows in the most recent successful call.
    ///
    /// `None` until `execute` has succeeded once.
    pub fn changes(&self) -> Option<i64> {
        self.changes
    }

    /// Execute the mutation with `row`; `None` entries bind NULL.
    pub fn execute(&mut self, row: &[Option<Value>]) -> Result<()> {
        let mut recyclable = self.database.prepare(&self.statement)?;
        let handle = recyclable.raw_mut();
        for (index, value) in row.iter().enumerate() {
            match value {
                Some(value) => handle.bind(value, index + 1)?,
                None => handle.bind_null(index + 1)?,
            }
        }
        // RETURNING clauses yield rows; drain them so the change count is final.
        while handle.step()? {}
        self.changes = Some(handle.changes());
        log::debug!("`{}` changed {} rows", self.statement, handle.changes());
        Ok(())
    }

    /// The tag of the related database.
    pub fn tag(&self) -> Option<Tag> {
        self.database.tag()
    }

    /// The path of the related database.
    pub fn path(&self) -> &str {
        self.database.path()
    }
}
