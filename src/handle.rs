//! Prepared statement handles.
//!
//! A [`HandleStatement`] owns one compiled `sqlite3_stmt`. It is driven through
//! `rusqlite::ffi` directly because a result cursor has to stay open across
//! separate `step` calls, which the borrowing `rusqlite::Rows` API cannot
//! express for an executor that owns its handle.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::fmt;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::ffi;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::value::Value;

/// An open connection shared by a database and every handle compiled on it.
///
/// The connection closes when the last holder drops, so a handle can never
/// outlive the `sqlite3` it points into.
pub(crate) struct SharedConnection {
    db: *mut ffi::sqlite3,
    connection: Mutex<Connection>,
}

// SAFETY: connections are opened with SQLITE_OPEN_FULL_MUTEX, so SQLite
// serializes every call made through `db`; the rusqlite side sits behind a mutex.
unsafe impl Send for SharedConnection {}
unsafe impl Sync for SharedConnection {}

impl SharedConnection {
    pub(crate) fn new(connection: Connection) -> Arc<Self> {
        // SAFETY: the pointer is only used while `connection` is owned here.
        let db = unsafe { connection.handle() };
        Arc::new(Self {
            db,
            connection: Mutex::new(connection),
        })
    }

    /// Hold SQLite's own connection mutex.
    ///
    /// Per-connection state such as `sqlite3_changes` and `sqlite3_errmsg`
    /// must be read under this lock together with the call that set it.
    fn lock_db(&self) -> DbMutexGuard {
        // SAFETY: `db` is open; the mutex is recursive, so engine calls made
        // while it is held re-enter it.
        let mutex = unsafe { ffi::sqlite3_db_mutex(self.db) };
        unsafe { ffi::sqlite3_mutex_enter(mutex) };
        DbMutexGuard { mutex }
    }
}

struct DbMutexGuard {
    mutex: *mut ffi::sqlite3_mutex,
}

impl Drop for DbMutexGuard {
    fn drop(&mut self) {
        // SAFETY: entered in `SharedConnection::lock_db`.
        unsafe { ffi::sqlite3_mutex_leave(self.mutex) };
    }
}

/// A live, compiled statement bound to one connection.
///
/// States: prepared, stepping, finalized. Once finalized the handle refuses
/// to bind or step.
pub struct HandleStatement {
    connection: Arc<SharedConnection>,
    stmt: *mut ffi::sqlite3_stmt,
    sql: String,
    changes: i64,
}

// SAFETY: see `SharedConnection`; the statement is only mutated through
// `&mut self`.
unsafe impl Send for HandleStatement {}

impl HandleStatement {
    /// Compile `sql` on `connection`.
    pub(crate) fn prepare(connection: &Arc<SharedConnection>, sql: &str) -> Result<Self> {
        let prepare_error = |source| Error::Prepare {
            sql: sql.to_string(),
            source,
        };
        let len = c_int::try_from(sql.len())
            .map_err(|_| prepare_error(failure(ffi::SQLITE_TOOBIG, "SQL text too long")))?;

        let _guard = connection
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _db = connection.lock_db();
        let mut stmt = ptr::null_mut();
        // SAFETY: `db` is open for as long as `connection` is alive.
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                connection.db,
                sql.as_ptr() as *const c_char,
                len,
                &mut stmt,
                ptr::null_mut(),
            )
        };
        if rc != ffi::SQLITE_OK {
            // sqlite3_prepare_v2 leaves `stmt` null on failure.
            return Err(prepare_error(engine_error(connection, rc)));
        }
        if stmt.is_null() {
            return Err(prepare_error(failure(
                ffi::SQLITE_MISUSE,
                "SQL text contains no statement",
            )));
        }

        Ok(Self {
            connection: Arc::clone(connection),
            stmt,
            sql: sql.to_string(),
            changes: 0,
        })
    }

    pub(crate) fn belongs_to(&self, connection: &Arc<SharedConnection>) -> bool {
        Arc::ptr_eq(&self.connection, connection)
    }

    /// The SQL text this handle was compiled from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn is_finalized(&self) -> bool {
        self.stmt.is_null()
    }

    /// Bind `value` to the 1-based parameter `index`.
    pub fn bind(&mut self, value: &Value, index: usize) -> Result<()> {
        let bind_error = |source| Error::Bind { index, source };
        let stmt = self.live().map_err(bind_error)?;
        let col = c_int::try_from(index)
            .map_err(|_| bind_error(failure(ffi::SQLITE_RANGE, "parameter index out of range")))?;

        let _db = self.connection.lock_db();
        // SAFETY: `stmt` is live; text and blob buffers are copied by SQLite
        // (SQLITE_TRANSIENT) before the call returns.
        let rc = unsafe {
            match value {
                Value::Null => ffi::sqlite3_bind_null(stmt, col),
                Value::Integer(i) => ffi::sqlite3_bind_int64(stmt, col, *i),
                Value::Boolean(b) => ffi::sqlite3_bind_int64(stmt, col, i64::from(*b)),
                Value::Real(r) => ffi::sqlite3_bind_double(stmt, col, *r),
                Value::Text(s) => {
                    let len = c_int::try_from(s.len()).map_err(|_| {
                        bind_error(failure(ffi::SQLITE_TOOBIG, "text value too long"))
                    })?;
                    let data: *const c_char = if s.is_empty() {
                        b"\0".as_ptr() as *const c_char
                    } else {
                        s.as_ptr() as *const c_char
                    };
                    ffi::sqlite3_bind_text(stmt, col, data, len, ffi::SQLITE_TRANSIENT())
                }
                Value::Blob(b) if b.is_empty() => ffi::sqlite3_bind_zeroblob(stmt, col, 0),
                Value::Blob(b) => {
                    let len = c_int::try_from(b.len()).map_err(|_| {
                        bind_error(failure(ffi::SQLITE_TOOBIG, "blob value too long"))
                    })?;
                    ffi::sqlite3_bind_blob(
                        stmt,
                        col,
                        b.as_ptr() as *const c_void,
                        len,
                        ffi::SQLITE_TRANSIENT(),
                    )
                }
            }
        };
        if rc != ffi::SQLITE_OK {
            return Err(bind_error(engine_error(&self.connection, rc)));
        }
        Ok(())
    }

    /// Bind the engine's NULL marker to `index`.
    pub fn bind_null(&mut self, index: usize) -> Result<()> {
        self.bind(&Value::Null, index)
    }

    /// Advance the cursor. `true` means a row is available.
    pub fn step(&mut self) -> Result<bool> {
        let stmt = self.live().map_err(Error::Step)?;
        // Another statement finishing in between would overwrite the
        // connection's change count and error message.
        let _db = self.connection.lock_db();
        // SAFETY: `stmt` is live.
        let rc = unsafe { ffi::sqlite3_step(stmt) };
        match rc {
            ffi::SQLITE_ROW => Ok(true),
            ffi::SQLITE_DONE => {
                // SAFETY: the handle keeps the connection open.
                self.changes = i64::from(unsafe { ffi::sqlite3_changes(self.connection.db) });
                Ok(false)
            }
            rc => Err(Error::Step(engine_error(&self.connection, rc))),
        }
    }

    /// Rows changed by the most recent execution that ran to completion.
    pub fn changes(&self) -> i64 {
        self.changes
    }

    pub fn column_count(&self) -> usize {
        match self.live() {
            // SAFETY: `stmt` is live.
            Ok(stmt) => unsafe { ffi::sqlite3_column_count(stmt) }.max(0) as usize,
            Err(_) => 0,
        }
    }

    pub fn column_name(&self, index: usize) -> Option<&str> {
        let stmt = self.live().ok()?;
        let col = self.column_index(index)?;
        // SAFETY: `stmt` is live and `col` is in range; the name stays valid
        // until the statement is finalized, which needs `&mut self`.
        unsafe {
            let name = ffi::sqlite3_column_name(stmt, col);
            if name.is_null() {
                return None;
            }
            CStr::from_ptr(name).to_str().ok()
        }
    }

    /// Read column `index` of the current row.
    ///
    /// Returns `None` when the index is out of range or the handle is finalized.
    /// The borrowed data is valid until the next `step`, which needs `&mut self`.
    pub fn column_value(&self, index: usize) -> Option<ValueRef<'_>> {
        let stmt = self.live().ok()?;
        let col = self.column_index(index)?;
        // SAFETY: `stmt` is live and `col` is in range. Pointers returned by
        // sqlite3_column_text/blob stay valid until the next step/reset/finalize.
        let value = unsafe {
            match ffi::sqlite3_column_type(stmt, col) {
                ffi::SQLITE_INTEGER => ValueRef::Integer(ffi::sqlite3_column_int64(stmt, col)),
                ffi::SQLITE_FLOAT => ValueRef::Real(ffi::sqlite3_column_double(stmt, col)),
                ffi::SQLITE_TEXT => {
                    let text = ffi::sqlite3_column_text(stmt, col);
                    let len = ffi::sqlite3_column_bytes(stmt, col);
                    ValueRef::Text(raw_slice(text as *const u8, len))
                }
                ffi::SQLITE_BLOB => {
                    let blob = ffi::sqlite3_column_blob(stmt, col);
                    let len = ffi::sqlite3_column_bytes(stmt, col);
                    ValueRef::Blob(raw_slice(blob as *const u8, len))
                }
                _ => ValueRef::Null,
            }
        };
        Some(value)
    }

    /// Rewind the cursor and clear every bound parameter.
    pub fn reset(&mut self) -> Result<()> {
        let stmt = self.live().map_err(Error::Step)?;
        let _db = self.connection.lock_db();
        // SAFETY: `stmt` is live.
        let rc = unsafe {
            let rc = ffi::sqlite3_reset(stmt);
            ffi::sqlite3_clear_bindings(stmt);
            rc
        };
        self.changes = 0;
        if rc != ffi::SQLITE_OK {
            return Err(Error::Step(engine_error(&self.connection, rc)));
        }
        Ok(())
    }

    /// Release the native statement. Calling it again is a no-op.
    pub fn finalize(&mut self) -> Result<()> {
        if self.stmt.is_null() {
            return Ok(());
        }
        let stmt = std::mem::replace(&mut self.stmt, ptr::null_mut());
        let _db = self.connection.lock_db();
        // SAFETY: `stmt` was live and is never touched again.
        let rc = unsafe { ffi::sqlite3_finalize(stmt) };
        log::debug!("finalized handle for `{}`", self.sql);
        if rc != ffi::SQLITE_OK {
            return Err(Error::Step(engine_error(&self.connection, rc)));
        }
        Ok(())
    }

    fn live(&self) -> std::result::Result<*mut ffi::sqlite3_stmt, rusqlite::Error> {
        if self.stmt.is_null() {
            return Err(failure(ffi::SQLITE_MISUSE, "statement has been finalized"));
        }
        Ok(self.stmt)
    }

    fn column_index(&self, index: usize) -> Option<c_int> {
        if index >= self.column_count() {
            return None;
        }
        c_int::try_from(index).ok()
    }
}

impl fmt::Debug for HandleStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleStatement")
            .field("sql", &self.sql)
            .field("finalized", &self.is_finalized())
            .field("changes", &self.changes)
            .finish()
    }
}

impl Drop for HandleStatement {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            log::debug!("ignoring finalize error for `{}`: {}", self.sql, e);
        }
    }
}

/// # Safety
/// `data` must be null or point at `len` readable bytes.
unsafe fn raw_slice<'a>(data: *const u8, len: c_int) -> &'a [u8] {
    if data.is_null() || len <= 0 {
        return &[];
    }
    std::slice::from_raw_parts(data, len as usize)
}

fn failure(code: c_int, message: &str) -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(ffi::Error::new(code), Some(message.to_string()))
}

/// Callers hold `lock_db` across the failing call and this read.
fn engine_error(connection: &SharedConnection, code: c_int) -> rusqlite::Error {
    // SAFETY: the connection is open; the message is copied immediately.
    let message = unsafe {
        let msg = ffi::sqlite3_errmsg(connection.db);
        if msg.is_null() {
            None
        } else {
            Some(CStr::from_ptr(msg).to_string_lossy().into_owned())
        }
    };
    rusqlite::Error::SqliteFailure(ffi::Error::new(code), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::statement::Statement;

    #[test]
    fn binds_and_reads_every_storage_class() {
        let db = Database::open_in_memory().unwrap();
        let mut recyclable = db
            .prepare(&Statement::query("SELECT ? AS i, ? AS r, ? AS t, ? AS b, ? AS n, ? AS e"))
            .unwrap();
        let handle = recyclable.raw_mut();
        handle.bind(&Value::Integer(3), 1).unwrap();
        handle.bind(&Value::Real(0.5), 2).unwrap();
        handle.bind(&Value::from("txt"), 3).unwrap();
        handle.bind(&Value::Blob(vec![1, 2]), 4).unwrap();
        handle.bind_null(5).unwrap();
        handle.bind(&Value::from(""), 6).unwrap();

        assert!(handle.step().unwrap());
        assert_eq!(handle.column_count(), 6);
        assert_eq!(handle.column_name(2), Some("t"));
        assert_eq!(handle.column_name(6), None);
        assert_eq!(handle.column_value(0), Some(ValueRef::Integer(3)));
        assert_eq!(handle.column_value(1), Some(ValueRef::Real(0.5)));
        assert_eq!(handle.column_value(2), Some(ValueRef::Text(b"txt")));
        assert_eq!(handle.column_value(3), Some(ValueRef::Blob(&[1, 2])));
        assert_eq!(handle.column_value(4), Some(ValueRef::Null));
        assert_eq!(handle.column_value(5), Some(ValueRef::Text(b"")));
        assert!(!handle.step().unwrap());
    }

    #[test]
    fn reset_clears_bindings() {
        let db = Database::open_in_memory().unwrap();
        let mut recyclable = db.prepare(&Statement::query("SELECT ?")).unwrap();
        let handle = recyclable.raw_mut();
        handle.bind(&Value::Boolean(true), 1).unwrap();
        assert!(handle.step().unwrap());
        assert_eq!(handle.column_value(0), Some(ValueRef::Integer(1)));

        handle.reset().unwrap();
        assert!(handle.step().unwrap());
        assert_eq!(handle.column_value(0), Some(ValueRef::Null));
    }

    #[test]
    fn finalized_handle_refuses_work() {
        let db = Database::open_in_memory().unwrap();
        let mut recyclable = db.prepare(&Statement::query("SELECT ?")).unwrap();
        let handle = recyclable.raw_mut();
        handle.finalize().unwrap();
        handle.finalize().unwrap();
        assert!(handle.is_finalized());
        assert!(matches!(handle.bind_null(1), Err(Error::Bind { index: 1, .. })));
        assert!(matches!(handle.step(), Err(Error::Step(_))));
        assert_eq!(handle.column_count(), 0);
        assert_eq!(handle.column_value(0), None);
    }

    #[test]
    fn blank_sql_is_a_prepare_error() {
        let db = Database::open_in_memory().unwrap();
        let err = db.prepare(&Statement::query("  ")).unwrap_err();
        assert!(matches!(err, Error::Prepare { .. }));
        assert_eq!(err.sqlite_code(), Some(rusqlite::ErrorCode::ApiMisuse));
    }
}
