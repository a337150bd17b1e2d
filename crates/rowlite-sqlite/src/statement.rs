//! Prepared statement wrapper.
//!
//! A [`Statement`] owns its compiled handle and is finalized exactly once,
//! in `Drop`. It keeps a copy of the connection's raw handle purely for
//! error reporting; the connection is responsible for outliving every
//! statement it hands out (cached statements are drained before close, and
//! deferred queries borrow the connection).

use crate::ffi;
use crate::marshal::{self, DateTimeFormat};
use rowlite_core::{
    ConstraintError, DataIntegrityError, EngineError, Error, FromValue, Result, TableDescriptor,
    Value,
};
use std::ffi::{CStr, CString, c_int};
use std::ptr;

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepResult {
    /// A result row is available for column reads.
    Row,
    /// The statement has run to completion.
    Done,
}

pub(crate) struct Statement {
    stmt: *mut ffi::sqlite3_stmt,
    db: *mut ffi::sqlite3,
    sql: String,
    param_count: usize,
}

// SAFETY: the raw handles are only touched through &mut self (or &self for
// pure reads), and statements are handed across threads only behind the
// connection's per-statement mutexes.
unsafe impl Send for Statement {}

impl Statement {
    /// Compile `sql` against `db`.
    pub(crate) fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self> {
        let c_sql = CString::new(sql)
            .map_err(|_| Error::invalid_argument("SQL contains an interior null byte"))?;

        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: all pointers are valid, and we check the return value
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut stmt,
                ptr::null_mut(),
            )
        };

        if rc != ffi::SQLITE_OK {
            return Err(engine_error(db, rc));
        }

        // SAFETY: stmt is valid after a successful prepare
        let param_count = unsafe { ffi::sqlite3_bind_parameter_count(stmt) } as usize;

        tracing::trace!(sql = %sql, params = param_count, "prepared statement");

        Ok(Self {
            stmt,
            db,
            sql: sql.to_string(),
            param_count,
        })
    }

    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    /// Bind one parameter. `index` is 1-based.
    pub(crate) fn bind(
        &mut self,
        index: usize,
        value: &Value,
        datetime_format: DateTimeFormat,
    ) -> Result<()> {
        // SAFETY: stmt is valid, index is forwarded to the engine which
        // range-checks it
        let rc = unsafe { marshal::bind_value(self.stmt, index as c_int, value, datetime_format) };
        if rc != ffi::SQLITE_OK {
            return Err(Error::invalid_argument(format!(
                "failed to bind parameter {}: {}",
                index,
                db_errmsg(self.db)
            )));
        }
        Ok(())
    }

    /// Bind every positional parameter. The supplied count must equal the
    /// statement's placeholder count.
    pub(crate) fn bind_all(
        &mut self,
        params: &[Value],
        datetime_format: DateTimeFormat,
    ) -> Result<()> {
        if params.len() != self.param_count {
            return Err(Error::invalid_argument(format!(
                "statement expects {} parameters, {} supplied",
                self.param_count,
                params.len()
            )));
        }
        for (i, param) in params.iter().enumerate() {
            self.bind(i + 1, param, datetime_format)?;
        }
        Ok(())
    }

    /// Advance the statement one step.
    pub(crate) fn step(&mut self) -> Result<StepResult> {
        // SAFETY: stmt is valid
        let rc = unsafe { ffi::sqlite3_step(self.stmt) };
        match rc {
            ffi::SQLITE_ROW => Ok(StepResult::Row),
            ffi::SQLITE_DONE => Ok(StepResult::Done),
            _ => Err(self.step_error(rc)),
        }
    }

    fn step_error(&self, rc: c_int) -> Error {
        // SAFETY: db is valid
        let extended = unsafe { ffi::sqlite3_extended_errcode(self.db) };
        let message = db_errmsg(self.db);
        if rc == ffi::SQLITE_CONSTRAINT || rc & 0xff == ffi::SQLITE_CONSTRAINT {
            Error::Constraint(ConstraintError {
                extended_code: Some(extended),
                message,
            })
        } else {
            Error::Engine(EngineError {
                code: rc,
                extended_code: Some(extended),
                message,
            })
        }
    }

    /// Reset the statement so it can be stepped again.
    pub(crate) fn reset(&mut self) {
        // SAFETY: stmt is valid; reset's return code repeats the last step
        // error, which has already been surfaced
        unsafe {
            ffi::sqlite3_reset(self.stmt);
        }
    }

    /// Clear all parameter bindings.
    pub(crate) fn clear_bindings(&mut self) {
        // SAFETY: stmt is valid
        unsafe {
            ffi::sqlite3_clear_bindings(self.stmt);
        }
    }

    /// Number of columns in the result set.
    pub(crate) fn column_count(&self) -> usize {
        // SAFETY: stmt is valid
        (unsafe { ffi::sqlite3_column_count(self.stmt) }) as usize
    }

    /// Name of a result column (0-based).
    pub(crate) fn column_name(&self, index: usize) -> Option<String> {
        // SAFETY: stmt is valid
        unsafe { marshal::column_name(self.stmt, index as c_int) }
    }

    /// Read a column of the current row (0-based). Only valid after a step
    /// returned [`StepResult::Row`].
    pub(crate) fn read_column(&self, index: usize) -> Value {
        // SAFETY: stmt is valid and positioned on a row
        unsafe { marshal::read_column(self.stmt, index as c_int) }
    }

    /// Step to completion, reset, and return the affected-row count.
    pub(crate) fn execute_non_query(&mut self) -> Result<u64> {
        loop {
            match self.step() {
                Ok(StepResult::Row) => continue,
                Ok(StepResult::Done) => break,
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            }
        }
        // SAFETY: db is valid
        let changes = unsafe { ffi::sqlite3_changes(self.db) };
        self.reset();
        Ok(changes as u64)
    }

    /// Decode the first column of the first row, or the target type's
    /// default when the statement yields no rows.
    pub(crate) fn execute_scalar<T: FromValue + Default>(&mut self) -> Result<T> {
        let result = match self.step() {
            Ok(StepResult::Row) => T::from_value(&self.read_column(0)),
            Ok(StepResult::Done) => Ok(T::default()),
            Err(e) => Err(e),
        };
        self.reset();
        result
    }

    /// Map statement columns onto descriptor columns by name, once per
    /// statement. `mapping[i]` is the descriptor column index for statement
    /// column `i`, or `None` for columns the descriptor does not know.
    pub(crate) fn column_mapping<R>(&self, desc: &TableDescriptor<R>) -> Vec<Option<usize>> {
        (0..self.column_count())
            .map(|i| {
                self.column_name(i).and_then(|name| {
                    desc.columns().iter().position(|c| c.name == name)
                })
            })
            .collect()
    }

    /// Materialize the current row into a fresh record via the descriptor's
    /// `set` delegates.
    pub(crate) fn read_record<R: Default>(
        &self,
        desc: &TableDescriptor<R>,
        mapping: &[Option<usize>],
    ) -> Result<R> {
        let mut record = R::default();
        for (i, slot) in mapping.iter().enumerate() {
            let Some(di) = slot else { continue };
            let column = &desc.columns()[*di];
            let value = self.read_column(i);
            (column.set)(&mut record, value).map_err(|e| match e {
                Error::DataIntegrity(de) if de.column.is_none() => {
                    Error::DataIntegrity(DataIntegrityError {
                        column: Some(column.name.to_string()),
                        ..de
                    })
                }
                e => e,
            })?;
        }
        Ok(record)
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if !self.stmt.is_null() {
            // SAFETY: stmt is valid and finalized exactly once
            unsafe {
                ffi::sqlite3_finalize(self.stmt);
            }
            self.stmt = ptr::null_mut();
        }
    }
}

/// Read the engine's current error message for `db`.
pub(crate) fn db_errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: db is valid; errmsg returns a valid C string
    unsafe {
        let ptr = ffi::sqlite3_errmsg(db);
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// Build an [`Error::Engine`] from the connection's current error state.
pub(crate) fn engine_error(db: *mut ffi::sqlite3, code: c_int) -> Error {
    // SAFETY: db is valid
    let extended = unsafe { ffi::sqlite3_extended_errcode(db) };
    Error::Engine(EngineError {
        code,
        extended_code: Some(extended),
        message: db_errmsg(db),
    })
}
