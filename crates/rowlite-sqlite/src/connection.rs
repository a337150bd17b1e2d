//! SQLite connection: open/close lifecycle and the execute/query surface.
//!
//! A connection is a single-threaded resource: the engine permits one active
//! statement per connection and this library assumes the caller serializes
//! access. The only internal synchronization is a mutex around each cached
//! insert statement and atomic updates of the transaction depth.

use crate::crud::{CachedStatement, InsertModifier};
use crate::ffi;
use crate::marshal::DateTimeFormat;
use crate::statement::{Statement, StepResult, db_errmsg, engine_error};
use rowlite_core::{
    ChangeAction, ChangeEvent, ChangeNotifier, ColumnInfo, DowngradeError, Error, Executor,
    FromValue, ListenerId, OpenError, Result, Row, Schema, Value, quote_ident, quote_str,
};
use std::any::TypeId;
use std::collections::HashMap;
use std::ffi::{CStr, CString, c_int};
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Open in multi-thread mode (connections not shared between threads).
    pub no_mutex: bool,
    /// Open in serialized mode (connections can be shared).
    pub full_mutex: bool,
    /// Enable shared cache mode.
    pub shared_cache: bool,
    /// Disable shared cache mode.
    pub private_cache: bool,
}

impl OpenFlags {
    /// Flags for read-only access.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Flags for read-write access (database must exist).
    #[must_use]
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Flags for read-write access with creation if needed.
    #[must_use]
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    /// Whether these flags permit writes.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        !self.read_only
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.no_mutex {
            flags |= ffi::SQLITE_OPEN_NOMUTEX;
        }
        if self.full_mutex {
            flags |= ffi::SQLITE_OPEN_FULLMUTEX;
        }
        if self.shared_cache {
            flags |= ffi::SQLITE_OPEN_SHAREDCACHE;
        }
        if self.private_cache {
            flags |= ffi::SQLITE_OPEN_PRIVATECACHE;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

/// Database encryption key, applied as a `pragma key` right after open.
#[derive(Clone)]
pub enum EncryptionKey {
    /// Passphrase; quoted into `pragma key = '<text>'`.
    Text(String),
    /// Raw 32-byte key; hex-encoded into `pragma key = "x'<hex>'"`.
    Binary([u8; 32]),
}

impl EncryptionKey {
    /// A text passphrase key.
    pub fn text(passphrase: impl Into<String>) -> Self {
        EncryptionKey::Text(passphrase.into())
    }

    /// A raw binary key. Must be exactly 32 bytes.
    pub fn binary(bytes: &[u8]) -> Result<Self> {
        let key: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::invalid_argument(format!(
                "binary encryption key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(EncryptionKey::Binary(key))
    }

    fn pragma(&self) -> String {
        match self {
            EncryptionKey::Text(passphrase) => {
                format!("pragma key = {}", quote_str(passphrase))
            }
            EncryptionKey::Binary(key) => {
                let mut hex = String::with_capacity(64);
                for byte in key {
                    hex.push_str(&format!("{:02x}", byte));
                }
                format!("pragma key = \"x'{}'\"", hex)
            }
        }
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material
        match self {
            EncryptionKey::Text(_) => f.write_str("EncryptionKey::Text(..)"),
            EncryptionKey::Binary(_) => f.write_str("EncryptionKey::Binary(..)"),
        }
    }
}

/// Per-version schema upgrade callback.
///
/// The callback is invoked once per version step with the version being
/// upgraded *from*; the library advances `PRAGMA user_version` itself after
/// each successful return.
pub type UpgradeFn = dyn Fn(&Connection, i32) -> Result<()> + Send + Sync;

/// Target schema generation plus the upgrade path to reach it.
pub struct SchemaVersion {
    target: i32,
    upgrade: Box<UpgradeFn>,
}

impl SchemaVersion {
    /// Configure target version `target` with `upgrade` run per version step.
    pub fn new(
        target: i32,
        upgrade: impl Fn(&Connection, i32) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            target,
            upgrade: Box::new(upgrade),
        }
    }

    #[must_use]
    pub const fn target(&self) -> i32 {
        self.target
    }
}

impl fmt::Debug for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaVersion")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Configuration for opening connections.
pub struct ConnectionConfig {
    /// Path to the database file, or ":memory:" for an in-memory database.
    pub path: String,
    /// Open flags.
    pub flags: OpenFlags,
    /// Busy timeout applied right after open.
    pub busy_timeout: Duration,
    /// How date/time values are stored.
    pub datetime_format: DateTimeFormat,
    /// Optional encryption key.
    pub key: Option<EncryptionKey>,
    /// Optional user-version schema upgrade configuration.
    pub schema_version: Option<SchemaVersion>,
    /// Log every executed statement at debug level, with timing.
    pub trace: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout: Duration::from_millis(100),
            datetime_format: DateTimeFormat::default(),
            key: None,
            schema_version: None,
            trace: false,
        }
    }
}

impl ConnectionConfig {
    /// Config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Config for an in-memory database.
    #[must_use]
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set open flags.
    #[must_use]
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the busy timeout.
    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Set the date/time storage format.
    #[must_use]
    pub fn datetime_format(mut self, format: DateTimeFormat) -> Self {
        self.datetime_format = format;
        self
    }

    /// Set the encryption key.
    #[must_use]
    pub fn key(mut self, key: EncryptionKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Set the user-version target and upgrade callback.
    #[must_use]
    pub fn schema_version(mut self, schema_version: SchemaVersion) -> Self {
        self.schema_version = Some(schema_version);
        self
    }

    /// Enable statement tracing.
    #[must_use]
    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("busy_timeout", &self.busy_timeout)
            .field("datetime_format", &self.datetime_format)
            .field("key", &self.key)
            .field("trace", &self.trace)
            .finish_non_exhaustive()
    }
}

/// A connection to a SQLite database.
///
/// Owns the database handle and the cached insert statements; both are
/// released deterministically by [`Connection::close`], with `Drop` as a
/// last-resort backstop.
pub struct Connection {
    db: *mut ffi::sqlite3,
    path: String,
    open: AtomicBool,
    writable: bool,
    datetime_format: DateTimeFormat,
    trace: bool,
    lib_version: i32,
    pub(crate) insert_cache: Mutex<HashMap<(TypeId, InsertModifier), Arc<CachedStatement>>>,
    pub(crate) transaction_depth: AtomicI32,
    notifier: ChangeNotifier,
}

// SAFETY: all handle access is funneled through &self methods whose internal
// mutation is covered by the insert-statement mutexes and atomics; beyond
// that the contract is single-threaded use of one connection, and the engine
// itself is compiled threadsafe.
unsafe impl Send for Connection {}
unsafe impl Sync for Connection {}

impl Connection {
    /// Open a connection with the given configuration.
    ///
    /// On success the busy timeout is applied, foreign keys are enabled, and
    /// a writable database is switched to WAL journaling. If a
    /// [`SchemaVersion`] is configured, the user-version check (and any
    /// pending upgrades) run before the connection is returned.
    pub fn open(config: ConnectionConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str())
            .map_err(|_| Error::invalid_argument("database path contains a null byte"))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: we pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let message = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is valid; a failed open still allocates a handle
                let msg = db_errmsg(db);
                unsafe { ffi::sqlite3_close(db) };
                msg
            };
            return Err(Error::CannotOpen(OpenError {
                path: config.path,
                code: rc,
                message,
            }));
        }

        let conn = Self {
            db,
            path: config.path,
            open: AtomicBool::new(true),
            writable: config.flags.is_writable(),
            datetime_format: config.datetime_format,
            trace: config.trace,
            lib_version: ffi::version_number(),
            insert_cache: Mutex::new(HashMap::new()),
            transaction_depth: AtomicI32::new(0),
            notifier: ChangeNotifier::new(),
        };

        // Errors from here on drop `conn`, which closes the handle.
        conn.set_busy_timeout(config.busy_timeout);
        if let Some(key) = &config.key {
            // Key pragma must precede any other statement
            conn.execute_raw(&key.pragma())?;
        }
        conn.execute_raw("PRAGMA foreign_keys = ON")?;
        if conn.writable {
            // journal_mode returns a result row; run it through a statement
            conn.execute("PRAGMA journal_mode=WAL", &[])?;
        }
        if let Some(schema_version) = &config.schema_version {
            conn.apply_schema_version(schema_version)?;
        }

        tracing::debug!(path = %conn.path, version = ffi::version(), "opened database");
        Ok(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(ConnectionConfig::memory())
    }

    /// Open a file-based database with default flags.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(ConnectionConfig::file(path))
    }

    /// Get the database path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the connection is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// The engine's numeric library version (e.g. 3.45.0 = 3045000).
    #[must_use]
    pub const fn library_version(&self) -> i32 {
        self.lib_version
    }

    /// The configured date/time storage format.
    #[must_use]
    pub const fn datetime_format(&self) -> DateTimeFormat {
        self.datetime_format
    }

    /// Adjust the busy timeout.
    pub fn set_busy_timeout(&self, timeout: Duration) {
        // SAFETY: db is valid while the connection exists
        unsafe {
            ffi::sqlite3_busy_timeout(self.db, timeout.as_millis() as c_int);
        }
    }

    /// Allow or forbid loading of native extensions.
    pub fn enable_load_extension(&self, enabled: bool) -> Result<()> {
        self.ensure_open()?;
        // SAFETY: db is valid
        let rc = unsafe { ffi::sqlite3_enable_load_extension(self.db, c_int::from(enabled)) };
        if rc != ffi::SQLITE_OK {
            return Err(engine_error(self.db, rc));
        }
        Ok(())
    }

    /// Subscribe to change events. Listeners run synchronously after each
    /// mutation that affected at least one row.
    pub fn on_change(
        &self,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.notifier.on(callback)
    }

    /// Remove a change listener.
    pub fn off_change(&self, id: ListenerId) {
        self.notifier.off(id);
    }

    /// Execute a statement with positional `?` parameters; returns the
    /// affected-row count.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        let started = self.trace.then(Instant::now);
        let mut stmt = Statement::prepare(self.db, sql)?;
        stmt.bind_all(params, self.datetime_format)?;
        let changes = stmt.execute_non_query()?;
        self.trace_sql(sql, started, changes);
        Ok(changes)
    }

    /// Decode the first column of the first row, or the target's default
    /// when the query yields no rows.
    pub fn execute_scalar<T: FromValue + Default>(&self, sql: &str, params: &[Value]) -> Result<T> {
        self.ensure_open()?;
        let started = self.trace.then(Instant::now);
        let mut stmt = Statement::prepare(self.db, sql)?;
        stmt.bind_all(params, self.datetime_format)?;
        let value = stmt.execute_scalar()?;
        self.trace_sql(sql, started, 0);
        Ok(value)
    }

    /// Run a query and materialize every row into `T` eagerly.
    pub fn query<T: Schema + Default>(&self, sql: &str, params: &[Value]) -> Result<Vec<T>> {
        self.ensure_open()?;
        let desc = T::descriptor();
        let started = self.trace.then(Instant::now);
        let mut stmt = Statement::prepare(self.db, sql)?;
        stmt.bind_all(params, self.datetime_format)?;
        let mapping = stmt.column_mapping(desc);

        let mut records = Vec::new();
        loop {
            match stmt.step()? {
                StepResult::Row => records.push(stmt.read_record(desc, &mapping)?),
                StepResult::Done => break,
            }
        }
        self.trace_sql(sql, started, records.len() as u64);
        Ok(records)
    }

    /// Run a query lazily: each iteration step advances the underlying
    /// statement, and the statement is finalized when the sequence is
    /// dropped. The borrow keeps the connection open for the sequence's
    /// lifetime.
    pub fn deferred_query<T: Schema + Default>(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<DeferredRows<'_, T>> {
        self.ensure_open()?;
        let desc = T::descriptor();
        let mut stmt = Statement::prepare(self.db, sql)?;
        stmt.bind_all(params, self.datetime_format)?;
        let mapping = stmt.column_mapping(desc);
        Ok(DeferredRows {
            _conn: self,
            stmt,
            mapping,
            done: false,
            _marker: PhantomData,
        })
    }

    /// Run a query and materialize every row dynamically.
    pub fn query_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let started = self.trace.then(Instant::now);
        let mut stmt = Statement::prepare(self.db, sql)?;
        stmt.bind_all(params, self.datetime_format)?;

        let col_count = stmt.column_count();
        let names = (0..col_count)
            .map(|i| stmt.column_name(i).unwrap_or_else(|| format!("col{}", i)))
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = Vec::new();
        loop {
            match stmt.step()? {
                StepResult::Row => {
                    let values = (0..col_count).map(|i| stmt.read_column(i)).collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                StepResult::Done => break,
            }
        }
        self.trace_sql(sql, started, rows.len() as u64);
        Ok(rows)
    }

    /// Look up a record by primary key.
    pub fn find<T: Schema + Default>(&self, pk: impl Into<Value>) -> Result<Option<T>> {
        let desc = T::descriptor();
        let pk_col = desc.primary_key().ok_or_else(|| {
            Error::UnsupportedOperation(format!(
                "cannot find by key: table '{}' has no primary key",
                desc.table_name()
            ))
        })?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            quote_ident(desc.table_name()),
            quote_ident(pk_col.name)
        );
        let mut rows = self.query::<T>(&sql, &[pk.into()])?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    /// Look up a record by primary key, erroring when it does not exist.
    pub fn get<T: Schema + Default>(&self, pk: impl Into<Value>) -> Result<T> {
        let desc = T::descriptor();
        self.find::<T>(pk)?.ok_or_else(|| {
            Error::DataIntegrity(rowlite_core::DataIntegrityError {
                expected: "exactly one row",
                actual: format!("no row in '{}' with the given key", desc.table_name()),
                column: None,
            })
        })
    }

    /// Read `PRAGMA table_info` for a table.
    pub fn table_info(&self, table: &str) -> Result<Vec<Row>> {
        self.query_rows(&format!("PRAGMA table_info({})", quote_ident(table)), &[])
    }

    /// The rowid assigned by the most recent successful insert.
    #[must_use]
    pub fn last_insert_rowid(&self) -> i64 {
        if !self.is_open() {
            return 0;
        }
        // SAFETY: db is valid while open
        unsafe { ffi::sqlite3_last_insert_rowid(self.db) }
    }

    /// Rows affected by the most recent statement.
    #[must_use]
    pub fn changes(&self) -> u64 {
        if !self.is_open() {
            return 0;
        }
        // SAFETY: db is valid while open
        (unsafe { ffi::sqlite3_changes(self.db) }) as u64
    }

    /// Close the connection: dispose every cached insert statement, then
    /// close the handle (`close_v2` on engines that have it). Idempotent.
    pub fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        // Cached statements must be finalized before the handle goes away
        self.insert_cache
            .lock()
            .expect("statement cache poisoned")
            .clear();

        // SAFETY: db is valid; after this call it must not be used again,
        // which the `open` flag enforces for every public entry point
        let rc = unsafe {
            if self.lib_version >= ffi::CLOSE_V2_MIN_VERSION {
                ffi::sqlite3_close_v2(self.db)
            } else {
                ffi::sqlite3_close(self.db)
            }
        };
        if rc != ffi::SQLITE_OK {
            return Err(Error::engine(rc, ffi::error_string(rc)));
        }
        tracing::debug!(path = %self.path, "closed database");
        Ok(())
    }

    // ---- crate-internal plumbing ----

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::InvalidState("connection is closed".to_string()))
        }
    }

    pub(crate) fn raw(&self) -> *mut ffi::sqlite3 {
        self.db
    }

    /// Execute SQL directly without preparing (PRAGMAs, TCL).
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.ensure_open()?;
        let c_sql = CString::new(sql)
            .map_err(|_| Error::invalid_argument("SQL contains an interior null byte"))?;

        let started = self.trace.then(Instant::now);
        let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

        // SAFETY: all pointers are valid
        let rc = unsafe {
            ffi::sqlite3_exec(self.db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg)
        };

        if rc != ffi::SQLITE_OK {
            let message = if errmsg.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: errmsg is a valid engine-allocated string
                let msg = unsafe { CStr::from_ptr(errmsg).to_string_lossy().into_owned() };
                unsafe { ffi::sqlite3_free(errmsg.cast()) };
                msg
            };
            return Err(Error::engine(rc, message));
        }
        self.trace_sql(sql, started, 0);
        Ok(())
    }

    pub(crate) fn notify(&self, table: &'static str, action: ChangeAction) {
        self.notifier.emit(&ChangeEvent { table, action });
    }

    fn trace_sql(&self, sql: &str, started: Option<Instant>, rows: u64) {
        if let Some(started) = started {
            tracing::debug!(
                sql = %sql,
                rows,
                elapsed_us = started.elapsed().as_micros() as u64,
                "executed"
            );
        }
    }

    fn apply_schema_version(&self, schema_version: &SchemaVersion) -> Result<()> {
        let mut current: i32 = self.execute_scalar("PRAGMA user_version", &[])?;
        if current > schema_version.target {
            return Err(Error::UnsupportedDowngrade(DowngradeError {
                db_version: current,
                target_version: schema_version.target,
            }));
        }
        while current < schema_version.target {
            tracing::debug!(from = current, to = current + 1, "running schema upgrade");
            (schema_version.upgrade)(self, current)?;
            current += 1;
            self.execute(&format!("PRAGMA user_version = {}", current), &[])?;
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Finalizer path: errors are suppressed
        let _ = self.close();
    }
}

impl Executor for Connection {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        Connection::execute(self, sql, params)
    }

    fn query_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        Connection::query_rows(self, sql, params)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field(
                "transaction_depth",
                &self.transaction_depth.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

/// Lazily materialized query results.
///
/// Each `next()` advances the underlying statement; the statement is
/// finalized when this iterator is dropped. The `'conn` borrow guarantees
/// the connection outlives the sequence.
pub struct DeferredRows<'conn, T: Schema + Default> {
    _conn: &'conn Connection,
    stmt: Statement,
    mapping: Vec<Option<usize>>,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Schema + Default> Iterator for DeferredRows<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.stmt.step() {
            Ok(StepResult::Row) => {
                Some(self.stmt.read_record(T::descriptor(), &self.mapping))
            }
            Ok(StepResult::Done) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = Connection::open_memory().unwrap();
        assert_eq!(conn.path(), ":memory:");
        assert!(conn.is_open());
        assert!(conn.library_version() >= 3_000_000);
    }

    #[test]
    fn test_execute_and_changes() {
        let conn = Connection::open_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();
        let changes = conn
            .execute("INSERT INTO t (name) VALUES (?)", &[Value::from("Alice")])
            .unwrap();
        assert_eq!(changes, 1);
        assert_eq!(conn.changes(), 1);
        assert_eq!(conn.last_insert_rowid(), 1);
    }

    #[test]
    fn test_query_rows_with_params() {
        let conn = Connection::open_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)", &[])
            .unwrap();
        conn.execute(
            "INSERT INTO t (name, age) VALUES (?, ?)",
            &[Value::from("Alice"), Value::from(30)],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO t (name, age) VALUES (?, ?)",
            &[Value::from("Bob"), Value::from(25)],
        )
        .unwrap();

        let rows = conn
            .query_rows("SELECT * FROM t WHERE age > ? ORDER BY id", &[Value::from(26)])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_named::<String>("name").unwrap(), "Alice");
        assert_eq!(rows[0].get_named::<i32>("age").unwrap(), 30);
    }

    #[test]
    fn test_null_round_trip() {
        let conn = Connection::open_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();
        conn.execute("INSERT INTO t (name) VALUES (?)", &[Value::Null])
            .unwrap();

        let rows = conn.query_rows("SELECT name FROM t", &[]).unwrap();
        assert_eq!(rows[0].get_named::<Option<String>>("name").unwrap(), None);
    }

    #[test]
    fn test_execute_scalar() {
        let conn = Connection::open_memory().unwrap();
        let n: i64 = conn.execute_scalar("SELECT 41 + 1", &[]).unwrap();
        assert_eq!(n, 42);

        let s: String = conn.execute_scalar("SELECT 'hi'", &[]).unwrap();
        assert_eq!(s, "hi");
    }

    #[test]
    fn test_execute_scalar_default_when_empty() {
        let conn = Connection::open_memory().unwrap();
        conn.execute("CREATE TABLE t (n INTEGER)", &[]).unwrap();
        let n: i64 = conn.execute_scalar("SELECT n FROM t", &[]).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_parameter_arity_mismatch() {
        let conn = Connection::open_memory().unwrap();
        conn.execute("CREATE TABLE t (a, b)", &[]).unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES (?, ?)", &[Value::from(1)])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_foreign_keys_enabled_on_open() {
        let conn = Connection::open_memory().unwrap();
        let enabled: i64 = conn.execute_scalar("PRAGMA foreign_keys", &[]).unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_cannot_open_missing_readonly() {
        let err = Connection::open(
            ConnectionConfig::file("/nonexistent/dir/missing.db").flags(OpenFlags::read_only()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::CannotOpen(_)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let conn = Connection::open_memory().unwrap();
        conn.close().unwrap();
        conn.close().unwrap();
        assert!(!conn.is_open());

        let err = conn.execute("SELECT 1", &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_binary_key_length_check() {
        assert!(matches!(
            EncryptionKey::binary(&[0u8; 16]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(EncryptionKey::binary(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_key_pragma_rendering() {
        let text = EncryptionKey::text("pass'word");
        assert_eq!(text.pragma(), "pragma key = 'pass''word'");

        let binary = EncryptionKey::binary(&[0xab; 32]).unwrap();
        let pragma = binary.pragma();
        assert!(pragma.starts_with("pragma key = \"x'"));
        assert!(pragma.contains(&"ab".repeat(32)));
        assert!(pragma.ends_with("'\""));
    }

    #[test]
    fn test_open_flags_writable() {
        assert!(OpenFlags::create_read_write().is_writable());
        assert!(OpenFlags::read_write().is_writable());
        assert!(!OpenFlags::read_only().is_writable());
    }
}
