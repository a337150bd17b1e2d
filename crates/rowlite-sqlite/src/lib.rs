//! SQLite backend for rowlite.
//!
//! This crate turns [`rowlite_core`] table descriptors into live tables and
//! rows over an embedded SQLite database:
//!
//! - [`Connection`]: owns the database handle and provides the
//!   execute/query/transaction surface and change notification dispatch
//! - [`Connection::create_table`]: schema mapping plus additive migration
//! - insert/update/delete/upsert pipeline with cached prepared statements
//! - depth-counted savepoint nesting via
//!   [`Connection::run_in_transaction`]
//!
//! ```no_run
//! use rowlite_sqlite::{Connection, Schema};
//! # use rowlite_core::{Result, TableDescriptor};
//! # #[derive(Default)] struct Item;
//! # impl Schema for Item {
//! #     fn descriptor() -> &'static TableDescriptor<Self> { unimplemented!() }
//! # }
//!
//! # fn demo() -> Result<()> {
//! let db = Connection::open_file("app.db")?;
//! db.create_table::<Item>()?;
//! let mut item = Item::default();
//! db.insert(&mut item)?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod crud;
pub mod ffi;
pub mod marshal;
pub mod schema;
mod statement;
mod transaction;

pub use connection::{
    Connection, ConnectionConfig, DeferredRows, EncryptionKey, OpenFlags, SchemaVersion,
    UpgradeFn,
};
pub use crud::InsertModifier;
pub use marshal::{DateTimeFormat, timestamp_from_iso};
pub use schema::CreateTableResult;

pub use rowlite_core::{
    ChangeAction, ChangeEvent, ColumnDescriptor, Error, Executor, FromValue, IndexSpec,
    IndexedSpec, RelationSpec, Result, Row, Schema, StorageType, TableDescriptor, Value,
    quote_ident, quote_str,
};
