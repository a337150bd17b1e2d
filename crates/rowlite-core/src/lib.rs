//! Core types for rowlite.
//!
//! This crate holds the engine-independent vocabulary of the ORM:
//!
//! - [`Value`]: dynamically-typed SQL values for binding and decoding
//! - [`Row`] and [`FromValue`]: result rows and the typed decode contract
//! - [`TableDescriptor`] and [`Schema`]: immutable table descriptors with
//!   per-column get/set delegates
//! - [`Executor`]: the seam trait relation hooks use to reach a backend
//! - [`ChangeNotifier`]: synchronous change events after mutations
//! - [`Error`]: the error taxonomy shared by all backends

pub mod descriptor;
pub mod error;
pub mod events;
pub mod executor;
pub mod identifiers;
pub mod row;
pub mod value;

pub use descriptor::{
    ColumnDescriptor, IndexSpec, IndexedSpec, RelationSpec, Schema, StorageType, TableBuilder,
    TableDescriptor,
};
pub use error::{
    ConstraintError, DataIntegrityError, DowngradeError, EngineError, Error, NotNullError,
    OpenError, Result, SchemaError,
};
pub use events::{ChangeAction, ChangeEvent, ChangeNotifier, ListenerId};
pub use executor::Executor;
pub use identifiers::{quote_ident, quote_str};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
