//! The seam between descriptor callbacks and a concrete database backend.

use crate::Result;
use crate::row::Row;
use crate::value::Value;

/// Minimal execution surface a backend exposes to descriptor callbacks.
///
/// Relation hooks ([`crate::RelationSpec::write_children`]) receive a
/// `&dyn Executor` so they can write join-table rows without this crate
/// depending on any particular engine.
pub trait Executor {
    /// Execute a statement with positional `?` parameters; returns the
    /// affected-row count.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a query and materialize every row eagerly.
    fn query_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;
}
