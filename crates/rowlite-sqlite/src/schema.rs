//! Schema mapping and additive migration.
//!
//! `create_table` derives DDL from a table descriptor. For a table that
//! already exists, the live columns are read back through
//! `PRAGMA table_info` and the diff is applied with `ALTER TABLE ADD
//! COLUMN` only: nothing is ever dropped, renamed, or retyped.

use crate::connection::Connection;
use rowlite_core::{Result, Row, Schema, TableDescriptor, quote_ident};

/// Outcome of [`Connection::create_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateTableResult {
    /// The table did not exist and was created.
    Created,
    /// The table existed and was reconciled (possibly with an empty diff).
    Migrated,
}

impl Connection {
    /// Create the table for `T` if missing, otherwise migrate it additively.
    /// Declared indexes are created either way.
    pub fn create_table<T: Schema>(&self) -> Result<CreateTableResult> {
        let desc = T::descriptor();
        let existing = self.table_info(desc.table_name())?;

        let result = if existing.is_empty() {
            let decls: Vec<String> = desc.columns().iter().map(|c| c.sql_declaration()).collect();
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {}({})",
                quote_ident(desc.table_name()),
                decls.join(", ")
            );
            tracing::debug!(table = desc.table_name(), sql = %sql, "creating table");
            self.execute(&sql, &[])?;
            CreateTableResult::Created
        } else {
            self.migrate_table(desc, &existing)?;
            CreateTableResult::Migrated
        };

        for index in desc.index_specs()? {
            let columns: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
            let sql = format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {}({})",
                if index.unique { "UNIQUE " } else { "" },
                quote_ident(&index.name),
                quote_ident(desc.table_name()),
                columns.join(",")
            );
            tracing::debug!(index = %index.name, sql = %sql, "creating index");
            self.execute(&sql, &[])?;
        }

        Ok(result)
    }

    /// Drop the table for `T` if it exists.
    pub fn drop_table<T: Schema>(&self) -> Result<()> {
        let desc = T::descriptor();
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(desc.table_name()));
        tracing::debug!(table = desc.table_name(), "dropping table");
        self.execute(&sql, &[])?;
        Ok(())
    }

    /// Add every descriptor column missing from the live table. Column
    /// names are compared case-insensitively, the way the engine treats
    /// identifiers.
    fn migrate_table<R>(&self, desc: &TableDescriptor<R>, existing: &[Row]) -> Result<()> {
        let live: Vec<String> = existing
            .iter()
            .filter_map(|row| row.get_named::<String>("name").ok())
            .map(|name| name.to_lowercase())
            .collect();

        for col in desc.columns() {
            if live.iter().any(|name| name == &col.name.to_lowercase()) {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote_ident(desc.table_name()),
                col.sql_declaration()
            );
            tracing::debug!(table = desc.table_name(), column = col.name, sql = %sql, "adding column");
            self.execute(&sql, &[])?;
        }
        Ok(())
    }
}
