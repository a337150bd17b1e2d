//! Table descriptors: the immutable description of a mapped table.
//!
//! A [`TableDescriptor`] describes a table's schema and how to read and
//! write instances of the record type it maps. Descriptors are built once
//! (typically into a `LazyLock` behind the [`Schema`] trait) and shared
//! immutably; the ORM core treats them as data and never introspects the
//! record type itself. Per-column access goes through the two
//! function-typed members `get` and `set`.

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::identifiers::quote_ident;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageType {
    /// Signed 64-bit integer storage
    Integer,
    /// 8-byte IEEE floating point
    Real,
    /// UTF-8 text
    Text,
    /// Binary data
    Blob,
    /// Column that only ever holds NULL
    NullOnly,
}

/// A single index membership declared on a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedSpec {
    /// Index name; defaults to `<table>_<column>` when absent.
    pub index_name: Option<&'static str>,
    /// Position of this column inside a multi-column index.
    pub order: u32,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

impl IndexedSpec {
    /// A plain, unnamed, non-unique index on this column alone.
    #[must_use]
    pub const fn plain() -> Self {
        Self {
            index_name: None,
            order: 0,
            unique: false,
        }
    }

    /// A named index membership.
    #[must_use]
    pub const fn named(index_name: &'static str, order: u32, unique: bool) -> Self {
        Self {
            index_name: Some(index_name),
            order,
            unique,
        }
    }
}

/// An aggregated index over one or more columns, derived from the
/// per-column [`IndexedSpec`]s of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    /// Participating columns, sorted by their declared order.
    pub columns: Vec<&'static str>,
    pub unique: bool,
}

/// Description of one column: its SQL shape plus the delegates that move
/// values in and out of the record type.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor<R> {
    pub name: &'static str,
    pub storage: StorageType,
    pub is_primary_key: bool,
    pub is_auto_increment: bool,
    pub is_nullable: bool,
    pub is_unique: bool,
    pub collation: Option<&'static str>,
    pub default_expr: Option<&'static str>,
    /// Maximum length for text columns; renders the type as `varchar(N)`.
    pub max_length: Option<u32>,
    pub indices: Vec<IndexedSpec>,
    /// Read this column's value out of a record.
    pub get: fn(&R) -> Value,
    /// Write a decoded value into a record's field.
    pub set: fn(&mut R, Value) -> Result<()>,
}

impl<R> ColumnDescriptor<R> {
    /// Create a column with the minimum required data. Columns default to
    /// nullable, non-unique, not indexed.
    pub fn new(
        name: &'static str,
        storage: StorageType,
        get: fn(&R) -> Value,
        set: fn(&mut R, Value) -> Result<()>,
    ) -> Self {
        Self {
            name,
            storage,
            is_primary_key: false,
            is_auto_increment: false,
            is_nullable: true,
            is_unique: false,
            collation: None,
            default_expr: None,
            max_length: None,
            indices: Vec::new(),
            get,
            set,
        }
    }

    /// Mark this column as the primary key. Primary keys are never nullable.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self
    }

    /// Mark this column as auto-incrementing. Implies `primary_key`.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.is_auto_increment = true;
        self.primary_key()
    }

    /// Declare a NOT NULL constraint.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    /// Declare a column-level UNIQUE constraint.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    /// Set the collation sequence (e.g. `NOCASE`).
    #[must_use]
    pub fn collation(mut self, collation: &'static str) -> Self {
        self.collation = Some(collation);
        self
    }

    /// Set a raw SQL default expression.
    #[must_use]
    pub fn default_expr(mut self, expr: &'static str) -> Self {
        self.default_expr = Some(expr);
        self
    }

    /// Limit a text column's length; the declared type becomes `varchar(N)`.
    #[must_use]
    pub fn max_length(mut self, length: u32) -> Self {
        self.max_length = Some(length);
        self
    }

    /// Add this column to an index.
    #[must_use]
    pub fn indexed(mut self, spec: IndexedSpec) -> Self {
        self.indices.push(spec);
        self
    }

    /// Declared SQL type for this column.
    #[must_use]
    pub fn sql_type(&self) -> String {
        match self.storage {
            StorageType::Integer => "integer".to_string(),
            StorageType::Real => "real".to_string(),
            StorageType::Text => match self.max_length {
                Some(n) => format!("varchar({})", n),
                None => "text".to_string(),
            },
            StorageType::Blob => "blob".to_string(),
            StorageType::NullOnly => "none".to_string(),
        }
    }

    /// Full SQL column declaration as used in CREATE TABLE and ADD COLUMN.
    #[must_use]
    pub fn sql_declaration(&self) -> String {
        let mut decl = format!("{} {}", quote_ident(self.name), self.sql_type());
        if self.is_primary_key {
            decl.push_str(" PRIMARY KEY");
            if self.is_auto_increment {
                decl.push_str(" AUTOINCREMENT");
            }
        }
        if !self.is_nullable {
            decl.push_str(" NOT NULL");
        }
        if self.is_unique {
            decl.push_str(" UNIQUE");
        }
        if let Some(collation) = self.collation {
            decl.push_str(" COLLATE ");
            decl.push_str(collation);
        }
        if let Some(expr) = self.default_expr {
            decl.push_str(" DEFAULT ");
            decl.push_str(expr);
        }
        decl
    }
}

/// A many-to-many relation hook. After a record is written, the hook is
/// invoked to persist join-table rows for the relation's children. The
/// callback is opaque to the core.
#[derive(Debug, Clone, Copy)]
pub struct RelationSpec<R> {
    pub name: &'static str,
    pub write_children: fn(&dyn Executor, &R) -> Result<()>,
}

/// Immutable description of a table schema and the record type it maps.
#[derive(Debug, Clone)]
pub struct TableDescriptor<R> {
    table_name: &'static str,
    columns: Vec<ColumnDescriptor<R>>,
    relations: Vec<RelationSpec<R>>,
    primary_key_index: Option<usize>,
    has_auto_inc_pk: bool,
}

impl<R> TableDescriptor<R> {
    /// Start building a descriptor for `table_name`.
    pub fn builder(table_name: &'static str) -> TableBuilder<R> {
        TableBuilder {
            table_name,
            columns: Vec::new(),
            relations: Vec::new(),
        }
    }

    #[must_use]
    pub fn table_name(&self) -> &'static str {
        self.table_name
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnDescriptor<R>] {
        &self.columns
    }

    #[must_use]
    pub fn relations(&self) -> &[RelationSpec<R>] {
        &self.relations
    }

    /// The primary key column, when the table declares one.
    #[must_use]
    pub fn primary_key(&self) -> Option<&ColumnDescriptor<R>> {
        self.primary_key_index.map(|i| &self.columns[i])
    }

    /// Whether the primary key is an auto-increment integer.
    #[must_use]
    pub const fn has_auto_inc_pk(&self) -> bool {
        self.has_auto_inc_pk
    }

    /// Look up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor<R>> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns bound by a plain INSERT: everything except an
    /// auto-increment primary key.
    pub fn insert_columns(&self) -> impl Iterator<Item = &ColumnDescriptor<R>> {
        self.columns.iter().filter(|c| !c.is_auto_increment)
    }

    /// Columns updated by an UPDATE: everything except the primary key.
    pub fn non_pk_columns(&self) -> impl Iterator<Item = &ColumnDescriptor<R>> {
        self.columns.iter().filter(|c| !c.is_primary_key)
    }

    /// Aggregate the per-column index declarations into whole-index specs.
    ///
    /// Indexes are keyed by name, defaulting to `<table>_<column>` for
    /// unnamed declarations. All columns participating in one index must
    /// agree on its uniqueness.
    pub fn index_specs(&self) -> Result<Vec<IndexSpec>> {
        // name -> (unique, [(order, column)])
        let mut indexes: Vec<(String, bool, Vec<(u32, &'static str)>)> = Vec::new();

        for col in &self.columns {
            for spec in &col.indices {
                let name = match spec.index_name {
                    Some(n) => n.to_string(),
                    None => format!("{}_{}", self.table_name, col.name),
                };
                match indexes.iter_mut().find(|(n, _, _)| *n == name) {
                    Some((_, unique, members)) => {
                        if *unique != spec.unique {
                            return Err(Error::schema(format!(
                                "all columns of index '{}' must agree on uniqueness",
                                name
                            )));
                        }
                        members.push((spec.order, col.name));
                    }
                    None => indexes.push((name, spec.unique, vec![(spec.order, col.name)])),
                }
            }
        }

        Ok(indexes
            .into_iter()
            .map(|(name, unique, mut members)| {
                members.sort_by_key(|(order, _)| *order);
                IndexSpec {
                    name,
                    columns: members.into_iter().map(|(_, c)| c).collect(),
                    unique,
                }
            })
            .collect())
    }
}

/// Builder for [`TableDescriptor`]; `build` validates the descriptor
/// invariants.
pub struct TableBuilder<R> {
    table_name: &'static str,
    columns: Vec<ColumnDescriptor<R>>,
    relations: Vec<RelationSpec<R>>,
}

impl<R> TableBuilder<R> {
    /// Append a column. Order is preserved.
    #[must_use]
    pub fn column(mut self, col: ColumnDescriptor<R>) -> Self {
        self.columns.push(col);
        self
    }

    /// Append a many-to-many relation hook.
    #[must_use]
    pub fn relation(mut self, rel: RelationSpec<R>) -> Self {
        self.relations.push(rel);
        self
    }

    /// Validate and freeze the descriptor.
    ///
    /// # Errors
    ///
    /// `Schema` errors for: empty table name, no columns, duplicate column
    /// names, more than one primary key, or an auto-increment column whose
    /// storage type is not 64-bit integer.
    pub fn build(self) -> Result<TableDescriptor<R>> {
        if self.table_name.is_empty() {
            return Err(Error::schema("table name must not be empty"));
        }
        if self.columns.is_empty() {
            return Err(Error::schema(format!(
                "table '{}' declares no columns",
                self.table_name
            )));
        }

        let mut primary_key_index = None;
        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(Error::schema(format!(
                    "duplicate column '{}' on table '{}'",
                    col.name, self.table_name
                )));
            }
            if col.is_primary_key {
                if primary_key_index.is_some() {
                    return Err(Error::schema(format!(
                        "table '{}' declares more than one primary key",
                        self.table_name
                    )));
                }
                primary_key_index = Some(i);
            }
            if col.is_auto_increment && col.storage != StorageType::Integer {
                return Err(Error::schema(format!(
                    "auto-increment column '{}' must have integer storage",
                    col.name
                )));
            }
        }

        let has_auto_inc_pk = primary_key_index
            .map(|i| self.columns[i].is_auto_increment)
            .unwrap_or(false);

        Ok(TableDescriptor {
            table_name: self.table_name,
            columns: self.columns,
            relations: self.relations,
            primary_key_index,
            has_auto_inc_pk,
        })
    }
}

/// Trait for record types that carry a table descriptor.
///
/// Implementations build the descriptor once (a `LazyLock` static is the
/// usual vehicle) and hand out a shared reference; the derivation is thereby
/// memoized for the life of the process.
pub trait Schema: Sized + 'static {
    /// The descriptor mapping this type to its table.
    fn descriptor() -> &'static TableDescriptor<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::FromValue;

    #[derive(Debug, Default)]
    struct Item {
        id: i64,
        name: String,
        rank: Option<i32>,
    }

    fn item_columns() -> Vec<ColumnDescriptor<Item>> {
        vec![
            ColumnDescriptor::new(
                "Id",
                StorageType::Integer,
                |r: &Item| Value::BigInt(r.id),
                |r, v| {
                    r.id = i64::from_value(&v)?;
                    Ok(())
                },
            )
            .auto_increment(),
            ColumnDescriptor::new(
                "Name",
                StorageType::Text,
                |r: &Item| Value::Text(r.name.clone()),
                |r, v| {
                    r.name = String::from_value(&v)?;
                    Ok(())
                },
            )
            .not_null(),
            ColumnDescriptor::new(
                "Rank",
                StorageType::Integer,
                |r: &Item| r.rank.map(Value::Int).unwrap_or(Value::Null),
                |r, v| {
                    r.rank = Option::<i32>::from_value(&v)?;
                    Ok(())
                },
            ),
        ]
    }

    fn item_descriptor() -> TableDescriptor<Item> {
        let mut builder = TableDescriptor::builder("Item");
        for col in item_columns() {
            builder = builder.column(col);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_sql_declaration_auto_inc_pk() {
        let desc = item_descriptor();
        assert_eq!(
            desc.columns()[0].sql_declaration(),
            "\"Id\" integer PRIMARY KEY AUTOINCREMENT NOT NULL"
        );
    }

    #[test]
    fn test_sql_declaration_not_null_text() {
        let desc = item_descriptor();
        assert_eq!(desc.columns()[1].sql_declaration(), "\"Name\" text NOT NULL");
    }

    #[test]
    fn test_sql_declaration_nullable() {
        let desc = item_descriptor();
        assert_eq!(desc.columns()[2].sql_declaration(), "\"Rank\" integer");
    }

    #[test]
    fn test_sql_declaration_full_clause_order() {
        let col = ColumnDescriptor::new(
            "Code",
            StorageType::Text,
            |_: &Item| Value::Null,
            |_, _| Ok(()),
        )
        .not_null()
        .unique()
        .collation("NOCASE")
        .default_expr("'x'")
        .max_length(16);

        assert_eq!(
            col.sql_declaration(),
            "\"Code\" varchar(16) NOT NULL UNIQUE COLLATE NOCASE DEFAULT 'x'"
        );
    }

    #[test]
    fn test_insert_columns_skip_auto_inc_pk() {
        let desc = item_descriptor();
        let names: Vec<_> = desc.insert_columns().map(|c| c.name).collect();
        assert_eq!(names, vec!["Name", "Rank"]);
    }

    #[test]
    fn test_primary_key_lookup() {
        let desc = item_descriptor();
        assert_eq!(desc.primary_key().unwrap().name, "Id");
        assert!(desc.has_auto_inc_pk());
    }

    #[test]
    fn test_get_set_delegates() {
        let desc = item_descriptor();
        let mut item = Item {
            id: 7,
            name: "a".to_string(),
            rank: None,
        };

        assert_eq!((desc.columns()[0].get)(&item), Value::BigInt(7));
        (desc.columns()[1].set)(&mut item, Value::Text("b".to_string())).unwrap();
        assert_eq!(item.name, "b");
        (desc.columns()[2].set)(&mut item, Value::Null).unwrap();
        assert_eq!(item.rank, None);
    }

    #[test]
    fn test_index_default_name() {
        let cols = item_columns();
        let desc = TableDescriptor::builder("Item")
            .column(cols.into_iter().next().unwrap())
            .column(
                ColumnDescriptor::new(
                    "Name",
                    StorageType::Text,
                    |_: &Item| Value::Null,
                    |_, _| Ok(()),
                )
                .indexed(IndexedSpec::plain()),
            )
            .build()
            .unwrap();

        let specs = desc.index_specs().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "Item_Name");
        assert_eq!(specs[0].columns, vec!["Name"]);
        assert!(!specs[0].unique);
    }

    #[test]
    fn test_multi_column_index_sorted_by_order() {
        let desc = TableDescriptor::builder("Item")
            .column(
                ColumnDescriptor::new(
                    "B",
                    StorageType::Text,
                    |_: &Item| Value::Null,
                    |_, _| Ok(()),
                )
                .indexed(IndexedSpec::named("ix_combo", 2, true)),
            )
            .column(
                ColumnDescriptor::new(
                    "A",
                    StorageType::Text,
                    |_: &Item| Value::Null,
                    |_, _| Ok(()),
                )
                .indexed(IndexedSpec::named("ix_combo", 1, true)),
            )
            .build()
            .unwrap();

        let specs = desc.index_specs().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].columns, vec!["A", "B"]);
        assert!(specs[0].unique);
    }

    #[test]
    fn test_index_unique_conflict() {
        let desc = TableDescriptor::builder("Item")
            .column(
                ColumnDescriptor::new(
                    "A",
                    StorageType::Text,
                    |_: &Item| Value::Null,
                    |_, _| Ok(()),
                )
                .indexed(IndexedSpec::named("ix_combo", 0, true)),
            )
            .column(
                ColumnDescriptor::new(
                    "B",
                    StorageType::Text,
                    |_: &Item| Value::Null,
                    |_, _| Ok(()),
                )
                .indexed(IndexedSpec::named("ix_combo", 1, false)),
            )
            .build()
            .unwrap();

        assert!(matches!(desc.index_specs(), Err(Error::Schema(_))));
    }

    #[test]
    fn test_build_rejects_two_primary_keys() {
        let result = TableDescriptor::builder("Item")
            .column(
                ColumnDescriptor::new(
                    "A",
                    StorageType::Integer,
                    |_: &Item| Value::Null,
                    |_, _| Ok(()),
                )
                .primary_key(),
            )
            .column(
                ColumnDescriptor::new(
                    "B",
                    StorageType::Integer,
                    |_: &Item| Value::Null,
                    |_, _| Ok(()),
                )
                .primary_key(),
            )
            .build();

        assert!(matches!(result, Err(Error::Schema(_))));
    }

    #[test]
    fn test_build_rejects_text_auto_increment() {
        let result = TableDescriptor::builder("Item")
            .column(
                ColumnDescriptor::new(
                    "Id",
                    StorageType::Text,
                    |_: &Item| Value::Null,
                    |_, _| Ok(()),
                )
                .auto_increment(),
            )
            .build();

        assert!(matches!(result, Err(Error::Schema(_))));
    }

    #[test]
    fn test_build_rejects_duplicate_columns() {
        let result = TableDescriptor::builder("Item")
            .column(ColumnDescriptor::new(
                "A",
                StorageType::Integer,
                |_: &Item| Value::Null,
                |_, _| Ok(()),
            ))
            .column(ColumnDescriptor::new(
                "A",
                StorageType::Text,
                |_: &Item| Value::Null,
                |_, _| Ok(()),
            ))
            .build();

        assert!(matches!(result, Err(Error::Schema(_))));
    }
}
