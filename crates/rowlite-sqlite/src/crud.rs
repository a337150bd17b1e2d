//! Insert/update/delete/upsert pipeline.
//!
//! Plain inserts run through prepared statements cached per
//! `(record type, modifier)`. The cache is filled compute-outside-lock with
//! insert-if-absent, and a losing duplicate statement is finalized on the
//! spot. Execution of a cached statement holds that statement's mutex, since
//! prepared statements cannot interleave.

use crate::connection::Connection;
use crate::ffi;
use crate::statement::Statement;
use rowlite_core::{
    ChangeAction, ColumnDescriptor, Error, NotNullError, Result, Schema, TableDescriptor, Value,
    quote_ident,
};
use std::any::TypeId;
use std::sync::{Arc, Mutex};

/// Conflict modifier for INSERT statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InsertModifier {
    /// Plain `INSERT`.
    #[default]
    None,
    /// `INSERT OR REPLACE`: the primary key is written too, enabling
    /// replace-by-PK.
    OrReplace,
}

impl InsertModifier {
    const fn sql_fragment(self) -> &'static str {
        match self {
            InsertModifier::None => "",
            InsertModifier::OrReplace => " OR REPLACE",
        }
    }
}

/// A cached prepared insert statement, serialized by its own mutex so that
/// distinct call sites racing on the same statement take turns.
pub(crate) struct CachedStatement {
    pub(crate) inner: Mutex<Statement>,
}

impl Connection {
    /// Insert a record. On success, an auto-increment primary key is written
    /// back into the record from `last_insert_rowid`, relation hooks run,
    /// and an `Insert` event fires when a row was added.
    pub fn insert<T: Schema>(&self, obj: &mut T) -> Result<u64> {
        self.insert_with(obj, InsertModifier::None)
    }

    /// Insert with an explicit conflict modifier.
    pub fn insert_with<T: Schema>(&self, obj: &mut T, modifier: InsertModifier) -> Result<u64> {
        self.ensure_open()?;
        let desc = T::descriptor();
        let cols: Vec<&ColumnDescriptor<T>> = match modifier {
            InsertModifier::None => desc.insert_columns().collect(),
            InsertModifier::OrReplace => desc.columns().iter().collect(),
        };

        let values: Vec<Value> = cols
            .iter()
            .map(|c| {
                let v = (c.get)(obj);
                // An auto-increment PK holding the zero sentinel is bound as
                // NULL so the engine assigns a fresh rowid
                if c.is_auto_increment && matches!(v, Value::Int(0) | Value::BigInt(0)) {
                    Value::Null
                } else {
                    v
                }
            })
            .collect();

        let cached = self.cached_insert_statement::<T>(desc, &cols, modifier)?;
        let changes = {
            let mut stmt = cached.inner.lock().expect("insert statement poisoned");
            tracing::trace!(sql = %stmt.sql(), "executing cached insert");
            let result = stmt
                .bind_all(&values, self.datetime_format())
                .and_then(|()| stmt.execute_non_query());
            stmt.clear_bindings();
            result.map_err(|e| classify_constraint(desc, &cols, &values, e))?
        };

        self.finish_write(desc, obj, changes, ChangeAction::Insert)?;
        Ok(changes)
    }

    /// Insert every record inside a single transaction scope.
    pub fn insert_all<T: Schema>(&self, objs: &mut [T]) -> Result<u64> {
        self.run_in_transaction(|conn| {
            let mut total = 0;
            for obj in objs.iter_mut() {
                total += conn.insert(obj)?;
            }
            Ok(total)
        })
    }

    /// Insert-or-update: attempt an insert; on primary-key conflict, update
    /// the conflicting row's columns in place. Fires an `Upsert` event.
    pub fn upsert<T: Schema>(&self, obj: &mut T) -> Result<u64> {
        self.ensure_open()?;
        let desc = T::descriptor();
        let cols: Vec<&ColumnDescriptor<T>> = desc.insert_columns().collect();

        let col_values: Vec<Value> = cols.iter().map(|c| (c.get)(obj)).collect();
        let (sql, values) = match desc.primary_key() {
            Some(pk) if !cols.is_empty() => {
                let names: Vec<String> = cols.iter().map(|c| quote_ident(c.name)).collect();
                let qmarks = vec!["?"; cols.len()].join(",");
                let sets: Vec<String> = cols
                    .iter()
                    .map(|c| format!("{} = ?", quote_ident(c.name)))
                    .collect();
                let sql = format!(
                    "INSERT INTO {}({}) VALUES({}) ON CONFLICT({}) DO UPDATE SET {}",
                    quote_ident(desc.table_name()),
                    names.join(","),
                    qmarks,
                    quote_ident(pk.name),
                    sets.join(", ")
                );
                // Column values bound twice: once for VALUES, once for SET
                let mut values = col_values.clone();
                values.extend(col_values.iter().cloned());
                (sql, values)
            }
            _ => (insert_sql(desc, &cols, InsertModifier::None), col_values.clone()),
        };

        let changes = self
            .execute(&sql, &values)
            .map_err(|e| classify_constraint(desc, &cols, &col_values, e))?;

        self.finish_write(desc, obj, changes, ChangeAction::Upsert)?;
        Ok(changes)
    }

    /// Update the row matching the record's primary key.
    pub fn update<T: Schema>(&self, obj: &T) -> Result<u64> {
        self.ensure_open()?;
        let desc = T::descriptor();
        let pk = desc.primary_key().ok_or_else(|| {
            Error::UnsupportedOperation(format!(
                "cannot update '{}': table has no primary key",
                desc.table_name()
            ))
        })?;

        let mut cols: Vec<&ColumnDescriptor<T>> = desc.non_pk_columns().collect();
        if cols.is_empty() {
            // PK-only table: update all columns so the statement stays valid
            // (a value-level no-op)
            cols = desc.columns().iter().collect();
        }

        let sets: Vec<String> = cols
            .iter()
            .map(|c| format!("{} = ?", quote_ident(c.name)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_ident(desc.table_name()),
            sets.join(", "),
            quote_ident(pk.name)
        );

        let mut values: Vec<Value> = cols.iter().map(|c| (c.get)(obj)).collect();
        values.push((pk.get)(obj));

        let changes = self
            .execute(&sql, &values)
            .map_err(|e| classify_constraint(desc, &cols, &values, e))?;

        for relation in desc.relations() {
            (relation.write_children)(self, obj)?;
        }
        if changes > 0 {
            self.notify(desc.table_name(), ChangeAction::Update);
        }
        Ok(changes)
    }

    /// Delete the row matching the record's primary key.
    pub fn delete<T: Schema>(&self, obj: &T) -> Result<u64> {
        let desc = T::descriptor();
        let pk = desc.primary_key().ok_or_else(|| {
            Error::UnsupportedOperation(format!(
                "cannot delete from '{}': table has no primary key",
                desc.table_name()
            ))
        })?;
        self.delete_where_pk::<T>((pk.get)(obj))
    }

    /// Delete the row with the given primary key.
    pub fn delete_by_key<T: Schema>(&self, key: impl Into<Value>) -> Result<u64> {
        self.delete_where_pk::<T>(key.into())
    }

    /// Delete every row of the table.
    pub fn delete_all<T: Schema>(&self) -> Result<u64> {
        self.ensure_open()?;
        let desc = T::descriptor();
        let sql = format!("DELETE FROM {}", quote_ident(desc.table_name()));
        let changes = self.execute(&sql, &[])?;
        if changes > 0 {
            self.notify(desc.table_name(), ChangeAction::Delete);
        }
        Ok(changes)
    }

    fn delete_where_pk<T: Schema>(&self, key: Value) -> Result<u64> {
        self.ensure_open()?;
        let desc = T::descriptor();
        let pk = desc.primary_key().ok_or_else(|| {
            Error::UnsupportedOperation(format!(
                "cannot delete from '{}': table has no primary key",
                desc.table_name()
            ))
        })?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(desc.table_name()),
            quote_ident(pk.name)
        );
        let changes = self.execute(&sql, &[key])?;
        if changes > 0 {
            self.notify(desc.table_name(), ChangeAction::Delete);
        }
        Ok(changes)
    }

    /// Shared post-mutation tail: auto-increment writeback, relation
    /// fanout, change notification.
    fn finish_write<T: Schema>(
        &self,
        desc: &TableDescriptor<T>,
        obj: &mut T,
        changes: u64,
        action: ChangeAction,
    ) -> Result<()> {
        if desc.has_auto_inc_pk() {
            if let Some(pk) = desc.primary_key() {
                let rowid = self.last_insert_rowid();
                (pk.set)(obj, Value::BigInt(rowid))?;
            }
        }
        for relation in desc.relations() {
            (relation.write_children)(self, obj)?;
        }
        if changes > 0 {
            self.notify(desc.table_name(), action);
        }
        Ok(())
    }

    /// Fetch or create the cached insert statement for `(T, modifier)`.
    ///
    /// The statement is prepared outside the cache lock; if another call
    /// site won the race, the freshly prepared duplicate is finalized here.
    fn cached_insert_statement<T: Schema>(
        &self,
        desc: &TableDescriptor<T>,
        cols: &[&ColumnDescriptor<T>],
        modifier: InsertModifier,
    ) -> Result<Arc<CachedStatement>> {
        let key = (TypeId::of::<T>(), modifier);
        if let Some(found) = self
            .insert_cache
            .lock()
            .expect("statement cache poisoned")
            .get(&key)
        {
            return Ok(Arc::clone(found));
        }

        let sql = insert_sql(desc, cols, modifier);
        tracing::debug!(table = desc.table_name(), sql = %sql, "caching insert statement");
        let fresh = Arc::new(CachedStatement {
            inner: Mutex::new(Statement::prepare(self.raw(), &sql)?),
        });

        let mut cache = self.insert_cache.lock().expect("statement cache poisoned");
        let entry = cache.entry(key).or_insert_with(|| Arc::clone(&fresh));
        Ok(Arc::clone(entry))
    }
}

fn insert_sql<R>(
    desc: &TableDescriptor<R>,
    cols: &[&ColumnDescriptor<R>],
    modifier: InsertModifier,
) -> String {
    if cols.is_empty() {
        // Only column is the auto-increment PK
        return format!(
            "INSERT{} INTO {} DEFAULT VALUES",
            modifier.sql_fragment(),
            quote_ident(desc.table_name())
        );
    }
    let names: Vec<String> = cols.iter().map(|c| quote_ident(c.name)).collect();
    let qmarks = vec!["?"; cols.len()].join(",");
    format!(
        "INSERT{} INTO {}({}) VALUES({})",
        modifier.sql_fragment(),
        quote_ident(desc.table_name()),
        names.join(","),
        qmarks
    )
}

/// Map a constraint failure to the richer NOT NULL violation when the
/// extended error code says so, collecting the non-nullable columns whose
/// bound value was NULL.
fn classify_constraint<R>(
    desc: &TableDescriptor<R>,
    cols: &[&ColumnDescriptor<R>],
    values: &[Value],
    err: Error,
) -> Error {
    match err {
        Error::Constraint(ce) if ce.extended_code == Some(ffi::SQLITE_CONSTRAINT_NOTNULL) => {
            let columns = cols
                .iter()
                .zip(values)
                .filter(|(c, v)| !c.is_nullable && v.is_null())
                .map(|(c, _)| c.name)
                .collect();
            Error::NotNullConstraint(NotNullError {
                table: desc.table_name(),
                columns,
            })
        }
        e => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowlite_core::FromValue;

    #[derive(Debug, Default)]
    struct Rec {
        id: i64,
        name: String,
    }

    fn rec_descriptor() -> TableDescriptor<Rec> {
        TableDescriptor::builder("Rec")
            .column(
                ColumnDescriptor::new(
                    "Id",
                    rowlite_core::StorageType::Integer,
                    |r: &Rec| Value::BigInt(r.id),
                    |r, v| {
                        r.id = i64::from_value(&v)?;
                        Ok(())
                    },
                )
                .auto_increment(),
            )
            .column(
                ColumnDescriptor::new(
                    "Name",
                    rowlite_core::StorageType::Text,
                    |r: &Rec| Value::Text(r.name.clone()),
                    |r, v| {
                        r.name = String::from_value(&v)?;
                        Ok(())
                    },
                )
                .not_null(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_insert_sql_skips_auto_inc_pk() {
        let desc = rec_descriptor();
        let cols: Vec<_> = desc.insert_columns().collect();
        assert_eq!(
            insert_sql(&desc, &cols, InsertModifier::None),
            "INSERT INTO \"Rec\"(\"Name\") VALUES(?)"
        );
    }

    #[test]
    fn test_insert_or_replace_sql_writes_pk() {
        let desc = rec_descriptor();
        let cols: Vec<_> = desc.columns().iter().collect();
        assert_eq!(
            insert_sql(&desc, &cols, InsertModifier::OrReplace),
            "INSERT OR REPLACE INTO \"Rec\"(\"Id\",\"Name\") VALUES(?,?)"
        );
    }

    #[test]
    fn test_insert_sql_default_values_when_pk_only() {
        let desc = rec_descriptor();
        assert_eq!(
            insert_sql::<Rec>(&desc, &[], InsertModifier::None),
            "INSERT INTO \"Rec\" DEFAULT VALUES"
        );
    }

    #[test]
    fn test_classify_not_null_collects_null_bound_columns() {
        let desc = rec_descriptor();
        let cols: Vec<_> = desc.insert_columns().collect();
        let values = vec![Value::Null];
        let err = Error::Constraint(rowlite_core::ConstraintError {
            extended_code: Some(ffi::SQLITE_CONSTRAINT_NOTNULL),
            message: "NOT NULL constraint failed: Rec.Name".to_string(),
        });

        match classify_constraint(&desc, &cols, &values, err) {
            Error::NotNullConstraint(violation) => {
                assert_eq!(violation.table, "Rec");
                assert_eq!(violation.columns, vec!["Name"]);
            }
            other => panic!("expected NotNullConstraint, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_leaves_other_constraints_alone() {
        let desc = rec_descriptor();
        let cols: Vec<_> = desc.insert_columns().collect();
        let values = vec![Value::Text("x".to_string())];
        let err = Error::Constraint(rowlite_core::ConstraintError {
            extended_code: Some(ffi::SQLITE_CONSTRAINT_UNIQUE),
            message: "UNIQUE constraint failed".to_string(),
        });

        assert!(matches!(
            classify_constraint(&desc, &cols, &values, err),
            Error::Constraint(_)
        ));
    }
}
