//! Error types for rowlite operations.

use std::fmt;

/// The primary error type for all rowlite operations.
#[derive(Debug)]
pub enum Error {
    /// The database file could not be opened.
    CannotOpen(OpenError),
    /// A caller-supplied argument was rejected before reaching the engine.
    InvalidArgument(String),
    /// The operation is not valid in the current transaction phase.
    InvalidState(String),
    /// The operation is not supported by the target table
    /// (e.g. update on a table without a primary key).
    UnsupportedOperation(String),
    /// The database file carries a newer schema generation than this build targets.
    UnsupportedDowngrade(DowngradeError),
    /// Schema derivation failed (e.g. conflicting index uniqueness).
    Schema(SchemaError),
    /// A constraint was violated.
    Constraint(ConstraintError),
    /// A NOT NULL constraint was violated; carries the offending columns.
    NotNullConstraint(NotNullError),
    /// A column value could not be decoded into the target field.
    DataIntegrity(DataIntegrityError),
    /// Catch-all for engine failures, carrying the underlying result code.
    Engine(EngineError),
}

/// Details of a failed open attempt.
#[derive(Debug)]
pub struct OpenError {
    /// Path that was handed to the engine.
    pub path: String,
    /// Engine result code.
    pub code: i32,
    pub message: String,
}

/// A refused schema downgrade.
#[derive(Debug)]
pub struct DowngradeError {
    /// `user_version` found in the database file.
    pub db_version: i32,
    /// Version this build was configured for.
    pub target_version: i32,
}

#[derive(Debug)]
pub struct SchemaError {
    pub message: String,
}

#[derive(Debug)]
pub struct ConstraintError {
    /// Extended result code reported by the engine, when available.
    pub extended_code: Option<i32>,
    pub message: String,
}

/// A NOT NULL violation with the columns of the bound record whose
/// non-nullable fields held null values.
#[derive(Debug)]
pub struct NotNullError {
    pub table: &'static str,
    pub columns: Vec<&'static str>,
}

#[derive(Debug)]
pub struct DataIntegrityError {
    /// What the decode target expected.
    pub expected: &'static str,
    /// What was actually found.
    pub actual: String,
    /// Column the value came from, when known.
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct EngineError {
    /// Primary result code.
    pub code: i32,
    /// Extended result code, when it was queried.
    pub extended_code: Option<i32>,
    pub message: String,
}

impl Error {
    /// Shorthand for an [`Error::Engine`] without an extended code.
    pub fn engine(code: i32, message: impl Into<String>) -> Self {
        Error::Engine(EngineError {
            code,
            extended_code: None,
            message: message.into(),
        })
    }

    /// Shorthand for an [`Error::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Shorthand for an [`Error::Schema`].
    pub fn schema(message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            message: message.into(),
        })
    }

    /// Is this any flavor of constraint violation?
    #[must_use]
    pub const fn is_constraint(&self) -> bool {
        matches!(self, Error::Constraint(_) | Error::NotNullConstraint(_))
    }

    /// The engine result code behind this error, if one was recorded.
    #[must_use]
    pub fn engine_code(&self) -> Option<i32> {
        match self {
            Error::CannotOpen(e) => Some(e.code),
            Error::Constraint(e) => e.extended_code,
            Error::Engine(e) => Some(e.code),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CannotOpen(e) => {
                write!(
                    f,
                    "cannot open database '{}' (code {}): {}",
                    e.path, e.code, e.message
                )
            }
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Error::UnsupportedOperation(msg) => write!(f, "unsupported operation: {}", msg),
            Error::UnsupportedDowngrade(e) => write!(
                f,
                "database is at schema version {} but this build targets {}; downgrades are not supported",
                e.db_version, e.target_version
            ),
            Error::Schema(e) => write!(f, "schema error: {}", e.message),
            Error::Constraint(e) => write!(f, "constraint violated: {}", e.message),
            Error::NotNullConstraint(e) => write!(
                f,
                "NOT NULL constraint violated on \"{}\": {}",
                e.table,
                e.columns.join(", ")
            ),
            Error::DataIntegrity(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "cannot decode column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "cannot decode: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Engine(e) => {
                if let Some(ext) = e.extended_code {
                    write!(f, "engine error {} (extended {}): {}", e.code, ext, e.message)
                } else {
                    write!(f, "engine error {}: {}", e.code, e.message)
                }
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<DataIntegrityError> for Error {
    fn from(err: DataIntegrityError) -> Self {
        Error::DataIntegrity(err)
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        Error::Engine(err)
    }
}

/// Result type alias for rowlite operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_flags() {
        let plain = Error::Constraint(ConstraintError {
            extended_code: Some(2067),
            message: "UNIQUE constraint failed".to_string(),
        });
        let not_null = Error::NotNullConstraint(NotNullError {
            table: "items",
            columns: vec!["name"],
        });
        let engine = Error::engine(1, "SQL logic error");

        assert!(plain.is_constraint());
        assert!(not_null.is_constraint());
        assert!(!engine.is_constraint());
    }

    #[test]
    fn engine_code_extraction() {
        let err = Error::engine(5, "database is locked");
        assert_eq!(err.engine_code(), Some(5));

        let err = Error::InvalidState("already in a transaction".to_string());
        assert_eq!(err.engine_code(), None);
    }

    #[test]
    fn not_null_display_lists_columns() {
        let err = Error::NotNullConstraint(NotNullError {
            table: "items",
            columns: vec!["name", "tag"],
        });
        let rendered = err.to_string();
        assert!(rendered.contains("items"));
        assert!(rendered.contains("name, tag"));
    }

    #[test]
    fn downgrade_display_carries_versions() {
        let err = Error::UnsupportedDowngrade(DowngradeError {
            db_version: 5,
            target_version: 3,
        });
        let rendered = err.to_string();
        assert!(rendered.contains('5'));
        assert!(rendered.contains('3'));
    }
}
