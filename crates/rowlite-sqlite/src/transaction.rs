//! Transaction and savepoint nesting.
//!
//! Nesting is tracked by a depth counter mutated only through atomic
//! operations. Savepoint tokens embed the depth they were created at
//! (`S<rand>D<depth>`), which lets release/rollback-to validate that the
//! caller is not targeting a savepoint that has already been released,
//! without keeping an explicit stack. Releasing an inner savepoint releases
//! all enclosed ones.
//!
//! The depth counter and the engine command are not updated as one atomic
//! unit; one connection must not create savepoints from multiple threads
//! concurrently.

use crate::connection::Connection;
use crate::ffi;
use rand::Rng;
use rowlite_core::{Error, Result};
use std::sync::atomic::Ordering;

/// Result codes for which the engine's docs recommend a full rollback.
const FATAL_CODES: [i32; 5] = [
    ffi::SQLITE_IOERR,
    ffi::SQLITE_FULL,
    ffi::SQLITE_BUSY,
    ffi::SQLITE_NOMEM,
    ffi::SQLITE_INTERRUPT,
];

fn is_fatal(err: &Error) -> bool {
    err.engine_code()
        .is_some_and(|code| FATAL_CODES.contains(&(code & 0xff)))
}

fn is_busy(err: &Error) -> bool {
    err.engine_code()
        .is_some_and(|code| code & 0xff == ffi::SQLITE_BUSY)
}

impl Connection {
    /// Current transaction nesting depth. 0 means autocommit.
    #[must_use]
    pub fn transaction_depth(&self) -> i32 {
        self.transaction_depth.load(Ordering::Acquire)
    }

    /// Whether a transaction is active.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transaction_depth() > 0
    }

    /// Begin an outermost transaction.
    ///
    /// Fails with `InvalidState` when a transaction is already active; use
    /// [`Connection::save_transaction_point`] or
    /// [`Connection::run_in_transaction`] for nesting.
    pub fn begin_transaction(&self) -> Result<()> {
        self.ensure_open()?;
        if self
            .transaction_depth
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::InvalidState(
                "cannot begin a transaction while already in one".to_string(),
            ));
        }
        match self.execute_raw("BEGIN TRANSACTION") {
            Ok(()) => Ok(()),
            Err(e) => {
                if is_fatal(&e) {
                    self.force_rollback();
                } else {
                    self.transaction_depth.fetch_sub(1, Ordering::AcqRel);
                }
                Err(e)
            }
        }
    }

    /// Create a savepoint and return its token. Starts a transaction when
    /// none is active.
    pub fn save_transaction_point(&self) -> Result<String> {
        self.ensure_open()?;
        let depth = self.transaction_depth.fetch_add(1, Ordering::AcqRel);
        let name = format!("S{}D{}", rand::thread_rng().gen_range(0..32768), depth);
        match self.execute_raw(&format!("SAVEPOINT {}", name)) {
            Ok(()) => Ok(name),
            Err(e) => {
                if is_fatal(&e) {
                    self.force_rollback();
                } else {
                    self.transaction_depth.fetch_sub(1, Ordering::AcqRel);
                }
                Err(e)
            }
        }
    }

    /// Release a savepoint, promoting its work toward the outer scope.
    pub fn release(&self, savepoint: &str) -> Result<()> {
        self.savepoint_command("RELEASE", savepoint)
    }

    /// Roll back to a savepoint without exiting the transaction.
    /// `None` degrades to a full [`Connection::rollback`].
    pub fn rollback_to(&self, savepoint: Option<&str>) -> Result<()> {
        match savepoint {
            None => self.rollback(),
            Some(token) => self.savepoint_command("ROLLBACK TO", token),
        }
    }

    /// Roll back and exit the transaction entirely. A no-op outside a
    /// transaction.
    pub fn rollback(&self) -> Result<()> {
        let prior = self.transaction_depth.swap(0, Ordering::AcqRel);
        if prior > 0 {
            self.execute_raw("ROLLBACK")?;
        }
        Ok(())
    }

    /// Commit the transaction. A no-op outside a transaction. On commit
    /// failure a best-effort rollback runs before the error is returned.
    pub fn commit(&self) -> Result<()> {
        let prior = self.transaction_depth.swap(0, Ordering::AcqRel);
        if prior > 0 {
            if let Err(e) = self.execute_raw("COMMIT") {
                let _ = self.execute_raw("ROLLBACK");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Run `action` inside a savepoint scope: released on success, with a
    /// full rollback on any error. Nested scopes deliberately inherit the
    /// outer rollback.
    pub fn run_in_transaction<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let savepoint = self.save_transaction_point()?;
        match action(self) {
            Ok(value) => {
                self.release(&savepoint)?;
                Ok(value)
            }
            Err(e) => {
                self.rollback()?;
                Err(e)
            }
        }
    }

    fn savepoint_command(&self, command: &str, token: &str) -> Result<()> {
        self.ensure_open()?;
        let depth = parse_savepoint_depth(token)?;
        let current = self.transaction_depth();
        if depth < 0 || depth >= current {
            return Err(Error::invalid_argument(format!(
                "savepoint '{}' is not active at depth {}",
                token, current
            )));
        }
        // Releasing an inner savepoint rewinds over everything it encloses
        self.transaction_depth.store(depth, Ordering::Release);
        match self.execute_raw(&format!("{} {}", command, token)) {
            Ok(()) => Ok(()),
            Err(e) => {
                if is_busy(&e) {
                    self.force_rollback();
                }
                Err(e)
            }
        }
    }

    /// Failsafe exit: zero the counter, roll back, swallow secondary errors.
    pub(crate) fn force_rollback(&self) {
        let prior = self.transaction_depth.swap(0, Ordering::AcqRel);
        if prior > 0 {
            let _ = self.execute_raw("ROLLBACK");
        }
    }
}

/// Parse the depth a savepoint token was created at.
fn parse_savepoint_depth(token: &str) -> Result<i32> {
    let malformed =
        || Error::invalid_argument(format!("malformed savepoint token '{}'", token));
    let d_pos = token.find('D').ok_or_else(malformed)?;
    token[d_pos + 1..].parse::<i32>().map_err(|_| malformed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_savepoint_depth() {
        assert_eq!(parse_savepoint_depth("S123D0").unwrap(), 0);
        assert_eq!(parse_savepoint_depth("S9D14").unwrap(), 14);
    }

    #[test]
    fn test_parse_savepoint_depth_malformed() {
        assert!(parse_savepoint_depth("nonsense").is_err());
        assert!(parse_savepoint_depth("S123D").is_err());
        assert!(parse_savepoint_depth("S123Dxyz").is_err());
    }

    #[test]
    fn test_fatal_codes() {
        let busy = Error::engine(ffi::SQLITE_BUSY, "database is locked");
        let logic = Error::engine(ffi::SQLITE_ERROR, "SQL logic error");
        assert!(is_fatal(&busy));
        assert!(is_busy(&busy));
        assert!(!is_fatal(&logic));
    }
}
