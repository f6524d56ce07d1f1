//! Transaction (spec §4.E).
//!
//! A `Txn` is a scope over a set of backend mutations: it carries the
//! backend's own handle (if any), a parent pointer for nested
//! subtransactions, a list of resources deferred to close-on-commit, and
//! a retryable flag set when the backend reports a retryable conflict.
//! Grounded on `original_source/duro/rel/tx.c`'s `RDB_begin_tx` /
//! `RDB_commit` / `RDB_rollback` and the teacher's own `Pager` "begin
//! read/write transaction" calls in `core/lib.rs`.

use crate::error::{RdbError, Result};

/// The backend-specific transaction handle. Transient, in-memory record
/// maps never require one (spec §4.E: "transient ones do not [require a
/// handle]"), so `Null` is the handle every `tree` backend txn carries.
#[derive(Debug)]
pub enum TxnHandle {
    Null,
    #[cfg(feature = "remote")]
    Remote(foundationdb::Transaction),
}

/// A transaction scope (spec §3 "Transaction").
pub struct Txn {
    handle: TxnHandle,
    database: String,
    parent: Option<Box<Txn>>,
    /// Resource names (record maps, tables) whose close is deferred
    /// until this transaction commits.
    deferred_closes: Vec<String>,
    retryable: bool,
}

impl Txn {
    /// spec §4.E `begin(parent?)`.
    pub fn begin(database: impl Into<String>, parent: Option<Txn>) -> Result<Self> {
        let database = database.into();
        tracing::trace!(%database, "begin transaction");
        Ok(Self {
            handle: TxnHandle::Null,
            database,
            parent: parent.map(Box::new),
            deferred_closes: Vec::new(),
            retryable: false,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn parent(&self) -> Option<&Txn> {
        self.parent.as_deref()
    }

    pub fn is_subtransaction(&self) -> bool {
        self.parent.is_some()
    }

    pub fn handle(&self) -> &TxnHandle {
        &self.handle
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    /// Called by the backend integration layer when a conflict is
    /// reported as retryable (spec §4.E: "the retryable flag is set on
    /// the execution context").
    pub fn mark_retryable(&mut self) {
        self.retryable = true;
    }

    pub fn defer_close(&mut self, resource_name: impl Into<String>) {
        self.deferred_closes.push(resource_name.into());
    }

    /// spec §4.E `commit`. Consumes the transaction; returns the
    /// deferred-close list so the caller can actually release those
    /// resources now that the scope has ended successfully.
    pub fn commit(self) -> Result<Vec<String>> {
        tracing::trace!(database = %self.database, "commit transaction");
        match self.handle {
            TxnHandle::Null => {}
            #[cfg(feature = "remote")]
            TxnHandle::Remote(h) => {
                futures::executor::block_on(h.commit()).map_err(|e| RdbError::Concurrency {
                    retryable: e.is_retryable(),
                })?;
            }
        }
        Ok(self.deferred_closes)
    }

    /// spec §4.E `rollback`.
    pub fn rollback(self) -> Result<()> {
        tracing::trace!(database = %self.database, "rollback transaction");
        match self.handle {
            TxnHandle::Null => Ok(()),
            #[cfg(feature = "remote")]
            TxnHandle::Remote(h) => {
                h.cancel();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_subtransaction_tracks_parent() {
        let outer = Txn::begin("db", None).unwrap();
        let inner = Txn::begin("db", Some(outer)).unwrap();
        assert!(inner.is_subtransaction());
        assert_eq!(inner.parent().unwrap().database(), "db");
    }

    #[test]
    fn commit_returns_deferred_resources() {
        let mut t = Txn::begin("db", None).unwrap();
        t.defer_close("OLD_TABLE");
        let deferred = t.commit().unwrap();
        assert_eq!(deferred, vec!["OLD_TABLE".to_string()]);
    }
}
