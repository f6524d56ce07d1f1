//! Remote-KV backend (spec §4.B.2), grounded on
//! `original_source/duro/fdbrec/fdbrecmap.c`, `fdbcursor.c`, `fdbindex.c`.
//!
//! Maps a record map onto a namespaced subrange of a distributed ordered
//! KV store: key encoding `"t/" + name + "/" + encoded-primary-key`,
//! index encoding `"i/" + name + "/" + encoded-index-key` with the
//! primary key as the stored value. Every [`OrderedStore`] call opens
//! its own transaction and blocks on `futures::executor::block_on` per
//! spec §5's suspension-point model (no additional async runtime is
//! introduced). Backward traversal and seek are not supported by this
//! backend (spec §4.B.2) — [`RemoteStore::supports_backward_and_seek`]
//! reports `false` so callers route around it.

use super::{OrderedStore, StoreCursor};
use crate::error::{RdbError, Result};
use foundationdb::{Database, RangeOption};
use futures::executor::block_on;
use futures::StreamExt;

/// A record map's subrange of a shared [`Database`], namespaced by
/// `prefix` (`"t/<name>/"` or `"i/<name>/"`, spec §4.B.2).
pub struct RemoteStore {
    db: Database,
    prefix: Vec<u8>,
}

impl RemoteStore {
    pub fn new(db: Database, prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            db,
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut k = self.prefix.clone();
        k.extend_from_slice(key);
        k
    }

    /// Half-open range covering every key under this store's prefix,
    /// `[prefix, prefix+1)` (spec §4.B.2 "Range scans").
    fn prefix_range(&self) -> (Vec<u8>, Vec<u8>) {
        let start = self.prefix.clone();
        let mut end = self.prefix.clone();
        increment_last_byte(&mut end);
        (start, end)
    }
}

fn increment_last_byte(key: &mut Vec<u8>) {
    for i in (0..key.len()).rev() {
        if key[i] != 0xff {
            key[i] += 1;
            key.truncate(i + 1);
            return;
        }
    }
    // All bytes were 0xff: no finite successor exists short of appending,
    // which still yields a valid open upper bound for this backend.
    key.push(0x00);
}

fn map_fdb_err(e: foundationdb::FdbError) -> RdbError {
    // Spec §9 open question 4: unmapped backend codes fall through to
    // `RdbError::System`, never silently reused across distinct codes.
    if e.is_retryable() {
        RdbError::Concurrency { retryable: true }
    } else {
        RdbError::System(format!("foundationdb error {}: {}", e.code(), e))
    }
}

impl OrderedStore for RemoteStore {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let full = self.full_key(key);
        block_on(async {
            let trx = self.db.create_trx().map_err(map_fdb_err)?;
            trx.set(&full, value);
            trx.commit().await.map_err(|e| map_fdb_err(e.into()))?;
            Ok(())
        })
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let full = self.full_key(key);
        block_on(async {
            let trx = self.db.create_trx().map_err(map_fdb_err)?;
            let got = trx.get(&full, false).await.map_err(map_fdb_err)?;
            Ok(got.map(|v| v.to_vec()))
        })
    }

    fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let full = self.full_key(key);
        block_on(async {
            let trx = self.db.create_trx().map_err(map_fdb_err)?;
            let prior = trx.get(&full, false).await.map_err(map_fdb_err)?;
            if prior.is_some() {
                trx.clear(&full);
                trx.commit().await.map_err(|e| map_fdb_err(e.into()))?;
            }
            Ok(prior.map(|v| v.to_vec()))
        })
    }

    fn cursor(&self) -> Box<dyn StoreCursor + '_> {
        Box::new(RemoteCursor {
            store: self,
            rows: None,
            pos: 0,
        })
    }

    fn est_size(&self) -> Option<u64> {
        // spec §4.B `est_size`: "may be 0/unknown" for backends that
        // can't cheaply estimate row counts; a ranged KV store's count
        // estimate would itself require a full range read.
        None
    }

    fn supports_backward_and_seek(&self) -> bool {
        false
    }
}

/// Materializes the whole prefix range once per cursor (spec §4.B.2:
/// "Backward traversal and seek are not supported" — without a native
/// reverse range read, a one-shot forward materialization is the only
/// shape this backend can offer; [`OrderedStore::supports_backward_and_seek`]
/// tells callers not to rely on `prev`/`seek` against it).
struct RemoteCursor<'a> {
    store: &'a RemoteStore,
    rows: Option<Vec<(Vec<u8>, Vec<u8>)>>,
    pos: usize,
}

impl<'a> RemoteCursor<'a> {
    fn ensure_loaded(&mut self) -> Result<()> {
        if self.rows.is_some() {
            return Ok(());
        }
        let (start, end) = self.store.prefix_range();
        let prefix_len = self.store.prefix.len();
        let rows = block_on(async {
            let trx = self.store.db.create_trx().map_err(map_fdb_err)?;
            let opt = RangeOption {
                begin: foundationdb::KeySelector::first_greater_or_equal(start),
                end: foundationdb::KeySelector::first_greater_or_equal(end),
                ..RangeOption::default()
            };
            let mut stream = trx.get_ranges_keyvalues(opt, false);
            let mut out = Vec::new();
            while let Some(kv) = stream.next().await {
                let kv = kv.map_err(map_fdb_err)?;
                out.push((kv.key()[prefix_len..].to_vec(), kv.value().to_vec()));
            }
            Ok::<_, RdbError>(out)
        })?;
        self.rows = Some(rows);
        Ok(())
    }
}

impl<'a> StoreCursor for RemoteCursor<'a> {
    fn first(&mut self) -> Result<bool> {
        self.ensure_loaded()?;
        self.pos = 0;
        Ok(!self.rows.as_ref().unwrap().is_empty())
    }

    fn next(&mut self) -> Result<bool> {
        self.ensure_loaded()?;
        if self.rows.as_ref().unwrap().is_empty() {
            return Ok(false);
        }
        self.pos += 1;
        Ok(self.pos < self.rows.as_ref().unwrap().len())
    }

    fn prev(&mut self) -> Result<bool> {
        Err(RdbError::NotSupported(
            "backward traversal is not supported by the remote-KV backend".into(),
        ))
    }

    fn seek(&mut self, _key: &[u8]) -> Result<bool> {
        Err(RdbError::NotSupported(
            "seek is not supported by the remote-KV backend".into(),
        ))
    }

    fn current(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        self.rows.as_ref().and_then(|r| r.get(self.pos).cloned())
    }
}
