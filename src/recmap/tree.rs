//! Tree backend (spec §4.B.1): the in-memory AVL [`OrderedStore`].

use super::avl::{AvlTree, Comparator};
use super::{OrderedStore, StoreCursor};
use crate::error::{RdbError, Result};
use std::sync::Arc;

pub struct TreeStore {
    tree: AvlTree,
}

impl TreeStore {
    pub fn new(cmp: Option<Comparator>) -> Self {
        let cmp = cmp.unwrap_or_else(|| Arc::new(|a: &[u8], b: &[u8]| a.cmp(b)) as Comparator);
        Self {
            tree: AvlTree::new(cmp),
        }
    }
}

impl OrderedStore for TreeStore {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.tree.insert(key.to_vec(), value.to_vec()) {
            Ok(())
        } else {
            Err(RdbError::KeyViolation)
        }
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key).map(|v| v.to_vec()))
    }

    fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.remove(key))
    }

    fn cursor(&self) -> Box<dyn StoreCursor + '_> {
        Box::new(TreeCursor {
            tree: &self.tree,
            pos: None,
        })
    }

    fn est_size(&self) -> Option<u64> {
        Some(self.tree.len() as u64)
    }
}

struct TreeCursor<'a> {
    tree: &'a AvlTree,
    pos: Option<usize>,
}

impl<'a> StoreCursor for TreeCursor<'a> {
    fn first(&mut self) -> Result<bool> {
        self.pos = self.tree.first();
        Ok(self.pos.is_some())
    }

    fn next(&mut self) -> Result<bool> {
        self.pos = match self.pos {
            Some(p) => self.tree.succ(p),
            None => self.tree.first(),
        };
        Ok(self.pos.is_some())
    }

    fn prev(&mut self) -> Result<bool> {
        self.pos = match self.pos {
            Some(p) => self.tree.pred(p),
            None => self.tree.last(),
        };
        Ok(self.pos.is_some())
    }

    fn seek(&mut self, key: &[u8]) -> Result<bool> {
        self.pos = self.tree.seek_ge(key);
        Ok(self
            .pos
            .map(|p| self.tree.entry(p).0 == key)
            .unwrap_or(false))
    }

    fn current(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        self.pos
            .map(|p| {
                let (k, v) = self.tree.entry(p);
                (k.to_vec(), v.to_vec())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_scans_in_order() {
        let mut store = TreeStore::new(None);
        for k in [3i32, 1, 4, 15, 9] {
            let kb = k.to_be_bytes();
            store.insert(&kb, &kb).unwrap();
        }
        let mut cur = store.cursor();
        let mut seen = Vec::new();
        let mut ok = cur.first().unwrap();
        while ok {
            let (k, _) = cur.current().unwrap();
            seen.push(i32::from_be_bytes(k.try_into().unwrap()));
            ok = cur.next().unwrap();
        }
        let mut expected = vec![3, 1, 4, 15, 9];
        expected.sort();
        assert_eq!(seen, expected);
    }
}
